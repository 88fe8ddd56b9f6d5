use crate::stats::{attendance_rate, DashboardStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_TITLE: &str = "Attendo - Attendance Report";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassBar {
    pub class_name: String,
    pub present: u64,
    pub total: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartData {
    pub present_today: u64,
    pub absent_today: u64,
    pub total_today: u64,
    pub class_wise_attendance: Vec<ClassBar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableData {
    pub headers: Vec<String>,
    /// Cells may be strings or numbers; both render as text.
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportModel {
    pub chart_data: ChartData,
    pub table_data: TableData,
}

/// One in-scope class as it appears in the detail table.
#[derive(Debug, Clone)]
pub struct ClassLine {
    pub id: String,
    pub name: String,
    pub standard: String,
    pub teacher_name: Option<String>,
}

pub const TABLE_HEADERS: [&str; 7] = [
    "Class", "Standard", "Teacher", "Present", "Absent", "Total", "Rate",
];

pub fn build_model(stats: &DashboardStats, classes: &[ClassLine]) -> ReportModel {
    let by_class: HashMap<&str, _> = stats
        .class_wise_today
        .iter()
        .map(|c| (c.class_id.as_str(), c))
        .collect();

    let rows = classes
        .iter()
        .map(|line| {
            let (present, absent, total, rate) = by_class
                .get(line.id.as_str())
                .map(|c| (c.present, c.absent, c.total, c.percentage))
                .unwrap_or((0, 0, 0, 0));
            vec![
                serde_json::Value::from(line.name.clone()),
                serde_json::Value::from(line.standard.clone()),
                serde_json::Value::from(
                    line.teacher_name
                        .clone()
                        .unwrap_or_else(|| "Unassigned".to_string()),
                ),
                serde_json::Value::from(present),
                serde_json::Value::from(absent),
                serde_json::Value::from(total),
                serde_json::Value::from(format!("{}%", rate)),
            ]
        })
        .collect();

    ReportModel {
        chart_data: ChartData {
            present_today: stats.present_today as u64,
            absent_today: stats.absent_today as u64,
            total_today: stats.total_today as u64,
            class_wise_attendance: stats
                .class_wise_today
                .iter()
                .map(|c| ClassBar {
                    class_name: c.name.clone(),
                    present: c.present as u64,
                    total: c.total as u64,
                    percentage: f64::from(c.percentage),
                })
                .collect(),
        },
        table_data: TableData {
            headers: TABLE_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        },
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn bar_width(percentage: f64) -> f64 {
    if percentage.is_finite() {
        percentage.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

const STYLE: &str = "
      body { font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 0; padding: 20px; background-color: #f8f9fa; line-height: 1.6; }
      .container { max-width: 800px; margin: 0 auto; background: white; border-radius: 12px; box-shadow: 0 4px 6px rgba(0,0,0,0.1); overflow: hidden; }
      .header { background: #00ACC1; color: white; text-align: center; padding: 30px 20px; }
      .header h1 { margin: 0 0 10px 0; font-size: 28px; }
      .header p { margin: 0; opacity: 0.9; }
      .content { padding: 30px; }
      .section { margin-bottom: 40px; }
      .section h2 { color: #00ACC1; border-bottom: 2px solid #e0f2f1; padding-bottom: 10px; margin-bottom: 20px; }
      .chart-container { background: #f8f9fa; border-radius: 8px; padding: 20px; margin: 20px 0; }
      table { width: 100%; border-collapse: collapse; margin: 20px 0; font-size: 14px; }
      th { background: #00ACC1; color: white; padding: 12px; text-align: left; font-weight: 600; }
      td { padding: 10px 12px; border-bottom: 1px solid #e0e0e0; }
      tr:nth-child(even) { background-color: #f8f9fa; }
      @media screen and (max-width: 600px) {
        .container { margin: 10px; border-radius: 8px; }
        .content { padding: 15px; }
        table { font-size: 11px; }
        th, td { padding: 6px 3px; }
      }
";

fn today_bar(out: &mut String, label: &str, color: &str, count: u64, percentage: u32) {
    out.push_str(&format!(
        "<table style=\"margin: 15px auto; width: 300px; border-collapse: collapse;\"><tr>\
         <td style=\"width: 60px; font-size: 12px; font-weight: bold; color: {color}; text-align: right; padding-right: 10px;\">{label}:</td>\
         <td style=\"background: #e0e0e0; height: 20px; padding: 0;\"><div style=\"background: {color}; height: 100%; width: {percentage}%;\"></div></td>\
         <td style=\"width: 40px; font-size: 12px; text-align: left; padding-left: 10px;\">{count}</td>\
         </tr></table>\n"
    ));
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub title: String,
    /// Shown under the title when set.
    pub generated_on: Option<String>,
}

pub fn render_html(chart: &ChartData, table: &TableData, opts: &RenderOptions) -> String {
    let present_pct = attendance_rate(chart.present_today as usize, chart.total_today as usize);
    let absent_pct = attendance_rate(chart.absent_today as usize, chart.total_today as usize);

    let mut out = String::with_capacity(8 * 1024);
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n");
    out.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n<style>",
    );
    out.push_str(STYLE);
    out.push_str("</style>\n</head>\n<body>\n<div class=\"container\">\n");

    out.push_str("<div class=\"header\">\n");
    out.push_str(&format!("<h1>{}</h1>\n", escape_html(&opts.title)));
    if let Some(on) = &opts.generated_on {
        out.push_str(&format!("<p>Generated on {}</p>\n", escape_html(on)));
    }
    out.push_str("</div>\n<div class=\"content\">\n");

    out.push_str("<div class=\"section\">\n<h2>Attendance Analytics</h2>\n");
    out.push_str("<div class=\"chart-container\" style=\"text-align: center;\">\n");
    out.push_str(
        "<div style=\"font-size: 18px; font-weight: bold; color: #333; margin-bottom: 20px;\">Today's Attendance</div>\n",
    );
    out.push_str(&format!(
        "<div style=\"font-size: 24px; font-weight: bold; color: #333; margin-bottom: 10px;\">{}% Present Today</div>\n",
        present_pct
    ));
    out.push_str(&format!(
        "<div style=\"font-size: 14px; color: #666; margin-bottom: 20px;\">{} Present &bull; {} Absent &bull; {} Total</div>\n",
        chart.present_today, chart.absent_today, chart.total_today
    ));
    today_bar(&mut out, "Present", "#00acc1", chart.present_today, present_pct);
    today_bar(&mut out, "Absent", "#f44336", chart.absent_today, absent_pct);
    out.push_str("</div>\n");

    out.push_str("<div class=\"chart-container\">\n");
    out.push_str(
        "<h3 style=\"margin-top: 0; color: #333; text-align: center;\">Class-wise Attendance Today</h3>\n",
    );
    out.push_str("<div style=\"max-width: 600px; margin: 0 auto;\">\n");
    for bar in &chart.class_wise_attendance {
        out.push_str(&format!(
            "<div style=\"margin: 20px 0; display: table; width: 100%;\">\
             <div style=\"display: table-cell; width: 100px; font-size: 14px; font-weight: 600; color: #333; vertical-align: middle; padding-right: 15px;\">{name}</div>\
             <div style=\"display: table-cell; vertical-align: middle;\">\
             <div style=\"background: #e0e0e0; height: 30px; border-radius: 15px; position: relative; overflow: hidden;\">\
             <div style=\"background: #00acc1; height: 100%; width: {width}%; border-radius: 15px;\"></div>\
             <div style=\"position: absolute; top: 50%; left: 50%; transform: translate(-50%, -50%); font-size: 12px; font-weight: bold; color: #333;\">{pct}% ({present}/{total})</div>\
             </div></div></div>\n",
            name = escape_html(&bar.class_name),
            width = bar_width(bar.percentage),
            pct = bar.percentage,
            present = bar.present,
            total = bar.total,
        ));
    }
    out.push_str("</div>\n</div>\n</div>\n");

    out.push_str("<div class=\"section\">\n<h2>Detailed Attendance Data</h2>\n<table>\n<thead>\n<tr>");
    for h in &table.headers {
        out.push_str(&format!("<th>{}</th>", escape_html(h)));
    }
    out.push_str("</tr>\n</thead>\n<tbody>\n");
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape_html(&cell_text(cell))));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n</div>\n");

    out.push_str("</div>\n</div>\n</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{ClassDay, PieSlice};

    fn opts() -> RenderOptions {
        RenderOptions {
            title: DEFAULT_TITLE.to_string(),
            generated_on: Some("2025-03-03".to_string()),
        }
    }

    #[test]
    fn escapes_interpolated_text() {
        let chart = ChartData {
            class_wise_attendance: vec![ClassBar {
                class_name: "<b>A&B</b>".into(),
                present: 1,
                total: 2,
                percentage: 50.0,
            }],
            ..ChartData::default()
        };
        let table = TableData {
            headers: vec!["Name".into()],
            rows: vec![vec![serde_json::json!("O'Brien <x>")]],
        };
        let html = render_html(&chart, &table, &opts());
        assert!(html.contains("&lt;b&gt;A&amp;B&lt;/b&gt;"));
        assert!(html.contains("<td>O&#39;Brien &lt;x&gt;</td>"));
        assert!(!html.contains("<b>A&B</b>"));
    }

    #[test]
    fn zero_total_renders_zero_percent() {
        let html = render_html(&ChartData::default(), &TableData::default(), &opts());
        assert!(html.contains("0% Present Today"));
        assert!(html.contains("Generated on 2025-03-03"));
        assert!(!html.contains("NaN"));
    }

    #[test]
    fn numeric_cells_render_as_text() {
        let table = TableData {
            headers: vec!["Present".into()],
            rows: vec![vec![serde_json::json!(4), serde_json::Value::Null]],
        };
        let html = render_html(&ChartData::default(), &table, &opts());
        assert!(html.contains("<td>4</td><td></td>"));
    }

    #[test]
    fn model_lists_unmarked_classes_with_zeros() {
        let stats = DashboardStats {
            date: "2025-03-03".into(),
            total_students: 3,
            total_classes: 2,
            present_today: 1,
            absent_today: 1,
            total_today: 2,
            today_rate: 50,
            overall_attendance_rate: 50,
            today_pie_data: Vec::<PieSlice>::new(),
            class_wise_today: vec![ClassDay {
                class_id: "c1".into(),
                name: "Class A".into(),
                present: 1,
                absent: 1,
                total: 2,
                percentage: 50,
            }],
        };
        let lines = vec![
            ClassLine {
                id: "c1".into(),
                name: "Class A".into(),
                standard: "1st Standard".into(),
                teacher_name: Some("Ada Lovelace".into()),
            },
            ClassLine {
                id: "c2".into(),
                name: "Class B".into(),
                standard: "2nd Standard".into(),
                teacher_name: None,
            },
        ];
        let model = build_model(&stats, &lines);
        assert_eq!(model.table_data.headers.len(), 7);
        assert_eq!(model.table_data.rows.len(), 2);
        assert_eq!(model.table_data.rows[0][6], serde_json::json!("50%"));
        assert_eq!(model.table_data.rows[1][2], serde_json::json!("Unassigned"));
        assert_eq!(model.table_data.rows[1][5], serde_json::json!(0));
        assert_eq!(model.chart_data.class_wise_attendance.len(), 1);
        assert_eq!(model.chart_data.total_today, 2);
    }
}
