use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, format_date, get_optional_str, parse_date, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::mail::{self, Mailer, OutboxMailer, OutgoingMail};
use crate::report::{self, ChartData, ClassLine, RenderOptions, ReportModel, TableData};
use crate::stats::{self, Scope};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

use super::setup;
use super::stats::{load_dashboard, parse_scope};

const OUTBOX_DIR: &str = "outbox";

fn today() -> String {
    format_date(chrono::Local::now().date_naive())
}

fn date_or_today(params: &serde_json::Value) -> Result<String, HandlerErr> {
    match get_optional_str(params, "date")? {
        Some(d) => Ok(format_date(parse_date(&d)?)),
        None => Ok(today()),
    }
}

fn build_report_model(
    conn: &Connection,
    date: &str,
    scope: &Scope,
) -> Result<ReportModel, HandlerErr> {
    let dash = load_dashboard(conn, date, scope)?;
    let classes = store::list_classes(conn).map_err(HandlerErr::query)?;
    let names: HashMap<String, String> = store::list_teachers(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|t| {
            let name = t.display_name();
            (t.id, name)
        })
        .collect();
    let lines: Vec<ClassLine> = stats::scoped_classes(scope, &classes)
        .into_iter()
        .map(|c| ClassLine {
            id: c.id.clone(),
            name: c.name.clone(),
            standard: c.standard.clone(),
            teacher_name: c.teacher_id.as_ref().and_then(|t| names.get(t).cloned()),
        })
        .collect();
    Ok(report::build_model(&dash, &lines))
}

fn render_options(conn: &Connection) -> Result<RenderOptions, HandlerErr> {
    let settings = setup::report_settings(conn).map_err(HandlerErr::query)?;
    Ok(RenderOptions {
        title: settings.title,
        generated_on: settings.show_generated_at.then(today),
    })
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<T>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e))),
    }
}

fn reports_model(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = date_or_today(params)?;
    let scope = parse_scope(params)?;
    let model = build_report_model(conn, &date, &scope)?;
    Ok(json!(model))
}

fn reports_render_html(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let chart: ChartData = parse_payload(params, "chartData")?.unwrap_or_default();
    let table: TableData = parse_payload(params, "tableData")?.unwrap_or_default();
    let html = report::render_html(&chart, &table, &render_options(conn)?);
    Ok(json!({ "html": html }))
}

fn parse_emails(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let raw = params
        .get("emails")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("emails must be an array of strings"))?;
    let emails = raw
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params("emails must be an array of strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    mail::normalize_recipients(&emails).map_err(HandlerErr::validation)
}

/// Builds and hands one report to `mailer`. Mailer failures are reported in
/// the result, not raised.
fn send_report(
    conn: &Connection,
    mailer: &dyn Mailer,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let recipients = parse_emails(params)?;
    let date = date_or_today(params)?;

    let chart: Option<ChartData> = parse_payload(params, "chartData")?;
    let table: Option<TableData> = parse_payload(params, "tableData")?;
    let (chart, table) = match (chart, table) {
        (Some(c), Some(t)) => (c, t),
        (chart, table) => {
            let scope = if params.get("role").filter(|v| !v.is_null()).is_some() {
                parse_scope(params)?
            } else {
                Scope::All
            };
            let model = build_report_model(conn, &date, &scope)?;
            (
                chart.unwrap_or(model.chart_data),
                table.unwrap_or(model.table_data),
            )
        }
    };

    let settings = setup::mail_settings(conn).map_err(HandlerErr::query)?;
    if !settings.enabled {
        tracing::warn!("report not sent: mail is disabled in settings");
        return Ok(json!({ "success": false, "message": "Failed to send email" }));
    }

    let html = report::render_html(&chart, &table, &render_options(conn)?);
    let subject = format!("{} Attendance Report - {}", settings.subject_prefix, date)
        .trim()
        .to_string();
    let message = OutgoingMail {
        from: settings.from_address,
        to: recipients,
        subject,
        html,
    };

    match mailer.send(&message) {
        Ok(message_id) => {
            tracing::info!(%message_id, recipients = message.to.len(), "report queued");
            Ok(json!({
                "success": true,
                "message": "Report sent successfully",
                "messageId": message_id
            }))
        }
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "report send failed");
            Ok(json!({ "success": false, "message": "Failed to send email" }))
        }
    }
}

fn outbox_mailer(workspace: &Path) -> OutboxMailer {
    OutboxMailer::new(workspace.join(OUTBOX_DIR))
}

fn handle_reports_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| {
        let workspace = state
            .workspace
            .as_deref()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
        send_report(conn, &outbox_mailer(workspace), &req.params)
    });
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.model" => Some(with_conn(state, req, reports_model)),
        "reports.renderHtml" => Some(with_conn(state, req, reports_render_html)),
        "reports.send" => Some(handle_reports_send(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingMailer {
        sent: RefCell<Vec<OutgoingMail>>,
        fail: bool,
    }

    impl Mailer for RecordingMailer {
        fn send(&self, mail: &OutgoingMail) -> anyhow::Result<String> {
            if self.fail {
                anyhow::bail!("relay unavailable");
            }
            self.sent.borrow_mut().push(mail.clone());
            Ok("m1".into())
        }
    }

    fn temp_conn(tag: &str) -> (std::path::PathBuf, Connection) {
        let dir = std::env::temp_dir().join(format!(
            "attendod-reports-{}-{}",
            tag,
            uuid::Uuid::new_v4()
        ));
        let conn = crate::db::open_db(&dir).expect("open db");
        (dir, conn)
    }

    fn payload() -> serde_json::Value {
        json!({
            "emails": ["Ops@Example.com", "ops@example.com", " head@school.com "],
            "date": "2024-03-04",
            "chartData": { "presentToday": 3, "absentToday": 1, "totalToday": 4, "classWiseAttendance": [] },
            "tableData": { "headers": ["Class"], "rows": [["Class A"]] }
        })
    }

    #[test]
    fn send_dedupes_recipients_and_builds_subject() {
        let (dir, conn) = temp_conn("ok");
        let mailer = RecordingMailer { sent: RefCell::new(Vec::new()), fail: false };
        let out = send_report(&conn, &mailer, &payload()).expect("send");
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["message"], json!("Report sent successfully"));

        let sent = mailer.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["Ops@Example.com".to_string(), "head@school.com".to_string()]);
        assert_eq!(sent[0].subject, "Attendo Attendance Report - 2024-03-04");
        assert!(sent[0].html.contains("Class A"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn mailer_failure_is_reported_not_raised() {
        let (dir, conn) = temp_conn("fail");
        let mailer = RecordingMailer { sent: RefCell::new(Vec::new()), fail: true };
        let out = send_report(&conn, &mailer, &payload()).expect("send");
        assert_eq!(out, json!({ "success": false, "message": "Failed to send email" }));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_recipient_list_is_a_validation_error() {
        let (dir, conn) = temp_conn("empty");
        let mailer = RecordingMailer { sent: RefCell::new(Vec::new()), fail: false };
        let mut params = payload();
        params["emails"] = json!([]);
        let e = send_report(&conn, &mailer, &params).expect_err("must fail");
        assert_eq!(e.code, "validation_failed");
        assert_eq!(e.message, "Please add at least one email address");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn null_role_builds_the_whole_school_report() {
        let (dir, conn) = temp_conn("null-role");
        conn.execute(
            "INSERT INTO classes(id, name, standard, teacher_id, created_at)
             VALUES('c1', 'Class Z', '5th Standard', NULL, '2024-03-01T00:00:00.000Z')",
            [],
        )
        .expect("insert class");
        let mailer = RecordingMailer { sent: RefCell::new(Vec::new()), fail: false };
        let params = json!({ "emails": ["head@school.com"], "date": "2024-03-04", "role": null });
        let out = send_report(&conn, &mailer, &params).expect("send");
        assert_eq!(out["success"], json!(true));
        assert!(mailer.sent.borrow()[0].html.contains("Class Z"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
