use crate::auth::Role;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    format_date, get_optional_str, get_required_date, get_required_str, with_conn, SearchFilter,
};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, DashboardStats, Scope};
use crate::store;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

const MAX_TREND_DAYS: i64 = 366;

/// Reads `role` / `userId` into the set of classes the caller may see.
pub(super) fn parse_scope(params: &serde_json::Value) -> Result<Scope, HandlerErr> {
    let raw = get_required_str(params, "role")?;
    match Role::parse(&raw) {
        Some(Role::Admin) => Ok(Scope::All),
        Some(Role::Teacher) => {
            let user_id = get_optional_str(params, "userId")?
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| HandlerErr::bad_params("userId is required for role teacher"))?;
            Ok(Scope::Teacher(user_id))
        }
        Some(Role::Student) => Err(HandlerErr::bad_params(
            "student dashboards are served by stats.student",
        )),
        None => Err(HandlerErr::bad_params("role must be one of: admin, teacher")
            .with_details(json!({ "role": raw }))),
    }
}

pub(super) fn load_dashboard(
    conn: &Connection,
    date: &str,
    scope: &Scope,
) -> Result<DashboardStats, HandlerErr> {
    let classes = store::list_classes(conn).map_err(HandlerErr::query)?;
    let students = store::list_students(conn).map_err(HandlerErr::query)?;
    let records = store::list_attendance(conn, None, None).map_err(HandlerErr::query)?;
    Ok(stats::dashboard(date, scope, &classes, &students, &records))
}

fn stats_dashboard(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = format_date(get_required_date(params, "date")?);
    let scope = parse_scope(params)?;
    let dash = load_dashboard(conn, &date, &scope)?;
    Ok(json!(dash))
}

fn parse_month(raw: &str) -> Result<(i32, u32), HandlerErr> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map(|d| {
            use chrono::Datelike;
            (d.year(), d.month())
        })
        .map_err(|_| HandlerErr::bad_params(format!("month must be YYYY-MM: {}", raw)))
}

fn stats_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if store::get_student(conn, &student_id)
        .map_err(HandlerErr::query)?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }
    let month = match get_optional_str(params, "month")? {
        Some(m) => Some(parse_month(&m)?),
        None => None,
    };

    let classes = store::list_classes(conn).map_err(HandlerErr::query)?;
    let records = store::list_attendance(conn, None, None).map_err(HandlerErr::query)?;
    let summary = stats::student_summary(&student_id, &classes, &records);

    let mut out = json!(summary);
    if let Some((year, month)) = month {
        out["calendar"] = json!(stats::month_calendar(year, month, &summary.days));
    }
    Ok(out)
}

fn stats_trend(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = parse_scope(params)?;
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    if to < from {
        return Err(HandlerErr::bad_params("to must not be before from"));
    }
    if (to - from).num_days() >= MAX_TREND_DAYS {
        return Err(HandlerErr::bad_params(format!(
            "range must be at most {} days",
            MAX_TREND_DAYS
        )));
    }

    let classes = store::list_classes(conn).map_err(HandlerErr::query)?;
    let records = store::list_attendance(conn, None, None).map_err(HandlerErr::query)?;
    let points = stats::trend(&scope, &classes, &records, from, to);
    Ok(json!({ "points": points }))
}

fn stats_class_students(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let scope = parse_scope(params)?;
    let search = SearchFilter::parse(params, &["studentName"])?;

    let classes = store::list_classes(conn).map_err(HandlerErr::query)?;
    let students = store::list_students(conn).map_err(HandlerErr::query)?;
    let teacher_names: HashMap<String, String> = store::list_teachers(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|t| (t.id.clone(), t.display_name()))
        .collect();
    let records = store::list_attendance(conn, None, None).map_err(HandlerErr::query)?;

    let rows: Vec<stats::StudentRow> =
        stats::class_student_rows(&scope, &classes, &students, &teacher_names, &records)
            .into_iter()
            .filter(|r| {
                search
                    .as_ref()
                    .map_or(true, |f| f.matches(&[("studentName", r.student_name.as_str())]))
            })
            .collect();
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.dashboard" => Some(with_conn(state, req, stats_dashboard)),
        "stats.student" => Some(with_conn(state, req, stats_student)),
        "stats.trend" => Some(with_conn(state, req, stats_trend)),
        "stats.classStudents" => Some(with_conn(state, req, stats_class_students)),
        _ => None,
    }
}
