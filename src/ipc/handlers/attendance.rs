use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    format_date, get_optional_str, get_required_date, get_required_str, parse_date, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Status;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

use super::classes::load_class;

fn parse_marks(v: Option<&serde_json::Value>) -> Result<BTreeMap<String, Status>, HandlerErr> {
    let obj = v
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("attendance must be an object of studentId -> status"))?;
    let mut marks = BTreeMap::new();
    let mut invalid = Vec::new();
    for (student_id, raw) in obj {
        match raw.as_str().and_then(Status::parse) {
            Some(status) => {
                marks.insert(student_id.clone(), status);
            }
            None => invalid.push(student_id.clone()),
        }
    }
    if !invalid.is_empty() {
        return Err(
            HandlerErr::validation("status must be present or absent")
                .with_details(json!({ "studentIds": invalid })),
        );
    }
    Ok(marks)
}

fn attendance_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId")?;
    let date = match get_optional_str(params, "date")? {
        Some(d) => Some(format_date(parse_date(&d)?)),
        None => None,
    };
    let records = store::list_attendance(conn, class_id.as_deref(), date.as_deref())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "records": records }))
}

fn attendance_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = format_date(get_required_date(params, "date")?);
    let record = store::find_attendance(conn, &class_id, &date).map_err(HandlerErr::query)?;
    Ok(json!({ "record": record }))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = format_date(get_required_date(params, "date")?);
    let marks = parse_marks(params.get("attendance"))?;

    let class = load_class(conn, &class_id)?;
    let outsiders: Vec<&String> = marks.keys().filter(|s| !class.has_student(s)).collect();
    if !outsiders.is_empty() {
        return Err(
            HandlerErr::validation("student is not a member of this class")
                .with_details(json!({ "classId": class_id, "studentIds": outsiders })),
        );
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_records WHERE class_id = ? AND date = ?",
            (&class_id, &date),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let created = existing.is_none();
    let record_id = existing.unwrap_or_else(|| format!("{}_{}", class_id, date));

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO attendance_records(id, class_id, date, marked_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, date) DO UPDATE SET marked_at = excluded.marked_at",
        (&record_id, &class_id, &date, db::now_timestamp()),
    )
    .map_err(HandlerErr::insert("attendance_records"))?;
    tx.execute("DELETE FROM attendance_marks WHERE record_id = ?", [&record_id])
        .map_err(HandlerErr::delete("attendance_marks"))?;
    {
        let mut stmt = tx
            .prepare("INSERT INTO attendance_marks(record_id, student_id, status) VALUES(?, ?, ?)")
            .map_err(HandlerErr::query)?;
        for (student_id, status) in &marks {
            stmt.execute((&record_id, student_id, status.as_str()))
                .map_err(HandlerErr::insert("attendance_marks"))?;
        }
    }
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(class_id = %class_id, date = %date, marks = marks.len(), created, "attendance marked");
    let record = store::find_attendance(conn, &class_id, &date).map_err(HandlerErr::query)?;
    Ok(json!({ "record": record, "created": created }))
}

fn attendance_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let record_id = get_required_str(params, "recordId")?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM attendance_marks WHERE record_id = ?", [&record_id])
        .map_err(HandlerErr::delete("attendance_marks"))?;
    let n = tx
        .execute("DELETE FROM attendance_records WHERE id = ?", [&record_id])
        .map_err(HandlerErr::delete("attendance_records"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("attendance record not found"));
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "ok": true }))
}

/// Class members with their mark for one day, in roll-number order.
fn attendance_roster(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = format_date(get_required_date(params, "date")?);
    let class = load_class(conn, &class_id)?;
    let record = store::find_attendance(conn, &class_id, &date).map_err(HandlerErr::query)?;

    let mut students: Vec<_> = store::list_students(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .filter(|s| class.has_student(&s.id))
        .collect();
    students.sort_by(|a, b| a.roll_number.cmp(&b.roll_number).then(a.id.cmp(&b.id)));

    let rows: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let status = record
                .as_ref()
                .and_then(|r| r.attendance.get(&s.id))
                .map(|st| st.as_str());
            json!({
                "studentId": s.id,
                "rollNumber": s.roll_number,
                "firstName": s.first_name,
                "lastName": s.last_name,
                "name": s.display_name(),
                "status": status,
            })
        })
        .collect();

    Ok(json!({
        "classId": class.id,
        "className": class.name,
        "standard": class.standard,
        "date": date,
        "recordId": record.as_ref().map(|r| r.id.clone()),
        "markedAt": record.as_ref().map(|r| r.marked_at.clone()),
        "students": rows,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        "attendance.get" => Some(with_conn(state, req, attendance_get)),
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.delete" => Some(with_conn(state, req, attendance_delete)),
        "attendance.roster" => Some(with_conn(state, req, attendance_roster)),
        _ => None,
    }
}
