use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    field_str, get_optional_str, get_patch, get_required_str, id_or_new, require_text,
    row_exists, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Class;
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use std::collections::{HashMap, HashSet};

const FIELDS: [&str; 4] = ["name", "standard", "teacherId", "students"];

fn class_json(class: &Class, teacher_name: Option<String>) -> serde_json::Value {
    let mut v = json!(class);
    v["studentCount"] = json!(class.students.len());
    v["teacherName"] = json!(teacher_name);
    v
}

fn teacher_names(conn: &Connection) -> Result<HashMap<String, String>, HandlerErr> {
    Ok(store::list_teachers(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .map(|t| {
            let name = t.display_name();
            (t.id, name)
        })
        .collect())
}

pub(super) fn load_class(conn: &Connection, id: &str) -> Result<Class, HandlerErr> {
    store::get_class(conn, id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("class not found"))
}

fn class_reply(conn: &Connection, id: &str) -> Result<serde_json::Value, HandlerErr> {
    let class = load_class(conn, id)?;
    let teacher_name = match class.teacher_id.as_deref() {
        Some(tid) => store::get_teacher(conn, tid)
            .map_err(HandlerErr::query)?
            .map(|t| t.display_name()),
        None => None,
    };
    Ok(json!({ "class": class_json(&class, teacher_name) }))
}

/// Points `class_id` at `teacher_id`. A teacher holds at most one class, so
/// any other class they hold is released first.
pub(super) fn assign_teacher(
    conn: &Connection,
    class_id: &str,
    teacher_id: Option<&str>,
) -> Result<(), HandlerErr> {
    if let Some(tid) = teacher_id {
        conn.execute(
            "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ? AND id <> ?",
            (tid, class_id),
        )
        .map_err(HandlerErr::update("classes"))?;
    }
    conn.execute(
        "UPDATE classes SET teacher_id = ? WHERE id = ?",
        (teacher_id, class_id),
    )
    .map_err(HandlerErr::update("classes"))?;
    Ok(())
}

/// Appends the student to the class roster; already a member is a no-op.
pub(super) fn add_member(conn: &Connection, class_id: &str, student_id: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO class_students(class_id, student_id, sort_order)
         VALUES(?1, ?2, (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM class_students WHERE class_id = ?1))
         ON CONFLICT(class_id, student_id) DO NOTHING",
        (class_id, student_id),
    )
    .map_err(HandlerErr::insert("class_students"))?;
    Ok(())
}

fn require_teacher(conn: &Connection, teacher_id: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", [teacher_id])? {
        return Err(HandlerErr::not_found("teacher not found")
            .with_details(json!({ "teacherId": teacher_id })));
    }
    Ok(())
}

fn require_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, "SELECT 1 FROM students WHERE id = ?", [student_id])? {
        return Err(HandlerErr::not_found("student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    Ok(())
}

fn validate_name_standard(
    conn: &Connection,
    body: &serde_json::Value,
    existing: Option<&Class>,
) -> Result<(String, String), HandlerErr> {
    let name = require_text(
        field_str(body, "name")?.or(existing.map(|c| c.name.as_str())),
        "Class name is required",
    )?;
    let standard = require_text(
        field_str(body, "standard")?.or(existing.map(|c| c.standard.as_str())),
        "Standard is required",
    )?;
    let editing_id = existing.map(|c| c.id.as_str()).unwrap_or("");
    if row_exists(
        conn,
        "SELECT 1 FROM classes WHERE lower(name) = lower(?) AND lower(standard) = lower(?) AND id <> ?",
        (&name, &standard, editing_id),
    )? {
        return Err(HandlerErr::validation(
            "Class name already exists for this standard",
        ));
    }
    Ok((name, standard))
}

fn parse_student_list(v: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params("students must be an array of ids"))?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let id = item
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("students must be an array of ids"))?;
        if seen.insert(id.to_string()) {
            out.push(id.to_string());
        }
    }
    Ok(out)
}

fn replace_members(conn: &Connection, class_id: &str, students: &[String]) -> Result<(), HandlerErr> {
    conn.execute("DELETE FROM class_students WHERE class_id = ?", [class_id])
        .map_err(HandlerErr::delete("class_students"))?;
    let mut stmt = conn
        .prepare("INSERT INTO class_students(class_id, student_id, sort_order) VALUES(?, ?, ?)")
        .map_err(HandlerErr::query)?;
    for (i, sid) in students.iter().enumerate() {
        stmt.execute((class_id, sid, i as i64))
            .map_err(HandlerErr::insert("class_students"))?;
    }
    Ok(())
}

fn classes_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let names = teacher_names(conn)?;
    let classes: Vec<serde_json::Value> = store::list_classes(conn)
        .map_err(HandlerErr::query)?
        .iter()
        .map(|c| {
            let teacher_name = c.teacher_id.as_ref().and_then(|t| names.get(t).cloned());
            class_json(c, teacher_name)
        })
        .collect();
    Ok(json!({ "classes": classes }))
}

fn classes_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "classId")?;
    class_reply(conn, &id)
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = id_or_new(params)?;
    if row_exists(conn, "SELECT 1 FROM classes WHERE id = ?", [&id])? {
        return Err(HandlerErr::validation("Id already exists"));
    }
    let (name, standard) = validate_name_standard(conn, params, None)?;
    conn.execute(
        "INSERT INTO classes(id, name, standard, teacher_id, created_at) VALUES(?, ?, ?, NULL, ?)",
        (&id, &name, &standard, db::now_timestamp()),
    )
    .map_err(HandlerErr::insert("classes"))?;
    tracing::info!(class_id = %id, "class created");
    class_reply(conn, &id)
}

fn classes_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "classId")?;
    let patch = get_patch(params, &FIELDS)?;
    let existing = load_class(conn, &id)?;
    let (name, standard) = validate_name_standard(conn, patch, Some(&existing))?;

    let teacher = match patch.get("teacherId") {
        None => None,
        Some(_) => {
            let tid = field_str(patch, "teacherId")?.map(str::to_string);
            if let Some(t) = tid.as_deref() {
                require_teacher(conn, t)?;
            }
            Some(tid)
        }
    };
    let students = match patch.get("students") {
        None => None,
        Some(v) => {
            let ids = parse_student_list(v)?;
            for sid in &ids {
                require_student(conn, sid)?;
            }
            Some(ids)
        }
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE classes SET name = ?, standard = ? WHERE id = ?",
        (&name, &standard, &id),
    )
    .map_err(HandlerErr::update("classes"))?;
    if let Some(tid) = &teacher {
        assign_teacher(&tx, &id, tid.as_deref())?;
    }
    if let Some(ids) = &students {
        replace_members(&tx, &id, ids)?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    class_reply(conn, &id)
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "classId")?;
    let class = load_class(conn, &id)?;
    if let Some(reason) = class.deletion_blocker() {
        return Err(HandlerErr::new("class_in_use", reason).with_details(json!({
            "classId": id,
            "teacherId": class.teacher_id,
            "studentCount": class.students.len(),
        })));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "DELETE FROM attendance_marks WHERE record_id IN (SELECT id FROM attendance_records WHERE class_id = ?)",
        [&id],
    )
    .map_err(HandlerErr::delete("attendance_marks"))?;
    let records_deleted = tx
        .execute("DELETE FROM attendance_records WHERE class_id = ?", [&id])
        .map_err(HandlerErr::delete("attendance_records"))?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&id])
        .map_err(HandlerErr::delete("classes"))?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(class_id = %id, records_deleted, "class deleted");
    Ok(json!({ "ok": true, "recordsDeleted": records_deleted }))
}

fn classes_assign_teacher(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "classId")?;
    load_class(conn, &id)?;
    let teacher_id = get_optional_str(params, "teacherId")?;
    if let Some(t) = teacher_id.as_deref() {
        require_teacher(conn, t)?;
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    assign_teacher(&tx, &id, teacher_id.as_deref())?;
    tx.commit().map_err(HandlerErr::commit)?;
    class_reply(conn, &id)
}

fn classes_assign_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    load_class(conn, &id)?;
    require_student(conn, &student_id)?;

    add_member(conn, &id, &student_id)?;
    class_reply(conn, &id)
}

fn classes_remove_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    load_class(conn, &id)?;

    conn.execute(
        "DELETE FROM class_students WHERE class_id = ? AND student_id = ?",
        (&id, &student_id),
    )
    .map_err(HandlerErr::delete("class_students"))?;
    class_reply(conn, &id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(with_conn(state, req, classes_list)),
        "classes.get" => Some(with_conn(state, req, classes_get)),
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.update" => Some(with_conn(state, req, classes_update)),
        "classes.delete" => Some(with_conn(state, req, classes_delete)),
        "classes.assignTeacher" => Some(with_conn(state, req, classes_assign_teacher)),
        "classes.assignStudent" => Some(with_conn(state, req, classes_assign_student)),
        "classes.removeStudent" => Some(with_conn(state, req, classes_remove_student)),
        _ => None,
    }
}
