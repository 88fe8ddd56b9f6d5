use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    field_str, get_patch, get_required_str, id_or_new, require_text, row_exists, with_conn,
    SearchFilter,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Teacher;
use crate::store;
use rusqlite::Connection;
use serde_json::json;

use super::classes;

const SEARCH_COLUMNS: [&str; 4] = ["firstName", "lastName", "email", "subject"];
const FIELDS: [&str; 6] = [
    "firstName",
    "lastName",
    "email",
    "password",
    "subject",
    "classId",
];

struct TeacherForm {
    first_name: String,
    last_name: String,
    email: String,
    password: Option<String>,
    subject: Option<String>,
    /// Outer None: leave assignment alone. Some(None): release the class.
    class_id: Option<Option<String>>,
}

fn validate_teacher_form(
    conn: &Connection,
    body: &serde_json::Value,
    existing: Option<&Teacher>,
) -> Result<TeacherForm, HandlerErr> {
    let first_name = require_text(
        field_str(body, "firstName")?.or(existing.map(|t| t.first_name.as_str())),
        "First name is required",
    )?;
    let last_name = require_text(
        field_str(body, "lastName")?.or(existing.map(|t| t.last_name.as_str())),
        "Last name is required",
    )?;
    let email = require_text(
        field_str(body, "email")?.or(existing.map(|t| t.email.as_str())),
        "Email is required",
    )?;
    let password = match field_str(body, "password")? {
        Some(p) => Some(require_text(Some(p), "Password is required")?),
        None if existing.is_none() => return Err(HandlerErr::validation("Password is required")),
        None => None,
    };

    let subject = match body.get("subject") {
        Some(_) => field_str(body, "subject")?
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
        None => existing.and_then(|t| t.subject.clone()),
    };

    let editing_id = existing.map(|t| t.id.as_str()).unwrap_or("");
    if row_exists(
        conn,
        "SELECT 1 FROM teachers WHERE lower(email) = lower(?) AND id <> ?",
        (&email, editing_id),
    )? {
        return Err(HandlerErr::validation("Email already exists"));
    }

    let class_id = match body.get("classId") {
        None => None,
        Some(_) => match field_str(body, "classId")?.map(str::trim).filter(|s| !s.is_empty()) {
            None => Some(None),
            Some(cid) => {
                let class = store::get_class(conn, cid)
                    .map_err(HandlerErr::query)?
                    .ok_or_else(|| HandlerErr::not_found("class not found"))?;
                if class
                    .teacher_id
                    .as_deref()
                    .is_some_and(|t| t != editing_id)
                {
                    return Err(HandlerErr::validation(
                        "This class already has a teacher assigned",
                    ));
                }
                Some(Some(cid.to_string()))
            }
        },
    };

    Ok(TeacherForm {
        first_name,
        last_name,
        email,
        password,
        subject,
        class_id,
    })
}

fn load_teacher(conn: &Connection, id: &str) -> Result<Teacher, HandlerErr> {
    store::get_teacher(conn, id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("teacher not found"))
}

fn apply_class_choice(
    conn: &Connection,
    teacher_id: &str,
    choice: &Option<Option<String>>,
) -> Result<(), HandlerErr> {
    match choice {
        None => Ok(()),
        Some(Some(class_id)) => classes::assign_teacher(conn, class_id, Some(teacher_id)),
        Some(None) => {
            conn.execute(
                "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?",
                [teacher_id],
            )
            .map_err(HandlerErr::update("classes"))?;
            Ok(())
        }
    }
}

fn teachers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = SearchFilter::parse(params, &SEARCH_COLUMNS)?;
    let teachers: Vec<Teacher> = store::list_teachers(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .filter(|t| {
            search.as_ref().map_or(true, |f| {
                f.matches(&[
                    ("firstName", t.first_name.as_str()),
                    ("lastName", t.last_name.as_str()),
                    ("email", t.email.as_str()),
                    ("subject", t.subject.as_deref().unwrap_or("")),
                ])
            })
        })
        .collect();
    Ok(json!({ "teachers": teachers }))
}

fn teachers_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "teacherId")?;
    Ok(json!({ "teacher": load_teacher(conn, &id)? }))
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = id_or_new(params)?;
    if row_exists(conn, "SELECT 1 FROM teachers WHERE id = ?", [&id])? {
        return Err(HandlerErr::validation("Id already exists"));
    }
    let form = validate_teacher_form(conn, params, None)?;
    let password_hash = auth::hash_password(form.password.as_deref().unwrap_or_default())
        .map_err(HandlerErr::hash)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO teachers(id, first_name, last_name, email, password_hash, subject, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &form.first_name,
            &form.last_name,
            &form.email,
            &password_hash,
            &form.subject,
            db::now_timestamp(),
        ),
    )
    .map_err(HandlerErr::insert("teachers"))?;
    apply_class_choice(&tx, &id, &form.class_id)?;
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(teacher_id = %id, "teacher created");
    Ok(json!({ "teacher": load_teacher(conn, &id)? }))
}

fn teachers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "teacherId")?;
    let patch = get_patch(params, &FIELDS)?;
    let existing = load_teacher(conn, &id)?;
    let form = validate_teacher_form(conn, patch, Some(&existing))?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE teachers SET first_name = ?, last_name = ?, email = ?, subject = ? WHERE id = ?",
        (
            &form.first_name,
            &form.last_name,
            &form.email,
            &form.subject,
            &id,
        ),
    )
    .map_err(HandlerErr::update("teachers"))?;
    if let Some(password) = &form.password {
        tx.execute(
            "UPDATE teachers SET password_hash = ? WHERE id = ?",
            (auth::hash_password(password).map_err(HandlerErr::hash)?, &id),
        )
        .map_err(HandlerErr::update("teachers"))?;
    }
    apply_class_choice(&tx, &id, &form.class_id)?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "teacher": load_teacher(conn, &id)? }))
}

fn teachers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "teacherId")?;
    load_teacher(conn, &id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?",
        [&id],
    )
    .map_err(HandlerErr::update("classes"))?;
    tx.execute(
        "DELETE FROM sessions WHERE user_id = ? AND role = 'teacher'",
        [&id],
    )
    .map_err(HandlerErr::delete("sessions"))?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [&id])
        .map_err(HandlerErr::delete("teachers"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    tracing::info!(teacher_id = %id, "teacher deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(with_conn(state, req, teachers_list)),
        "teachers.get" => Some(with_conn(state, req, teachers_get)),
        "teachers.create" => Some(with_conn(state, req, teachers_create)),
        "teachers.update" => Some(with_conn(state, req, teachers_update)),
        "teachers.delete" => Some(with_conn(state, req, teachers_delete)),
        _ => None,
    }
}
