use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    field_str, get_patch, get_required_str, id_or_new, require_text, row_exists, with_conn,
    SearchFilter,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use crate::store;
use rusqlite::Connection;
use serde_json::json;

use super::classes;

const SEARCH_COLUMNS: [&str; 4] = ["firstName", "lastName", "email", "rollNumber"];
const FIELDS: [&str; 6] = [
    "firstName",
    "lastName",
    "email",
    "password",
    "rollNumber",
    "classId",
];

struct StudentForm {
    first_name: String,
    last_name: String,
    email: String,
    roll_number: String,
    /// None on update means "keep the stored password".
    password: Option<String>,
    /// Outer None: leave memberships alone. Some(None): leave every class.
    class_id: Option<Option<String>>,
}

fn validate_student_form(
    conn: &Connection,
    body: &serde_json::Value,
    existing: Option<&Student>,
) -> Result<StudentForm, HandlerErr> {
    let first_name = require_text(
        field_str(body, "firstName")?.or(existing.map(|s| s.first_name.as_str())),
        "First name is required",
    )?;
    let last_name = require_text(
        field_str(body, "lastName")?.or(existing.map(|s| s.last_name.as_str())),
        "Last name is required",
    )?;
    let email = require_text(
        field_str(body, "email")?.or(existing.map(|s| s.email.as_str())),
        "Email is required",
    )?;
    let password = match field_str(body, "password")? {
        Some(p) => Some(require_text(Some(p), "Password is required")?),
        None if existing.is_none() => return Err(HandlerErr::validation("Password is required")),
        None => None,
    };
    let roll_number = require_text(
        field_str(body, "rollNumber")?.or(existing.map(|s| s.roll_number.as_str())),
        "Roll number is required",
    )?;

    let editing_id = existing.map(|s| s.id.as_str()).unwrap_or("");
    if row_exists(
        conn,
        "SELECT 1 FROM students WHERE lower(email) = lower(?) AND id <> ?",
        (&email, editing_id),
    )? {
        return Err(HandlerErr::validation("Email already exists"));
    }
    if row_exists(
        conn,
        "SELECT 1 FROM students WHERE roll_number = ? AND id <> ?",
        (&roll_number, editing_id),
    )? {
        return Err(HandlerErr::validation("Roll number already exists"));
    }

    let class_id = match body.get("classId") {
        None => None,
        Some(_) => match field_str(body, "classId")?.map(str::trim).filter(|s| !s.is_empty()) {
            None => Some(None),
            Some(cid) => {
                classes::load_class(conn, cid)?;
                Some(Some(cid.to_string()))
            }
        },
    };

    Ok(StudentForm {
        first_name,
        last_name,
        email,
        roll_number,
        password,
        class_id,
    })
}

fn load_student(conn: &Connection, id: &str) -> Result<Student, HandlerErr> {
    store::get_student(conn, id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

/// A chosen class becomes the student's only class.
fn apply_class_choice(
    conn: &Connection,
    student_id: &str,
    choice: &Option<Option<String>>,
) -> Result<(), HandlerErr> {
    let Some(choice) = choice else {
        return Ok(());
    };
    conn.execute(
        "DELETE FROM class_students WHERE student_id = ? AND class_id IS NOT ?",
        (student_id, choice.as_deref()),
    )
    .map_err(HandlerErr::delete("class_students"))?;
    if let Some(class_id) = choice {
        classes::add_member(conn, class_id, student_id)?;
    }
    Ok(())
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = SearchFilter::parse(params, &SEARCH_COLUMNS)?;
    let students: Vec<Student> = store::list_students(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .filter(|s| {
            search.as_ref().map_or(true, |f| {
                f.matches(&[
                    ("firstName", s.first_name.as_str()),
                    ("lastName", s.last_name.as_str()),
                    ("email", s.email.as_str()),
                    ("rollNumber", s.roll_number.as_str()),
                ])
            })
        })
        .collect();
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    Ok(json!({ "student": load_student(conn, &id)? }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = id_or_new(params)?;
    if row_exists(conn, "SELECT 1 FROM students WHERE id = ?", [&id])? {
        return Err(HandlerErr::validation("Id already exists"));
    }
    let form = validate_student_form(conn, params, None)?;
    let password_hash = auth::hash_password(form.password.as_deref().unwrap_or_default())
        .map_err(HandlerErr::hash)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO students(id, first_name, last_name, email, password_hash, roll_number, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &form.first_name,
            &form.last_name,
            &form.email,
            &password_hash,
            &form.roll_number,
            db::now_timestamp(),
        ),
    )
    .map_err(HandlerErr::insert("students"))?;
    apply_class_choice(&tx, &id, &form.class_id)?;
    tx.commit().map_err(HandlerErr::commit)?;
    tracing::info!(student_id = %id, "student created");
    Ok(json!({ "student": load_student(conn, &id)? }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    let patch = get_patch(params, &FIELDS)?;
    let existing = load_student(conn, &id)?;
    let form = validate_student_form(conn, patch, Some(&existing))?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "UPDATE students SET first_name = ?, last_name = ?, email = ?, roll_number = ? WHERE id = ?",
        (
            &form.first_name,
            &form.last_name,
            &form.email,
            &form.roll_number,
            &id,
        ),
    )
    .map_err(HandlerErr::update("students"))?;
    if let Some(password) = &form.password {
        tx.execute(
            "UPDATE students SET password_hash = ? WHERE id = ?",
            (auth::hash_password(password).map_err(HandlerErr::hash)?, &id),
        )
        .map_err(HandlerErr::update("students"))?;
    }
    apply_class_choice(&tx, &id, &form.class_id)?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "student": load_student(conn, &id)? }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "studentId")?;
    load_student(conn, &id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute("DELETE FROM class_students WHERE student_id = ?", [&id])
        .map_err(HandlerErr::delete("class_students"))?;
    tx.execute(
        "DELETE FROM sessions WHERE user_id = ? AND role = 'student'",
        [&id],
    )
    .map_err(HandlerErr::delete("sessions"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(HandlerErr::delete("students"))?;
    tx.commit().map_err(HandlerErr::commit)?;
    tracing::info!(student_id = %id, "student deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
