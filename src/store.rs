//! Typed reads over the workspace tables. Writes stay in the IPC handlers.

use crate::auth::Role;
use crate::model::{AttendanceRecord, Class, Status, Student, Teacher};
use rusqlite::types::Type;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};

// The assigned class is the first membership in class list order.
const STUDENT_SELECT: &str = "SELECT
       s.id,
       s.first_name,
       s.last_name,
       s.email,
       s.roll_number,
       (SELECT c.id FROM class_students cs JOIN classes c ON c.id = cs.class_id
         WHERE cs.student_id = s.id ORDER BY c.name, c.standard, c.id LIMIT 1)
     FROM students s";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        email: r.get(3)?,
        roll_number: r.get(4)?,
        class_id: r.get(5)?,
    })
}

pub fn list_students(conn: &Connection) -> rusqlite::Result<Vec<Student>> {
    let sql = format!("{} ORDER BY s.roll_number, s.id", STUDENT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], student_from_row)?;
    rows.collect()
}

pub fn get_student(conn: &Connection, id: &str) -> rusqlite::Result<Option<Student>> {
    let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    conn.query_row(&sql, [id], student_from_row).optional()
}

// A teacher holds at most one class; pick deterministically if data says otherwise.
const TEACHER_SELECT: &str = "SELECT
       t.id,
       t.first_name,
       t.last_name,
       t.email,
       t.subject,
       (SELECT c.id FROM classes c WHERE c.teacher_id = t.id ORDER BY c.name, c.id LIMIT 1)
     FROM teachers t";

fn teacher_from_row(r: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        email: r.get(3)?,
        subject: r.get(4)?,
        class_id: r.get(5)?,
    })
}

pub fn list_teachers(conn: &Connection) -> rusqlite::Result<Vec<Teacher>> {
    let sql = format!("{} ORDER BY t.last_name, t.first_name, t.id", TEACHER_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], teacher_from_row)?;
    rows.collect()
}

pub fn get_teacher(conn: &Connection, id: &str) -> rusqlite::Result<Option<Teacher>> {
    let sql = format!("{} WHERE t.id = ?", TEACHER_SELECT);
    conn.query_row(&sql, [id], teacher_from_row).optional()
}

pub fn class_members(conn: &Connection, class_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM class_students WHERE class_id = ? ORDER BY sort_order, student_id",
    )?;
    let rows = stmt.query_map([class_id], |r| r.get::<_, String>(0))?;
    rows.collect()
}

pub fn list_classes(conn: &Connection) -> rusqlite::Result<Vec<Class>> {
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT class_id, student_id FROM class_students ORDER BY class_id, sort_order, student_id",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (class_id, student_id) in rows {
            members.entry(class_id).or_default().push(student_id);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, name, standard, teacher_id FROM classes ORDER BY name, standard, id",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(Class {
            id: r.get(0)?,
            name: r.get(1)?,
            standard: r.get(2)?,
            teacher_id: r.get(3)?,
            students: Vec::new(),
        })
    })?;
    let mut classes = rows.collect::<Result<Vec<_>, _>>()?;
    for class in &mut classes {
        if let Some(ids) = members.remove(&class.id) {
            class.students = ids;
        }
    }
    Ok(classes)
}

pub fn get_class(conn: &Connection, id: &str) -> rusqlite::Result<Option<Class>> {
    let class = conn
        .query_row(
            "SELECT id, name, standard, teacher_id FROM classes WHERE id = ?",
            [id],
            |r| {
                Ok(Class {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    standard: r.get(2)?,
                    teacher_id: r.get(3)?,
                    students: Vec::new(),
                })
            },
        )
        .optional()?;
    match class {
        Some(mut c) => {
            c.students = class_members(conn, &c.id)?;
            Ok(Some(c))
        }
        None => Ok(None),
    }
}

/// Records filtered by class and/or date, ordered by date then class.
pub fn list_attendance(
    conn: &Connection,
    class_id: Option<&str>,
    date: Option<&str>,
) -> rusqlite::Result<Vec<AttendanceRecord>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&str> = Vec::new();
    if let Some(c) = class_id {
        clauses.push("r.class_id = ?");
        binds.push(c);
    }
    if let Some(d) = date {
        clauses.push("r.date = ?");
        binds.push(d);
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT r.id, r.class_id, r.date, r.marked_at FROM attendance_records r{} ORDER BY r.date, r.class_id",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut records = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            Ok(AttendanceRecord {
                id: r.get(0)?,
                class_id: r.get(1)?,
                date: r.get(2)?,
                marked_at: r.get(3)?,
                attendance: BTreeMap::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let sql = format!(
        "SELECT m.record_id, m.student_id, m.status
         FROM attendance_marks m
         JOIN attendance_records r ON r.id = m.record_id{}",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let marks = stmt
        .query_map(params_from_iter(binds.iter()), |r| {
            let raw: String = r.get(2)?;
            let status = Status::parse(&raw).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(2, "status".to_string(), Type::Text)
            })?;
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, status))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_record: HashMap<String, BTreeMap<String, Status>> = HashMap::new();
    for (record_id, student_id, status) in marks {
        by_record.entry(record_id).or_default().insert(student_id, status);
    }
    for record in &mut records {
        if let Some(m) = by_record.remove(&record.id) {
            record.attendance = m;
        }
    }
    Ok(records)
}

pub fn find_attendance(
    conn: &Connection,
    class_id: &str,
    date: &str,
) -> rusqlite::Result<Option<AttendanceRecord>> {
    Ok(list_attendance(conn, Some(class_id), Some(date))?
        .into_iter()
        .next())
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
}

fn credentials_table(role: Role) -> Option<&'static str> {
    match role {
        Role::Teacher => Some("teachers"),
        Role::Student => Some("students"),
        Role::Admin => None,
    }
}

pub fn find_credentials_by_email(
    conn: &Connection,
    role: Role,
    email: &str,
) -> rusqlite::Result<Option<Credentials>> {
    let Some(table) = credentials_table(role) else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT id, first_name, last_name, email, password_hash FROM {} WHERE lower(email) = lower(?) ORDER BY id LIMIT 1",
        table
    );
    conn.query_row(&sql, [email.trim()], credentials_from_row)
        .optional()
}

pub fn find_credentials_by_id(
    conn: &Connection,
    role: Role,
    id: &str,
) -> rusqlite::Result<Option<Credentials>> {
    let Some(table) = credentials_table(role) else {
        return Ok(None);
    };
    let sql = format!(
        "SELECT id, first_name, last_name, email, password_hash FROM {} WHERE id = ?",
        table
    );
    conn.query_row(&sql, [id], credentials_from_row).optional()
}

fn credentials_from_row(r: &Row<'_>) -> rusqlite::Result<Credentials> {
    Ok(Credentials {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        email: r.get(3)?,
        password_hash: r.get(4)?,
    })
}
