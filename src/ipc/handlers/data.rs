use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{format_date, get_optional_str, parse_date, row_exists, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::Status;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};

const SEED_PASSWORD: &str = "password";

const TEACHER_FIRST: [&str; 10] = [
    "Olivia", "Liam", "Emma", "Noah", "Ava", "Elijah", "Sophia", "James", "Mia", "Lucas",
];
const TEACHER_LAST: [&str; 10] = [
    "Bennett", "Carter", "Hughes", "Foster", "Griffin", "Hayes", "Jenkins", "Morgan", "Porter",
    "Reed",
];
const SUBJECTS: [&str; 10] = [
    "Mathematics",
    "Physics",
    "Chemistry",
    "Biology",
    "English",
    "History",
    "Geography",
    "Computer Science",
    "Art",
    "Music",
];
const STANDARDS: [&str; 10] = [
    "1st", "2nd", "3rd", "4th", "5th", "6th", "7th", "8th", "9th", "10th",
];
const STUDENT_FIRST: [&str; 20] = [
    "Aiden", "Bella", "Caleb", "Daisy", "Ethan", "Fiona", "Gavin", "Hazel", "Isaac", "Julia",
    "Kevin", "Luna", "Mason", "Nora", "Owen", "Piper", "Quinn", "Ruby", "Samuel", "Tessa",
];
const STUDENT_LAST: [&str; 20] = [
    "Adams", "Brooks", "Collins", "Dixon", "Ellis", "Fisher", "Graham", "Harper", "Irwin",
    "Jordan", "Kelly", "Lawson", "Mitchell", "Nolan", "Owens", "Parker", "Quincy", "Russell",
    "Stone", "Turner",
];

const MAX_STUDENTS_PER_CLASS: i64 = 20;
const MAX_DAYS: i64 = 366;

/// About 85% of (student, day) pairs come out present, reproducibly.
fn seeded_status(student_id: &str, date: &str) -> Status {
    let digest = Sha256::new()
        .chain_update(student_id.as_bytes())
        .chain_update(b"|")
        .chain_update(date.as_bytes())
        .finalize();
    let roll = u16::from_be_bytes([digest[0], digest[1]]) % 100;
    if roll >= 15 {
        Status::Present
    } else {
        Status::Absent
    }
}

fn student_name(index: usize) -> (&'static str, &'static str) {
    // (first, last) stays unique for the first 400 indices.
    let a = index % STUDENT_FIRST.len();
    let b = index / STUDENT_FIRST.len();
    (STUDENT_FIRST[a], STUDENT_LAST[(7 * a + b) % STUDENT_LAST.len()])
}

fn int_param(
    params: &serde_json::Value,
    key: &str,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, HandlerErr> {
    let n = match params.get(key) {
        None | Some(serde_json::Value::Null) => return Ok(default),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key)))?,
    };
    if !(min..=max).contains(&n) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be in {}..={}",
            key, min, max
        )));
    }
    Ok(n)
}

fn school_days(today: NaiveDate, days: i64) -> Vec<String> {
    (0..days)
        .map(|offset| today - Duration::days(offset))
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .map(format_date)
        .collect()
}

fn data_seed(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teachers = int_param(params, "teachers", 10, 1, TEACHER_FIRST.len() as i64)? as usize;
    let per_class =
        int_param(params, "studentsPerClass", 5, 1, MAX_STUDENTS_PER_CLASS)? as usize;
    let days = int_param(params, "days", 60, 1, MAX_DAYS)?;
    let today = match get_optional_str(params, "today")? {
        Some(d) => parse_date(&d)?,
        None => chrono::Local::now().date_naive(),
    };

    for table in ["students", "teachers", "classes", "attendance_records"] {
        if row_exists(conn, &format!("SELECT 1 FROM {} LIMIT 1", table), [])? {
            return Err(HandlerErr::validation(
                "workspace already has data; clear it before seeding",
            ));
        }
    }

    let now = db::now_timestamp();
    // Every demo account shares one password, so it is hashed once.
    let seed_hash = auth::hash_password(SEED_PASSWORD).map_err(HandlerErr::hash)?;
    let dates = school_days(today, days);
    let mut record_count = 0usize;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for t in 0..teachers {
        let teacher_id = format!("t{}", t + 1);
        let (first, last) = (TEACHER_FIRST[t], TEACHER_LAST[t]);
        tx.execute(
            "INSERT INTO teachers(id, first_name, last_name, email, password_hash, subject, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &teacher_id,
                first,
                last,
                format!("{}.{}@school.com", first.to_lowercase(), last.to_lowercase()),
                &seed_hash,
                SUBJECTS[t],
                &now,
            ),
        )
        .map_err(HandlerErr::insert("teachers"))?;

        let class_id = format!("c{}", t + 1);
        let class_letter = char::from(b'A' + t as u8);
        tx.execute(
            "INSERT INTO classes(id, name, standard, teacher_id, created_at) VALUES(?, ?, ?, ?, ?)",
            (
                &class_id,
                format!("Class {}", class_letter),
                format!("{} Standard", STANDARDS[t]),
                &teacher_id,
                &now,
            ),
        )
        .map_err(HandlerErr::insert("classes"))?;

        let mut members = Vec::with_capacity(per_class);
        for k in 0..per_class {
            let index = t * per_class + k;
            let student_id = format!("s{}", index + 1);
            let (first, last) = student_name(index);
            tx.execute(
                "INSERT INTO students(id, first_name, last_name, email, password_hash, roll_number, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &student_id,
                    first,
                    last,
                    format!("{}.{}@student.com", first.to_lowercase(), last.to_lowercase()),
                    &seed_hash,
                    format!("S{:03}", index + 1),
                    &now,
                ),
            )
            .map_err(HandlerErr::insert("students"))?;
            tx.execute(
                "INSERT INTO class_students(class_id, student_id, sort_order) VALUES(?, ?, ?)",
                (&class_id, &student_id, k as i64),
            )
            .map_err(HandlerErr::insert("class_students"))?;
            members.push(student_id);
        }

        for date in &dates {
            let record_id = format!("{}_{}", class_id, date);
            tx.execute(
                "INSERT INTO attendance_records(id, class_id, date, marked_at) VALUES(?, ?, ?, ?)",
                (&record_id, &class_id, date, &now),
            )
            .map_err(HandlerErr::insert("attendance_records"))?;
            for student_id in &members {
                tx.execute(
                    "INSERT INTO attendance_marks(record_id, student_id, status) VALUES(?, ?, ?)",
                    (&record_id, student_id, seeded_status(student_id, date).as_str()),
                )
                .map_err(HandlerErr::insert("attendance_marks"))?;
            }
            record_count += 1;
        }
    }
    tx.commit().map_err(HandlerErr::commit)?;

    tracing::info!(teachers, students = teachers * per_class, records = record_count, "demo data seeded");
    Ok(json!({
        "teachers": teachers,
        "students": teachers * per_class,
        "classes": teachers,
        "attendanceRecords": record_count,
    }))
}

fn data_clear(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for table in [
        "attendance_marks",
        "attendance_records",
        "class_students",
        "classes",
        "students",
        "teachers",
        "sessions",
    ] {
        tx.execute(&format!("DELETE FROM {}", table), [])
            .map_err(HandlerErr::delete(table))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    tracing::info!("workspace data cleared");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "data.seed" => Some(with_conn(state, req, data_seed)),
        "data.clear" => Some(with_conn(state, req, data_clear)),
        _ => None,
    }
}
