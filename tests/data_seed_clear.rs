mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn seed_builds_demo_school_and_clear_keeps_settings() {
    let workspace = temp_dir("attendod-seed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // 2024-03-10 is a Sunday: 14 calendar days hold 10 weekdays.
    let seeded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "data.seed",
        json!({ "teachers": 3, "studentsPerClass": 4, "days": 14, "today": "2024-03-10" }),
    );
    assert_eq!(seeded["teachers"], json!(3));
    assert_eq!(seeded["students"], json!(12));
    assert_eq!(seeded["classes"], json!(3));
    assert_eq!(seeded["attendanceRecords"], json!(30));

    let classes = request_ok(&mut stdin, &mut reader, "3", "classes.list", json!({}));
    let first = &classes["classes"][0];
    assert_eq!(first["id"], json!("c1"));
    assert_eq!(first["name"], json!("Class A"));
    assert_eq!(first["standard"], json!("1st Standard"));
    assert_eq!(first["teacherId"], json!("t1"));
    assert_eq!(first["students"], json!(["s1", "s2", "s3", "s4"]));

    let students = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(students["students"][0]["rollNumber"], json!("S001"));
    let email = students["students"][0]["email"].as_str().expect("email");
    assert!(email.ends_with("@student.com"));

    let record = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.get",
        json!({ "classId": "c2", "date": "2024-03-08" }),
    );
    assert_eq!(record["record"]["id"], json!("c2_2024-03-08"));
    assert_eq!(record["record"]["attendance"].as_object().map(|m| m.len()), Some(4));
    let weekend = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.get",
        json!({ "classId": "c2", "date": "2024-03-09" }),
    );
    assert!(weekend["record"].is_null());

    // Seeded users can sign in with the demo password.
    let teacher_email = request_ok(&mut stdin, &mut reader, "7", "teachers.get", json!({ "teacherId": "t1" }))
        ["teacher"]["email"]
        .as_str()
        .expect("teacher email")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "auth.login",
        json!({ "email": teacher_email, "password": "password", "role": "teacher" }),
    );

    let e = request_err(&mut stdin, &mut reader, "9", "data.seed", json!({}));
    assert_eq!(e["code"], json!("validation_failed"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "setup.update",
        json!({ "section": "preferences", "patch": { "theme": "dark" } }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "11", "data.clear", json!({}));
    for (i, (method, key)) in [
        ("students.list", "students"),
        ("teachers.list", "teachers"),
        ("classes.list", "classes"),
        ("attendance.list", "records"),
    ]
    .iter()
    .enumerate()
    {
        let v = request_ok(&mut stdin, &mut reader, &format!("l{}", i), method, json!({}));
        assert_eq!(v[*key], json!([]), "{} not empty", method);
    }
    let setup = request_ok(&mut stdin, &mut reader, "12", "setup.get", json!({}));
    assert_eq!(setup["preferences"]["theme"], json!("dark"));

    // Empty again, so seeding works once more.
    let _ = request_ok(&mut stdin, &mut reader, "13", "data.seed", json!({ "teachers": 1, "days": 1, "today": "2024-03-04" }));

    let _ = std::fs::remove_dir_all(workspace);
}
