mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn admin_login_uses_settings_and_sessions_persist() {
    let workspace = temp_dir("attendod-auth-admin");
    let token = {
        let (mut child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );

        let e = request_err(
            &mut stdin,
            &mut reader,
            "2",
            "auth.login",
            json!({ "email": "admin@example.com", "password": "wrong", "role": "admin" }),
        );
        assert_eq!(e["code"], json!("invalid_credentials"));
        assert_eq!(e["message"], json!("Invalid email or password"));

        let login = request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "auth.login",
            json!({ "email": "Admin@Example.com", "password": "password", "role": "admin" }),
        );
        assert_eq!(login["user"]["id"], json!("admin"));
        assert_eq!(login["user"]["role"], json!("admin"));
        let token = login["token"].as_str().expect("token").to_string();

        drop(stdin);
        let _ = child.wait();
        token
    };

    // A fresh process sees the same session.
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let session = request_ok(&mut stdin, &mut reader, "2", "auth.session", json!({ "token": token }));
    assert_eq!(session["user"]["email"], json!("admin@example.com"));

    let _ = request_ok(&mut stdin, &mut reader, "3", "auth.logout", json!({ "token": token }));
    let session = request_ok(&mut stdin, &mut reader, "4", "auth.session", json!({ "token": token }));
    assert!(session["user"].is_null());

    // Changing the admin password retires the default.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "admin", "patch": { "password": "s3cret" } }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "email": "admin@example.com", "password": "password", "role": "admin" }),
    );
    assert_eq!(e["code"], json!("invalid_credentials"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "auth.login",
        json!({ "email": "admin@example.com", "password": "s3cret", "role": "admin" }),
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_and_student_logins_check_role_and_hash() {
    let workspace = temp_dir("attendod-auth-people");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "id": "t1", "firstName": "Ada", "lastName": "Byron", "email": "ada@school.com", "password": "pw-teacher" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "id": "s1", "firstName": "Sam", "lastName": "Lee", "email": "sam@student.com", "password": "pw-student", "rollNumber": "S001" }),
    );

    let login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "email": "ada@school.com", "password": "pw-teacher", "role": "teacher" }),
    );
    assert_eq!(login["user"]["id"], json!("t1"));
    assert_eq!(login["user"]["firstName"], json!("Ada"));
    assert!(login["user"].get("password").is_none());

    // Right password, wrong role.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "email": "ada@school.com", "password": "pw-teacher", "role": "student" }),
    );
    assert_eq!(e["code"], json!("invalid_credentials"));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "email": "sam@student.com", "password": "pw-student", "role": "student" }),
    );
    let token = student["token"].as_str().expect("token").to_string();

    let e = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "auth.login",
        json!({ "email": "sam@student.com", "password": "pw-student", "role": "janitor" }),
    );
    assert_eq!(e["code"], json!("bad_params"));

    // Deleting the user ends their sessions.
    let _ = request_ok(&mut stdin, &mut reader, "8", "students.delete", json!({ "studentId": "s1" }));
    let session = request_ok(&mut stdin, &mut reader, "9", "auth.session", json!({ "token": token }));
    assert!(session["user"].is_null());

    let _ = std::fs::remove_dir_all(workspace);
}
