mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn setup_get_update_roundtrip_and_validation() {
    let workspace = temp_dir("attendod-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(defaults["admin"]["email"], json!("admin@example.com"));
    assert_eq!(defaults["admin"]["passwordSet"], json!(false));
    assert!(defaults["admin"].get("passwordHash").is_none());
    assert_eq!(defaults["mail"]["enabled"], json!(true));
    assert_eq!(defaults["reports"]["title"], json!("Attendo - Attendance Report"));
    assert_eq!(defaults["preferences"]["theme"], json!("light"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "preferences", "patch": { "theme": "DARK" } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "admin", "patch": { "email": "principal@school.com", "password": "pw" } }),
    );

    let after = request_ok(&mut stdin, &mut reader, "5", "setup.get", json!({}));
    assert_eq!(after["preferences"]["theme"], json!("dark"));
    assert_eq!(after["admin"]["email"], json!("principal@school.com"));
    assert_eq!(after["admin"]["passwordSet"], json!(true));
    assert!(after["admin"].get("passwordHash").is_none());

    let bad = [
        json!({ "section": "preferences", "patch": { "theme": "blue" } }),
        json!({ "section": "mail", "patch": { "subjectPrefix": "x".repeat(65) } }),
        json!({ "section": "reports", "patch": { "title": "y".repeat(81) } }),
        json!({ "section": "reports", "patch": { "showGeneratedAt": "yes" } }),
        json!({ "section": "admin", "patch": { "email": "nobody" } }),
        json!({ "section": "admin", "patch": { "passwordHash": "$argon2id$v=19$x" } }),
        json!({ "section": "mail", "patch": { "smtpHost": "mail.local" } }),
        json!({ "section": "printer", "patch": {} }),
    ];
    for (i, params) in bad.iter().enumerate() {
        let e = request_err(&mut stdin, &mut reader, &format!("bad{}", i), "setup.update", params.clone());
        assert_eq!(e["code"], json!("bad_params"), "case {}: {}", i, params);
    }

    let _ = std::fs::remove_dir_all(workspace);
}
