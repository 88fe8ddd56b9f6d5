mod test_support;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn outbox_files(workspace: &std::path::Path) -> Vec<std::path::PathBuf> {
    let dir = workspace.join("outbox");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("eml"))
        .collect();
    files.sort();
    files
}

fn html_body(eml: &str) -> String {
    let (_, body) = eml.split_once("\r\n\r\n").expect("header/body split");
    let joined: String = body.split("\r\n").collect();
    String::from_utf8(STANDARD.decode(joined).expect("base64 body")).expect("utf8 body")
}

#[test]
fn send_report_spools_one_message_per_send() {
    let workspace = temp_dir("attendod-report-send");
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
        "setup.update",
        json!({ "section": "mail", "patch": { "fromAddress": "office@school.com", "subjectPrefix": "[Attendo]" } }),
    );

    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.send",
        json!({
            "emails": ["head@school.com", "HEAD@school.com", "board@school.com"],
            "date": "2024-03-04",
            "chartData": {
                "presentToday": 3,
                "absentToday": 1,
                "totalToday": 4,
                "classWiseAttendance": [{ "className": "Class <A>", "present": 3, "total": 4, "percentage": 75 }]
            },
            "tableData": { "headers": ["Class", "Rate"], "rows": [["Class <A>", "75%"]] }
        }),
    );
    assert_eq!(sent["success"], json!(true));
    assert_eq!(sent["message"], json!("Report sent successfully"));

    let files = outbox_files(&workspace);
    assert_eq!(files.len(), 1);
    let eml = std::fs::read_to_string(&files[0]).expect("read eml");
    assert!(eml.contains("From: office@school.com\r\n"));
    assert!(eml.contains("To: head@school.com, board@school.com\r\n"));
    assert!(eml.contains("Subject: [Attendo] Attendance Report - 2024-03-04\r\n"));
    let html = html_body(&eml);
    assert!(html.contains("Class &lt;A&gt;"));
    assert!(!html.contains("Class <A>"));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "reports.send",
        json!({ "emails": ["not-an-address"] }),
    );
    assert_eq!(e["code"], json!("validation_failed"));
    assert_eq!(outbox_files(&workspace).len(), 1);

    // Without chart/table data the report is built from stored attendance.
    let built = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.send",
        json!({ "emails": ["head@school.com"], "date": "2024-03-04", "role": "admin" }),
    );
    assert_eq!(built["success"], json!(true));
    assert_eq!(outbox_files(&workspace).len(), 2);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "mail", "patch": { "enabled": false } }),
    );
    let off = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.send",
        json!({ "emails": ["head@school.com"], "date": "2024-03-04" }),
    );
    assert_eq!(off, json!({ "success": false, "message": "Failed to send email" }));
    assert_eq!(outbox_files(&workspace).len(), 2);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn render_html_uses_report_settings() {
    let workspace = temp_dir("attendod-report-render");
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
        "setup.update",
        json!({ "section": "reports", "patch": { "title": "Riverside & Co", "showGeneratedAt": false } }),
    );
    let rendered = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.renderHtml",
        json!({ "chartData": { "presentToday": 0, "absentToday": 0, "totalToday": 0 }, "tableData": { "headers": [], "rows": [] } }),
    );
    let html = rendered["html"].as_str().expect("html");
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("Riverside &amp; Co"));
    assert!(!html.contains("Generated on"));

    let _ = std::fs::remove_dir_all(workspace);
}
