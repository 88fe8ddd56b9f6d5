use anyhow::{anyhow, Context};
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OpenFlags};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/attendod.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "attendod-workspace-v1";

/// Tables a snapshot must carry before it may replace a live school.
const REQUIRED_TABLES: [&str; 6] = [
    "students",
    "teachers",
    "classes",
    "class_students",
    "attendance_records",
    "attendance_marks",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub students: i64,
    pub teachers: i64,
    pub classes: i64,
    pub attendance_records: i64,
}

impl TableCounts {
    pub fn to_json(self) -> serde_json::Value {
        json!({
            "students": self.students,
            "teachers": self.teachers,
            "classes": self.classes,
            "attendanceRecords": self.attendance_records,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub counts: TableCounts,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub exported_at: Option<String>,
    pub counts: TableCounts,
}

/// Removes a scratch file when dropped, whichever way the caller leaves.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        let _ = std::fs::remove_file(&path);
        Self(path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Opens a snapshot read-only, checks it is an intact attendance database
/// and counts its rows.
pub fn inspect_snapshot(path: &Path) -> anyhow::Result<TableCounts> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open snapshot {}", path.to_string_lossy()))?;

    let integrity: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .context("snapshot is not a readable SQLite database")?;
    if integrity != "ok" {
        return Err(anyhow!("snapshot failed integrity check: {}", integrity));
    }

    for table in REQUIRED_TABLES {
        let present: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |r| r.get(0),
            )
            .context("failed to read snapshot schema")?;
        if present == 0 {
            return Err(anyhow!("snapshot is missing table {}", table));
        }
    }

    let count = |table: &str| -> anyhow::Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .with_context(|| format!("failed to count {}", table))
    };
    Ok(TableCounts {
        students: count("students")?,
        teachers: count("teachers")?,
        classes: count("classes")?,
        attendance_records: count("attendance_records")?,
    })
}

/// Writes a zip holding a manifest and a consistent snapshot of `conn`.
/// The bundle appears at `out_path` only once it is complete.
pub fn export_workspace_bundle(conn: &Connection, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot = ScratchFile::new(with_suffix(out_path, ".snapshot"));
    conn.backup(DatabaseName::Main, &snapshot.0, None::<fn(Progress)>)
        .context("failed to snapshot workspace database")?;
    let counts = inspect_snapshot(&snapshot.0)?;

    let partial = ScratchFile::new(with_suffix(out_path, ".partial"));
    {
        let out_file = File::create(&partial.0).with_context(|| {
            format!("failed to create output file {}", partial.0.to_string_lossy())
        })?;
        let mut zip = ZipWriter::new(out_file);
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let manifest = json!({
            "format": BUNDLE_FORMAT_V1,
            "version": 1,
            "appVersion": env!("CARGO_PKG_VERSION"),
            "exportedAt": chrono::Utc::now().to_rfc3339(),
            "counts": counts.to_json(),
        });
        zip.start_file(MANIFEST_ENTRY, opts)
            .context("failed to start manifest entry")?;
        zip.write_all(
            serde_json::to_string_pretty(&manifest)
                .context("failed to serialize manifest")?
                .as_bytes(),
        )
        .context("failed to write manifest entry")?;

        zip.start_file(DB_ENTRY, opts)
            .context("failed to start database entry")?;
        let mut db_file = File::open(&snapshot.0).context("failed to reopen snapshot")?;
        std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;
        zip.finish().context("failed to finalize zip bundle")?;
    }
    std::fs::rename(&partial.0, out_path)
        .with_context(|| format!("failed to move bundle to {}", out_path.to_string_lossy()))?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        counts,
    })
}

/// Restores a bundle into the live connection. The snapshot is extracted to
/// `scratch_dir` and checked first; on any error `conn` is left untouched.
pub fn import_workspace_bundle(
    conn: &mut Connection,
    in_path: &Path,
    scratch_dir: &Path,
) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive =
        ZipArchive::new(in_file).context("not a workspace bundle (expected a zip archive)")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    std::fs::create_dir_all(scratch_dir)
        .with_context(|| format!("failed to create directory {}", scratch_dir.to_string_lossy()))?;
    let extracted = ScratchFile::new(scratch_dir.join(format!(
        "restore-{}.sqlite3",
        uuid::Uuid::new_v4().simple()
    )));
    {
        let mut out = File::create(&extracted.0).with_context(|| {
            format!("failed to create {}", extracted.0.to_string_lossy())
        })?;
        let mut entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/attendod.sqlite3")?;
        std::io::copy(&mut entry, &mut out).context("failed to extract database entry")?;
        out.flush().context("failed to flush extracted database")?;
    }

    let counts = inspect_snapshot(&extracted.0)?;
    conn.restore(DatabaseName::Main, &extracted.0, None::<fn(Progress)>)
        .context("failed to restore workspace database")?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        exported_at: manifest
            .get("exportedAt")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        counts,
    })
}
