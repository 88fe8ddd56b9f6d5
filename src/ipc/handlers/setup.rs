use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::mail;
use crate::report;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Admin,
    Mail,
    Reports,
    Preferences,
}

const ALL_SECTIONS: [SetupSection; 4] = [
    SetupSection::Admin,
    SetupSection::Mail,
    SetupSection::Reports,
    SetupSection::Preferences,
];

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "mail" => Some(Self::Mail),
            "reports" => Some(Self::Reports),
            "preferences" => Some(Self::Preferences),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Mail => "mail",
            Self::Reports => "reports",
            Self::Preferences => "preferences",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Admin => "setup.admin",
            Self::Mail => "setup.mail",
            Self::Reports => "setup.reports",
            Self::Preferences => "setup.preferences",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Admin => json!({
            "email": auth::DEFAULT_ADMIN_EMAIL,
            "passwordHash": null
        }),
        SetupSection::Mail => json!({
            "enabled": true,
            "fromAddress": "attendo@localhost",
            "subjectPrefix": "Attendo"
        }),
        SetupSection::Reports => json!({
            "showGeneratedAt": true,
            "title": report::DEFAULT_TITLE
        }),
        SetupSection::Preferences => json!({
            "theme": "light"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_email(v: &Value, key: &str) -> Result<String, String> {
    let s = parse_string_max(v, key, 254)?;
    if mail::is_valid_address(&s) {
        Ok(s)
    } else {
        Err(format!("{} must be an email address", key))
    }
}

/// `stored` is true when replaying saved JSON, which carries the hash
/// rather than a plaintext password.
fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
    stored: bool,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Admin => match k.as_str() {
                "email" => {
                    obj.insert(k.clone(), Value::String(parse_email(v, k)?));
                }
                "password" if !stored => {
                    let p = v
                        .as_str()
                        .filter(|p| !p.is_empty())
                        .ok_or_else(|| "password must be a non-empty string".to_string())?;
                    let hash = auth::hash_password(p).map_err(|e| format!("{e:#}"))?;
                    obj.insert("passwordHash".into(), Value::String(hash));
                }
                "passwordHash" if stored => {
                    if let Some(h) = v.as_str() {
                        obj.insert(k.clone(), Value::String(h.to_string()));
                    }
                }
                _ => return Err(format!("unknown admin field: {}", k)),
            },
            SetupSection::Mail => match k.as_str() {
                "enabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "fromAddress" => {
                    obj.insert(k.clone(), Value::String(parse_email(v, k)?));
                }
                "subjectPrefix" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
                }
                _ => return Err(format!("unknown mail field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "title" => {
                    let s = parse_string_max(v, k, 80)?;
                    if s.is_empty() {
                        return Err("title must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Preferences => match k.as_str() {
                "theme" => {
                    let s = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                    if s != "light" && s != "dark" {
                        return Err("theme must be one of: light, dark".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown preferences field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Each saved field is replayed alone; a bad one keeps its default.
            for (k, v) in saved_obj {
                let single: Map<String, Value> = std::iter::once((k.clone(), v.clone())).collect();
                if let Err(e) = merge_section_patch(section, &mut current, &single, true) {
                    tracing::warn!(section = section.name(), field = %k, error = %e, "ignoring saved setting");
                }
            }
        }
    }
    Ok(current)
}

/// The admin section as shown to clients: the hash never leaves the daemon.
fn public_view(section: SetupSection, mut value: Value) -> Value {
    if let SetupSection::Admin = section {
        if let Some(obj) = value.as_object_mut() {
            let set = obj
                .remove("passwordHash")
                .map_or(false, |h| !h.is_null());
            obj.insert("passwordSet".into(), Value::Bool(set));
        }
    }
    value
}

pub struct AdminCredentials {
    pub email: String,
    /// None until an admin password has been configured.
    pub password_hash: Option<String>,
}

impl AdminCredentials {
    pub fn verify(&self, candidate: &str) -> bool {
        match &self.password_hash {
            Some(h) => auth::verify_password(h, candidate),
            None => candidate == auth::DEFAULT_ADMIN_PASSWORD,
        }
    }
}

pub fn admin_credentials(conn: &rusqlite::Connection) -> anyhow::Result<AdminCredentials> {
    let v = load_section(conn, SetupSection::Admin)?;
    Ok(AdminCredentials {
        email: v["email"]
            .as_str()
            .unwrap_or(auth::DEFAULT_ADMIN_EMAIL)
            .to_string(),
        password_hash: v["passwordHash"].as_str().map(|s| s.to_string()),
    })
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub enabled: bool,
    pub from_address: String,
    pub subject_prefix: String,
}

pub fn mail_settings(conn: &rusqlite::Connection) -> anyhow::Result<MailSettings> {
    let v = load_section(conn, SetupSection::Mail)?;
    Ok(MailSettings {
        enabled: v["enabled"].as_bool().unwrap_or(true),
        from_address: v["fromAddress"].as_str().unwrap_or_default().to_string(),
        subject_prefix: v["subjectPrefix"].as_str().unwrap_or_default().to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub show_generated_at: bool,
    pub title: String,
}

pub fn report_settings(conn: &rusqlite::Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    Ok(ReportSettings {
        show_generated_at: v["showGeneratedAt"].as_bool().unwrap_or(true),
        title: v["title"]
            .as_str()
            .unwrap_or(report::DEFAULT_TITLE)
            .to_string(),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in ALL_SECTIONS {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), public_view(section, v));
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj, false) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
