use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Runs `f` against the open workspace and wraps its outcome in the reply envelope.
pub fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    match db_conn(state).and_then(|conn| f(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

/// Returns `params.patch`, rejecting keys outside `allowed`.
pub fn get_patch<'a>(
    params: &'a serde_json::Value,
    allowed: &[&str],
) -> Result<&'a serde_json::Value, HandlerErr> {
    let patch = params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    if let Some(obj) = patch.as_object() {
        for key in obj.keys() {
            if key != "id" && !allowed.contains(&key.as_str()) {
                return Err(HandlerErr::bad_params(format!("unknown field: {}", key)));
            }
        }
    }
    Ok(patch)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("date must be YYYY-MM-DD: {}", raw)))
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?)
}

/// Explicit id for json-server style creates, otherwise a fresh UUID.
pub fn id_or_new(params: &serde_json::Value) -> Result<String, HandlerErr> {
    match get_optional_str(params, "id")? {
        Some(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(_) => Err(HandlerErr::bad_params("id must not be empty")),
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

pub fn row_exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row(sql, params, |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::query)
}

/// Case-insensitive search across named columns, as the list screens do.
pub struct SearchFilter {
    term: String,
    column: Option<String>,
}

impl SearchFilter {
    pub fn parse(params: &serde_json::Value, columns: &[&str]) -> Result<Option<Self>, HandlerErr> {
        let term = get_optional_str(params, "q")?
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();
        if term.is_empty() {
            return Ok(None);
        }
        let column = match get_optional_str(params, "column")?.as_deref() {
            None | Some("all") => None,
            Some(c) if columns.contains(&c) => Some(c.to_string()),
            Some(c) => {
                return Err(HandlerErr::bad_params(format!(
                    "column must be one of: all, {}",
                    columns.join(", ")
                ))
                .with_details(serde_json::json!({ "column": c })))
            }
        };
        Ok(Some(Self { term, column }))
    }

    pub fn matches(&self, fields: &[(&str, &str)]) -> bool {
        fields.iter().any(|(name, value)| {
            self.column.as_deref().map_or(true, |c| c == *name)
                && value.to_lowercase().contains(&self.term)
        })
    }
}

/// Shared trimmed-required check producing the form validation messages.
pub fn require_text(value: Option<&str>, message: &str) -> Result<String, HandlerErr> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(HandlerErr::validation(message)),
    }
}

/// Reads a string field from a create body or patch, rejecting non-strings.
pub fn field_str<'a>(
    obj: &'a serde_json::Value,
    key: &str,
) -> Result<Option<&'a str>, HandlerErr> {
    match obj.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}
