use crate::auth::{self, Role, SessionUser};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Credentials};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::setup;

fn invalid_credentials() -> HandlerErr {
    HandlerErr::new("invalid_credentials", "Invalid email or password")
}

fn parse_role(raw: &str) -> Result<Role, HandlerErr> {
    Role::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("role must be one of: admin, teacher, student")
            .with_details(json!({ "role": raw }))
    })
}

fn user_from_credentials(c: Credentials, role: Role) -> SessionUser {
    SessionUser {
        id: c.id,
        email: c.email,
        first_name: c.first_name,
        last_name: c.last_name,
        role,
    }
}

fn authenticate(conn: &Connection, role: Role, email: &str, password: &str) -> Result<SessionUser, HandlerErr> {
    if role == Role::Admin {
        let admin = setup::admin_credentials(conn).map_err(HandlerErr::query)?;
        if admin.email.eq_ignore_ascii_case(email.trim()) && admin.verify(password) {
            return Ok(SessionUser::admin(&admin.email));
        }
        return Err(invalid_credentials());
    }

    let creds = store::find_credentials_by_email(conn, role, email)
        .map_err(HandlerErr::query)?
        .ok_or_else(invalid_credentials)?;
    if !auth::verify_password(&creds.password_hash, password) {
        return Err(invalid_credentials());
    }
    Ok(user_from_credentials(creds, role))
}

fn auth_login(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;
    let role = parse_role(&get_required_str(params, "role")?)?;

    let user = match authenticate(conn, role, &email, &password) {
        Ok(u) => u,
        Err(e) => {
            tracing::info!(role = role.as_str(), "login rejected");
            return Err(e);
        }
    };

    let token = auth::new_session_token();
    conn.execute(
        "INSERT INTO sessions(token, user_id, role, created_at) VALUES(?, ?, ?, ?)",
        (&token, &user.id, role.as_str(), db::now_timestamp()),
    )
    .map_err(HandlerErr::insert("sessions"))?;
    tracing::info!(user_id = %user.id, role = role.as_str(), "login");
    Ok(json!({ "token": token, "user": user }))
}

/// Resolves a stored session to its user; a session whose user has since
/// been deleted resolves to nothing.
fn resolve_session(conn: &Connection, token: &str) -> Result<Option<SessionUser>, HandlerErr> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT user_id, role FROM sessions WHERE token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((user_id, role_raw)) = row else {
        return Ok(None);
    };
    let Some(role) = Role::parse(&role_raw) else {
        return Ok(None);
    };

    if role == Role::Admin {
        let admin = setup::admin_credentials(conn).map_err(HandlerErr::query)?;
        return Ok(Some(SessionUser::admin(&admin.email)));
    }
    Ok(store::find_credentials_by_id(conn, role, &user_id)
        .map_err(HandlerErr::query)?
        .map(|c| user_from_credentials(c, role)))
}

fn auth_session(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let user = resolve_session(conn, &token)?;
    Ok(json!({ "user": user }))
}

fn auth_logout(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    conn.execute("DELETE FROM sessions WHERE token = ?", [&token])
        .map_err(HandlerErr::delete("sessions"))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(with_conn(state, req, auth_login)),
        "auth.session" => Some(with_conn(state, req, auth_session)),
        "auth.logout" => Some(with_conn(state, req, auth_logout)),
        _ => None,
    }
}
