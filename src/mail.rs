use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Hands a finished message to whatever relays it onward.
pub trait Mailer {
    /// Returns an identifier for the queued message.
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<String>;
}

/// Spools messages as `.eml` files for an external relay to pick up.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Line length for the base64 body.
const BODY_LINE: usize = 76;
/// Raw bytes per RFC 2047 word; keeps each folded header line under 78 chars.
const WORD_BYTES: usize = 39;

fn header_value(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// ASCII passes through; anything else becomes folded `=?UTF-8?B?..?=` words,
/// split on char boundaries.
fn encode_header_text(s: &str) -> String {
    let clean = header_value(s);
    if clean.is_ascii() {
        return clean;
    }
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in clean.chars() {
        if !chunk.is_empty() && chunk.len() + c.len_utf8() > WORD_BYTES {
            words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
    }
    words.join("\r\n ")
}

fn encode_body(html: &str) -> String {
    let encoded = STANDARD.encode(html.as_bytes());
    encoded
        .as_bytes()
        .chunks(BODY_LINE)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

impl Mailer for OutboxMailer {
    fn send(&self, mail: &OutgoingMail) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create outbox {}", self.dir.to_string_lossy()))?;

        let message_id = format!("{}@attendod", Uuid::new_v4());
        let now = Utc::now();
        let recipients: Vec<String> = mail.to.iter().map(|t| header_value(t)).collect();

        let mut body = String::new();
        body.push_str(&format!("From: {}\r\n", header_value(&mail.from)));
        body.push_str(&format!("To: {}\r\n", recipients.join(", ")));
        body.push_str(&format!("Subject: {}\r\n", encode_header_text(&mail.subject)));
        body.push_str(&format!("Date: {}\r\n", now.to_rfc2822()));
        body.push_str(&format!("Message-ID: <{}>\r\n", message_id));
        body.push_str("MIME-Version: 1.0\r\n");
        body.push_str("Content-Type: text/html; charset=UTF-8\r\n");
        body.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        body.push_str(&encode_body(&mail.html));
        body.push_str("\r\n");

        let stem = format!("{}-{}", now.format("%Y%m%dT%H%M%S%3f"), Uuid::new_v4().simple());
        let tmp = self.dir.join(format!("{}.eml.tmp", stem));
        let dst = self.dir.join(format!("{}.eml", stem));
        {
            let mut f = std::fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.to_string_lossy()))?;
            f.write_all(body.as_bytes())
                .context("failed to write message")?;
            f.flush().context("failed to flush message")?;
        }
        std::fs::rename(&tmp, &dst)
            .with_context(|| format!("failed to move message to {}", dst.to_string_lossy()))?;

        Ok(message_id)
    }
}

/// Plain ASCII `local@domain`; header fields carry addresses unencoded.
pub fn is_valid_address(s: &str) -> bool {
    if !s.is_ascii() || s.chars().any(|c| c.is_whitespace() || c == ',' || c == '<' || c == '>') {
        return false;
    }
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// Trims, validates and de-duplicates recipients, keeping first-seen order.
pub fn normalize_recipients(emails: &[String]) -> Result<Vec<String>, String> {
    let mut out: Vec<String> = Vec::new();
    for raw in emails {
        let email = raw.trim();
        if !is_valid_address(email) {
            return Err(format!("invalid email address: {}", email));
        }
        if !out.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            out.push(email.to_string());
        }
    }
    if out.is_empty() {
        return Err("Please add at least one email address".to_string());
    }
    Ok(out)
}
