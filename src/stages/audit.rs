//! Append-only audit log.
//!
//! One line per lifecycle milestone:
//! `[2026-10-16T09:14:03Z] ACTION=VALIDATION_START USER=alice HOST=ops-1 key=value ...`
//!
//! The file is shared by concurrent invocations, so every append is a single
//! `write_all` on an `O_APPEND` handle while holding an exclusive advisory
//! lock. The log is never rotated or truncated here.

use crate::core::error::GateError;
use crate::core::session::ValidationSession;
use crate::core::time;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub action: String,
    pub user: String,
    pub host: String,
    pub fields: Vec<(String, String)>,
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '=' || c == '"')
}

/// Quote and escape a value so it can never span or forge a line.
fn render_value(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn unescape(chars: &mut impl Iterator<Item = char>) -> Option<char> {
    match chars.next()? {
        'n' => Some('\n'),
        'r' => Some('\r'),
        't' => Some('\t'),
        'x' => {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() != 2 {
                return None;
            }
            u8::from_str_radix(&hex, 16).ok().map(char::from)
        }
        other => Some(other),
    }
}

/// Split `k=v k2="v 2"` into pairs, honouring quotes and `\` escapes.
fn tokenize(rest: &str) -> Option<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            return Some(out);
        }
        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.push(unescape(&mut chars)?),
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return None;
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key, value));
    }
}

impl AuditEntry {
    pub fn new(action: &str, user: &str, host: &str) -> Self {
        Self {
            timestamp: time::now_iso8601(),
            action: action.to_string(),
            user: user.to_string(),
            host: host.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.push((key.to_string(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn render(&self) -> String {
        let mut line = format!(
            "[{}] ACTION={} USER={} HOST={}",
            self.timestamp,
            render_value(&self.action),
            render_value(&self.user),
            render_value(&self.host)
        );
        for (k, v) in &self.fields {
            line.push(' ');
            line.push_str(k);
            line.push('=');
            line.push_str(&render_value(v));
        }
        line
    }

    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim_end().strip_prefix('[')?;
        let (timestamp, rest) = rest.split_once(']')?;
        let mut pairs = tokenize(rest)?;
        let mut take = |name: &str| -> Option<String> {
            let idx = pairs.iter().position(|(k, _)| k == name)?;
            Some(pairs.remove(idx).1)
        };
        let action = take("ACTION")?;
        let user = take("USER").unwrap_or_default();
        let host = take("HOST").unwrap_or_default();
        Some(Self {
            timestamp: timestamp.to_string(),
            action,
            user,
            host,
            fields: pairs,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create parent directories and the file if absent. Safe to call repeatedly.
    pub fn ensure(&self) -> Result<(), GateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), GateError> {
        self.ensure()?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let line = format!("{}\n", entry.render());
        file.lock()?;
        let written = file.write_all(line.as_bytes());
        let _ = file.unlock();
        written?;
        Ok(())
    }

    /// Append, reporting but never propagating a failure.
    pub fn append_best_effort(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit log append failed");
            eprintln!(
                "warning: could not write audit log {}: {}",
                self.path.display(),
                e
            );
        }
    }

    pub fn read_entries(&self) -> Result<Vec<AuditEntry>, GateError> {
        if !self.path.exists() {
            return Err(GateError::NotFound(format!(
                "audit log {}",
                self.path.display()
            )));
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().filter_map(AuditEntry::parse).collect())
    }
}

fn session_entry(session: &ValidationSession, action: &str) -> AuditEntry {
    AuditEntry::new(action, &session.operator, &session.host)
        .field("SESSION", session.id.clone())
        .field("OPERATION", session.operation.as_str())
        .field("TARGET", session.target_label())
        .field("WORKDIR", session.workdir.display().to_string())
}

pub fn start_entry(session: &ValidationSession) -> AuditEntry {
    let var_file = session
        .var_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    session_entry(session, "VALIDATION_START").field("VAR_FILE", var_file)
}

pub fn terminal_entry(session: &ValidationSession) -> AuditEntry {
    let status = session.status();
    let counts = session.counts();
    let mut entry = session_entry(session, &format!("VALIDATION_{}", status.as_str()))
        .field("STATUS", status.as_str())
        .field("EXIT_CODE", session.exit_code().to_string())
        .field("PASS", counts.pass.to_string())
        .field("WARN", counts.warn.to_string())
        .field("FAIL", counts.fail.to_string());
    if let Some(manifest) = &session.artifacts.manifest {
        entry = entry.field("MANIFEST", manifest.display().to_string());
    }
    entry
}
