//! Audit Report
//!
//! Read-only renderer over the audit log. Filters by user, status, action,
//! target and date range, then renders as a table, JSON, CSV or aggregate
//! statistics. Unparsable lines are counted, never fabricated into entries.

use crate::core::error::GateError;
use crate::core::time;
use crate::stages::audit::{AuditEntry, AuditLog};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Table,
    Json,
    Csv,
    Stats,
}

#[derive(Debug, Default, Clone)]
pub struct ReportFilter {
    pub user: Option<String>,
    pub status: Option<String>,
    pub action: Option<String>,
    pub target: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ReportFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let eq = |want: &Option<String>, got: Option<&str>| {
            want.as_deref()
                .is_none_or(|w| got.is_some_and(|g| g.eq_ignore_ascii_case(w)))
        };
        if !eq(&self.user, Some(entry.user.as_str()))
            || !eq(&self.action, Some(entry.action.as_str()))
            || !eq(&self.status, entry.get("STATUS"))
            || !eq(&self.target, entry.get("TARGET"))
        {
            return false;
        }
        if self.since.is_none() && self.until.is_none() {
            return true;
        }
        let Some(ts) = time::parse_boundary(&entry.timestamp) else {
            return false;
        };
        self.since.is_none_or(|s| ts >= s) && self.until.is_none_or(|u| ts <= u)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ReportStats {
    pub total: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
    pub by_target: BTreeMap<String, usize>,
}

pub fn stats(entries: &[AuditEntry]) -> ReportStats {
    let mut out = ReportStats {
        total: entries.len(),
        ..ReportStats::default()
    };
    for e in entries {
        *out.by_action.entry(e.action.clone()).or_default() += 1;
        *out.by_user.entry(e.user.clone()).or_default() += 1;
        if let Some(s) = e.get("STATUS") {
            *out.by_status.entry(s.to_string()).or_default() += 1;
        }
        if let Some(t) = e.get("TARGET") {
            *out.by_target.entry(t.to_string()).or_default() += 1;
        }
    }
    out
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

pub fn render(entries: &[AuditEntry], format: ReportFormat) -> Result<String, GateError> {
    let mut out = String::new();
    match format {
        ReportFormat::Json => {
            let rows: Vec<serde_json::Value> = entries
                .iter()
                .map(|e| {
                    let mut row = serde_json::json!({
                        "timestamp": e.timestamp,
                        "action": e.action,
                        "user": e.user,
                        "host": e.host,
                    });
                    if let Some(obj) = row.as_object_mut() {
                        for (k, v) in &e.fields {
                            obj.insert(k.to_lowercase(), serde_json::Value::String(v.clone()));
                        }
                    }
                    row
                })
                .collect();
            out.push_str(&serde_json::to_string_pretty(&rows)?);
            out.push('\n');
        }
        ReportFormat::Csv => {
            out.push_str("timestamp,action,user,host,session,operation,target,status,exit_code\n");
            for e in entries {
                let cells = [
                    e.timestamp.as_str(),
                    e.action.as_str(),
                    e.user.as_str(),
                    e.host.as_str(),
                    e.get("SESSION").unwrap_or(""),
                    e.get("OPERATION").unwrap_or(""),
                    e.get("TARGET").unwrap_or(""),
                    e.get("STATUS").unwrap_or(""),
                    e.get("EXIT_CODE").unwrap_or(""),
                ];
                let line = cells.iter().map(|c| csv_cell(c)).collect::<Vec<_>>().join(",");
                out.push_str(&line);
                out.push('\n');
            }
        }
        ReportFormat::Stats => {
            out.push_str(&serde_json::to_string_pretty(&stats(entries))?);
            out.push('\n');
        }
        ReportFormat::Table => {
            out.push_str(&format!(
                "{:<21} {:<34} {:<14} {:<18} {:<10}\n",
                "TIME", "ACTION", "USER", "TARGET", "OPERATION"
            ));
            out.push_str(&format!("{}\n", "-".repeat(101)));
            for e in entries {
                out.push_str(&format!(
                    "{:<21} {:<34} {:<14} {:<18} {:<10}\n",
                    truncate(&e.timestamp, 21),
                    truncate(&e.action, 34),
                    truncate(&e.user, 14),
                    truncate(e.get("TARGET").unwrap_or("-"), 18),
                    truncate(e.get("OPERATION").unwrap_or("-"), 10),
                ));
            }
            out.push_str(&format!("{} entries\n", entries.len()));
        }
    }
    Ok(out)
}

pub fn run_report(
    log: &AuditLog,
    filter: &ReportFilter,
    format: ReportFormat,
) -> Result<String, GateError> {
    let entries: Vec<AuditEntry> = log
        .read_entries()?
        .into_iter()
        .filter(|e| filter.matches(e))
        .collect();
    render(&entries, format)
}
