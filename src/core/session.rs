//! Validation session model.
//!
//! A `ValidationSession` is created once per invocation and threaded by
//! `&mut` through every stage. Check results are append-only and the
//! aggregate status is derived from them on demand, so a recorded FAIL can
//! never be upgraded by a later PASS.

use crate::core::output;
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Plan,
    Apply,
    Destroy,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Plan => "plan",
            OperationKind::Apply => "apply",
            OperationKind::Destroy => "destroy",
        }
    }

    pub fn is_destructive(self) -> bool {
        self == OperationKind::Destroy
    }

    /// Operations that mutate infrastructure need an explicit confirmation.
    pub fn requires_confirmation(self) -> bool {
        matches!(self, OperationKind::Apply | OperationKind::Destroy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Info,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Info => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Passed,
    PassedWithWarnings,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Passed => "PASSED",
            SessionStatus::PassedWithWarnings => "PASSED_WITH_WARNINGS",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub step: String,
    pub expected: String,
    pub provided: String,
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Structured,
    Text,
}

/// Result of scanning a destroy plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyPlan {
    pub source: AnalysisSource,
    pub resource_count: usize,
    pub histogram: BTreeMap<String, usize>,
    pub expected_occurrences: usize,
    pub disallowed_occurrences: BTreeMap<String, usize>,
}

impl DestroyPlan {
    pub fn disallowed_total(&self) -> usize {
        self.disallowed_occurrences.values().sum()
    }
}

/// Paths of artifacts produced during the session, relative paths never used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub plan_file: Option<PathBuf>,
    pub plan_text: Option<PathBuf>,
    pub plan_json: Option<PathBuf>,
    pub state_backup: Option<PathBuf>,
    pub state_digest: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckCounts {
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
    pub info: usize,
}

/// Inclusive bounds on how many resources a plan may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl CountRange {
    pub fn contains(&self, n: usize) -> bool {
        self.min.is_none_or(|m| n >= m) && self.max.is_none_or(|m| n <= m)
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn describe(&self) -> String {
        let lo = self.min.map(|m| m.to_string()).unwrap_or_else(|| "0".to_string());
        let hi = self.max.map(|m| m.to_string()).unwrap_or_else(|| "∞".to_string());
        format!("[{},{}]", lo, hi)
    }
}

#[derive(Debug)]
pub struct ValidationSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub operator: String,
    pub host: String,
    pub operation: OperationKind,
    pub expected_target: Option<String>,
    pub active_identity: Option<String>,
    pub active_target: Option<String>,
    pub workdir: PathBuf,
    pub var_file: Option<PathBuf>,
    pub production: bool,
    pub verbose: bool,
    pub evidence_dir: PathBuf,
    pub deny_list: Vec<String>,
    pub plan: Option<DestroyPlan>,
    pub confirmations: Vec<ConfirmationRecord>,
    pub state_snapshot: Option<String>,
    pub artifacts: Artifacts,
    checks: Vec<CheckResult>,
    cancelled: bool,
    configuration_error: bool,
}

impl ValidationSession {
    pub fn new(
        operation: OperationKind,
        expected_target: Option<String>,
        workdir: PathBuf,
        operator: String,
        host: String,
    ) -> Self {
        Self {
            id: time::new_session_id(),
            started_at: Utc::now(),
            operator,
            host,
            operation,
            expected_target,
            active_identity: None,
            active_target: None,
            workdir,
            var_file: None,
            production: false,
            verbose: false,
            evidence_dir: PathBuf::new(),
            deny_list: Vec::new(),
            plan: None,
            confirmations: Vec::new(),
            state_snapshot: None,
            artifacts: Artifacts::default(),
            checks: Vec::new(),
            cancelled: false,
            configuration_error: false,
        }
    }

    /// Append a check outcome and print it immediately.
    pub fn record(
        &mut self,
        name: &str,
        status: CheckStatus,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let result = CheckResult {
            name: name.to_string(),
            status,
            message: message.into(),
            detail,
        };
        tracing::debug!(check = %result.name, status = result.status.as_str(), message = %result.message, "check recorded");
        output::print_check(&result, self.verbose);
        self.checks.push(result);
    }

    pub fn pass(&mut self, name: &str, message: impl Into<String>) {
        self.record(name, CheckStatus::Pass, message, None);
    }

    pub fn warn(&mut self, name: &str, message: impl Into<String>) {
        self.record(name, CheckStatus::Warn, message, None);
    }

    pub fn fail(&mut self, name: &str, message: impl Into<String>) {
        self.record(name, CheckStatus::Fail, message, None);
    }

    pub fn info(&mut self, name: &str, message: impl Into<String>) {
        self.record(name, CheckStatus::Info, message, None);
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn has_failures(&self) -> bool {
        self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn counts(&self) -> CheckCounts {
        let mut counts = CheckCounts::default();
        for c in &self.checks {
            match c.status {
                CheckStatus::Pass => counts.pass += 1,
                CheckStatus::Warn => counts.warn += 1,
                CheckStatus::Fail => counts.fail += 1,
                CheckStatus::Info => counts.info += 1,
            }
        }
        counts
    }

    /// Operator-initiated abort. Ignored once a FAIL is on record.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled && !self.has_failures()
    }

    /// Record a FAIL that stems from caller arguments rather than the environment.
    pub fn configuration_failure(&mut self, name: &str, message: impl Into<String>) {
        self.configuration_error = true;
        self.record(
            name,
            CheckStatus::Fail,
            message,
            Some("ConfigurationError".to_string()),
        );
    }

    pub fn status(&self) -> SessionStatus {
        let counts = self.counts();
        if counts.fail > 0 {
            SessionStatus::Failed
        } else if self.cancelled {
            SessionStatus::Cancelled
        } else if counts.warn > 0 {
            SessionStatus::PassedWithWarnings
        } else {
            SessionStatus::Passed
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status() {
            SessionStatus::Passed | SessionStatus::PassedWithWarnings => 0,
            SessionStatus::Failed if self.configuration_error => 2,
            SessionStatus::Failed => 1,
            SessionStatus::Cancelled => 3,
        }
    }

    /// The operator's expected target, falling back to the active session context.
    pub fn effective_target(&self) -> Option<&str> {
        self.expected_target
            .as_deref()
            .or(self.active_target.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn target_label(&self) -> String {
        self.effective_target().unwrap_or("<unknown>").to_string()
    }
}
