//! CLI struct definitions for the destroy-gate command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::core::report::ReportFormat;
use crate::core::session::{CountRange, OperationKind};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "destroy-gate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Pre-destroy safety gate: verify target, plan and operator intent before tearing down infrastructure."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the validation pipeline for an operation.
    Validate(ValidateCli),
    /// Inspect the shared audit log.
    Audit(AuditCli),
    /// Work with evidence manifests.
    Evidence(EvidenceCli),
}

/// Parse `MIN-MAX`, `MIN-` or `-MAX`.
pub fn parse_count_range(raw: &str) -> Result<CountRange, String> {
    let (lo, hi) = raw
        .split_once('-')
        .ok_or_else(|| format!("expected MIN-MAX, got '{}'", raw))?;
    let parse = |s: &str| -> Result<Option<usize>, String> {
        let s = s.trim();
        if s.is_empty() {
            Ok(None)
        } else {
            s.parse()
                .map(Some)
                .map_err(|_| format!("'{}' is not a non-negative integer", s))
        }
    };
    let range = CountRange {
        min: parse(lo)?,
        max: parse(hi)?,
    };
    if let (Some(a), Some(b)) = (range.min, range.max) {
        if a > b {
            return Err(format!("range minimum {} exceeds maximum {}", a, b));
        }
    }
    Ok(range)
}

#[derive(clap::Args, Debug)]
pub struct ValidateCli {
    /// Operation the gate is protecting.
    #[clap(long, value_enum, default_value = "destroy")]
    pub operation: OperationKind,
    /// Target identifier the operator intends to act on.
    #[clap(long)]
    pub target: Option<String>,
    /// Inclusive range of resources the plan may remove, e.g. `10-15`.
    #[clap(long, value_parser = parse_count_range)]
    pub expected_count: Option<CountRange>,
    /// Lower bound on resources removed (overrides --expected-count).
    #[clap(long)]
    pub min_resources: Option<usize>,
    /// Upper bound on resources removed (overrides --expected-count).
    #[clap(long)]
    pub max_resources: Option<usize>,
    /// Explicit variable file governing the run.
    #[clap(long)]
    pub var_file: Option<PathBuf>,
    /// Infrastructure working directory (defaults to the current directory).
    #[clap(long, short = 'C')]
    pub workdir: Option<PathBuf>,
    /// Never prompt; require --confirm-token instead.
    #[clap(long)]
    pub non_interactive: bool,
    /// Pre-supplied confirmation; must equal the target identifier.
    /// Only read together with `--non-interactive`.
    #[clap(long, env = "DESTROY_GATE_CONFIRM_TOKEN", hide_env_values = true)]
    pub confirm_token: Option<String>,
    /// Skip the pre-destroy state backup (recorded as a warning).
    #[clap(long)]
    pub skip_backup: bool,
    /// Treat the target as production regardless of configuration.
    #[clap(long)]
    pub production: bool,
    /// Additional disallowed identifier (repeatable).
    #[clap(long = "deny")]
    pub deny: Vec<String>,
    /// Config file (defaults to `<workdir>/destroy-gate.toml`).
    #[clap(long)]
    pub config: Option<PathBuf>,
    /// Plan generation timeout in seconds (overrides config).
    #[clap(long)]
    pub plan_timeout_secs: Option<u64>,
    /// Print full check details and enable debug logging.
    #[clap(long, short = 'v')]
    pub verbose: bool,
}

impl ValidateCli {
    pub fn count_range(&self) -> CountRange {
        let base = self.expected_count.unwrap_or(CountRange {
            min: None,
            max: None,
        });
        CountRange {
            min: self.min_resources.or(base.min),
            max: self.max_resources.or(base.max),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct AuditCli {
    #[clap(subcommand)]
    pub command: AuditCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuditCommand {
    /// Filter and render audit log entries.
    Report {
        /// Audit log path (defaults to the configured log).
        #[clap(long)]
        log: Option<PathBuf>,
        #[clap(long)]
        user: Option<String>,
        /// Terminal status, e.g. PASSED, FAILED, CANCELLED.
        #[clap(long)]
        status: Option<String>,
        #[clap(long)]
        action: Option<String>,
        /// Target identifier (environment).
        #[clap(long)]
        target: Option<String>,
        /// RFC 3339 timestamp or YYYY-MM-DD.
        #[clap(long)]
        since: Option<String>,
        /// RFC 3339 timestamp or YYYY-MM-DD.
        #[clap(long)]
        until: Option<String>,
        #[clap(long, value_enum, default_value = "table")]
        format: ReportFormat,
    },
}

#[derive(clap::Args, Debug)]
pub struct EvidenceCli {
    #[clap(subcommand)]
    pub command: EvidenceCommand,
}

#[derive(Subcommand, Debug)]
pub enum EvidenceCommand {
    /// Recompute a manifest's digest and its artifact hashes.
    Verify {
        #[clap(long)]
        manifest: PathBuf,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_count_ranges() {
        assert_eq!(
            parse_count_range("10-15").unwrap(),
            CountRange {
                min: Some(10),
                max: Some(15)
            }
        );
        assert_eq!(parse_count_range("5-").unwrap().max, None);
        assert_eq!(parse_count_range("-7").unwrap().min, None);
        assert!(parse_count_range("15-10").is_err());
        assert!(parse_count_range("ten").is_err());
    }

    #[test]
    fn explicit_bounds_override_range() {
        let cli = Cli::parse_from([
            "destroy-gate",
            "validate",
            "--expected-count",
            "80-110",
            "--max-resources",
            "120",
        ]);
        let Command::Validate(v) = cli.command else {
            panic!("expected validate");
        };
        let r = v.count_range();
        assert_eq!((r.min, r.max), (Some(80), Some(120)));
        assert_eq!(v.operation, OperationKind::Destroy);
    }
}
