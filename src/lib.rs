//! destroy-gate: a pre-destroy safety gate for infrastructure teardown.
//!
//! Before a destructive infrastructure operation runs, the gate proves that
//! the authenticated cloud session, the persisted state, the variable files
//! and the generated plan all agree on one target, that the plan removes the
//! expected number of resources and nothing outside that target, and that
//! the operator typed out their intent. Every run leaves an audit line and,
//! unless halted early, a self-digesting evidence manifest.
//!
//! # Stages
//!
//! 1. **Context Validator**: cloud identity and active target vs. the operator's target
//! 2. **State Inspector**: identifiers referenced by persisted state
//! 3. **Variable Resolver**: explicit and implicit variable files
//! 4. **Plan Generator & Analyzer**: dry-run plan, count, target and deny-list checks
//! 5. **Confirmation**: typed multi-step confirmation or a pre-supplied token
//! 6. **Evidence Recorder**: state backup, artifact hashes and manifest
//! 7. **Audit Logger**: START and terminal lines in a shared append-only log
//!
//! # Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | PASSED or PASSED_WITH_WARNINGS |
//! | 1    | FAILED |
//! | 2    | configuration error |
//! | 3    | CANCELLED |
//! | 130  | interrupted outside confirmation |
//!
//! # Examples
//!
//! ```bash
//! destroy-gate validate --target my-dev-proj --var-file dev.tfvars --expected-count 10-15
//! destroy-gate validate --target my-dev-proj --var-file dev.tfvars \
//!     --non-interactive --confirm-token my-dev-proj
//! destroy-gate audit report --status FAILED --since 2026-01-01 --format csv
//! destroy-gate evidence verify --manifest evidence/my-dev-proj/<run>/manifest.json
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: session model, config, errors, subprocess execution, output, reporting
//! - [`stages`]: the pipeline stages and the orchestrator that runs them

pub mod cli;
pub mod core;
pub mod stages;

use crate::cli::{AuditCommand, Cli, Command, EvidenceCommand, ValidateCli};
use crate::core::collaborators::{GcloudSession, TerraformCli};
use crate::core::config::GateConfig;
use crate::core::error::GateError;
use crate::core::report::{self, ReportFilter};
use crate::core::time;
use crate::stages::audit::AuditLog;
use crate::stages::confirm::{Confirmation, InterruptWatch};
use crate::stages::evidence;
use crate::stages::pipeline::{self, Collaborators, GateRequest};
use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Logs go to stderr so stdout stays the
/// operator-facing report; `RUST_LOG` overrides the default level.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let log_json = std::env::var("DESTROY_GATE_LOG_JSON")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn operator_identity() -> String {
    ["DESTROY_GATE_OPERATOR", "USER", "USERNAME"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn absolute(path: &Path) -> Result<PathBuf, GateError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn run_validate(args: ValidateCli) -> Result<i32, GateError> {
    let workdir = absolute(args.workdir.as_deref().unwrap_or(Path::new(".")))?;
    let mut config = GateConfig::load(&workdir, args.config.as_deref())?;
    if let Some(secs) = args.plan_timeout_secs {
        config.plan_timeout_secs = secs;
    }
    if config.plan_timeout_secs == 0 {
        return Err(GateError::Configuration(
            "plan timeout must be greater than zero".to_string(),
        ));
    }

    let audit_log = AuditLog::new(config.audit_log_path(&workdir));
    if let Err(e) = audit_log.ensure() {
        tracing::warn!(path = %audit_log.path().display(), error = %e, "audit log unavailable");
    }
    let watch = match InterruptWatch::install(audit_log.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "interrupt handling disabled");
            None
        }
    };

    let mut confirmation = if args.non_interactive {
        Confirmation::non_interactive(args.confirm_token.clone().filter(|t| !t.is_empty()))
    } else {
        if args.confirm_token.is_some() {
            tracing::warn!("confirmation token ignored without --non-interactive");
            eprintln!(
                "{} confirmation token ignored without --non-interactive; confirming interactively",
                "warning:".yellow().bold()
            );
        }
        Confirmation::interactive()
    };

    let request = GateRequest {
        operation: args.operation,
        expected_target: args.target.clone(),
        workdir: workdir.clone(),
        var_file: args.var_file.clone(),
        count_range: args.count_range(),
        deny: args.deny.clone(),
        production: args.production,
        skip_backup: args.skip_backup,
        verbose: args.verbose,
        operator: operator_identity(),
        host: host_name(),
    };
    let cloud = GcloudSession {
        binary: config.session_cli.clone(),
        cwd: workdir.clone(),
    };
    let infra = TerraformCli {
        binary: config.tool.clone(),
    };

    let session = pipeline::run(
        &request,
        &config,
        Collaborators {
            cloud: &cloud,
            infra: &infra,
        },
        &mut confirmation,
        &audit_log,
        watch.as_ref(),
    );
    tracing::info!(
        session = %session.id,
        status = session.status().as_str(),
        "validation finished"
    );
    Ok(session.exit_code())
}

fn report_boundary(
    raw: Option<String>,
    flag: &str,
    parse: fn(&str) -> Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, GateError> {
    raw.map(|r| {
        parse(&r).ok_or_else(|| {
            GateError::Configuration(format!(
                "{} must be RFC 3339 or YYYY-MM-DD, got '{}'",
                flag, r
            ))
        })
    })
    .transpose()
}

fn run_audit(command: AuditCommand) -> Result<i32, GateError> {
    match command {
        AuditCommand::Report {
            log,
            user,
            status,
            action,
            target,
            since,
            until,
            format,
        } => {
            let filter = ReportFilter {
                user,
                status,
                action,
                target,
                since: report_boundary(since, "--since", time::parse_boundary)?,
                until: report_boundary(until, "--until", time::parse_end_boundary)?,
            };
            let path = match log {
                Some(p) => p,
                None => {
                    let cwd = std::env::current_dir()?;
                    GateConfig::load(&cwd, None)?.audit_log_path(&cwd)
                }
            };
            let log = AuditLog::new(path);
            print!("{}", report::run_report(&log, &filter, format)?);
            Ok(0)
        }
    }
}

fn run_evidence(command: EvidenceCommand) -> Result<i32, GateError> {
    match command {
        EvidenceCommand::Verify { manifest, format } => {
            let report = evidence::verify_manifest(&manifest)?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                if report.digest_ok() {
                    println!("{} manifest digest {}", "✓".bright_green(), report.stored_digest);
                } else {
                    println!(
                        "{} manifest digest mismatch: stored={} computed={}",
                        "✗".bright_red(),
                        report.stored_digest,
                        report.computed_digest
                    );
                }
                for failure in &report.artifact_failures {
                    println!("{} {}", "✗".bright_red(), failure);
                }
                if report.ok() {
                    println!("{} evidence intact: {}", "✓".bright_green(), report.manifest);
                }
            }
            Ok(if report.ok() { 0 } else { 1 })
        }
    }
}

/// Parse arguments, dispatch, and map the outcome to a process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Command::Validate(v) if v.verbose);
    init_tracing(verbose);

    let result = match cli.command {
        Command::Validate(args) => run_validate(args),
        Command::Audit(audit) => run_audit(audit.command),
        Command::Evidence(ev) => run_evidence(ev.command),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{} {}", "error:".bright_red().bold(), e);
            e.exit_code()
        }
    }
}
