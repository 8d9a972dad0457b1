//! Sequential validation pipeline.
//!
//! Context -> State -> Variables -> Plan -> Confirmation -> Evidence, with an
//! audit line at START and at the terminal disposition. Ordinary check
//! outcomes accumulate on the session; a stage returning `Err` is a hard
//! halt (missing directory, plan generation failure) and skips every later
//! stage, including evidence.

use crate::core::collaborators::{CloudSession, InfraTool};
use crate::core::config::GateConfig;
use crate::core::error::GateError;
use crate::core::output;
use crate::core::session::{CountRange, OperationKind, ValidationSession};
use crate::core::time;
use crate::stages::audit::{self, AuditLog};
use crate::stages::confirm::{self, Confirmation, InterruptWatch};
use crate::stages::{context, evidence, plan, state, variables};
use std::path::PathBuf;
use std::time::Duration;

pub const CHECK_PREFLIGHT: &str = "preflight";

/// Everything the operator supplied for one invocation.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub operation: OperationKind,
    pub expected_target: Option<String>,
    pub workdir: PathBuf,
    pub var_file: Option<PathBuf>,
    pub count_range: CountRange,
    pub deny: Vec<String>,
    pub production: bool,
    pub skip_backup: bool,
    pub verbose: bool,
    pub operator: String,
    pub host: String,
}

pub struct Collaborators<'a> {
    pub cloud: &'a dyn CloudSession,
    pub infra: &'a dyn InfraTool,
}

fn deny_list(config: &GateConfig, extra: &[String], target: Option<&str>) -> Vec<String> {
    let mut out = config.registry_deny_list(target);
    for id in extra {
        if Some(id.as_str()) != target && !out.contains(id) {
            out.push(id.clone());
        }
    }
    out.sort();
    out
}

fn halt(session: &mut ValidationSession, stage: &str, err: GateError) {
    tracing::warn!(stage, error = %err, "pipeline halted");
    if err.exit_code() == 2 {
        session.configuration_failure(stage, err.to_string());
    } else {
        session.fail(stage, err.to_string());
    }
}

fn finish(session: &ValidationSession, audit_log: &AuditLog) {
    output::print_banner(session);
    audit_log.append_best_effort(&audit::terminal_entry(session));
}

/// Run the gate end to end. The returned session carries the disposition.
pub fn run(
    request: &GateRequest,
    config: &GateConfig,
    collaborators: Collaborators<'_>,
    confirmation: &mut Confirmation,
    audit_log: &AuditLog,
    watch: Option<&InterruptWatch>,
) -> ValidationSession {
    let mut session = ValidationSession::new(
        request.operation,
        request.expected_target.clone().filter(|t| !t.is_empty()),
        request.workdir.clone(),
        request.operator.clone(),
        request.host.clone(),
    );
    session.verbose = request.verbose;
    session.var_file = request.var_file.clone();
    session.artifacts.audit_log = Some(audit_log.path().to_path_buf());
    let _span = tracing::info_span!("gate", session = %session.id, operation = request.operation.as_str()).entered();

    audit_log.append_best_effort(&audit::start_entry(&session));
    if let Some(w) = watch {
        w.track(&session);
    }

    output::print_stage("Preflight");
    if !request.workdir.is_dir() {
        halt(
            &mut session,
            CHECK_PREFLIGHT,
            GateError::Configuration(format!(
                "working directory not found: {}",
                request.workdir.display()
            )),
        );
        finish(&session, audit_log);
        return session;
    }
    if request.operation.requires_confirmation() && confirmation.missing_token() {
        session.configuration_failure(
            confirm::CHECK_CONFIRM,
            "non-interactive mode requires a confirmation token; no prompts will be issued",
        );
        finish(&session, audit_log);
        return session;
    }
    session.pass(
        CHECK_PREFLIGHT,
        format!("working directory {}", request.workdir.display()),
    );

    output::print_stage("Context Validator");
    if let Err(e) = context::check_context(&mut session, collaborators.cloud) {
        halt(&mut session, context::CHECK_TARGET, e);
        finish(&session, audit_log);
        return session;
    }

    let target = session.effective_target().map(str::to_string);
    session.deny_list = deny_list(config, &request.deny, target.as_deref());
    session.production = request.production
        || target
            .as_deref()
            .is_some_and(|t| config.is_production(t));
    let stamp_target = target.clone().unwrap_or_else(|| "unknown".to_string());
    session.evidence_dir = config
        .evidence_root(&request.workdir)
        .join(&stamp_target)
        .join(format!(
            "{}-{}",
            time::path_stamp(session.started_at),
            session.id
        ));
    if let Some(w) = watch {
        w.track(&session);
    }

    output::print_stage("State Inspector");
    if let Err(e) = state::check_state(&mut session, collaborators.infra, &config.identifier_fields)
    {
        halt(&mut session, state::CHECK_STATE, e);
        finish(&session, audit_log);
        return session;
    }

    output::print_stage("Variable Resolver");
    if let Err(e) = variables::check_variables(&mut session, config, request.var_file.clone()) {
        halt(&mut session, variables::CHECK_EXPLICIT, e);
        finish(&session, audit_log);
        return session;
    }

    output::print_stage("Plan Generator & Analyzer");
    if let Err(e) = plan::generate_and_analyze(
        &mut session,
        collaborators.infra,
        &request.count_range,
        Duration::from_secs(config.plan_timeout_secs),
    ) {
        halt(&mut session, plan::CHECK_GENERATE, e);
        finish(&session, audit_log);
        return session;
    }

    output::print_stage("Confirmation");
    if !request.operation.requires_confirmation() {
        session.info(
            confirm::CHECK_CONFIRM,
            format!("not required for '{}'", request.operation.as_str()),
        );
    } else if session.has_failures() {
        session.info(
            confirm::CHECK_CONFIRM,
            format!(
                "not reached: {} failing check(s)",
                session.counts().fail
            ),
        );
    } else {
        if let Some(w) = watch {
            w.track(&session);
            w.arm();
        }
        let result = confirm::run_confirmation(&mut session, confirmation, config.countdown_secs);
        if let Some(w) = watch {
            w.disarm();
        }
        if let Err(e) = result {
            halt(&mut session, confirm::CHECK_CONFIRM, e);
            finish(&session, audit_log);
            return session;
        }
    }

    output::print_stage("Evidence Recorder");
    if let Err(e) = evidence::record_evidence(
        &mut session,
        collaborators.infra,
        &config.compliance_tags,
        request.skip_backup,
    ) {
        session.fail(evidence::CHECK_MANIFEST, format!("evidence not recorded: {}", e));
    }

    finish(&session, audit_log);
    session
}
