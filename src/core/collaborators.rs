//! Contracts for the external systems the gate consults.
//!
//! The pipeline only ever talks to these traits. Production wiring uses the
//! CLI-backed implementations below; tests inject in-memory fakes.

use crate::core::error::GateError;
use crate::core::exec::{self, ExternalCapability};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Authenticated cloud session. Both queries return an empty string when unset.
pub trait CloudSession {
    fn active_identity(&self) -> Result<String, GateError>;
    fn active_target(&self) -> Result<String, GateError>;
}

#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub destroy: bool,
    pub var_file: Option<&'a Path>,
    pub out: &'a Path,
    pub timeout: Duration,
}

pub trait InfraTool {
    /// Full serialized state, empty when nothing is persisted.
    fn state_pull(&self, workdir: &Path) -> Result<String, GateError>;
    /// Dry-run plan written to `request.out`.
    fn plan(&self, workdir: &Path, request: &PlanRequest<'_>) -> Result<(), GateError>;
    fn show_text(&self, workdir: &Path, plan: &Path) -> Result<String, GateError>;
    fn show_json(&self, workdir: &Path, plan: &Path) -> Result<String, GateError>;
}

pub struct GcloudSession {
    pub binary: String,
    pub cwd: PathBuf,
}

impl CloudSession for GcloudSession {
    fn active_identity(&self) -> Result<String, GateError> {
        exec::execute_checked(
            ExternalCapability::SessionQuery,
            &self.binary,
            &[
                "auth",
                "list",
                "--filter=status:ACTIVE",
                "--format=value(account)",
            ],
            &self.cwd,
            exec::QUERY_TIMEOUT,
        )
    }

    fn active_target(&self) -> Result<String, GateError> {
        let raw = exec::execute_checked(
            ExternalCapability::SessionQuery,
            &self.binary,
            &["config", "get-value", "project"],
            &self.cwd,
            exec::QUERY_TIMEOUT,
        )?;
        // gcloud prints "(unset)" when no project is selected.
        Ok(if raw == "(unset)" { String::new() } else { raw })
    }
}

pub struct TerraformCli {
    pub binary: String,
}

impl InfraTool for TerraformCli {
    fn state_pull(&self, workdir: &Path) -> Result<String, GateError> {
        exec::execute_raw(
            ExternalCapability::StateRead,
            &self.binary,
            &["state", "pull"],
            workdir,
            exec::QUERY_TIMEOUT,
        )
    }

    fn plan(&self, workdir: &Path, request: &PlanRequest<'_>) -> Result<(), GateError> {
        let out_arg = format!("-out={}", request.out.display());
        let var_arg = request
            .var_file
            .map(|p| format!("-var-file={}", p.display()));
        let mut args = vec!["plan", "-input=false", "-no-color"];
        if request.destroy {
            args.push("-destroy");
        }
        if let Some(v) = &var_arg {
            args.push(v);
        }
        args.push(&out_arg);
        exec::execute_checked(
            ExternalCapability::PlanExec,
            &self.binary,
            &args,
            workdir,
            request.timeout,
        )
        .map(|_| ())
    }

    fn show_text(&self, workdir: &Path, plan: &Path) -> Result<String, GateError> {
        let plan_arg = plan.display().to_string();
        exec::execute_checked(
            ExternalCapability::PlanRender,
            &self.binary,
            &["show", "-no-color", &plan_arg],
            workdir,
            exec::QUERY_TIMEOUT,
        )
    }

    fn show_json(&self, workdir: &Path, plan: &Path) -> Result<String, GateError> {
        let plan_arg = plan.display().to_string();
        exec::execute_checked(
            ExternalCapability::PlanRender,
            &self.binary,
            &["show", "-json", &plan_arg],
            workdir,
            exec::QUERY_TIMEOUT,
        )
    }
}
