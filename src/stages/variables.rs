//! Variable Resolver: which variable file governs the run, and what target it declares.
//!
//! The infrastructure tool silently loads `terraform.tfvars` and `*.auto.tfvars`
//! from the working directory in addition to any explicit `-var-file`, so an
//! implicit file that disagrees with the session context is a hazard even when
//! an explicit file is supplied.

use crate::core::config::GateConfig;
use crate::core::error::GateError;
use crate::core::session::ValidationSession;
use std::fs;
use std::path::{Path, PathBuf};

pub const CHECK_EXPLICIT: &str = "var-file";
pub const CHECK_IMPLICIT: &str = "var-file-implicit";

/// First `field = "value"` assignment in an HCL-style variable file.
pub fn declared_value(content: &str, field: &str) -> Option<String> {
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let Some((key, rest)) = line.split_once('=') else {
            continue;
        };
        if key.trim() != field {
            continue;
        }
        let rest = rest.trim();
        let value = match rest.strip_prefix('"') {
            Some(quoted) => quoted.split_once('"').map(|(v, _)| v)?,
            None => rest.split_whitespace().next()?,
        };
        return Some(value.to_string());
    }
    None
}

fn implicit_candidates(workdir: &Path, implicit_name: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let default = workdir.join(implicit_name);
    if default.is_file() {
        out.push(default);
    }
    if let Ok(entries) = fs::read_dir(workdir) {
        let mut autos: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".auto.tfvars"))
            })
            .collect();
        autos.sort();
        out.extend(autos);
    }
    out
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn check_explicit(session: &mut ValidationSession, config: &GateConfig, path: PathBuf) {
    let resolved = if path.is_absolute() {
        path
    } else {
        session.workdir.join(path)
    };
    if !resolved.is_file() {
        session.fail(
            CHECK_EXPLICIT,
            format!("variable file not found: {}", resolved.display()),
        );
        return;
    }
    session.var_file = Some(resolved.clone());
    let content = match fs::read_to_string(&resolved) {
        Ok(c) => c,
        Err(e) => {
            session.fail(
                CHECK_EXPLICIT,
                format!("cannot read variable file {}: {}", resolved.display(), e),
            );
            return;
        }
    };
    let Some(declared) = declared_value(&content, &config.target_field) else {
        session.fail(
            CHECK_EXPLICIT,
            format!(
                "variable file {} does not declare '{}'",
                resolved.display(),
                config.target_field
            ),
        );
        return;
    };

    let mut mismatched = false;
    if let Some(expected) = session.expected_target.clone() {
        if declared != expected {
            mismatched = true;
            session.fail(
                CHECK_EXPLICIT,
                format!(
                    "expected target '{}' but variable file declares {} = '{}'",
                    expected, config.target_field, declared
                ),
            );
        }
    }
    if let Some(active) = session.active_target.clone() {
        if declared != active {
            mismatched = true;
            session.fail(
                CHECK_EXPLICIT,
                format!(
                    "active session target '{}' but variable file declares {} = '{}'",
                    active, config.target_field, declared
                ),
            );
        }
    }
    if !mismatched {
        session.pass(
            CHECK_EXPLICIT,
            format!(
                "{} declares {} = '{}'",
                resolved.display(),
                config.target_field,
                declared
            ),
        );
    }
}

fn check_implicit(session: &mut ValidationSession, config: &GateConfig) {
    let reference = session
        .active_target
        .clone()
        .or_else(|| session.effective_target().map(str::to_string));
    for candidate in implicit_candidates(&session.workdir, &config.implicit_var_file) {
        if session
            .var_file
            .as_deref()
            .is_some_and(|explicit| same_file(explicit, &candidate))
        {
            continue;
        }
        let declared = fs::read_to_string(&candidate)
            .ok()
            .and_then(|c| declared_value(&c, &config.target_field));
        match (declared, reference.as_deref()) {
            (Some(declared), Some(reference)) if declared != reference => {
                session.fail(
                    CHECK_IMPLICIT,
                    format!(
                        "implicit default {} declares {} = '{}' but active session context is '{}'; the tool may silently prefer the implicit file",
                        candidate.display(),
                        config.target_field,
                        declared,
                        reference
                    ),
                );
            }
            (Some(declared), _) => session.info(
                CHECK_IMPLICIT,
                format!(
                    "implicit default {} also present and declares '{}'",
                    candidate.display(),
                    declared
                ),
            ),
            (None, _) => session.info(
                CHECK_IMPLICIT,
                format!(
                    "implicit default {} present without '{}'",
                    candidate.display(),
                    config.target_field
                ),
            ),
        }
    }
}

pub fn check_variables(
    session: &mut ValidationSession,
    config: &GateConfig,
    explicit: Option<PathBuf>,
) -> Result<(), GateError> {
    match explicit {
        Some(path) => check_explicit(session, config, path),
        None if session.operation.is_destructive() => session.fail(
            CHECK_EXPLICIT,
            "destroy requires an explicit variable file; implicit defaults are not accepted",
        ),
        None => session.warn(
            CHECK_EXPLICIT,
            "no explicit variable file; implicit defaults govern this run",
        ),
    }
    check_implicit(session, config);
    Ok(())
}
