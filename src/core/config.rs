//! Gate configuration.
//!
//! Loaded from `destroy-gate.toml` in the working directory (or an explicit
//! `--config` path). Every field has a default, so a missing file is not an
//! error; a missing *explicit* file is.

use crate::core::error::GateError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "destroy-gate.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Infrastructure tool binary (plan/state/show).
    pub tool: String,
    /// Cloud session CLI binary.
    pub session_cli: String,
    /// Key in variable files that declares the target.
    pub target_field: String,
    /// Attribute keys that carry target identifiers in state and plan records.
    pub identifier_fields: Vec<String>,
    pub implicit_var_file: String,
    /// Registry of known targets; every entry other than the expected one is disallowed.
    pub known_targets: Vec<String>,
    pub production_targets: Vec<String>,
    pub production_markers: Vec<String>,
    pub plan_timeout_secs: u64,
    pub countdown_secs: u64,
    pub evidence_dir: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
    pub compliance_tags: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tool: "terraform".to_string(),
            session_cli: "gcloud".to_string(),
            target_field: "project_id".to_string(),
            identifier_fields: vec!["project".to_string(), "project_id".to_string()],
            implicit_var_file: "terraform.tfvars".to_string(),
            known_targets: Vec::new(),
            production_targets: Vec::new(),
            production_markers: vec!["prod".to_string()],
            plan_timeout_secs: 900,
            countdown_secs: 10,
            evidence_dir: None,
            audit_log: None,
            compliance_tags: vec![
                "SOC2-CC8.1".to_string(),
                "NIST-800-53-CM-3".to_string(),
                "ISO27001-A.12.1.2".to_string(),
            ],
        }
    }
}

impl GateConfig {
    /// Load config for `workdir`, then apply environment overrides.
    pub fn load(workdir: &Path, explicit: Option<&Path>) -> Result<Self, GateError> {
        let mut config = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(GateError::Configuration(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_file(path)?
            }
            None => {
                let path = workdir.join(CONFIG_FILE_NAME);
                if path.is_file() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|k| std::env::var(k).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, GateError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `DESTROY_GATE_*` overrides from `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), GateError> {
        if let Some(v) = lookup("DESTROY_GATE_AUDIT_LOG").filter(|v| !v.is_empty()) {
            self.audit_log = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("DESTROY_GATE_EVIDENCE_DIR").filter(|v| !v.is_empty()) {
            self.evidence_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("DESTROY_GATE_PLAN_TIMEOUT_SECS").filter(|v| !v.is_empty()) {
            self.plan_timeout_secs = v.parse().map_err(|_| {
                GateError::Configuration(format!(
                    "DESTROY_GATE_PLAN_TIMEOUT_SECS must be a positive integer, got '{}'",
                    v
                ))
            })?;
        }
        Ok(())
    }

    /// Registry deny-list for `expected`: every known target other than it.
    pub fn registry_deny_list(&self, expected: Option<&str>) -> Vec<String> {
        self.known_targets
            .iter()
            .filter(|t| Some(t.as_str()) != expected)
            .cloned()
            .collect()
    }

    pub fn is_production(&self, target: &str) -> bool {
        self.production_targets.iter().any(|t| t == target)
            || self
                .production_markers
                .iter()
                .filter(|m| !m.is_empty())
                .any(|m| target.contains(m.as_str()))
    }

    pub fn evidence_root(&self, workdir: &Path) -> PathBuf {
        match &self.evidence_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workdir.join(dir),
            None => workdir.join("evidence"),
        }
    }

    pub fn audit_log_path(&self, workdir: &Path) -> PathBuf {
        if let Some(path) = &self.audit_log {
            return path.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".destroy-gate").join("audit.log"),
            None => workdir.join(".destroy-gate").join("audit.log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_default_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let config = GateConfig::load(tmp.path(), None).unwrap();
        assert_eq!(config.tool, "terraform");
        assert_eq!(config.target_field, "project_id");
    }

    #[test]
    fn missing_explicit_file_is_configuration_error() {
        let tmp = tempdir().unwrap();
        let err = GateConfig::load(tmp.path(), Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn file_values_override_defaults() {
        let tmp = tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "known_targets = [\"proj-a\", \"proj-b\"]\ncountdown_secs = 3\n",
        )
        .unwrap();
        let config = GateConfig::load(tmp.path(), None).unwrap();
        assert_eq!(config.countdown_secs, 3);
        assert_eq!(config.registry_deny_list(Some("proj-a")), vec!["proj-b"]);
        assert_eq!(config.tool, "terraform");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = GateConfig::default();
        config
            .apply_env(|k| match k {
                "DESTROY_GATE_PLAN_TIMEOUT_SECS" => Some("42".into()),
                "DESTROY_GATE_AUDIT_LOG" => Some("/tmp/a.log".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.plan_timeout_secs, 42);
        assert_eq!(config.audit_log, Some(PathBuf::from("/tmp/a.log")));

        let err = config
            .apply_env(|k| (k == "DESTROY_GATE_PLAN_TIMEOUT_SECS").then(|| "soon".into()))
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn production_detection_uses_list_and_markers() {
        let config = GateConfig {
            production_targets: vec!["billing-main".into()],
            ..GateConfig::default()
        };
        assert!(config.is_production("billing-main"));
        assert!(config.is_production("shop-prod-eu"));
        assert!(!config.is_production("shop-dev"));
    }
}
