//! Evidence Recorder: state backup and a self-digesting session manifest.
//!
//! The manifest digest is SHA-256 over the compact, key-sorted JSON of the
//! manifest with `digest` set to the empty string. Verification blanks the
//! field again and recomputes, so the stored file may be pretty-printed.

use crate::core::collaborators::InfraTool;
use crate::core::error::GateError;
use crate::core::session::{
    CheckResult, ConfirmationRecord, DestroyPlan, SessionStatus, ValidationSession,
};
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const CHECK_BACKUP: &str = "state-backup";
pub const CHECK_MANIFEST: &str = "evidence-manifest";
pub const MANIFEST_VERSION: &str = "1.0";
pub const MANIFEST_FILE: &str = "manifest.json";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: String,
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceManifest {
    pub manifest_version: String,
    pub session_id: String,
    pub generated_at: String,
    pub started_at: String,
    pub operator: String,
    pub host: String,
    pub operation: String,
    pub expected_target: Option<String>,
    pub effective_target: Option<String>,
    pub active_identity: Option<String>,
    pub active_target: Option<String>,
    pub workdir: String,
    pub var_file: Option<String>,
    pub production: bool,
    pub status: SessionStatus,
    pub checks: Vec<CheckResult>,
    pub plan: Option<DestroyPlan>,
    pub confirmations: Vec<ConfirmationRecord>,
    pub artifacts: Vec<ArtifactRef>,
    pub audit_log: Option<String>,
    pub compliance_tags: Vec<String>,
    pub digest: String,
}

/// Digest of `manifest` with its `digest` field blanked.
pub fn canonical_digest(manifest: &Value) -> Result<String, GateError> {
    let mut blanked = manifest.clone();
    match blanked.as_object_mut() {
        Some(obj) => {
            obj.insert("digest".to_string(), Value::String(String::new()));
        }
        None => {
            return Err(GateError::Validation(
                "manifest is not a JSON object".to_string(),
            ));
        }
    }
    let canonical = serde_json::to_string(&blanked)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Compute the digest, embed it and write the manifest. Returns the digest.
pub fn write_manifest(path: &Path, manifest: &EvidenceManifest) -> Result<String, GateError> {
    let mut value = serde_json::to_value(manifest)?;
    let digest = canonical_digest(&value)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("digest".to_string(), Value::String(digest.clone()));
    }
    fs::write(path, serde_json::to_string_pretty(&value)?)?;
    Ok(digest)
}

fn artifact_ref(kind: &str, path: &Option<PathBuf>) -> Result<Option<ArtifactRef>, GateError> {
    let Some(path) = path.as_ref().filter(|p| p.is_file()) else {
        return Ok(None);
    };
    Ok(Some(ArtifactRef {
        kind: kind.to_string(),
        path: path.display().to_string(),
        sha256: sha256_hex(&fs::read(path)?),
    }))
}

fn backup_state(session: &mut ValidationSession, infra: &dyn InfraTool) -> Result<(), GateError> {
    let snapshot = match session.state_snapshot.clone() {
        Some(s) => s,
        None => match infra.state_pull(&session.workdir) {
            Ok(s) => s,
            Err(e) => {
                session.fail(CHECK_BACKUP, format!("state backup failed: {}", e));
                return Ok(());
            }
        },
    };
    if snapshot.trim().is_empty() {
        session.info(CHECK_BACKUP, "no pre-existing state to back up");
        return Ok(());
    }
    fs::create_dir_all(&session.evidence_dir)?;
    let backup = session.evidence_dir.join("state-backup.json");
    fs::write(&backup, snapshot.as_bytes())?;
    let digest = sha256_hex(snapshot.as_bytes());
    let sidecar = session.evidence_dir.join("state-backup.json.sha256");
    fs::write(&sidecar, format!("{}  state-backup.json\n", digest))?;
    session.artifacts.state_backup = Some(backup.clone());
    session.artifacts.state_digest = Some(sidecar);
    session.pass(
        CHECK_BACKUP,
        format!("state backed up to {} (sha256 {})", backup.display(), digest),
    );
    Ok(())
}

pub fn build_manifest(
    session: &ValidationSession,
    compliance_tags: &[String],
) -> Result<EvidenceManifest, GateError> {
    let a = &session.artifacts;
    let artifacts = [
        artifact_ref("plan", &a.plan_file)?,
        artifact_ref("plan_text", &a.plan_text)?,
        artifact_ref("plan_json", &a.plan_json)?,
        artifact_ref("state_backup", &a.state_backup)?,
        artifact_ref("state_backup_digest", &a.state_digest)?,
    ]
    .into_iter()
    .flatten()
    .collect();
    Ok(EvidenceManifest {
        manifest_version: MANIFEST_VERSION.to_string(),
        session_id: session.id.clone(),
        generated_at: time::now_iso8601(),
        started_at: time::iso8601(session.started_at),
        operator: session.operator.clone(),
        host: session.host.clone(),
        operation: session.operation.as_str().to_string(),
        expected_target: session.expected_target.clone(),
        effective_target: session.effective_target().map(str::to_string),
        active_identity: session.active_identity.clone(),
        active_target: session.active_target.clone(),
        workdir: session.workdir.display().to_string(),
        var_file: session.var_file.as_ref().map(|p| p.display().to_string()),
        production: session.production,
        status: session.status(),
        checks: session.checks().to_vec(),
        plan: session.plan.clone(),
        confirmations: session.confirmations.clone(),
        artifacts,
        audit_log: a.audit_log.as_ref().map(|p| p.display().to_string()),
        compliance_tags: compliance_tags.to_vec(),
        digest: String::new(),
    })
}

pub fn record_evidence(
    session: &mut ValidationSession,
    infra: &dyn InfraTool,
    compliance_tags: &[String],
    skip_backup: bool,
) -> Result<(), GateError> {
    if skip_backup {
        session.warn(CHECK_BACKUP, "state backup skipped by operator override");
    } else {
        backup_state(session, infra)?;
    }
    fs::create_dir_all(&session.evidence_dir)?;
    let path = session.evidence_dir.join(MANIFEST_FILE);
    let manifest = build_manifest(session, compliance_tags)?;
    let digest = write_manifest(&path, &manifest)?;
    session.artifacts.manifest = Some(path.clone());
    session.info(
        CHECK_MANIFEST,
        format!("manifest written to {} (digest {})", path.display(), digest),
    );
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub manifest: String,
    pub stored_digest: String,
    pub computed_digest: String,
    pub artifact_failures: Vec<String>,
}

impl VerifyReport {
    pub fn digest_ok(&self) -> bool {
        !self.stored_digest.is_empty() && self.stored_digest == self.computed_digest
    }

    pub fn ok(&self) -> bool {
        self.digest_ok() && self.artifact_failures.is_empty()
    }
}

/// Recompute the manifest digest and every artifact hash it lists.
pub fn verify_manifest(path: &Path) -> Result<VerifyReport, GateError> {
    if !path.is_file() {
        return Err(GateError::NotFound(format!("manifest {}", path.display())));
    }
    let value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let stored_digest = value
        .get("digest")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let computed_digest = canonical_digest(&value)?;

    let mut artifact_failures = Vec::new();
    let artifacts: Vec<ArtifactRef> = value
        .get("artifacts")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    for artifact in artifacts {
        let artifact_path = Path::new(&artifact.path);
        match fs::read(artifact_path) {
            Ok(bytes) => {
                let actual = sha256_hex(&bytes);
                if actual != artifact.sha256 {
                    artifact_failures.push(format!(
                        "{} ({}): expected={} actual={}",
                        artifact.kind, artifact.path, artifact.sha256, actual
                    ));
                }
            }
            Err(_) => artifact_failures.push(format!(
                "{} ({}): file missing",
                artifact.kind, artifact.path
            )),
        }
    }

    Ok(VerifyReport {
        manifest: path.display().to_string(),
        stored_digest,
        computed_digest,
        artifact_failures,
    })
}
