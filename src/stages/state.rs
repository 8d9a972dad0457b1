//! State Inspector: cross-checks identifiers embedded in persisted state.

use crate::core::collaborators::InfraTool;
use crate::core::error::GateError;
use crate::core::session::{CheckStatus, ValidationSession};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const CHECK_STATE: &str = "state-identifiers";

fn project_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"projects/([A-Za-z0-9_.-]+)").expect("static regex"))
}

fn walk(value: &Value, fields: &[String], out: &mut BTreeMap<String, usize>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if let Value::String(s) = v {
                    if fields.iter().any(|f| f == k) && !s.is_empty() {
                        *out.entry(s.clone()).or_default() += 1;
                        continue;
                    }
                }
                walk(v, fields, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                walk(v, fields, out);
            }
        }
        Value::String(s) => {
            for cap in project_path_re().captures_iter(s) {
                *out.entry(cap[1].to_string()).or_default() += 1;
            }
        }
        _ => {}
    }
}

/// Identifier occurrence counts across every resource instance's attributes.
pub fn extract_identifiers(state: &Value, fields: &[String]) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    let resources = state.get("resources").and_then(Value::as_array);
    for resource in resources.into_iter().flatten() {
        let instances = resource.get("instances").and_then(Value::as_array);
        for instance in instances.into_iter().flatten() {
            if let Some(attrs) = instance.get("attributes") {
                walk(attrs, fields, &mut out);
            }
        }
    }
    out
}

fn describe(ids: &BTreeMap<String, usize>) -> String {
    ids.iter()
        .map(|(id, n)| format!("{}({})", id, n))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn check_state(
    session: &mut ValidationSession,
    infra: &dyn InfraTool,
    identifier_fields: &[String],
) -> Result<(), GateError> {
    let raw = match infra.state_pull(&session.workdir) {
        Ok(raw) => raw,
        Err(e) => {
            session.fail(CHECK_STATE, format!("cannot read infrastructure state: {}", e));
            return Ok(());
        }
    };
    session.state_snapshot = Some(raw.clone());
    if raw.trim().is_empty() {
        session.info(CHECK_STATE, "no persisted state found");
        return Ok(());
    }

    let state: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            session.fail(CHECK_STATE, format!("state is not valid JSON: {}", e));
            return Ok(());
        }
    };
    let resource_count = state
        .get("resources")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if resource_count == 0 {
        session.info(CHECK_STATE, "persisted state contains no resources");
        return Ok(());
    }

    let ids = extract_identifiers(&state, identifier_fields);
    let Some(target) = session.effective_target().map(str::to_string) else {
        session.fail(
            CHECK_STATE,
            format!(
                "no target to compare state against; state references: {}",
                describe(&ids)
            ),
        );
        return Ok(());
    };

    let denied: BTreeMap<String, usize> = ids
        .iter()
        .filter(|(id, _)| session.deny_list.iter().any(|d| d == *id))
        .map(|(id, n)| (id.clone(), *n))
        .collect();
    let unexpected: BTreeMap<String, usize> = ids
        .iter()
        .filter(|(id, _)| **id != target && !denied.contains_key(*id))
        .map(|(id, n)| (id.clone(), *n))
        .collect();
    let target_refs = ids.get(&target).copied().unwrap_or(0);

    let mut failed = false;
    if target_refs == 0 {
        failed = true;
        session.record(
            CHECK_STATE,
            CheckStatus::Fail,
            format!(
                "state ({} resources) never references expected target '{}'",
                resource_count, target
            ),
            Some(format!("identifiers found: {}", describe(&ids))),
        );
    }
    if !denied.is_empty() {
        failed = true;
        session.fail(
            CHECK_STATE,
            format!(
                "state references disallowed identifier(s): {}",
                describe(&denied)
            ),
        );
    }
    if !unexpected.is_empty() {
        session.warn(
            CHECK_STATE,
            format!(
                "state references identifiers other than '{}': {}",
                target,
                describe(&unexpected)
            ),
        );
    }
    if !failed && unexpected.is_empty() {
        session.pass(
            CHECK_STATE,
            format!(
                "state ({} resources) references only '{}' ({} occurrences)",
                resource_count, target, target_refs
            ),
        );
    }
    Ok(())
}
