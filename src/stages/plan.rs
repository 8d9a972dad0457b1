//! Plan Generator & Analyzer.
//!
//! Generates a dry-run plan into the session's evidence directory, renders
//! it, and scans the result. Structured `show -json` output is preferred;
//! the rendered text is scanned only when structured output is unavailable.

use crate::core::collaborators::{InfraTool, PlanRequest};
use crate::core::error::GateError;
use crate::core::session::{
    AnalysisSource, CheckStatus, CountRange, DestroyPlan, OperationKind, ValidationSession,
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::sync::OnceLock;
use std::time::Duration;

pub const CHECK_GENERATE: &str = "plan-generate";
pub const CHECK_COUNT: &str = "plan-count";
pub const CHECK_TARGET: &str = "plan-target";
pub const CHECK_DISALLOWED: &str = "plan-disallowed";
pub const CHECK_HISTOGRAM: &str = "plan-histogram";

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Whole-token occurrences of `needle` in `haystack`.
///
/// `proj-a` does not match inside `proj-ab` or `xproj-a`.
pub fn count_token(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack
        .match_indices(needle)
        .filter(|(idx, _)| {
            let before = haystack[..*idx].chars().next_back();
            let after = haystack[idx + needle.len()..].chars().next();
            !before.is_some_and(is_token_char) && !after.is_some_and(is_token_char)
        })
        .count()
}

/// Resource type from an address such as `module.net.google_compute_network.main[0]`.
pub fn resource_type(address: &str) -> String {
    let mut parts: Vec<&str> = address.split('.').collect();
    while parts.len() > 2 && parts[0] == "module" {
        parts.drain(..2);
    }
    if parts.first() == Some(&"data") && parts.len() > 1 {
        parts.remove(0);
    }
    parts
        .first()
        .map(|t| t.split('[').next().unwrap_or(t).to_string())
        .unwrap_or_default()
}

fn removal_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*#\s+(\S+)\s+(?:will be destroyed|must be replaced)")
            .expect("static regex")
    })
}

fn summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Plan:\s+(\d+) to add,\s+(\d+) to change,\s+(\d+) to destroy")
            .expect("static regex")
    })
}

fn count_identifiers(
    occurrences: impl Fn(&str) -> usize,
    expected: &str,
    disallowed: &[String],
) -> (usize, BTreeMap<String, usize>) {
    let expected_count = occurrences(expected);
    let mut by_id = BTreeMap::new();
    for id in disallowed {
        let n = occurrences(id);
        if n > 0 {
            by_id.insert(id.clone(), n);
        }
    }
    (expected_count, by_id)
}

/// Text fallback: scan `show -no-color` output.
pub fn analyze_text(text: &str, expected: &str, disallowed: &[String]) -> DestroyPlan {
    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    let mut listed = 0;
    for cap in removal_line_re().captures_iter(text) {
        listed += 1;
        *histogram.entry(resource_type(&cap[1])).or_default() += 1;
    }
    let resource_count = summary_re()
        .captures(text)
        .and_then(|c| c[3].parse::<usize>().ok())
        .unwrap_or(listed);
    let (expected_occurrences, disallowed_occurrences) =
        count_identifiers(|id| count_token(text, id), expected, disallowed);
    DestroyPlan {
        source: AnalysisSource::Text,
        resource_count,
        histogram,
        expected_occurrences,
        disallowed_occurrences,
    }
}

fn string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| string_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| string_leaves(v, out)),
        _ => {}
    }
}

/// Structured analysis over `show -json` planned-change records.
///
/// Only deletions count toward the removal total. Identifiers are read from
/// `change.before` of deletions for `destroy`; other operations scan
/// `before` and `after` of every record that is not a `no-op`.
///
/// Returns `None` when the document has no `resource_changes` array.
pub fn analyze_structured(
    plan: &Value,
    operation: OperationKind,
    expected: &str,
    disallowed: &[String],
) -> Option<DestroyPlan> {
    let changes = plan.get("resource_changes")?.as_array()?;
    let destroy = operation == OperationKind::Destroy;
    let mut histogram: BTreeMap<String, usize> = BTreeMap::new();
    let mut leaves: Vec<&str> = Vec::new();
    let mut resource_count = 0;
    for record in changes {
        let actions: Vec<&str> = record
            .pointer("/change/actions")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let removes = actions.contains(&"delete");
        let changes_something = !actions.is_empty() && actions.iter().any(|a| *a != "no-op");

        if removes {
            resource_count += 1;
            let kind = record
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    record
                        .get("address")
                        .and_then(Value::as_str)
                        .map(resource_type)
                })
                .unwrap_or_else(|| "unknown".to_string());
            *histogram.entry(kind).or_default() += 1;
        }

        if destroy {
            if removes {
                if let Some(before) = record.pointer("/change/before") {
                    string_leaves(before, &mut leaves);
                }
            }
        } else if changes_something {
            for side in ["/change/before", "/change/after"] {
                if let Some(v) = record.pointer(side) {
                    string_leaves(v, &mut leaves);
                }
            }
        }
    }
    let (expected_occurrences, disallowed_occurrences) = count_identifiers(
        |id| leaves.iter().map(|l| count_token(l, id)).sum(),
        expected,
        disallowed,
    );
    Some(DestroyPlan {
        source: AnalysisSource::Structured,
        resource_count,
        histogram,
        expected_occurrences,
        disallowed_occurrences,
    })
}

/// Apply the analysis rules to a scanned plan.
pub fn evaluate(
    session: &mut ValidationSession,
    plan: &DestroyPlan,
    expected: &str,
    range: &CountRange,
) {
    let n = plan.resource_count;
    if range.is_unbounded() {
        session.info(
            CHECK_COUNT,
            format!("{} resource(s) marked for removal (no range declared)", n),
        );
    } else if range.contains(n) {
        session.pass(
            CHECK_COUNT,
            format!("{} resource(s) marked for removal, within {}", n, range.describe()),
        );
    } else {
        session.fail(CHECK_COUNT, format!("{} not in {}", n, range.describe()));
    }
    if n == 0 && session.operation.is_destructive() {
        session.warn(CHECK_COUNT, "plan removes nothing");
    }

    if plan.expected_occurrences == 0 {
        session.fail(
            CHECK_TARGET,
            format!("expected identifier '{}' appears 0 times in plan", expected),
        );
    } else {
        session.pass(
            CHECK_TARGET,
            format!(
                "expected identifier '{}' appears {} time(s) in plan",
                expected, plan.expected_occurrences
            ),
        );
    }

    if plan.disallowed_total() > 0 {
        let listed = plan
            .disallowed_occurrences
            .iter()
            .map(|(id, c)| format!("{} x{}", id, c))
            .collect::<Vec<_>>()
            .join(", ");
        session.fail(
            CHECK_DISALLOWED,
            format!("disallowed identifiers in plan: {}", listed),
        );
    } else if session.deny_list.is_empty() {
        session.info(CHECK_DISALLOWED, "no deny-list configured");
    } else {
        session.pass(
            CHECK_DISALLOWED,
            format!(
                "no disallowed identifiers in plan (checked {})",
                session.deny_list.join(", ")
            ),
        );
    }

    let plan_failed = session.checks().iter().any(|c| {
        c.status == CheckStatus::Fail
            && matches!(c.name.as_str(), CHECK_COUNT | CHECK_TARGET | CHECK_DISALLOWED)
    });
    if !plan_failed {
        let detail = plan
            .histogram
            .iter()
            .map(|(t, c)| format!("{:<48} {}", t, c))
            .collect::<Vec<_>>()
            .join("\n");
        session.record(
            CHECK_HISTOGRAM,
            CheckStatus::Info,
            format!(
                "{} resource type(s) affected ({} analysis)",
                plan.histogram.len(),
                match plan.source {
                    AnalysisSource::Structured => "structured",
                    AnalysisSource::Text => "text",
                }
            ),
            (!detail.is_empty()).then_some(detail),
        );
    }
}

/// Generate the plan and analyze it. An `Err` halts the pipeline.
pub fn generate_and_analyze(
    session: &mut ValidationSession,
    infra: &dyn InfraTool,
    range: &CountRange,
    timeout: Duration,
) -> Result<(), GateError> {
    let Some(expected) = session.effective_target().map(str::to_string) else {
        return Err(GateError::Validation(
            "no target identifier to analyze the plan against".to_string(),
        ));
    };
    fs::create_dir_all(&session.evidence_dir)?;
    let destroy = session.operation == OperationKind::Destroy;
    let plan_file = session.evidence_dir.join(if destroy {
        "destroy.tfplan"
    } else {
        "changes.tfplan"
    });

    let request = PlanRequest {
        destroy,
        var_file: session.var_file.as_deref(),
        out: &plan_file,
        timeout,
    };
    infra.plan(&session.workdir, &request)?;
    session.artifacts.plan_file = Some(plan_file.clone());

    let text = infra.show_text(&session.workdir, &plan_file)?;
    let text_path = session.evidence_dir.join("plan.txt");
    fs::write(&text_path, &text)?;
    session.artifacts.plan_text = Some(text_path);

    let structured = match infra.show_json(&session.workdir, &plan_file) {
        Ok(raw) if !raw.trim().is_empty() => {
            let json_path = session.evidence_dir.join("plan.json");
            fs::write(&json_path, &raw)?;
            session.artifacts.plan_json = Some(json_path);
            serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| {
                    analyze_structured(&v, session.operation, &expected, &session.deny_list)
                })
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "structured plan output unavailable");
            None
        }
    };

    let plan = match structured {
        Some(p) => p,
        None => {
            session.info(
                CHECK_GENERATE,
                "structured plan output unavailable; falling back to text scan",
            );
            analyze_text(&text, &expected, &session.deny_list)
        }
    };
    session.pass(
        CHECK_GENERATE,
        format!(
            "{} plan generated at {}",
            session.operation.as_str(),
            plan_file.display()
        ),
    );
    evaluate(session, &plan, &expected, range);
    session.plan = Some(plan);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn count_token_respects_boundaries() {
        let text = "proj-a proj-ab xproj-a projects/proj-a/x \"proj-a\" proj-a_1";
        assert_eq!(count_token(text, "proj-a"), 3);
        assert_eq!(count_token(text, ""), 0);
    }

    #[test]
    fn resource_type_strips_modules_and_indexes() {
        assert_eq!(
            resource_type("module.net.module.sub.google_compute_network.main[0]"),
            "google_compute_network"
        );
        assert_eq!(resource_type("google_storage_bucket.logs"), "google_storage_bucket");
        assert_eq!(resource_type("data.google_project.this"), "google_project");
    }

    #[test]
    fn text_analysis_prefers_summary_count() {
        let text = "\
  # google_compute_instance.web will be destroyed
  # module.db.google_sql_database_instance.main must be replaced
Plan: 1 to add, 0 to change, 2 to destroy.
project = \"proj-a\"
";
        let plan = analyze_text(text, "proj-a", &["proj-b".to_string()]);
        assert_eq!(plan.resource_count, 2);
        assert_eq!(plan.histogram.get("google_compute_instance"), Some(&1));
        assert_eq!(plan.histogram.get("google_sql_database_instance"), Some(&1));
        assert_eq!(plan.expected_occurrences, 1);
        assert!(plan.disallowed_occurrences.is_empty());
    }

    #[test]
    fn structured_analysis_counts_deletes_only() {
        let doc = json!({
            "resource_changes": [
                {"address": "google_storage_bucket.a", "type": "google_storage_bucket",
                 "change": {"actions": ["delete"], "before": {"project": "proj-a", "name": "a"}}},
                {"address": "google_compute_instance.b", "type": "google_compute_instance",
                 "change": {"actions": ["delete", "create"], "before": {"project": "proj-b"}}},
                {"address": "google_pubsub_topic.c", "type": "google_pubsub_topic",
                 "change": {"actions": ["no-op"], "before": {"project": "proj-a"}}}
            ]
        });
        let plan = analyze_structured(&doc, OperationKind::Destroy, "proj-a", &["proj-b".to_string()])
            .unwrap();
        assert_eq!(plan.source, AnalysisSource::Structured);
        assert_eq!(plan.resource_count, 2);
        assert_eq!(plan.expected_occurrences, 1);
        assert_eq!(plan.disallowed_occurrences.get("proj-b"), Some(&1));
        assert!(
            analyze_structured(&json!({"format_version": "1.2"}), OperationKind::Destroy, "proj-a", &[])
                .is_none()
        );
    }

    #[test]
    fn structured_analysis_reads_created_values_outside_destroy() {
        let doc = json!({
            "resource_changes": [
                {"address": "google_storage_bucket.new", "type": "google_storage_bucket",
                 "change": {"actions": ["create"], "before": null, "after": {"project": "proj-a"}}},
                {"address": "google_compute_network.main", "type": "google_compute_network",
                 "change": {"actions": ["update"], "before": {"project": "proj-a"}, "after": {"project": "proj-a"}}},
                {"address": "google_pubsub_topic.t", "type": "google_pubsub_topic",
                 "change": {"actions": ["no-op"], "before": {"project": "proj-b"}, "after": {"project": "proj-b"}}}
            ]
        });
        let deny = ["proj-b".to_string()];
        let apply = analyze_structured(&doc, OperationKind::Apply, "proj-a", &deny).unwrap();
        assert_eq!(apply.resource_count, 0);
        assert!(apply.histogram.is_empty());
        assert_eq!(apply.expected_occurrences, 3);
        assert!(apply.disallowed_occurrences.is_empty());

        let destroy = analyze_structured(&doc, OperationKind::Destroy, "proj-a", &deny).unwrap();
        assert_eq!(destroy.expected_occurrences, 0);
    }
}
