//! Typed confirmation through the full pipeline.

mod common;

use common::{FakeCloud, FakeInfra, Workspace, plan_text, scripted, state_json};
use destroy_gate::core::session::{CheckStatus, SessionStatus};
use destroy_gate::stages::confirm::{self, ConfirmState, Confirmation, ConfirmationMachine};
use destroy_gate::stages::evidence;
use proptest::prelude::*;

fn infra_for(target: &str) -> FakeInfra {
    FakeInfra::new(state_json(&[target]), plan_text(target, 12, &[]))
}

#[test]
fn interactive_round_trip_confirms() {
    let ws = Workspace::new();
    let var_file = ws.var_file("dev.tfvars", "proj-a");
    let mut script = scripted(&["proj-a", "DESTROY"]);

    let session = ws.run(
        &ws.request("proj-a", Some(var_file)),
        &FakeCloud::on("proj-a"),
        &infra_for("proj-a"),
        &mut script.confirmation,
    );

    assert_eq!(session.status(), SessionStatus::Passed);
    assert_eq!(script.prompts.borrow().len(), 2);
    assert!(script.prompts.borrow()[0].contains("proj-a"));
    assert_eq!(script.ticks.get(), 0, "no countdown outside production");
    let steps: Vec<&str> = session.confirmations.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(steps, vec!["target", "control-word"]);
}

#[test]
fn wrong_answer_cancels_with_exit_three() {
    let ws = Workspace::new();
    let var_file = ws.var_file("dev.tfvars", "proj-a");
    let mut script = scripted(&["proj-a", "destroy"]);

    let session = ws.run(
        &ws.request("proj-a", Some(var_file)),
        &FakeCloud::on("proj-a"),
        &infra_for("proj-a"),
        &mut script.confirmation,
    );

    assert_eq!(session.status(), SessionStatus::Cancelled);
    assert_eq!(session.exit_code(), 3);
    assert!(session.is_cancelled());
    let last = session.confirmations.last().expect("record");
    assert!(!last.matched);
    assert_eq!(last.provided, "destroy");

    let manifest = session.artifacts.manifest.clone().expect("manifest");
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest).unwrap()).unwrap();
    assert_eq!(stored["status"], "CANCELLED");
    let entries = ws.audit.read_entries().unwrap();
    assert_eq!(entries.last().unwrap().action, "VALIDATION_CANCELLED");
}

#[test]
fn end_of_input_cancels() {
    let ws = Workspace::new();
    let var_file = ws.var_file("dev.tfvars", "proj-a");
    let mut script = scripted(&["proj-a"]);

    let session = ws.run(
        &ws.request("proj-a", Some(var_file)),
        &FakeCloud::on("proj-a"),
        &infra_for("proj-a"),
        &mut script.confirmation,
    );

    assert_eq!(session.exit_code(), 3);
}

#[test]
fn production_target_requires_ack_and_countdown() {
    let ws = Workspace::new();
    let var_file = ws.var_file("prod.tfvars", "shop-prod");
    let mut script = scripted(&["shop-prod", "DESTROY", "PRODUCTION"]);

    let session = ws.run(
        &ws.request("shop-prod", Some(var_file)),
        &FakeCloud::on("shop-prod"),
        &infra_for("shop-prod"),
        &mut script.confirmation,
    );

    assert!(session.production);
    assert_eq!(session.status(), SessionStatus::Passed);
    assert_eq!(script.prompts.borrow().len(), 3);
    assert_eq!(script.ticks.get(), ws.config.countdown_secs);
}

#[test]
fn production_without_ack_is_cancelled() {
    let ws = Workspace::new();
    let var_file = ws.var_file("prod.tfvars", "shop-prod");
    let mut script = scripted(&["shop-prod", "DESTROY", "yes"]);

    let session = ws.run(
        &ws.request("shop-prod", Some(var_file)),
        &FakeCloud::on("shop-prod"),
        &infra_for("shop-prod"),
        &mut script.confirmation,
    );

    assert_eq!(session.status(), SessionStatus::Cancelled);
    assert_eq!(script.ticks.get(), 0);
}

#[test]
fn mismatched_token_fails() {
    let ws = Workspace::new();
    let var_file = ws.var_file("dev.tfvars", "proj-a");
    let mut confirmation = Confirmation::non_interactive(Some("proj-b".to_string()));

    let session = ws.run(
        &ws.request("proj-a", Some(var_file)),
        &FakeCloud::on("proj-a"),
        &infra_for("proj-a"),
        &mut confirmation,
    );

    assert_eq!(session.exit_code(), 1);
    let check = session
        .checks()
        .iter()
        .find(|c| c.name == confirm::CHECK_CONFIRM)
        .unwrap();
    assert_eq!(check.status, CheckStatus::Fail);
    assert!(session.artifacts.manifest.is_some());
}

#[test]
fn token_on_production_target_passes_with_warning() {
    let ws = Workspace::new();
    let var_file = ws.var_file("prod.tfvars", "shop-prod");
    let mut confirmation = Confirmation::non_interactive(Some("shop-prod".to_string()));

    let session = ws.run(
        &ws.request("shop-prod", Some(var_file)),
        &FakeCloud::on("shop-prod"),
        &infra_for("shop-prod"),
        &mut confirmation,
    );

    assert_eq!(session.status(), SessionStatus::PassedWithWarnings);
    assert_eq!(session.exit_code(), 0);
    let manifest = session.artifacts.manifest.clone().unwrap();
    assert!(evidence::verify_manifest(&manifest).unwrap().ok());
}

proptest! {
    #[test]
    fn only_the_exact_target_advances(input in "[a-zA-Z0-9_-]{0,12}") {
        let mut m = ConfirmationMachine::new("proj-a", false);
        let next = m.submit(Some(input.as_str()));
        if input == "proj-a" {
            prop_assert_eq!(next, ConfirmState::AwaitingSecond);
        } else {
            prop_assert_eq!(next, ConfirmState::Cancelled);
        }
        prop_assert_eq!(m.records().len(), 1);
    }

    #[test]
    fn cancelled_is_absorbing(inputs in proptest::collection::vec("[A-Z]{0,10}", 1..6)) {
        let mut m = ConfirmationMachine::new("proj-a", true);
        m.submit(Some("wrong"));
        for input in &inputs {
            prop_assert_eq!(m.submit(Some(input.as_str())), ConfirmState::Cancelled);
        }
        prop_assert_eq!(m.finish_countdown(), ConfirmState::Cancelled);
    }
}
