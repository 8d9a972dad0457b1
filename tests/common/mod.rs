//! In-memory collaborators and workspace fixtures shared by the integration suites.
#![allow(dead_code)]

use destroy_gate::core::collaborators::{CloudSession, InfraTool, PlanRequest};
use destroy_gate::core::config::GateConfig;
use destroy_gate::core::error::GateError;
use destroy_gate::core::session::{CountRange, OperationKind, ValidationSession};
use destroy_gate::stages::audit::AuditLog;
use destroy_gate::stages::confirm::{Confirmation, Countdown, Prompter};
use destroy_gate::stages::pipeline::{self, Collaborators, GateRequest};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

pub struct FakeCloud {
    pub identity: String,
    pub target: String,
}

impl FakeCloud {
    pub fn on(target: &str) -> Self {
        Self {
            identity: "ops@example.com".to_string(),
            target: target.to_string(),
        }
    }
}

impl CloudSession for FakeCloud {
    fn active_identity(&self) -> Result<String, GateError> {
        Ok(self.identity.clone())
    }

    fn active_target(&self) -> Result<String, GateError> {
        Ok(self.target.clone())
    }
}

pub struct FakeInfra {
    pub state: String,
    pub plan_text: String,
    pub plan_json: Option<String>,
    pub plan_error: Option<fn() -> GateError>,
    pub plan_calls: Cell<usize>,
    pub plan_var_files: RefCell<Vec<Option<PathBuf>>>,
}

impl FakeInfra {
    pub fn new(state: String, plan_text: String) -> Self {
        Self {
            state,
            plan_text,
            plan_json: None,
            plan_error: None,
            plan_calls: Cell::new(0),
            plan_var_files: RefCell::new(Vec::new()),
        }
    }
}

impl InfraTool for FakeInfra {
    fn state_pull(&self, _workdir: &Path) -> Result<String, GateError> {
        Ok(self.state.clone())
    }

    fn plan(&self, _workdir: &Path, request: &PlanRequest<'_>) -> Result<(), GateError> {
        self.plan_calls.set(self.plan_calls.get() + 1);
        self.plan_var_files
            .borrow_mut()
            .push(request.var_file.map(Path::to_path_buf));
        if let Some(err) = self.plan_error {
            return Err(err());
        }
        fs::write(request.out, b"binary-plan")?;
        Ok(())
    }

    fn show_text(&self, _workdir: &Path, _plan: &Path) -> Result<String, GateError> {
        Ok(self.plan_text.clone())
    }

    fn show_json(&self, _workdir: &Path, _plan: &Path) -> Result<String, GateError> {
        self.plan_json
            .clone()
            .ok_or_else(|| GateError::ToolInvocation("show -json unsupported".to_string()))
    }
}

/// Answers prompts from a script; runs dry as EOF.
pub struct ScriptedPrompter {
    pub answers: VecDeque<Option<String>>,
    pub prompts: Rc<RefCell<Vec<String>>>,
}

impl Prompter for ScriptedPrompter {
    fn prompt(&mut self, message: &str) -> Result<Option<String>, GateError> {
        self.prompts.borrow_mut().push(message.to_string());
        Ok(self.answers.pop_front().flatten())
    }
}

pub struct CountingCountdown(pub Rc<Cell<u64>>);

impl Countdown for CountingCountdown {
    fn tick(&mut self, _remaining_secs: u64) {
        self.0.set(self.0.get() + 1);
    }
}

pub struct Scripted {
    pub confirmation: Confirmation,
    pub prompts: Rc<RefCell<Vec<String>>>,
    pub ticks: Rc<Cell<u64>>,
}

pub fn scripted(answers: &[&str]) -> Scripted {
    let prompts = Rc::new(RefCell::new(Vec::new()));
    let ticks = Rc::new(Cell::new(0));
    Scripted {
        confirmation: Confirmation::Interactive {
            prompter: Box::new(ScriptedPrompter {
                answers: answers.iter().map(|a| Some(format!("{}\n", a))).collect(),
                prompts: prompts.clone(),
            }),
            countdown: Box::new(CountingCountdown(ticks.clone())),
        },
        prompts,
        ticks,
    }
}

pub fn state_json(ids: &[&str]) -> String {
    let instances: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::json!({"attributes": {"project": id, "name": "r"}}))
        .collect();
    serde_json::json!({
        "version": 4,
        "resources": [{"type": "google_compute_instance", "name": "vm", "instances": instances}]
    })
    .to_string()
}

/// Rendered destroy plan: `count` resources in `target`, plus one per `extra` identifier.
pub fn plan_text(target: &str, count: usize, extra: &[&str]) -> String {
    let mut out = String::from("Terraform will perform the following actions:\n\n");
    let mut push = |i: usize, project: &str| {
        out.push_str(&format!(
            "  # google_compute_instance.vm[{i}] will be destroyed\n  - resource \"google_compute_instance\" \"vm\" {{\n      - project = \"{project}\" -> null\n    }}\n\n"
        ));
    };
    for i in 0..count {
        push(i, target);
    }
    for (j, id) in extra.iter().enumerate() {
        push(count + j, id);
    }
    out.push_str(&format!(
        "Plan: 0 to add, 0 to change, {} to destroy.\n",
        count + extra.len()
    ));
    out
}

pub struct Workspace {
    pub dir: TempDir,
    pub config: GateConfig,
    pub audit: AuditLog,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = GateConfig {
            known_targets: vec!["proj-a".into(), "proj-b".into(), "proj-c".into()],
            evidence_dir: Some(dir.path().join("evidence")),
            countdown_secs: 3,
            ..GateConfig::default()
        };
        let audit = AuditLog::new(dir.path().join("audit").join("audit.log"));
        audit.ensure().expect("audit log");
        Self { dir, config, audit }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn var_file(&self, name: &str, target: &str) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, format!("project_id = \"{}\"\nregion = \"us-central1\"\n", target))
            .expect("write var file");
        path
    }

    pub fn request(&self, target: &str, var_file: Option<PathBuf>) -> GateRequest {
        GateRequest {
            operation: OperationKind::Destroy,
            expected_target: Some(target.to_string()),
            workdir: self.root().to_path_buf(),
            var_file,
            count_range: CountRange {
                min: Some(10),
                max: Some(15),
            },
            deny: Vec::new(),
            production: false,
            skip_backup: false,
            verbose: false,
            operator: "alice".to_string(),
            host: "ops-1".to_string(),
        }
    }

    pub fn run(
        &self,
        request: &GateRequest,
        cloud: &FakeCloud,
        infra: &FakeInfra,
        confirmation: &mut Confirmation,
    ) -> ValidationSession {
        pipeline::run(
            request,
            &self.config,
            Collaborators { cloud, infra },
            confirmation,
            &self.audit,
            None,
        )
    }
}
