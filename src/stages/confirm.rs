//! Confirmation state machine.
//!
//! ```text
//! AwaitingFirst --target--> AwaitingSecond --DESTROY--> Confirmed
//!                                               \--(production)--> AwaitingProductionAck
//!                                                   --PRODUCTION--> CountingDown --> Confirmed
//! any mismatch / EOF / interrupt --> Cancelled
//! ```
//!
//! The interactive/non-interactive choice is made once at startup by
//! building a [`Confirmation`] and handing it to the pipeline.

use crate::core::error::GateError;
use crate::core::session::{ConfirmationRecord, ValidationSession};
use crate::stages::audit::{self, AuditEntry, AuditLog};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CHECK_CONFIRM: &str = "confirmation";
pub const CONTROL_WORD: &str = "DESTROY";
pub const PRODUCTION_WORD: &str = "PRODUCTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmState {
    AwaitingFirst,
    AwaitingSecond,
    AwaitingProductionAck,
    CountingDown,
    Confirmed,
    Cancelled,
}

impl ConfirmState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConfirmState::Confirmed | ConfirmState::Cancelled)
    }
}

pub struct ConfirmationMachine {
    state: ConfirmState,
    target: String,
    production: bool,
    records: Vec<ConfirmationRecord>,
}

impl ConfirmationMachine {
    pub fn new(target: &str, production: bool) -> Self {
        Self {
            state: ConfirmState::AwaitingFirst,
            target: target.to_string(),
            production,
            records: Vec::new(),
        }
    }

    pub fn state(&self) -> ConfirmState {
        self.state
    }

    pub fn records(&self) -> &[ConfirmationRecord] {
        &self.records
    }

    fn step(&self) -> Option<(&'static str, String)> {
        match self.state {
            ConfirmState::AwaitingFirst => Some(("target", self.target.clone())),
            ConfirmState::AwaitingSecond => Some(("control-word", CONTROL_WORD.to_string())),
            ConfirmState::AwaitingProductionAck => {
                Some(("production-ack", PRODUCTION_WORD.to_string()))
            }
            _ => None,
        }
    }

    /// What the operator must type next, if the machine is waiting for input.
    pub fn expected(&self) -> Option<String> {
        self.step().map(|(_, v)| v)
    }

    /// Feed one line of operator input; `None` means EOF or interrupt.
    pub fn submit(&mut self, input: Option<&str>) -> ConfirmState {
        let Some((step, expected)) = self.step() else {
            return self.state;
        };
        let provided = input
            .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
            .unwrap_or_default();
        let matched = input.is_some() && provided == expected;
        self.records.push(ConfirmationRecord {
            step: step.to_string(),
            expected,
            provided,
            matched,
        });
        self.state = match (self.state, matched) {
            (_, false) => ConfirmState::Cancelled,
            (ConfirmState::AwaitingFirst, true) => ConfirmState::AwaitingSecond,
            (ConfirmState::AwaitingSecond, true) if self.production => {
                ConfirmState::AwaitingProductionAck
            }
            (ConfirmState::AwaitingSecond, true) => ConfirmState::Confirmed,
            (ConfirmState::AwaitingProductionAck, true) => ConfirmState::CountingDown,
            (other, true) => other,
        };
        self.state
    }

    /// The countdown ran to completion without interruption.
    pub fn finish_countdown(&mut self) -> ConfirmState {
        if self.state == ConfirmState::CountingDown {
            self.state = ConfirmState::Confirmed;
        }
        self.state
    }
}

pub trait Prompter {
    /// Show `message` and read one line; `Ok(None)` on EOF.
    fn prompt(&mut self, message: &str) -> Result<Option<String>, GateError>;
}

pub trait Countdown {
    fn tick(&mut self, remaining_secs: u64);
}

pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, message: &str) -> Result<Option<String>, GateError> {
        print!("{}", message);
        io::stdout().flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        Ok((read > 0).then_some(line))
    }
}

pub struct SleepCountdown;

impl Countdown for SleepCountdown {
    fn tick(&mut self, remaining_secs: u64) {
        print!("\r  proceeding in {:>3}s (Ctrl-C to abort) ", remaining_secs);
        let _ = io::stdout().flush();
        std::thread::sleep(Duration::from_secs(1));
        if remaining_secs == 1 {
            println!();
        }
    }
}

pub enum Confirmation {
    Interactive {
        prompter: Box<dyn Prompter>,
        countdown: Box<dyn Countdown>,
    },
    NonInteractive {
        token: Option<String>,
    },
}

impl Confirmation {
    pub fn interactive() -> Self {
        Confirmation::Interactive {
            prompter: Box::new(StdinPrompter),
            countdown: Box::new(SleepCountdown),
        }
    }

    pub fn non_interactive(token: Option<String>) -> Self {
        Confirmation::NonInteractive { token }
    }

    /// Non-interactive mode was chosen but nothing pre-authorizes the run.
    pub fn missing_token(&self) -> bool {
        matches!(self, Confirmation::NonInteractive { token: None })
    }
}

#[derive(Default)]
struct WatchState {
    armed: bool,
    audit: Option<AuditLog>,
    pending: Option<(AuditEntry, AuditEntry)>,
}

/// Routes Ctrl-C to CANCELLED while confirmation is armed and to an
/// `INTERRUPTED` audit line otherwise.
#[derive(Clone, Default)]
pub struct InterruptWatch {
    inner: Arc<Mutex<WatchState>>,
}

impl InterruptWatch {
    /// Install the process signal handler. Call once per process.
    pub fn install(audit: AuditLog) -> Result<Self, GateError> {
        let watch = InterruptWatch::default();
        if let Ok(mut state) = watch.inner.lock() {
            state.audit = Some(audit);
        }
        let handler_watch = watch.clone();
        ctrlc::set_handler(move || handler_watch.on_interrupt())
            .map_err(|e| GateError::Configuration(format!("cannot install signal handler: {}", e)))?;
        Ok(watch)
    }

    /// Snapshot the lines to write if the session is interrupted now.
    pub fn track(&self, session: &ValidationSession) {
        let mut cancelled = audit::terminal_entry(session);
        cancelled.action = "VALIDATION_CANCELLED".to_string();
        cancelled.fields.retain(|(k, _)| k != "STATUS" && k != "EXIT_CODE");
        cancelled = cancelled
            .field("STATUS", "CANCELLED")
            .field("EXIT_CODE", "3")
            .field("REASON", "operator-interrupt");
        let mut interrupted = audit::terminal_entry(session);
        interrupted.action = "VALIDATION_INTERRUPTED".to_string();
        interrupted.fields.retain(|(k, _)| k != "STATUS" && k != "EXIT_CODE");
        interrupted = interrupted
            .field("STATUS", "INTERRUPTED")
            .field("EXIT_CODE", "130");
        if let Ok(mut state) = self.inner.lock() {
            state.pending = Some((cancelled, interrupted));
        }
    }

    pub fn arm(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.armed = true;
        }
    }

    pub fn disarm(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.armed = false;
        }
    }

    fn on_interrupt(&self) {
        let (armed, audit, pending) = match self.inner.lock() {
            Ok(state) => (state.armed, state.audit.clone(), state.pending.clone()),
            Err(_) => (false, None, None),
        };
        let code = if armed { 3 } else { 130 };
        if let (Some(audit), Some((cancelled, interrupted))) = (audit, pending) {
            let mut entry = if armed { cancelled } else { interrupted };
            entry.timestamp = crate::core::time::now_iso8601();
            audit.append_best_effort(&entry);
        }
        println!();
        if armed {
            println!("{} cancelled by operator", "✗".bright_magenta());
        } else {
            eprintln!("interrupted");
        }
        std::process::exit(code);
    }
}

fn prompt_text(machine: &ConfirmationMachine) -> String {
    match machine.state() {
        ConfirmState::AwaitingFirst => format!(
            "  Type the target identifier to confirm ({}): ",
            machine.target.bold()
        ),
        ConfirmState::AwaitingSecond => {
            format!("  Type {} to proceed: ", CONTROL_WORD.bright_red().bold())
        }
        _ => format!(
            "  {} target. Type {} to acknowledge: ",
            "PRODUCTION".bright_red().bold(),
            PRODUCTION_WORD.bright_red().bold()
        ),
    }
}

fn run_interactive(
    session: &mut ValidationSession,
    target: &str,
    prompter: &mut dyn Prompter,
    countdown: &mut dyn Countdown,
    countdown_secs: u64,
) -> Result<ConfirmationMachine, GateError> {
    let mut machine = ConfirmationMachine::new(target, session.production);
    if let Some(plan) = &session.plan {
        println!(
            "  About to {} {} resource(s) in '{}'.",
            session.operation.as_str().to_uppercase().bright_red(),
            plan.resource_count,
            target
        );
    }
    while !machine.state().is_terminal() {
        if machine.state() == ConfirmState::CountingDown {
            for remaining in (1..=countdown_secs).rev() {
                countdown.tick(remaining);
            }
            machine.finish_countdown();
            continue;
        }
        let answer = prompter.prompt(&prompt_text(&machine))?;
        machine.submit(answer.as_deref());
    }
    Ok(machine)
}

pub fn run_confirmation(
    session: &mut ValidationSession,
    confirmation: &mut Confirmation,
    countdown_secs: u64,
) -> Result<(), GateError> {
    let Some(target) = session.effective_target().map(str::to_string) else {
        session.fail(CHECK_CONFIRM, "no target identifier to confirm against");
        return Ok(());
    };
    match confirmation {
        Confirmation::NonInteractive { token: None } => {
            session.configuration_failure(
                CHECK_CONFIRM,
                "non-interactive mode requires a confirmation token",
            );
        }
        Confirmation::NonInteractive { token: Some(token) } => {
            let matched = *token == target;
            session.confirmations.push(ConfirmationRecord {
                step: "token".to_string(),
                expected: target.clone(),
                provided: token.clone(),
                matched,
            });
            if !matched {
                session.fail(
                    CHECK_CONFIRM,
                    format!(
                        "confirmation token '{}' does not match target '{}'",
                        token, target
                    ),
                );
            } else {
                session.pass(CHECK_CONFIRM, "pre-authorized by confirmation token");
                if session.production {
                    session.warn(
                        CHECK_CONFIRM,
                        format!(
                            "non-interactive confirmation covered production target '{}'",
                            target
                        ),
                    );
                }
            }
        }
        Confirmation::Interactive {
            prompter,
            countdown,
        } => {
            let machine = run_interactive(
                session,
                &target,
                prompter.as_mut(),
                countdown.as_mut(),
                countdown_secs,
            )?;
            session.confirmations.extend(machine.records().iter().cloned());
            match machine.state() {
                ConfirmState::Confirmed => {
                    session.pass(CHECK_CONFIRM, "operator confirmed intent");
                }
                _ => {
                    let last = machine.records().last();
                    let step = last.map(|r| r.step.as_str()).unwrap_or("input");
                    session.info(
                        CHECK_CONFIRM,
                        format!("cancelled by operator at step '{}'", step),
                    );
                    session.mark_cancelled();
                }
            }
        }
    }
    Ok(())
}
