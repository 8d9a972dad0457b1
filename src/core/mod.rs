//! Shared primitives for the gate: errors, session model, configuration,
//! subprocess execution and the collaborator contracts.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod exec;
pub mod output;
pub mod report;
pub mod session;
pub mod time;
