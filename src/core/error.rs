use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Tool invocation failed: {0}")]
    ToolInvocation(String),
    #[error("Command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl GateError {
    /// Process exit code for an error that escapes the pipeline.
    ///
    /// Caller-argument problems map to 2; tool and validation problems map to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            GateError::Configuration(_) | GateError::TomlParse(_) => 2,
            _ => 1,
        }
    }
}
