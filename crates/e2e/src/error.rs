//! Error types for the serve harness

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tool not found: {tool} ({reason})")]
    ToolNotFound { tool: String, reason: String },

    #[error("Scaffold command failed (exit code {code:?})\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    ScaffoldFailed {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server exited before becoming ready: {0}")]
    ServerExited(String),

    #[error("Timed out after {waited:?} ({attempts} attempts) waiting for {addr} to accept connections. Last error: {last_error}")]
    PortTimeout {
        addr: String,
        waited: Duration,
        attempts: usize,
        last_error: String,
    },

    #[error("Probe failed: GET {path} - {reason}\nBody (truncated):\n{body_excerpt}")]
    ProbeFailed {
        path: String,
        reason: String,
        body_excerpt: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Whether the error comes from a probe assertion rather than the harness itself.
    pub fn is_probe_failure(&self) -> bool {
        matches!(self, E2eError::ProbeFailed { .. })
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
