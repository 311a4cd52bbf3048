//! Scaffold step - generate the project under test through the CLI

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Output of a command run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaffoldOutcome {
    Created {
        project_dir: PathBuf,
        output: CapturedOutput,
    },
    /// The installed tool does not know the subcommand
    Unsupported {
        reason: String,
        output: CapturedOutput,
    },
}

/// `<program> <subcommand> <name>` run inside `root`
#[derive(Debug, Clone)]
pub struct ScaffoldCommand {
    pub program: String,
    pub subcommand: String,
    pub name: String,
    pub root: PathBuf,
}

impl ScaffoldCommand {
    pub fn new(
        program: impl Into<String>,
        subcommand: impl Into<String>,
        name: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            subcommand: subcommand.into(),
            name: name.into(),
            root: root.into(),
        }
    }

    /// Directory the scaffolder is expected to create
    pub fn project_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Run synchronously and classify the result.
    pub fn run(&self) -> E2eResult<ScaffoldOutcome> {
        info!(
            "Running '{} {} {}' in {}",
            self.program,
            self.subcommand,
            self.name,
            self.root.display()
        );

        // Otherwise a missing root surfaces as NotFound, same as a missing tool
        if !self.root.is_dir() {
            return Err(E2eError::InvalidConfig(format!(
                "scaffold root {} is not a directory",
                self.root.display()
            )));
        }

        let output = Command::new(&self.program)
            .arg(&self.subcommand)
            .arg(&self.name)
            .current_dir(&self.root)
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => E2eError::ToolNotFound {
                    tool: self.program.clone(),
                    reason: e.to_string(),
                },
                _ => E2eError::Io(e),
            })?;

        let captured = CapturedOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            "'{} {}' completed returncode={:?}\nSTDOUT:\n{}\nSTDERR:\n{}",
            self.program, self.subcommand, captured.code, captured.stdout, captured.stderr
        );

        self.classify(captured)
    }

    fn classify(&self, output: CapturedOutput) -> E2eResult<ScaffoldOutcome> {
        if !output.success() {
            if is_unknown_subcommand(&output.stderr, &self.subcommand) {
                warn!(
                    "Installed `{}` does not support `{}`",
                    self.program, self.subcommand
                );
                return Ok(ScaffoldOutcome::Unsupported {
                    reason: format!(
                        "installed `{}` CLI does not support `{}`",
                        self.program, self.subcommand
                    ),
                    output,
                });
            }
            return Err(E2eError::ScaffoldFailed {
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let project_dir = self.project_dir();
        if !project_dir.is_dir() {
            return Err(E2eError::ScaffoldFailed {
                code: output.code,
                stdout: output.stdout,
                stderr: format!(
                    "{}\nexpected project directory {} was not created",
                    output.stderr,
                    project_dir.display()
                ),
            });
        }

        info!("Created project at {}", project_dir.display());
        Ok(ScaffoldOutcome::Created {
            project_dir,
            output,
        })
    }
}

/// Recognise the "unknown subcommand" messages of common CLI parsers
/// (argparse, clap, click) when they name `subcommand`.
pub fn is_unknown_subcommand(stderr: &str, subcommand: &str) -> bool {
    let pattern = format!(
        r#"(?i)(invalid choice|unrecognized subcommand|unrecognized command|unknown subcommand|unknown command|no such command):?\s*['"`]?{}\b"#,
        regex::escape(subcommand)
    );

    match Regex::new(&pattern) {
        Ok(re) => re.is_match(stderr),
        Err(_) => false,
    }
}

/// Whether `program` resolves to an executable on `PATH`.
pub fn tool_in_path(program: &str) -> bool {
    if Path::new(program).components().count() > 1 {
        return Path::new(program).is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                let candidate = dir.join(program);
                candidate.is_file()
            })
        })
        .unwrap_or(false)
}
