//! Harness orchestrator: scaffold, serve, wait, probe, tear down

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::probe::{ProbeResult, Prober};
use crate::process::{ManagedProcess, ServerCommand, ServerOutput, ShutdownReport};
use crate::scaffold::{ScaffoldCommand, ScaffoldOutcome};
use crate::spec::ProbeSuite;
use crate::wait::{wait_for_port_closed, ProbeTarget};
use crate::workdir::WorkdirGuard;

/// Report of one harness run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub app_name: String,
    pub project_dir: PathBuf,
    pub addr: String,
    /// Pid of the spawned server, reaped before the report is returned
    pub server_pid: Option<u32>,
    pub ready_after_ms: Option<u64>,
    pub duration_ms: u64,
    pub probes: Vec<ProbeResult>,
    pub shutdown: Option<ShutdownReport>,
    /// Connections refused again after shutdown
    pub port_released: Option<bool>,
    pub error: Option<String>,
}

impl HarnessReport {
    pub fn passed(&self) -> usize {
        self.probes.iter().filter(|p| p.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.probes.iter().filter(|p| !p.passed).count()
    }
}

#[derive(Debug, Clone)]
pub enum HarnessOutcome {
    Passed(HarnessReport),
    /// The installed tool cannot scaffold; nothing was exercised
    Skipped { reason: String },
}

/// Configuration for one harness run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// CLI used both to scaffold and to serve
    pub tool: String,
    pub scaffold_subcommand: String,
    pub app_name: String,
    /// Arguments for the server, run inside the project directory
    pub serve_args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    /// Root to scaffold in (None = fresh temp dir, removed afterwards)
    pub workdir: Option<PathBuf>,
    /// Also chdir into the root for the duration of the run
    pub change_dir: bool,
    pub server_output: ServerOutput,
    /// Extra environment for the server process
    pub server_env: Vec<(String, String)>,
    pub suite: ProbeSuite,
    /// Retries for connection errors on probes (0 = single attempt)
    pub connect_retries: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            tool: "jac".to_string(),
            scaffold_subcommand: "create_jac_app".to_string(),
            app_name: "demo-app".to_string(),
            serve_args: vec!["serve".to_string(), "app.jac".to_string()],
            host: "127.0.0.1".to_string(),
            port: 8000,
            ready_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(15),
            workdir: None,
            change_dir: false,
            server_output: ServerOutput::Inherit,
            server_env: Vec::new(),
            suite: ProbeSuite::jac_default(),
            connect_retries: 0,
        }
    }
}

impl HarnessConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn target(&self) -> E2eResult<ProbeTarget> {
        ProbeTarget::new(
            self.host.clone(),
            self.port,
            self.ready_timeout,
            self.poll_interval,
        )
    }
}

/// Drives one scaffold/serve/probe cycle
pub struct Harness {
    config: HarnessConfig,
    report: Option<HarnessReport>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            report: None,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Report of the last run, also kept when the run failed
    pub fn report(&self) -> Option<&HarnessReport> {
        self.report.as_ref()
    }

    /// Run the whole cycle.
    ///
    /// The server is stopped and the working directory restored on every
    /// exit path, including panics in probe evaluation.
    pub fn run(&mut self) -> E2eResult<HarnessOutcome> {
        let start = Instant::now();
        self.report = None;
        let target = self.config.target()?;

        // Drop order matters: server, then cwd guard, then temp dir.
        let (_temp_dir, root) = match &self.config.workdir {
            // Absolute, so the chdir below cannot shift where it points
            Some(dir) => {
                let root = dir.canonicalize().map_err(|e| {
                    E2eError::InvalidConfig(format!("workdir {}: {}", dir.display(), e))
                })?;
                (None, root)
            }
            None => {
                let temp_dir = tempfile::Builder::new().prefix("jac-e2e-").tempdir()?;
                info!("Created temporary directory at {}", temp_dir.path().display());
                let root = temp_dir.path().to_path_buf();
                (Some(temp_dir), root)
            }
        };
        let _cwd = if self.config.change_dir {
            Some(WorkdirGuard::enter(&root)?)
        } else {
            None
        };

        let scaffold = ScaffoldCommand::new(
            self.config.tool.clone(),
            self.config.scaffold_subcommand.clone(),
            self.config.app_name.clone(),
            root,
        );
        let project_dir = match scaffold.run()? {
            ScaffoldOutcome::Created { project_dir, .. } => project_dir,
            ScaffoldOutcome::Unsupported { reason, .. } => {
                warn!("Skipping: {}", reason);
                return Ok(HarnessOutcome::Skipped { reason });
            }
        };

        let mut report = HarnessReport {
            app_name: self.config.app_name.clone(),
            project_dir: project_dir.clone(),
            addr: target.addr(),
            server_pid: None,
            ready_after_ms: None,
            duration_ms: 0,
            probes: Vec::new(),
            shutdown: None,
            port_released: None,
            error: None,
        };

        let mut command = ServerCommand::new(self.config.tool.clone())
            .args(self.config.serve_args.clone())
            .current_dir(&project_dir)
            .output(self.config.server_output.clone());
        for (key, value) in &self.config.server_env {
            command = command.env(key.clone(), value.clone());
        }
        let mut server = match ManagedProcess::spawn(command) {
            Ok(server) => server,
            Err(e) => return Err(self.finish(report, start, e)),
        };
        report.server_pid = server.pid();

        let exercised = self.exercise(&mut server, &target, &mut report);

        match server.terminate(self.config.shutdown_grace) {
            Ok(shutdown) => {
                report.shutdown = Some(shutdown);
                report.port_released = Some(wait_for_port_closed(
                    &self.config.host,
                    self.config.port,
                    self.config.shutdown_grace,
                    self.config.poll_interval,
                ));
            }
            Err(e) => error!("Failed to terminate server: {}", e),
        }

        match exercised {
            Ok(()) => {
                report.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "All {} probe(s) passed ({} ms)",
                    report.passed(),
                    report.duration_ms
                );
                self.report = Some(report.clone());
                Ok(HarnessOutcome::Passed(report))
            }
            Err(e) => Err(self.finish(report, start, e)),
        }
    }

    /// Readiness, then probes in order, stopping at the first failure.
    fn exercise(
        &self,
        server: &mut ManagedProcess,
        target: &ProbeTarget,
        report: &mut HarnessReport,
    ) -> E2eResult<()> {
        let ready_start = Instant::now();
        target.wait_with(|| match server.try_wait()? {
            Some(status) => Err(E2eError::ServerExited(format!(
                "`{}` exited with {} before {} accepted connections",
                server.command().display(),
                status,
                target.addr()
            ))),
            None => Ok(()),
        })?;
        report.ready_after_ms = Some(ready_start.elapsed().as_millis() as u64);

        let prober = Prober::new(self.config.base_url())?
            .with_connect_retries(self.config.connect_retries, self.config.poll_interval);

        info!(
            "Running suite '{}' ({} probe(s))",
            self.config.suite.name,
            self.config.suite.probes.len()
        );
        for expectation in &self.config.suite.probes {
            let result = prober.probe(expectation);
            let failure = result.to_error();
            report.probes.push(result);

            if let Some(e) = failure {
                error!("✗ GET {}", expectation.path);
                return Err(e);
            }
            info!("✓ GET {}", expectation.path);
        }

        Ok(())
    }

    fn finish(&mut self, mut report: HarnessReport, start: Instant, e: E2eError) -> E2eError {
        report.duration_ms = start.elapsed().as_millis() as u64;
        report.error = Some(e.to_string());
        self.report = Some(report);
        e
    }

    /// Write the last report as JSON into `output_dir`
    pub fn write_report(&self, output_dir: &Path) -> E2eResult<Option<PathBuf>> {
        let Some(report) = &self.report else {
            return Ok(None);
        };

        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join("harness-report.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(Some(path))
    }
}
