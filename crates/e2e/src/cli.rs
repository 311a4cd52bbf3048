//! Command line of the `serve_e2e` runner
//!
//! The runner is a `harness = false` test binary, so `cargo test` hands it
//! libtest's own flags and name filters. Those are dropped before clap sees
//! the arguments; anything else clap does not know is still an error.

use std::path::PathBuf;
use std::time::Duration;

use clap::{CommandFactory, Parser};
use tracing::debug;

use crate::error::E2eResult;
use crate::process::ServerOutput;
use crate::runner::HarnessConfig;
use crate::spec::ProbeSuite;

/// libtest switches without a value
const LIBTEST_FLAGS: &[&str] = &[
    "--nocapture",
    "--no-capture",
    "--show-output",
    "--quiet",
    "-q",
    "--ignored",
    "--include-ignored",
    "--exact",
    "--list",
    "--bench",
    "--test",
    "--shuffle",
    "--report-time",
    "--ensure-time",
    "--exclude-should-panic",
    "--force-run-in-process",
];

/// libtest options taking a value, as `--opt value` or `--opt=value`
const LIBTEST_OPTIONS: &[&str] = &[
    "--test-threads",
    "--color",
    "--format",
    "--skip",
    "--logfile",
    "--shuffle-seed",
    "-Z",
];

#[derive(Parser, Debug)]
#[command(name = "jac-serve-e2e")]
#[command(about = "End-to-end check of `jac serve`")]
pub struct Args {
    /// CLI used to scaffold and serve
    #[arg(long, env = "JAC_E2E_TOOL", default_value = "jac")]
    pub tool: String,

    /// Name of the project to scaffold
    #[arg(long, env = "JAC_E2E_APP_NAME", default_value = "demo-app")]
    pub app_name: String,

    /// Host the server listens on
    #[arg(long, env = "JAC_E2E_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port the server listens on
    #[arg(long, env = "JAC_E2E_PORT", default_value = "8000")]
    pub port: u16,

    /// Seconds to wait for the port to open
    #[arg(long, env = "JAC_E2E_READY_TIMEOUT_SECS", default_value = "90")]
    pub ready_timeout_secs: u64,

    /// Seconds between SIGTERM and SIGKILL
    #[arg(long, env = "JAC_E2E_SHUTDOWN_GRACE_SECS", default_value = "15")]
    pub shutdown_grace_secs: u64,

    /// Retries for connection errors on each probe
    #[arg(long, env = "JAC_E2E_CONNECT_RETRIES", default_value = "0")]
    pub connect_retries: u32,

    /// YAML probe suite, or a directory of them (default: built-in Jac suite)
    #[arg(long, env = "JAC_E2E_PROBES")]
    pub probes: Option<PathBuf>,

    /// Directory to scaffold in (default: fresh temp dir)
    #[arg(long, env = "JAC_E2E_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Also chdir into the scaffold directory while running
    #[arg(long)]
    pub change_dir: bool,

    /// Extra environment for the server, repeatable
    #[arg(long = "server-env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub server_env: Vec<(String, String)>,

    /// Append server stdout/stderr to this file
    #[arg(long, env = "JAC_E2E_SERVER_LOG", conflicts_with = "quiet_server")]
    pub server_log: Option<PathBuf>,

    /// Discard server stdout/stderr
    #[arg(long)]
    pub quiet_server: bool,

    /// Output directory for the JSON report
    #[arg(short, long, env = "JAC_E2E_OUTPUT", default_value = "test-results")]
    pub output: PathBuf,
}

impl Args {
    /// Parse the process arguments minus libtest's; exits on a clap error.
    pub fn from_runner_args() -> Self {
        Self::parse_from(strip_libtest_args(std::env::args()))
    }

    pub fn server_output(&self) -> ServerOutput {
        match (&self.server_log, self.quiet_server) {
            (Some(path), _) => ServerOutput::File(path.clone()),
            (None, true) => ServerOutput::Null,
            (None, false) => ServerOutput::Inherit,
        }
    }

    pub fn into_config(self) -> E2eResult<HarnessConfig> {
        let suite = match &self.probes {
            Some(path) => ProbeSuite::load_path(path)?,
            None => ProbeSuite::jac_default(),
        };
        let server_output = self.server_output();

        Ok(HarnessConfig {
            tool: self.tool,
            app_name: self.app_name,
            host: self.host,
            port: self.port,
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            connect_retries: self.connect_retries,
            workdir: self.workdir,
            change_dir: self.change_dir,
            server_output,
            server_env: self.server_env,
            suite,
            ..Default::default()
        })
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}

/// Drop libtest flags and name filters, keep everything else in order.
///
/// The first item is the program name and is always kept. Unknown options
/// are kept so clap still rejects them.
pub fn strip_libtest_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let command = Args::command();
    let takes_value = |name: &str| {
        command.get_arguments().any(|arg| {
            let long = name
                .strip_prefix("--")
                .is_some_and(|n| arg.get_long() == Some(n));
            let short = name.len() == 2
                && name.starts_with('-')
                && arg.get_short() == name.chars().nth(1);
            (long || short) && arg.get_action().takes_values()
        })
    };

    let mut args = args.into_iter().map(Into::into);
    let mut kept: Vec<String> = args.next().into_iter().collect();

    while let Some(arg) = args.next() {
        if arg == "--" {
            kept.push(arg);
            kept.extend(args.by_ref());
            break;
        }

        let (name, inline_value) = match arg.split_once('=') {
            Some((name, _)) if arg.starts_with("--") => (name.to_string(), true),
            _ => (arg.clone(), false),
        };

        if LIBTEST_FLAGS.contains(&name.as_str()) {
            debug!("Dropping libtest flag {}", arg);
        } else if LIBTEST_OPTIONS.contains(&name.as_str()) {
            debug!("Dropping libtest option {}", arg);
            if !inline_value {
                args.next();
            }
        } else if name.starts_with("-Z") {
            debug!("Dropping libtest option {}", arg);
        } else if name.starts_with('-') {
            let needs_value = !inline_value && takes_value(&name);
            kept.push(arg);
            if needs_value {
                kept.extend(args.next());
            }
        } else {
            debug!("Dropping test name filter {}", arg);
        }
    }

    kept
}
