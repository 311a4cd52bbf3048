//! Jac serve E2E harness
//!
//! This crate drives `jac serve` end to end:
//! - Scaffolds a project through the CLI (`jac create_jac_app <name>`)
//! - Spawns the server as an owned subprocess
//! - Polls the listening port until it accepts connections
//! - Issues an ordered list of HTTP probes and checks status and body
//! - Stops the server (SIGTERM, then SIGKILL) on every exit path
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Harness (runner.rs)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkdirGuard            (optional chdir, restored on drop) │
//! │    └── ScaffoldCommand::run() -> Created | Unsupported      │
//! │          └── ManagedProcess  (terminated on drop)           │
//! │                ├── ProbeTarget::wait_with(server alive?)    │
//! │                └── Prober::probe(HttpExpectation) ...       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ProbeSuite (YAML)                                          │
//! │    ├── name, description                                    │
//! │    └── probes: [HttpExpectation]                            │
//! │          ├── path, expected_status, timeout_ms              │
//! │          └── body: any | contains | contains_ignore_case |  │
//! │                    non_empty_text | starts_with             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cli;
pub mod error;
pub mod probe;
pub mod process;
pub mod runner;
pub mod scaffold;
pub mod spec;
pub mod wait;
pub mod workdir;

pub use error::{E2eError, E2eResult};
pub use runner::{Harness, HarnessConfig, HarnessOutcome};
pub use spec::ProbeSuite;
pub use wait::{wait_for_port, ProbeTarget};
