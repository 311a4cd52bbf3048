//! Declarative YAML probe suites

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::probe::{BodyCheck, HttpExpectation};

/// PNG file signature, first four bytes
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG";

/// An ordered list of probes parsed from YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSuite {
    /// Unique name for this suite
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Probes run in order; the first failure stops the suite
    pub probes: Vec<HttpExpectation>,
}

impl ProbeSuite {
    /// Parse a suite from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let suite: Self = serde_yaml::from_str(yaml)?;
        suite.validate()?;
        Ok(suite)
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load all suites from a directory, sorted by file path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut suites = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            suites.push(Self::from_file(entry.path())?);
        }

        Ok(suites)
    }

    /// A single file, or every suite under a directory merged in file order
    pub fn load_path(path: &Path) -> E2eResult<Self> {
        if !path.is_dir() {
            return Self::from_file(path);
        }

        let suites = Self::load_all(path)?;
        if suites.is_empty() {
            return Err(E2eError::InvalidConfig(format!(
                "no probe suites (*.yaml, *.yml) under {}",
                path.display()
            )));
        }

        let name = suites
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("+");
        let description = format!("{} suite(s) from {}", suites.len(), path.display());
        let probes = suites.into_iter().flat_map(|s| s.probes).collect();

        Ok(Self {
            name,
            description,
            probes,
        })
    }

    fn validate(&self) -> E2eResult<()> {
        if self.probes.is_empty() {
            return Err(E2eError::InvalidConfig(format!(
                "probe suite '{}' has no probes",
                self.name
            )));
        }
        for probe in &self.probes {
            if probe.timeout_ms == 0 {
                return Err(E2eError::InvalidConfig(format!(
                    "probe {} has a zero timeout",
                    probe.path
                )));
            }
            if let BodyCheck::StartsWith { prefix_hex } = &probe.body {
                hex::decode(prefix_hex).map_err(|e| {
                    E2eError::InvalidConfig(format!(
                        "probe {}: invalid prefix_hex {:?}: {}",
                        probe.path, prefix_hex, e
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Endpoints every freshly scaffolded Jac app must serve
    pub fn jac_default() -> Self {
        Self {
            name: "jac-serve".to_string(),
            description: "API root, app shell, static assets and walker endpoint".to_string(),
            probes: vec![
                HttpExpectation::get("/")
                    .timeout(Duration::from_secs(10))
                    .body(BodyCheck::contains(["\"Jac API Server\"", "\"endpoints\""])),
                HttpExpectation::get("/page/app")
                    .timeout(Duration::from_secs(200))
                    .body(BodyCheck::contains_ignore_case("<html")),
                // The fragment is never sent; the server must still return the shell.
                HttpExpectation::get("/page/app#/nested")
                    .timeout(Duration::from_secs(200))
                    .body(BodyCheck::contains_ignore_case("<html")),
                HttpExpectation::get("/static/main.css")
                    .timeout(Duration::from_secs(20))
                    .body(BodyCheck::NonEmptyText),
                HttpExpectation::get("/static/assets/burger.png")
                    .timeout(Duration::from_secs(20))
                    .body(BodyCheck::starts_with(PNG_SIGNATURE)),
                HttpExpectation::get("/walker/get_server_message")
                    .timeout(Duration::from_secs(20))
                    .body(BodyCheck::contains(["get_server_message"])),
            ],
        }
    }
}
