//! HTTP probes - single GET requests checked against an expectation

use std::thread::sleep;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Characters of body kept in diagnostics
pub const BODY_EXCERPT_CHARS: usize = 500;

/// Predicate on a response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyCheck {
    #[default]
    Any,

    /// Every needle appears verbatim
    Contains { needles: Vec<String> },

    ContainsIgnoreCase { needle: String },

    /// Non-whitespace text
    NonEmptyText,

    /// Non-empty body starting with these bytes
    StartsWith { prefix_hex: String },
}

impl BodyCheck {
    pub fn contains<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BodyCheck::Contains {
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains_ignore_case(needle: impl Into<String>) -> Self {
        BodyCheck::ContainsIgnoreCase {
            needle: needle.into(),
        }
    }

    pub fn starts_with(prefix: &[u8]) -> Self {
        BodyCheck::StartsWith {
            prefix_hex: hex::encode(prefix),
        }
    }

    /// `Err` carries a human readable reason.
    pub fn evaluate(&self, body: &[u8]) -> Result<(), String> {
        match self {
            BodyCheck::Any => Ok(()),
            BodyCheck::Contains { needles } => {
                let text = String::from_utf8_lossy(body);
                match needles.iter().find(|n| !text.contains(n.as_str())) {
                    Some(missing) => Err(format!("body does not contain {:?}", missing)),
                    None => Ok(()),
                }
            }
            BodyCheck::ContainsIgnoreCase { needle } => {
                let text = String::from_utf8_lossy(body).to_lowercase();
                if text.contains(&needle.to_lowercase()) {
                    Ok(())
                } else {
                    Err(format!("body does not contain {:?} (case-insensitive)", needle))
                }
            }
            BodyCheck::NonEmptyText => {
                if String::from_utf8_lossy(body).trim().is_empty() {
                    Err("body is empty".to_string())
                } else {
                    Ok(())
                }
            }
            BodyCheck::StartsWith { prefix_hex } => {
                let prefix = hex::decode(prefix_hex)
                    .map_err(|e| format!("invalid prefix_hex {:?}: {}", prefix_hex, e))?;
                if body.is_empty() {
                    Err("body is empty".to_string())
                } else if !body.starts_with(&prefix) {
                    let head = &body[..body.len().min(prefix.len())];
                    Err(format!(
                        "body starts with {} instead of {}",
                        hex::encode(head),
                        prefix_hex
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Expected outcome of a GET against `path`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExpectation {
    /// Path relative to the server root, may carry a `#fragment`
    pub path: String,

    #[serde(default = "default_status")]
    pub expected_status: u16,

    #[serde(default)]
    pub body: BodyCheck,

    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_status() -> u16 {
    200
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl HttpExpectation {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_status: default_status(),
            body: BodyCheck::Any,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn body(mut self, check: BodyCheck) -> Self {
        self.body = check;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub path: String,
    pub url: String,
    pub status: Option<u16>,
    pub body_len: usize,
    pub duration_ms: u64,
    pub passed: bool,
    pub error: Option<String>,
    pub body_excerpt: String,
}

impl ProbeResult {
    /// `ProbeFailed` for a failed probe, `None` otherwise.
    pub fn to_error(&self) -> Option<E2eError> {
        if self.passed {
            return None;
        }
        Some(E2eError::ProbeFailed {
            path: self.path.clone(),
            reason: self
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
            body_excerpt: self.body_excerpt.clone(),
        })
    }
}

/// Issues probes against one server
pub struct Prober {
    base_url: String,
    client: Client,
    connect_retries: u32,
    retry_delay: Duration,
}

impl Prober {
    pub fn new(base_url: impl Into<String>) -> E2eResult<Self> {
        // The server under test is local; never route probes through a proxy.
        let client = Client::builder().no_proxy().build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            connect_retries: 0,
            retry_delay: Duration::from_millis(500),
        })
    }

    /// Retry connection-level errors up to `retries` times. Status and body
    /// mismatches are never retried.
    pub fn with_connect_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        if path.starts_with('/') || path.starts_with('#') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Issue a single GET and evaluate it. Never returns early on error:
    /// every failure is folded into the returned record.
    pub fn probe(&self, expectation: &HttpExpectation) -> ProbeResult {
        let url = self.url_for(&expectation.path);
        let start = Instant::now();

        if let Some((_, fragment)) = expectation.path.split_once('#') {
            debug!("Fragment #{} stays client-side", fragment);
        }
        info!("Sending GET request to {}", expectation.path);

        let fetched = self.fetch(&url, Duration::from_millis(expectation.timeout_ms));
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = ProbeResult {
            path: expectation.path.clone(),
            url,
            status: None,
            body_len: 0,
            duration_ms,
            passed: false,
            error: None,
            body_excerpt: String::new(),
        };

        let (status, body) = match fetched {
            Ok(response) => response,
            Err(e) => {
                warn!("Error while requesting {}: {}", expectation.path, e);
                result.error = Some(format!("request failed: {}", e));
                return result;
            }
        };

        result.status = Some(status);
        result.body_len = body.len();
        result.body_excerpt = body_excerpt(&body);
        debug!(
            "Received response from {}\nStatus: {}\nBody (truncated to {} chars):\n{}",
            expectation.path, status, BODY_EXCERPT_CHARS, result.body_excerpt
        );

        if status != expectation.expected_status {
            result.error = Some(format!(
                "expected status {}, got {}",
                expectation.expected_status, status
            ));
            return result;
        }

        match expectation.body.evaluate(&body) {
            Ok(()) => result.passed = true,
            Err(reason) => result.error = Some(reason),
        }
        result
    }

    fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, Vec<u8>), reqwest::Error> {
        let mut attempt = 0;
        loop {
            match self.client.get(url).timeout(timeout).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.bytes()?;
                    return Ok((status, body.to_vec()));
                }
                Err(e) if e.is_connect() && attempt < self.connect_retries => {
                    attempt += 1;
                    debug!("Connect error on {} (retry {}): {}", url, attempt, e);
                    sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// First [`BODY_EXCERPT_CHARS`] characters of a text body, or a hex
/// summary of a binary one.
pub fn body_excerpt(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.chars().take(BODY_EXCERPT_CHARS).collect(),
        Err(_) => format!(
            "<{} bytes, starts with {}>",
            body.len(),
            hex::encode(&body[..body.len().min(16)])
        ),
    }
}
