//! Shared fixtures for harness tests
//!
//! - `CannedServer`: axum app on a background runtime answering fixed responses
//! - `fake_tool`: shell script standing in for the `jac` CLI

#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tokio::sync::oneshot;

#[derive(Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
        }
    }
}

/// Responses a healthy freshly scaffolded app would give
pub fn jac_app_routes() -> HashMap<String, CannedResponse> {
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);

    HashMap::from([
        (
            "/".to_string(),
            CannedResponse::ok(
                "application/json",
                r#"{"message": "Jac API Server", "endpoints": {"walkers": "/walker/{name}"}}"#,
            ),
        ),
        (
            "/page/app".to_string(),
            CannedResponse::ok(
                "text/html",
                "<!DOCTYPE html>\n<HTML><body><div id=\"root\"></div></body></HTML>",
            ),
        ),
        (
            "/static/main.css".to_string(),
            CannedResponse::ok("text/css", "body { margin: 0; }\n"),
        ),
        (
            "/static/assets/burger.png".to_string(),
            CannedResponse::ok("image/png", png),
        ),
        (
            "/walker/get_server_message".to_string(),
            CannedResponse::ok(
                "application/json",
                r#"{"walker": "get_server_message", "reports": []}"#,
            ),
        ),
    ])
}

struct CannedState {
    routes: HashMap<String, CannedResponse>,
    requests: Mutex<Vec<String>>,
}

async fn canned_handler(State(state): State<Arc<CannedState>>, uri: Uri) -> Response {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    state.requests.lock().unwrap().push(target);

    match state.routes.get(uri.path()) {
        Some(canned) => {
            let status = StatusCode::from_u16(canned.status).unwrap_or(StatusCode::OK);
            (
                status,
                [(header::CONTENT_TYPE, canned.content_type)],
                canned.body.clone(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response(),
    }
}

/// axum app on 127.0.0.1 serving canned responses until dropped
pub struct CannedServer {
    port: u16,
    state: Arc<CannedState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CannedServer {
    pub fn start(routes: HashMap<String, CannedResponse>) -> Self {
        // Bound before returning so the port is already accepting
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind canned server");
        listener.set_nonblocking(true).expect("nonblocking listener");
        let port = listener.local_addr().expect("local addr").port();

        let state = Arc::new(CannedState {
            routes,
            requests: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .fallback(canned_handler)
            .with_state(Arc::clone(&state));
        let (tx, rx) = oneshot::channel::<()>();

        let handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("canned server runtime");
            runtime.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await
                    .expect("canned server");
            });
        });

        Self {
            port,
            state,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request targets in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Behaviour of the fake CLI's `serve` subcommand
pub enum FakeServe {
    /// Stay alive until signalled
    Sleep,
    /// Ignore SIGTERM so only SIGKILL stops it
    IgnoreTerm,
    /// Exit straight away with this code
    Exit(i32),
}

/// Fake CLI understanding `create_jac_app <name>` and `serve app.jac [--announce]`
pub fn fake_tool(dir: &Path, serve: FakeServe) -> PathBuf {
    let serve_body = match serve {
        FakeServe::Sleep => "exec sleep 60".to_string(),
        FakeServe::IgnoreTerm => "trap '' TERM\n    exec sleep 60".to_string(),
        FakeServe::Exit(code) => format!("exit {}", code),
    };
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  create_jac_app)
    mkdir -p "$2" && echo 'with entry {{ print("hi"); }}' > "$2/app.jac"
    echo "Project $2 created"
    ;;
  serve)
    [ "$3" = "--announce" ] && echo "greeting=$JAC_E2E_GREETING"
    {serve_body}
    ;;
  *)
    echo "jac: error: argument command: invalid choice: '$1'" >&2
    exit 2
    ;;
esac
"#
    );
    write_script(dir, "jac", &script)
}

/// Fake CLI without the scaffolding subcommand
pub fn legacy_tool(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/sh
echo "usage: jac [-h] {run,serve,check} ..." >&2
echo "jac: error: argument command: invalid choice: '$1' \
(choose from 'run', 'serve', 'check')" >&2
exit 2
"#;
    write_script(dir, "jac-legacy", script)
}

/// Fake CLI whose scaffolding fails for an unrelated reason
pub fn broken_tool(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/sh
echo "creating $2"
echo "Error: template directory missing" >&2
exit 1
"#;
    write_script(dir, "jac-broken", script)
}

fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write fake tool");
    let mut perms = std::fs::metadata(&path).expect("stat fake tool").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod fake tool");
    path
}

/// Whether a process with this pid still exists
pub fn pid_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
