//! Shared helpers for API integration tests.
//!
//! Every test app runs on the in-memory store with bash scripts standing in
//! for spotdl, demucs and the analyzer.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use stemflow_api::app::{App, AppParts};
use stemflow_api::config::ServerConfig;
use stemflow_api::stages::StageTools;
use stemflow_core::retention::RetentionPolicy;
use stemflow_core::stage::ChainLink;
use stemflow_db::MemoryStore;
use stemflow_pipeline::tools::{AnalysisTool, DownloadTool, SeparationTool};
use stemflow_pipeline::{SubjectLayout, ToolProgram};
use tempfile::TempDir;
use tower::ServiceExt;

pub const DOWNLOAD_OK: &str = r#"
echo "Progress: 50%"
printf 'fake audio data' > "$3/Artist - Song.mp3"
"#;

pub const DEMUCS_OK: &str = r#"
out=""
model=""
while [ $# -gt 1 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -n) model="$2"; shift 2 ;;
    *) shift ;;
  esac
done
dir="$out/$model/$(basename "$1" .mp3)"
mkdir -p "$dir"
for stem in vocals drums bass other; do
  echo x > "$dir/$stem.mp3"
done
"#;

pub const ANALYZER_OK: &str = r#"
printf '{"bpm": 120}' > "$4"
"#;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 1,
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub app: App,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_download(DOWNLOAD_OK)
    }

    pub fn with_download(download: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = Arc::new(MemoryStore::new());

        let tools = StageTools {
            download: Arc::new(DownloadTool::new(script(&dir, "spotdl", download))),
            separate: Arc::new(SeparationTool::new(script(&dir, "demucs", DEMUCS_OK))),
            analyze: Arc::new(AnalysisTool::new(script(&dir, "analyzer", ANALYZER_OK))),
        };

        let app = App::start(AppParts {
            config: test_config(),
            jobs: store.clone(),
            subjects: store.clone(),
            tools,
            chain: ChainLink::defaults(),
            retention: RetentionPolicy::KeepAll,
            layout: SubjectLayout::new(dir.path().join("audio")),
            default_device: "cpu".to_string(),
            remote_notifier: None,
        });

        Self { dir, store, app }
    }

    pub fn router(&self) -> Router {
        self.app.router()
    }

    pub fn audio_dir(&self, subject_id: &str) -> PathBuf {
        self.dir.path().join("audio").join(subject_id)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        send(self.router(), Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        send(self.router(), Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        send(self.router(), Method::PUT, uri, Some(body)).await
    }

    /// Poll `uri` until `done` accepts the body or five seconds pass.
    pub async fn wait_for(&self, uri: &str, done: impl Fn(StatusCode, &Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (status, body) = self.get(uri).await;
            if done(status, &body) {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out polling {uri}; last response {status}: {body}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Poll until the body reports a terminal status.
    pub async fn wait_terminal(&self, uri: &str) -> Value {
        self.wait_for(uri, |status, body| {
            status == StatusCode::OK && matches!(body["status"].as_str(), Some("completed" | "error"))
        })
        .await
    }
}

fn script(dir: &TempDir, name: &str, body: &str) -> ToolProgram {
    let path = dir.path().join(format!("{name}.sh"));
    std::fs::write(&path, format!("#!/bin/bash\n{body}")).expect("write script");
    ToolProgram::new("bash", [path.to_string_lossy().into_owned()])
}

/// Send a request through the router and decode the JSON response.
pub async fn send(
    router: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
