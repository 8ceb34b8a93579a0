//! Shared harness for pipeline integration tests.
//!
//! Tools are replaced by bash scripts written into a temp directory, which
//! also serves as the audio data root.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stemflow_core::stage::Stage;
use stemflow_db::MemoryStore;
use stemflow_events::{EventBus, JobEvent, Subscription};
use stemflow_pipeline::notify::RecordingNotifier;
use stemflow_pipeline::tools::{AnalysisTool, DownloadTool, SeparationTool};
use stemflow_pipeline::{StageService, StageTool, StageWorker, SubjectLayout, ToolProgram};
use tempfile::TempDir;

/// Prints a progress marker and drops an mp3 into the `--output` dir ($3).
pub const DOWNLOAD_OK: &str = r#"
echo "Downloading 1 song"
echo "Progress: 50%"
printf 'fake audio data' > "$3/Artist - Song.mp3"
exit 0
"#;

/// Writes to stderr and exits 2.
pub const TOOL_FAILS: &str = r#"
echo "Progress: 25%"
echo boom >&2
exit 2
"#;

/// Mimics demucs: parses `-n` and `-o`, takes the input as the last arg.
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
input="$1"
name=$(basename "$input" .mp3)
dir="$out/$model/$name"
mkdir -p "$dir"
echo "Separated track 1/2"
for stem in vocals drums bass other; do
  echo x > "$dir/$stem.mp3"
done
echo "Separated track 2/2"
"#;

/// Writes a small analysis document to the path given as $4.
pub const ANALYZER_OK: &str = r#"
echo "Progress: 40%"
printf '{"bpm": 120, "key": "C major"}' > "$4"
echo "Progress: 100%"
"#;

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
            store: Arc::new(MemoryStore::new()),
            bus: Arc::new(EventBus::default()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn layout(&self) -> SubjectLayout {
        SubjectLayout::new(self.root().join("audio"))
    }

    /// Write a bash script and return a program that runs it.
    pub fn script(&self, name: &str, body: &str) -> ToolProgram {
        let path: PathBuf = self.root().join(format!("{name}.sh"));
        std::fs::write(&path, format!("#!/bin/bash\n{body}")).expect("write script");
        ToolProgram::new("bash", [path.to_string_lossy().into_owned()])
    }

    pub fn worker(&self, tool: Arc<dyn StageTool>) -> Arc<StageWorker> {
        Arc::new(StageWorker::new(
            tool,
            self.store.clone(),
            self.bus.clone(),
            self.notifier.clone(),
            self.layout(),
        ))
    }

    pub fn service(&self, tool: Arc<dyn StageTool>, predecessor: Option<Stage>) -> Arc<StageService> {
        Arc::new(
            StageService::new(
                self.worker(tool),
                self.store.clone(),
                self.store.clone(),
                self.bus.clone(),
            )
            .with_predecessor(predecessor),
        )
    }

    pub fn download_service(&self, body: &str) -> Arc<StageService> {
        let tool = DownloadTool::new(self.script("spotdl", body));
        self.service(Arc::new(tool), None)
    }

    pub fn separate_service(&self, body: &str) -> Arc<StageService> {
        let tool = SeparationTool::new(self.script("demucs", body));
        self.service(Arc::new(tool), Some(Stage::Download))
    }

    pub fn analyze_service(&self, body: &str) -> Arc<StageService> {
        let tool = AnalysisTool::new(self.script("analyzer", body));
        self.service(Arc::new(tool), Some(Stage::Download))
    }
}

/// Wait up to five seconds for the next event on `sub`.
pub async fn next_event(sub: &mut Subscription) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("bus closed")
}

/// Everything already buffered on `sub`.
pub async fn drain(sub: &mut Subscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await {
        events.push(event);
    }
    events
}
