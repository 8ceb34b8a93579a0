//! spotdl download.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stemflow_core::job::Job;
use stemflow_core::options::{self, DownloadOptions};
use stemflow_core::progress::{PercentMarker, ProgressParser};
use stemflow_core::stage::Stage;

use super::{Finalized, StageTool, ToolProgram};
use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::subprocess::ToolCommand;

/// Base name the chosen download is renamed to.
pub const ORIGINAL_BASENAME: &str = "original";

pub struct DownloadTool {
    program: ToolProgram,
}

impl DownloadTool {
    pub fn new(program: ToolProgram) -> Self {
        Self { program }
    }
}

impl Default for DownloadTool {
    fn default() -> Self {
        Self::new(ToolProgram::new("python", ["-m", "spotdl"]))
    }
}

#[async_trait]
impl StageTool for DownloadTool {
    fn stage(&self) -> Stage {
        Stage::Download
    }

    fn name(&self) -> &str {
        "spotdl"
    }

    fn command(&self, job: &Job, layout: &SubjectLayout) -> Result<ToolCommand, PipelineError> {
        let opts: DownloadOptions = options::decode(&job.options)?;
        let dir = layout.subject_dir(&job.subject_id);
        Ok(self
            .program
            .command()
            .arg(&job.input_ref)
            .arg("--output")
            .arg(dir.to_string_lossy())
            .arg("--output-format")
            .arg(&opts.format)
            .args(["--threads", "1"])
            .arg("--format")
            .arg(&opts.format)
            .arg("--bitrate")
            .arg(&opts.bitrate))
    }

    fn parser(&self) -> &dyn ProgressParser {
        &PercentMarker
    }

    /// Keep the largest file of the requested format as `original.<fmt>`
    /// and delete the other candidates.
    async fn finalize(&self, job: &Job, layout: &SubjectLayout) -> Result<Finalized, PipelineError> {
        let opts: DownloadOptions = options::decode(&job.options)?;
        let dir = layout.subject_dir(&job.subject_id);

        let mut candidates = files_with_extension(&dir, &opts.format).await?;
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let Some((largest, _)) = candidates.first().cloned() else {
            return Err(PipelineError::Finalize(format!(
                "No {} files found after download",
                opts.format.to_uppercase()
            )));
        };

        let target = dir.join(format!("{ORIGINAL_BASENAME}.{}", opts.format));
        if largest != target {
            tokio::fs::rename(&largest, &target).await?;
        }
        for (path, _) in candidates.iter().skip(1) {
            if *path == target {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove extra download");
            }
        }

        Ok(Finalized {
            output_ref: target.to_string_lossy().into_owned(),
            result: None,
        })
    }
}

/// Regular files in `dir` with extension `ext`, paired with their size.
async fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<(PathBuf, u64)>, std::io::Error> {
    let mut found = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if !matches {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            found.push((path, metadata.len()));
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use stemflow_core::job::NewJob;

    use super::*;

    fn job(options: serde_json::Value) -> Job {
        NewJob {
            subject_id: "t1".into(),
            stage: Stage::Download,
            options,
            input_ref: "https://open.spotify.com/track/t1".into(),
        }
        .into_job(uuid::Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn command_line_matches_spotdl_invocation() {
        let layout = SubjectLayout::new("/data/audio");
        let job = job(serde_json::json!({"format": "mp3", "bitrate": "192k"}));
        let command = DownloadTool::default().command(&job, &layout).unwrap();
        assert_eq!(command.program, "python");
        assert_eq!(
            command.args,
            vec![
                "-m",
                "spotdl",
                "https://open.spotify.com/track/t1",
                "--output",
                "/data/audio/t1",
                "--output-format",
                "mp3",
                "--threads",
                "1",
                "--format",
                "mp3",
                "--bitrate",
                "192k",
            ]
        );
    }

    #[tokio::test]
    async fn finalize_keeps_largest_file() {
        let root = tempfile::tempdir().unwrap();
        let layout = SubjectLayout::new(root.path());
        let dir = layout.subject_dir("t1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Artist - Song.mp3"), vec![0u8; 64]).unwrap();
        std::fs::write(dir.join("Artist - Song (1).mp3"), vec![0u8; 8]).unwrap();
        std::fs::write(dir.join("cover.jpg"), b"x").unwrap();

        let finalized = DownloadTool::default()
            .finalize(&job(serde_json::json!({})), &layout)
            .await
            .unwrap();

        let original = dir.join("original.mp3");
        assert_eq!(finalized.output_ref, original.to_string_lossy());
        assert_eq!(std::fs::metadata(&original).unwrap().len(), 64);
        assert!(!dir.join("Artist - Song (1).mp3").exists());
        assert!(dir.join("cover.jpg").exists());
    }

    #[tokio::test]
    async fn finalize_without_audio_fails() {
        let root = tempfile::tempdir().unwrap();
        let layout = SubjectLayout::new(root.path());
        std::fs::create_dir_all(layout.subject_dir("t1")).unwrap();

        let err = DownloadTool::default()
            .finalize(&job(serde_json::json!({})), &layout)
            .await
            .unwrap_err();
        assert_matches!(&err, PipelineError::Finalize(_));
        assert_eq!(err.to_string(), "No MP3 files found after download");
    }
}
