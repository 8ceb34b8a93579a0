//! On-disk layout of subject data.
//!
//! ```text
//! <root>/<subject>/original.mp3      download output
//! <root>/<subject>/stems/*.mp3       separation output
//! <root>/<subject>/analysis.json     analysis output
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use stemflow_core::artifacts::{ArtifactKind, OutputArtifact};

/// Directory holding separated stems inside a subject directory.
pub const STEMS_DIR: &str = "stems";

/// Analysis document file name inside a subject directory.
pub const ANALYSIS_FILE: &str = "analysis.json";

#[derive(Debug, Clone)]
pub struct SubjectLayout {
    root: PathBuf,
}

impl SubjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subject ids are validated before they reach here, so joining is safe.
    pub fn subject_dir(&self, subject_id: &str) -> PathBuf {
        self.root.join(subject_id)
    }

    pub fn stems_dir(&self, subject_id: &str) -> PathBuf {
        self.subject_dir(subject_id).join(STEMS_DIR)
    }

    pub fn analysis_path(&self, subject_id: &str) -> PathBuf {
        self.subject_dir(subject_id).join(ANALYSIS_FILE)
    }
}

/// Describe what is at `output_ref`.
///
/// Returns `Ok(None)` when nothing exists there. A file yields one
/// artifact; a directory yields one per regular file, sorted by name.
pub async fn list_artifacts(output_ref: &str) -> Result<Option<Vec<OutputArtifact>>, std::io::Error> {
    let path = Path::new(output_ref);
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    if metadata.is_file() {
        return Ok(Some(vec![artifact(path, &metadata)]));
    }

    let mut artifacts = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            artifacts.push(artifact(&entry.path(), &metadata));
        }
    }
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Some(artifacts))
}

fn artifact(path: &Path, metadata: &std::fs::Metadata) -> OutputArtifact {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    OutputArtifact {
        kind: ArtifactKind::from_file_name(&name),
        name,
        path: path.to_string_lossy().into_owned(),
        size: metadata.len(),
        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_under_root() {
        let layout = SubjectLayout::new("/data/audio");
        assert_eq!(layout.subject_dir("t1"), PathBuf::from("/data/audio/t1"));
        assert_eq!(layout.stems_dir("t1"), PathBuf::from("/data/audio/t1/stems"));
        assert_eq!(
            layout.analysis_path("t1"),
            PathBuf::from("/data/audio/t1/analysis.json")
        );
    }

    #[tokio::test]
    async fn missing_output_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.mp3");
        let listed = list_artifacts(missing.to_str().unwrap()).await.unwrap();
        assert!(listed.is_none());
    }

    #[tokio::test]
    async fn directory_lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocals.mp3"), b"vv").unwrap();
        std::fs::write(dir.path().join("drums.mp3"), b"d").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let listed = list_artifacts(dir.path().to_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "drums.mp3");
        assert_eq!(listed[0].kind, ArtifactKind::Drums);
        assert_eq!(listed[1].size, 2);
        assert!(listed[1].last_modified.is_some());
    }

    #[tokio::test]
    async fn single_file_is_one_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("original.mp3");
        std::fs::write(&file, b"abc").unwrap();

        let listed = list_artifacts(file.to_str().unwrap()).await.unwrap().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, ArtifactKind::Audio);
        assert_eq!(listed[0].size, 3);
    }
}
