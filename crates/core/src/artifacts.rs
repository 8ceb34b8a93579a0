//! Classification of files a stage leaves on disk.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Extensions treated as audio output.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "opus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Vocals,
    Drums,
    Bass,
    Other,
    /// Accompaniment from a two-stem separation.
    NoVocals,
    Analysis,
    Audio,
    File,
}

impl ArtifactKind {
    /// Classify a file by its name.
    pub fn from_file_name(name: &str) -> Self {
        let path = Path::new(name);
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if ext == "json" {
            return ArtifactKind::Analysis;
        }
        if !AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            return ArtifactKind::File;
        }
        match stem.as_str() {
            "vocals" => ArtifactKind::Vocals,
            "drums" => ArtifactKind::Drums,
            "bass" => ArtifactKind::Bass,
            "other" => ArtifactKind::Other,
            "no_vocals" => ArtifactKind::NoVocals,
            _ => ArtifactKind::Audio,
        }
    }
}

/// Whether `path` has an audio extension.
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// One file a completed job produced, as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputArtifact {
    pub name: String,
    pub path: String,
    pub kind: ArtifactKind,
    pub size: u64,
    pub last_modified: Option<Timestamp>,
}
