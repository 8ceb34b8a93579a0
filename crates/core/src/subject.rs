//! Per-subject settings that outlive individual jobs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::stage::Stage;

/// Maximum length of a subject id.
pub const MAX_SUBJECT_ID_LEN: usize = 128;

/// Subject ids become directory names, so only `[A-Za-z0-9_-]` is allowed.
pub fn validate_subject_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation("subjectId is required".to_string()));
    }
    if id.len() > MAX_SUBJECT_ID_LEN {
        return Err(CoreError::Validation(format!(
            "subjectId must be at most {MAX_SUBJECT_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::Validation(format!(
            "subjectId contains invalid characters: '{id}'"
        )));
    }
    Ok(())
}

/// Settings for one subject.
///
/// `auto_advance[s] = true` means "start `s` when its predecessor
/// completes". Missing entries read as `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectSettings {
    pub auto_advance: BTreeMap<Stage, bool>,
    pub default_options: BTreeMap<Stage, Value>,
}

impl SubjectSettings {
    pub fn is_auto_advance(&self, stage: Stage) -> bool {
        self.auto_advance.get(&stage).copied().unwrap_or(false)
    }

    pub fn set_auto_advance(&mut self, stage: Stage, enabled: bool) {
        self.auto_advance.insert(stage, enabled);
    }

    /// Options to use for an auto-started job of `stage`.
    pub fn default_options_for(&self, stage: Stage) -> Option<&Value> {
        self.default_options.get(&stage)
    }

    pub fn set_default_options(&mut self, stage: Stage, options: Value) {
        self.default_options.insert(stage, options);
    }
}
