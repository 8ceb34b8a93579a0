//! Stage-specific job options.
//!
//! Options travel as free-form JSON on the job record. At submit time they
//! are normalised: typed defaults are filled in and validated, unknown keys
//! are kept, and the `autoAdvance` control flag is split off (it belongs to
//! the subject, not the job).

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::stage::Stage;

/// Key in a submitted options object that toggles the subject's
/// auto-advance flag for the stage being submitted.
pub const AUTO_ADVANCE_KEY: &str = "autoAdvance";

/// Audio containers spotdl can be asked for.
pub const VALID_DOWNLOAD_FORMATS: &[&str] = &["mp3", "m4a", "flac", "opus", "ogg", "wav"];

/// Pretrained demucs models a separation job may name.
pub const SEPARATION_MODELS: &[&str] = &["htdemucs", "htdemucs_ft", "htdemucs_6s", "hdemucs_mmi"];

static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2,4}k$").expect("valid regex"));

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_:\-]{1,64}$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Typed options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadOptions {
    pub format: String,
    pub bitrate: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            format: "mp3".to_string(),
            bitrate: "320k".to_string(),
        }
    }
}

impl DownloadOptions {
    fn validate(&self) -> Result<(), CoreError> {
        if !VALID_DOWNLOAD_FORMATS.contains(&self.format.as_str()) {
            return Err(CoreError::Validation(format!(
                "Unknown download format: '{}'. Valid formats: {}",
                self.format,
                VALID_DOWNLOAD_FORMATS.join(", ")
            )));
        }
        if !BITRATE_RE.is_match(&self.bitrate) {
            return Err(CoreError::Validation(format!(
                "Bitrate must look like '320k', got: '{}'",
                self.bitrate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeparationOptions {
    pub model: String,
    /// Split into vocals + accompaniment only.
    pub two_stems: bool,
    pub mp3_bitrate: u32,
    /// Torch device; filled from configuration when absent.
    pub device: Option<String>,
}

impl Default for SeparationOptions {
    fn default() -> Self {
        Self {
            model: "htdemucs".to_string(),
            two_stems: false,
            mp3_bitrate: 320,
            device: None,
        }
    }
}

impl SeparationOptions {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !SEPARATION_MODELS.contains(&self.model.as_str()) {
            return Err(CoreError::Validation(format!(
                "Unknown separation model: '{}'. Valid models: {}",
                self.model,
                SEPARATION_MODELS.join(", ")
            )));
        }
        if !(32..=320).contains(&self.mp3_bitrate) {
            return Err(CoreError::Validation(format!(
                "mp3Bitrate must be between 32 and 320, got {}",
                self.mp3_bitrate
            )));
        }
        if let Some(device) = &self.device {
            if !IDENT_RE.is_match(device) {
                return Err(CoreError::Validation(format!(
                    "Invalid device name: '{device}'"
                )));
            }
        }
        Ok(())
    }
}

/// Decode the typed options of a stored job.
pub fn decode<T: DeserializeOwned>(options: &Value) -> Result<T, CoreError> {
    let value = if options.is_null() {
        Value::Object(Map::new())
    } else {
        options.clone()
    };
    serde_json::from_value(value).map_err(|e| CoreError::Validation(format!("Invalid options: {e}")))
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Options as accepted at submit time, split into what is stored on the job
/// and the optional auto-advance toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedOptions {
    pub options: Value,
    pub auto_advance: Option<bool>,
}

/// Validate `raw` for `stage`, fill in defaults, and keep unknown keys.
///
/// `default_device` is used for separation jobs that do not name a device.
pub fn normalize(
    stage: Stage,
    raw: Option<&Value>,
    default_device: &str,
) -> Result<NormalizedOptions, CoreError> {
    let mut object = match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(CoreError::Validation(
                "options must be a JSON object".to_string(),
            ))
        }
    };

    let auto_advance = match object.remove(AUTO_ADVANCE_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(flag)) => Some(flag),
        Some(_) => {
            return Err(CoreError::Validation(format!(
                "{AUTO_ADVANCE_KEY} must be a boolean"
            )))
        }
    };

    let typed = match stage {
        Stage::Download => {
            let opts: DownloadOptions = decode(&Value::Object(object.clone()))?;
            opts.validate()?;
            to_object(&opts)?
        }
        Stage::Separate => {
            let mut opts: SeparationOptions = decode(&Value::Object(object.clone()))?;
            if opts.device.is_none() {
                opts.device = Some(default_device.to_string());
            }
            opts.validate()?;
            to_object(&opts)?
        }
        Stage::Analyze => Map::new(),
    };

    object.extend(typed);

    Ok(NormalizedOptions {
        options: Value::Object(object),
        auto_advance,
    })
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, CoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CoreError::Internal("options did not serialize to an object".into())),
        Err(e) => Err(CoreError::Internal(format!("failed to serialize options: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn download_defaults_are_filled() {
        let normalized = normalize(Stage::Download, None, "cpu").unwrap();
        assert_eq!(normalized.options, json!({"format": "mp3", "bitrate": "320k"}));
        assert_eq!(normalized.auto_advance, None);
    }

    #[test]
    fn separation_defaults_include_device() {
        let raw = json!({"twoStems": true});
        let normalized = normalize(Stage::Separate, Some(&raw), "cuda").unwrap();
        assert_eq!(normalized.options["model"], "htdemucs");
        assert_eq!(normalized.options["twoStems"], true);
        assert_eq!(normalized.options["mp3Bitrate"], 320);
        assert_eq!(normalized.options["device"], "cuda");
    }

    #[test]
    fn unknown_keys_survive_normalisation() {
        let raw = json!({"model": "htdemucs_6s", "shifts": 2});
        let normalized = normalize(Stage::Separate, Some(&raw), "cpu").unwrap();
        assert_eq!(normalized.options["model"], "htdemucs_6s");
        assert_eq!(normalized.options["shifts"], 2);
    }

    #[test]
    fn auto_advance_is_split_off() {
        let raw = json!({"autoAdvance": true, "model": "htdemucs"});
        let normalized = normalize(Stage::Separate, Some(&raw), "cpu").unwrap();
        assert_eq!(normalized.auto_advance, Some(true));
        assert!(normalized.options.get(AUTO_ADVANCE_KEY).is_none());
    }

    #[test]
    fn non_boolean_auto_advance_is_rejected() {
        let raw = json!({"autoAdvance": "yes"});
        assert_matches!(
            normalize(Stage::Analyze, Some(&raw), "cpu"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn non_object_options_are_rejected() {
        let raw = json!([1, 2, 3]);
        assert_matches!(
            normalize(Stage::Download, Some(&raw), "cpu"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn bad_download_format_is_rejected() {
        let raw = json!({"format": "exe"});
        assert_matches!(
            normalize(Stage::Download, Some(&raw), "cpu"),
            Err(CoreError::Validation(msg)) if msg.contains("exe")
        );
    }

    #[test]
    fn model_names_cannot_contain_paths() {
        let raw = json!({"model": "../../etc"});
        assert_matches!(
            normalize(Stage::Separate, Some(&raw), "cpu"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn model_must_come_from_the_catalog() {
        for model in ["..", ".", "mdx_extra", ""] {
            let raw = json!({ "model": model });
            assert_matches!(
                normalize(Stage::Separate, Some(&raw), "cpu"),
                Err(CoreError::Validation(msg)) if msg.contains("Unknown separation model")
            );
        }
        for model in SEPARATION_MODELS {
            let raw = json!({ "model": model });
            assert!(normalize(Stage::Separate, Some(&raw), "cpu").is_ok());
        }
    }

    #[test]
    fn device_names_cannot_contain_dots() {
        let raw = json!({"device": ".."});
        assert_matches!(
            normalize(Stage::Separate, Some(&raw), "cpu"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn analyze_options_pass_through() {
        let raw = json!({"windowSize": 2048});
        let normalized = normalize(Stage::Analyze, Some(&raw), "cpu").unwrap();
        assert_eq!(normalized.options, json!({"windowSize": 2048}));
    }

    #[test]
    fn decode_accepts_null_as_defaults() {
        let opts: SeparationOptions = decode(&Value::Null).unwrap();
        assert_eq!(opts, SeparationOptions::default());
    }
}
