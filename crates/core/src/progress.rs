//! Progress extraction from external tool output.
//!
//! Tools report their own 0-100 scale (sometimes more than once, sometimes
//! out of order). A [`ProgressParser`] pulls the raw percentage out of one
//! line of output and a [`ProgressScale`] maps it into the job's overall
//! scale, leaving room for start-up and finalisation.

use std::sync::LazyLock;

use regex::Regex;

use crate::stage::Stage;

/// `Progress: 42%` as printed by spotdl wrappers and the analyzer script.
static PERCENT_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Progress:\s*(\d{1,3})\s*%").expect("valid regex"));

/// `Separated track 2/4` as printed by demucs after each track.
static SEPARATED_TRACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Separated track (\d+)/(\d+)").expect("valid regex"));

/// tqdm progress bar prefix (` 45%|████`) written by demucs to stderr.
static TQDM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,3})%\|").expect("valid regex"));

// ---------------------------------------------------------------------------
// ProgressScale
// ---------------------------------------------------------------------------

/// Linear mapping of a tool's raw 0-100 progress into `start..=ceiling`.
///
/// `start` is the value a job gets when it enters `processing`; everything
/// above `ceiling` is reserved for finalisation, so a raw 100 never marks
/// the job complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressScale {
    pub start: u8,
    pub ceiling: u8,
}

impl ProgressScale {
    pub const fn new(start: u8, ceiling: u8) -> Self {
        assert!(start <= ceiling, "start must not exceed ceiling");
        assert!(ceiling < 100, "ceiling must stay below 100");
        Self { start, ceiling }
    }

    /// The reservation each stage uses.
    pub const fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Download => Self::new(10, 90),
            Stage::Separate => Self::new(5, 95),
            Stage::Analyze => Self::new(10, 95),
        }
    }

    /// Map a raw tool percentage (clamped to 100) into the job scale.
    pub fn map(&self, raw: u8) -> u8 {
        let raw = u32::from(raw.min(100));
        let span = u32::from(self.ceiling - self.start);
        let mapped = u32::from(self.start) + raw * span / 100;
        // `mapped <= ceiling < 100`, so the cast cannot truncate.
        mapped.min(u32::from(self.ceiling)) as u8
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Adapter isolating one tool's output format from the generic worker.
pub trait ProgressParser: Send + Sync {
    /// Extract a raw percentage (0-100) from a single line of output.
    fn parse_progress(&self, line: &str) -> Option<u8>;
}

/// Matches `Progress: N%` markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentMarker;

impl ProgressParser for PercentMarker {
    fn parse_progress(&self, line: &str) -> Option<u8> {
        let caps = PERCENT_MARKER_RE.captures(line)?;
        let pct: u32 = caps[1].parse().ok()?;
        Some(pct.min(100) as u8)
    }
}

/// Matches demucs output: `Separated track i/n` or a tqdm bar.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemucsProgress;

impl ProgressParser for DemucsProgress {
    fn parse_progress(&self, line: &str) -> Option<u8> {
        if let Some(caps) = SEPARATED_TRACK_RE.captures(line) {
            let current: u64 = caps[1].parse().ok()?;
            let total: u64 = caps[2].parse().ok()?;
            if total == 0 {
                return None;
            }
            let pct = u128::from(current.min(total)) * 100 / u128::from(total);
            return Some(pct.min(100) as u8);
        }
        let caps = TQDM_RE.captures(line)?;
        let pct: u32 = caps[1].parse().ok()?;
        Some(pct.min(100) as u8)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_marker_extracts_value() {
        assert_eq!(PercentMarker.parse_progress("Progress: 50%"), Some(50));
        assert_eq!(
            PercentMarker.parse_progress("[info] Progress:  7 % done"),
            Some(7)
        );
    }

    #[test]
    fn percent_marker_clamps_and_ignores_noise() {
        assert_eq!(PercentMarker.parse_progress("Progress: 250%"), Some(100));
        assert_eq!(PercentMarker.parse_progress("Downloading 3 songs"), None);
        assert_eq!(PercentMarker.parse_progress(""), None);
    }

    #[test]
    fn demucs_separated_track_ratio() {
        assert_eq!(DemucsProgress.parse_progress("Separated track 1/4"), Some(25));
        assert_eq!(DemucsProgress.parse_progress("Separated track 4/4"), Some(100));
        assert_eq!(DemucsProgress.parse_progress("Separated track 1/0"), None);
    }

    #[test]
    fn demucs_large_track_counts_do_not_overflow() {
        assert_eq!(
            DemucsProgress.parse_progress("Separated track 50000000/50000000"),
            Some(100)
        );
        assert_eq!(
            DemucsProgress.parse_progress("Separated track 9000000000/18000000000"),
            Some(50)
        );
        assert_eq!(
            DemucsProgress.parse_progress("Separated track 99999999999999999999999/1"),
            None
        );
    }

    #[test]
    fn demucs_tqdm_bar() {
        let line = " 45%|████▌     | 5.85/11.7 [00:02<00:02,  2.50seconds/s]";
        assert_eq!(DemucsProgress.parse_progress(line), Some(45));
        assert_eq!(DemucsProgress.parse_progress("Selected model is a bag"), None);
    }

    #[test]
    fn download_scale_matches_reservation() {
        let scale = ProgressScale::for_stage(Stage::Download);
        assert_eq!(scale.map(0), 10);
        assert_eq!(scale.map(50), 50);
        assert_eq!(scale.map(100), 90);
    }

    #[test]
    fn separate_scale_matches_reservation() {
        let scale = ProgressScale::for_stage(Stage::Separate);
        assert_eq!(scale.map(0), 5);
        assert_eq!(scale.map(50), 50);
        assert_eq!(scale.map(100), 95);
    }

    #[test]
    fn scale_never_reaches_complete() {
        for stage in Stage::ALL {
            let scale = ProgressScale::for_stage(stage);
            assert!(scale.map(255) < 100);
        }
    }

    #[test]
    fn scale_is_monotonic_in_raw_input() {
        let scale = ProgressScale::for_stage(Stage::Analyze);
        let mut last = 0;
        for raw in 0..=100u8 {
            let mapped = scale.map(raw);
            assert!(mapped >= last);
            last = mapped;
        }
    }
}
