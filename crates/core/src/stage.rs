//! Pipeline stages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One phase of the pipeline.
///
/// Serialized in lowercase (`"download"`, `"separate"`, `"analyze"`), which
/// is also the prefix of every bus channel the stage publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Separate,
    Analyze,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Download, Stage::Separate, Stage::Analyze];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Separate => "separate",
            Stage::Analyze => "analyze",
        }
    }

    /// HTTP mount point of the stage's service surface.
    pub fn root(self) -> &'static str {
        match self {
            Stage::Download => "/download",
            Stage::Separate => "/separate",
            Stage::Analyze => "/analyze",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Stage::Download),
            "separate" => Ok(Stage::Separate),
            "analyze" => Ok(Stage::Analyze),
            other => Err(CoreError::Validation(format!(
                "Unknown stage: '{other}'. Valid stages: download, separate, analyze"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain links
// ---------------------------------------------------------------------------

/// An ordered (predecessor, successor) pair for auto-advancing subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainLink {
    pub predecessor: Stage,
    pub successor: Stage,
}

impl ChainLink {
    pub fn new(predecessor: Stage, successor: Stage) -> Result<Self, CoreError> {
        if predecessor == successor {
            return Err(CoreError::Validation(format!(
                "A stage cannot chain to itself: {predecessor}"
            )));
        }
        Ok(Self {
            predecessor,
            successor,
        })
    }

    /// Parse a comma-separated chain such as `download>separate,download>analyze`.
    pub fn parse_list(s: &str) -> Result<Vec<ChainLink>, CoreError> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (from, to) = part.split_once('>').ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Chain link '{part}' must look like 'predecessor>successor'"
                    ))
                })?;
                ChainLink::new(from.trim().parse()?, to.trim().parse()?)
            })
            .collect()
    }

    /// The links used when nothing is configured: separation and analysis
    /// both follow a finished download.
    pub fn defaults() -> Vec<ChainLink> {
        vec![
            ChainLink {
                predecessor: Stage::Download,
                successor: Stage::Separate,
            },
            ChainLink {
                predecessor: Stage::Download,
                successor: Stage::Analyze,
            },
        ]
    }
}

impl fmt::Display for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.predecessor, self.successor)
    }
}

/// Find the stage that feeds `stage` in the given chain, if any.
pub fn predecessor_of(chain: &[ChainLink], stage: Stage) -> Option<Stage> {
    chain
        .iter()
        .find(|link| link.successor == stage)
        .map(|link| link.predecessor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
