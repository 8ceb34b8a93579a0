//! Channel names: `<stage>:job:<kind>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use stemflow_core::error::CoreError;
use stemflow_core::stage::Stage;

/// Lifecycle point a job event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    Created,
    Updated,
    Completed,
    Error,
}

impl JobEventKind {
    pub const ALL: [JobEventKind; 4] = [
        JobEventKind::Created,
        JobEventKind::Updated,
        JobEventKind::Completed,
        JobEventKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobEventKind::Created => "created",
            JobEventKind::Updated => "updated",
            JobEventKind::Completed => "completed",
            JobEventKind::Error => "error",
        }
    }
}

/// A bus channel, e.g. `download:job:completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub stage: Stage,
    pub kind: JobEventKind,
}

impl Channel {
    pub const fn new(stage: Stage, kind: JobEventKind) -> Self {
        Self { stage, kind }
    }

    pub const fn created(stage: Stage) -> Self {
        Self::new(stage, JobEventKind::Created)
    }

    pub const fn updated(stage: Stage) -> Self {
        Self::new(stage, JobEventKind::Updated)
    }

    pub const fn completed(stage: Stage) -> Self {
        Self::new(stage, JobEventKind::Completed)
    }

    pub const fn error(stage: Stage) -> Self {
        Self::new(stage, JobEventKind::Error)
    }

    /// Every channel of every stage.
    pub fn all() -> Vec<Channel> {
        Stage::ALL
            .iter()
            .flat_map(|stage| JobEventKind::ALL.map(|kind| Channel::new(*stage, kind)))
            .collect()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:job:{}", self.stage, self.kind.as_str())
    }
}

impl FromStr for Channel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation(format!("Invalid channel name: '{s}'"));
        let mut parts = s.split(':');
        let (Some(stage), Some("job"), Some(kind), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let kind = match kind {
            "created" => JobEventKind::Created,
            "updated" => JobEventKind::Updated,
            "completed" => JobEventKind::Completed,
            "error" => JobEventKind::Error,
            _ => return Err(invalid()),
        };
        Ok(Channel::new(stage.parse()?, kind))
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
