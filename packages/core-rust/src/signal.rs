//! Internal state-change signals exchanged during shutdown.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A transition requested on the state-change channel.
///
/// `ProcessThenStop` must precede `ProcessingComplete` for the latter to be
/// terminal; on its own `ProcessingComplete` is informational. `Stop` ends
/// the listener immediately without waiting for drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChange {
    /// Abrupt stop, bypassing drain.
    Stop,
    /// Submissions are closed; finish queued work, then stop.
    ProcessThenStop,
    /// The work queue has been fully drained.
    ProcessingComplete,
}

impl StateChange {
    /// Returns the wire name of the transition.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ProcessThenStop => "process_then_stop",
            Self::ProcessingComplete => "processing_complete",
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state change: {0}")]
pub struct UnknownStateChange(pub String);

impl FromStr for StateChange {
    type Err = UnknownStateChange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(Self::Stop),
            "process_then_stop" => Ok(Self::ProcessThenStop),
            "processing_complete" => Ok(Self::ProcessingComplete),
            other => Err(UnknownStateChange(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for change in [
            StateChange::Stop,
            StateChange::ProcessThenStop,
            StateChange::ProcessingComplete,
        ] {
            assert_eq!(change.as_str().parse::<StateChange>().unwrap(), change);
            let json = serde_json::to_string(&change).unwrap();
            assert_eq!(json, format!("\"{}\"", change.as_str()));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "pause".parse::<StateChange>().unwrap_err();
        assert_eq!(err, UnknownStateChange("pause".to_string()));
    }
}
