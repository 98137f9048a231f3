//! Classification labels and their augmentation schemes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification assigned to a measurement file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Arc,
    WeakArc,
    RestrikingArc,
    ParallelMotorArc,
    NegativeTransient,
    SteadyState,
    RestrikingArcParallelMotor,
    ParallelMotorContinuous,
    Other,
    /// Not yet classified. This is the column default for imported files.
    Unknown,
}

/// A label string that is neither a known name nor a known key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label '{0}'")]
pub struct UnknownLabel(pub String);

impl Label {
    pub const ALL: [Label; 10] = [
        Label::Arc,
        Label::WeakArc,
        Label::RestrikingArc,
        Label::ParallelMotorArc,
        Label::NegativeTransient,
        Label::SteadyState,
        Label::RestrikingArcParallelMotor,
        Label::ParallelMotorContinuous,
        Label::Other,
        Label::Unknown,
    ];

    /// The name stored in the `selected_label` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Arc => "arc",
            Label::WeakArc => "weak_arc",
            Label::RestrikingArc => "restriking_arc",
            Label::ParallelMotorArc => "parallel_motor_arc",
            Label::NegativeTransient => "negative_transient",
            Label::SteadyState => "steady_state",
            Label::RestrikingArcParallelMotor => "restriking_arc_parallel_motor",
            Label::ParallelMotorContinuous => "parallel_motor_continuous",
            Label::Other => "other",
            Label::Unknown => "unknown",
        }
    }

    /// Single-digit shortcut used by labelling tools.
    pub fn key(self) -> Option<char> {
        match self {
            Label::Arc => Some('1'),
            Label::WeakArc => Some('2'),
            Label::RestrikingArc => Some('3'),
            Label::ParallelMotorArc => Some('4'),
            Label::NegativeTransient => Some('5'),
            Label::SteadyState => Some('6'),
            Label::RestrikingArcParallelMotor => Some('7'),
            Label::ParallelMotorContinuous => Some('8'),
            Label::Other => Some('0'),
            Label::Unknown => None,
        }
    }

    pub fn from_key(key: char) -> Option<Label> {
        Label::ALL.into_iter().find(|label| label.key() == Some(key))
    }

    /// Sequence of signal segments used when synthesising training data for
    /// this label.
    pub fn augmentation_scheme(self) -> &'static [&'static str] {
        match self {
            Label::Arc | Label::ParallelMotorArc => {
                &["no_arc_steady_state", "arc_transient", "continuous_arc"]
            }
            Label::WeakArc => &["no_arc_steady_state", "weak_arc_transient", "continuous_arc"],
            Label::RestrikingArc => &[
                "no_arc_steady_state",
                "arc_transient",
                "arc_restrike",
                "arc_transient",
                "continuous_arc",
            ],
            Label::NegativeTransient => &[
                "no_arc_steady_state",
                "negative_transient",
                "no_arc_steady_state",
            ],
            Label::SteadyState => &["steady_state"],
            Label::RestrikingArcParallelMotor => &[
                "motor_steady_state",
                "arc_transient",
                "arc_restrike",
                "arc_transient",
                "continuous_arc",
            ],
            Label::ParallelMotorContinuous => &["motor_steady_state", "continuous_arc"],
            Label::Other | Label::Unknown => &["unknown"],
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either a label name (`"weak_arc"`) or its key (`"2"`).
impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(key), None) = (chars.next(), chars.next()) {
            if let Some(label) = Label::from_key(key) {
                return Ok(label);
            }
        }
        Label::ALL
            .into_iter()
            .find(|label| label.as_str() == trimmed)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}
