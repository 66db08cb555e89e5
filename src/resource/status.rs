//! Sample status: lifecycle state and typed conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::Error;

/// Condition type written by the general handler.
pub const CONDITION_DIVISIBLE_BY_THREE: &str = "DivisibleByThree";

/// Coarse lifecycle label of a Sample.
///
/// State transitions:
/// ```text
/// UNSET → {PROCESSING | READY | WARNING | ERROR} → DELETING
///                    ↑_________________↓
/// ```
/// Deletion may be requested from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum State {
    #[default]
    #[serde(rename = "")]
    Unset,
    Processing,
    Ready,
    Warning,
    Error,
    Deleting,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Unset => "",
            State::Processing => "Processing",
            State::Ready => "Ready",
            State::Warning => "Warning",
            State::Error => "Error",
            State::Deleting => "Deleting",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        self == State::Deleting
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: State) -> bool {
        match (self, to) {
            // Nothing returns to UNSET, nothing leaves DELETING
            (_, State::Unset) => false,
            (State::Deleting, _) => false,
            (from, to) if from == to => false,
            // Deletion wins from any live state
            (_, State::Deleting) => true,
            // UNSET
            (State::Unset, _) => true,
            // PROCESSING settles
            (State::Processing, _) => true,
            // Settled states move among themselves or restart processing
            (State::Ready | State::Warning | State::Error, _) => true,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Unset => write!(f, "Unset"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Unset" => Ok(State::Unset),
            "Processing" => Ok(State::Processing),
            "Ready" => Ok(State::Ready),
            "Warning" => Ok(State::Warning),
            "Error" => Ok(State::Error),
            "Deleting" => Ok(State::Deleting),
            other => Err(Error::validation(format!("unknown state {other:?}"))),
        }
    }
}

/// Tri-state condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A typed, timestamped fact attached to the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// The `DivisibleByThree` condition for a given evaluation outcome.
    pub fn divisible_by_three(status: ConditionStatus, generation: i64) -> Self {
        let (reason, message) = match status {
            ConditionStatus::True => ("Divisible", "spec.someNumber is divisible by three"),
            ConditionStatus::False => (
                "NotDivisible",
                "spec.someNumber is missing, not a number, or not divisible by three",
            ),
            ConditionStatus::Unknown => ("Evaluating", "spec.someNumber has not been evaluated yet"),
        };
        Self {
            r#type: CONDITION_DIVISIBLE_BY_THREE.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: generation,
            last_transition_time: Utc::now(),
        }
    }
}

/// Observed status of a Sample.
///
/// Two writers share this document: one owns `state`, the other
/// `conditions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SampleStatus {
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl SampleStatus {
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn with_divisible_by_three_condition_status(
        mut self,
        status: ConditionStatus,
        generation: i64,
    ) -> Self {
        self.set_condition(Condition::divisible_by_three(status, generation));
        self
    }

    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// `last_transition_time` only moves when `status` changes. Returns
    /// whether anything changed.
    pub fn set_condition(&mut self, new: Condition) -> bool {
        let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == new.r#type)
        else {
            self.conditions.push(new);
            return true;
        };

        let mut changed = false;
        if existing.status != new.status {
            existing.status = new.status;
            existing.last_transition_time = new.last_transition_time;
            changed = true;
        }
        if existing.reason != new.reason {
            existing.reason = new.reason;
            changed = true;
        }
        if existing.message != new.message {
            existing.message = new.message;
            changed = true;
        }
        if existing.observed_generation != new.observed_generation {
            existing.observed_generation = new.observed_generation;
            changed = true;
        }
        changed
    }

    /// Whether the condition was evaluated against `generation`.
    pub fn is_condition_current(&self, condition_type: &str, generation: i64) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.observed_generation == generation)
    }
}
