//! Closed set of review outcomes driving the worker/manager loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a Manager verdict, and the loop state derived from it.
///
/// Exactly one code is active per iteration. `Completed` is the only
/// terminal-success value; `Init` only ever precedes the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Init,
    UnreasonableResult,
    InconsistencyBetweenReasonAndResult,
    IncorrectTask,
    IncompleteTask,
    IncorrectMethodology,
    IncompleteMethodology,
    IncorrectAssumption,
    IncompleteAssumption,
    Unparseable,
    Completed,
}

impl StatusCode {
    /// Every code, in declaration order.
    pub const ALL: [StatusCode; 11] = [
        StatusCode::Init,
        StatusCode::UnreasonableResult,
        StatusCode::InconsistencyBetweenReasonAndResult,
        StatusCode::IncorrectTask,
        StatusCode::IncompleteTask,
        StatusCode::IncorrectMethodology,
        StatusCode::IncompleteMethodology,
        StatusCode::IncorrectAssumption,
        StatusCode::IncompleteAssumption,
        StatusCode::Unparseable,
        StatusCode::Completed,
    ];

    /// Codes a Manager is asked to choose from. `Init` and `Unparseable` are
    /// assigned by the loop itself and never offered.
    pub const VERDICTS: [StatusCode; 9] = [
        StatusCode::Completed,
        StatusCode::UnreasonableResult,
        StatusCode::InconsistencyBetweenReasonAndResult,
        StatusCode::IncorrectTask,
        StatusCode::IncompleteTask,
        StatusCode::IncorrectMethodology,
        StatusCode::IncompleteMethodology,
        StatusCode::IncorrectAssumption,
        StatusCode::IncompleteAssumption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Init => "INIT",
            StatusCode::UnreasonableResult => "UNREASONABLE_RESULT",
            StatusCode::InconsistencyBetweenReasonAndResult => {
                "INCONSISTENCY_BETWEEN_REASON_AND_RESULT"
            }
            StatusCode::IncorrectTask => "INCORRECT_TASK",
            StatusCode::IncompleteTask => "INCOMPLETE_TASK",
            StatusCode::IncorrectMethodology => "INCORRECT_METHODOLOGY",
            StatusCode::IncompleteMethodology => "INCOMPLETE_METHODOLOGY",
            StatusCode::IncorrectAssumption => "INCORRECT_ASSUMPTION",
            StatusCode::IncompleteAssumption => "INCOMPLETE_ASSUMPTION",
            StatusCode::Unparseable => "UNPARSEABLE",
            StatusCode::Completed => "COMPLETED",
        }
    }

    /// Human-readable reason embedded in retry instructions.
    pub fn reason(self) -> &'static str {
        match self {
            StatusCode::Init => "This is the first attempt at the task.",
            StatusCode::UnreasonableResult => {
                "The reviewer judged the result unreasonable for the request."
            }
            StatusCode::InconsistencyBetweenReasonAndResult => {
                "The reviewer found the stated reasoning inconsistent with the reported result."
            }
            StatusCode::IncorrectTask => {
                "The reviewer found that the work performed does not match the requested task."
            }
            StatusCode::IncompleteTask => "The reviewer found the task only partially done.",
            StatusCode::IncorrectMethodology => {
                "The reviewer found the method used to perform the task incorrect."
            }
            StatusCode::IncompleteMethodology => {
                "The reviewer found the method used to perform the task incomplete."
            }
            StatusCode::IncorrectAssumption => {
                "The reviewer found an incorrect assumption behind the result."
            }
            StatusCode::IncompleteAssumption => {
                "The reviewer found the assumptions behind the result incomplete or unstated."
            }
            StatusCode::Unparseable => {
                "The reviewer's verdict could not be interpreted. Review your previous result again and re-attempt the task carefully."
            }
            StatusCode::Completed => "The reviewer accepted the result.",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == StatusCode::Completed
    }

    /// True for the eight domain failure reasons plus `Unparseable`.
    pub fn is_retryable(self) -> bool {
        !matches!(self, StatusCode::Init | StatusCode::Completed)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status code '{0}'")]
pub struct UnknownStatusCode(pub String);

impl FromStr for StatusCode {
    type Err = UnknownStatusCode;

    /// Exact, case-insensitive name match after trimming surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        StatusCode::ALL
            .into_iter()
            .find(|code| code.as_str() == normalized)
            .ok_or_else(|| UnknownStatusCode(s.to_string()))
    }
}
