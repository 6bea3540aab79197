#![forbid(unsafe_code)]

//! Status kinds and the precedence fold used to aggregate them.
//!
//! # Precedence
//!
//! When several child statuses are folded into one parent status, the one
//! that appears earliest in [`STATUS_PRECEDENCE`] wins:
//!
//! | Rank | Status    | Failing |
//! |------|-----------|---------|
//! | 0    | `running` | no      |
//! | 1    | `queued`  | no      |
//! | 2    | `error`   | yes     |
//! | 3    | `fail`    | yes     |
//! | 4    | `updated` | no      |
//! | 5    | `success` | no      |
//! | 6    | `idle`    | no      |
//! | 7    | `skipped` | no      |
//!
//! Non-final statuses outrank everything so a branch with any test still in
//! flight reads as in flight.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of statuses carried by every tree entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Declared, not yet executed.
    #[default]
    Idle,
    /// Scheduled for execution in the current run.
    Queued,
    /// Currently executing.
    Running,
    Success,
    Fail,
    Error,
    Skipped,
    /// Reference image was accepted as the new baseline.
    Updated,
}

/// Fold order, highest precedence first.
pub const STATUS_PRECEDENCE: [StatusKind; 8] = [
    StatusKind::Running,
    StatusKind::Queued,
    StatusKind::Error,
    StatusKind::Fail,
    StatusKind::Updated,
    StatusKind::Success,
    StatusKind::Idle,
    StatusKind::Skipped,
];

impl StatusKind {
    /// Position in [`STATUS_PRECEDENCE`]; lower wins.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Queued => 1,
            Self::Error => 2,
            Self::Fail => 3,
            Self::Updated => 4,
            Self::Success => 5,
            Self::Idle => 6,
            Self::Skipped => 7,
        }
    }

    /// Statuses that place an entity in the `failedIds` lists.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }

    /// Whether the status can still change within the current run.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Running | Self::Queued)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Updated => "updated",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold statuses into one using [`STATUS_PRECEDENCE`].
///
/// Total: an empty input yields [`StatusKind::Idle`].
#[must_use]
pub fn reduce_statuses<I>(statuses: I) -> StatusKind
where
    I: IntoIterator<Item = StatusKind>,
{
    statuses
        .into_iter()
        .min_by_key(|status| status.rank())
        .unwrap_or(StatusKind::Idle)
}
