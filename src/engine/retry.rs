//! Retry state machine: next status and retry counter after an attempt.

use super::fetch::FetchOutcome;
use crate::model::Status;

/// Failed attempts allowed before a request is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Status and counter to commit alongside an attempt's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: Status,
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Success completes; an error bumps `retries` and either requeues or
    /// fails once the budget is spent.
    pub fn next(&self, retries: u32, outcome: &FetchOutcome) -> Transition {
        if outcome.error().is_none() {
            return Transition {
                status: Status::Completed,
                retries,
            };
        }

        let retries = retries + 1;
        let status = if retries >= self.max_retries {
            Status::Failed
        } else {
            Status::Pending
        };
        Transition { status, retries }
    }
}
