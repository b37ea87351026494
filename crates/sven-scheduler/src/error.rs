// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors surfaced by the lane scheduler, queue arbiter, and subagent manager.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The named lane has no spare capacity and the submission was not
    /// queued (the submitter's own policy decides whether to retry).
    #[error("lane '{0}' is at capacity")]
    LaneBusy(String),
    /// A subagent tried to spawn another subagent — only single-level
    /// recursion is allowed.
    #[error("subagents cannot spawn subagents")]
    RecursiveSubagent,
    /// `wait()` was called with an unknown subagent id.
    #[error("no subagent run with id '{0}'")]
    UnknownSubagent(String),
    /// `wait()`'s deadline elapsed before the run finished.
    #[error("timed out waiting for subagent '{0}'")]
    Timeout(String),
    /// The run's own agent loop returned an error.
    #[error("subagent '{0}' failed: {1}")]
    RunFailed(String, String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
