// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Terminal, classified outcomes for an [`crate::Agent`] run.
//!
//! Most failures inside the agent loop are recovered inline and never reach
//! here: a tool timeout becomes an `error(...)` tool result, a denied tool
//! call becomes a `blocked(...)` tool result, a transient model failure is
//! retried with backoff. `AgentError` covers only the Kinds from the error
//! taxonomy that survive every recovery attempt and end the run — the caller
//! gets a typed reason instead of having to pattern-match an error string.

use sven_model::{classify, LlmErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Every retry and failover attempt was exhausted for a transient model
    /// failure (rate limit, timeout, transient 5xx).
    #[error("model unavailable after retries: {0}")]
    LlmUnavailable(String),

    /// The prompt still exceeds the context window after compaction.
    #[error("context window exceeded after compaction: {0}")]
    ContextOverflow(String),

    /// The run was cancelled by the caller.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The provider rejected the request outright (bad credentials, expired
    /// quota) — retrying would not help.
    #[error("provider rejected the request: {0}")]
    FatalProvider(String),

    /// Anything not covered by the taxonomy above (malformed responses the
    /// repair pass couldn't fix, I/O failures, etc).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Classify a model-completion failure that has exhausted
    /// [`crate::Agent`]'s retry/failover budget into the taxonomy above,
    /// using the same heuristic the retry loop itself consults.
    pub fn from_model_error(err: anyhow::Error) -> Self {
        match classify(None, &err.to_string()) {
            LlmErrorKind::ContextOverflow => AgentError::ContextOverflow(err.to_string()),
            LlmErrorKind::Auth | LlmErrorKind::Billing => AgentError::FatalProvider(err.to_string()),
            LlmErrorKind::RateLimit | LlmErrorKind::Timeout | LlmErrorKind::Transient => {
                AgentError::LlmUnavailable(err.to_string())
            }
            LlmErrorKind::Format | LlmErrorKind::Fatal => AgentError::Other(err),
        }
    }
}

/// Component-boundary errors for [`crate::SessionStore`]. Most `SessionStore`
/// operations are infallible at the API level (`resolve` always succeeds,
/// `delete`/`export` return `Option`) — this covers the one operation,
/// `rename`, that has genuinely distinct failure reasons a caller should be
/// able to match on rather than a bare `bool`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session found for key: {0}")]
    NotFound(String),

    #[error("a session already exists for key: {0}")]
    KeyTaken(String),
}
