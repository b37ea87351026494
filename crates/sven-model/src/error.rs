// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Classification of LLM call failures.
//!
//! The agent loop needs to decide, for any failed [`crate::ModelProvider::complete`]
//! call, whether to retry within the turn, rotate to a fallback model, or give
//! up and surface a terminal error. [`LlmErrorKind`] is that decision input.

use std::fmt;

/// Coarse classification of an LLM call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Account/billing issue (quota exhausted, payment required). Not retried.
    Billing,
    /// HTTP 429 or provider-reported rate limit. Retried with backoff, then
    /// failover to the next model in the chain.
    RateLimit,
    /// HTTP 401/403 or invalid credentials. Not retried; terminal.
    Auth,
    /// Request exceeded the configured deadline.
    Timeout,
    /// Malformed response body, or a tool-call argument payload that could
    /// not be parsed/repaired.
    Format,
    /// The provider reported the prompt exceeds the model's context window.
    ContextOverflow,
    /// HTTP 5xx, connection reset, or any other condition expected to clear
    /// on its own. Retried with backoff.
    Transient,
    /// Anything else. Not retried.
    Fatal,
}

impl LlmErrorKind {
    /// Whether the agent loop should retry the same turn (possibly after
    /// rotating to a fallback model) rather than surfacing a terminal error.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout | Self::Transient)
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Billing => "billing",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Timeout => "timeout",
            Self::Format => "format",
            Self::ContextOverflow => "context_overflow",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// Best-effort classification of an opaque provider error message.
///
/// Providers surface failures as free-form strings (see
/// [`crate::ResponseEvent::Error`]); there is no structured error contract
/// to dispatch on, so classification is a set of substring heuristics over
/// the message and, where available, the HTTP status code.
pub fn classify(status: Option<u16>, message: &str) -> LlmErrorKind {
    let lower = message.to_lowercase();

    if let Some(code) = status {
        match code {
            401 | 403 => return LlmErrorKind::Auth,
            402 => return LlmErrorKind::Billing,
            429 => return LlmErrorKind::RateLimit,
            500..=599 => return LlmErrorKind::Transient,
            _ => {}
        }
    }

    if lower.contains("context_length_exceeded")
        || lower.contains("context window")
        || lower.contains("maximum context length")
        || lower.contains("too many tokens")
    {
        return LlmErrorKind::ContextOverflow;
    }
    if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("too many requests") {
        return LlmErrorKind::RateLimit;
    }
    if lower.contains("insufficient_quota") || lower.contains("billing") || lower.contains("payment") {
        return LlmErrorKind::Billing;
    }
    if lower.contains("unauthorized") || lower.contains("invalid api key") || lower.contains("authentication") {
        return LlmErrorKind::Auth;
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return LlmErrorKind::Timeout;
    }
    if lower.contains("invalid json") || lower.contains("parse error") || lower.contains("malformed") {
        return LlmErrorKind::Format;
    }
    if lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("temporarily unavailable")
        || lower.contains("service unavailable")
    {
        return LlmErrorKind::Transient;
    }

    LlmErrorKind::Fatal
}
