// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Typed classification for the ways a single tool call can fail before
//! [`crate::ToolRegistry::execute`] turns the failure into [`crate::ToolOutput`]
//! data for the conversation. Nothing above the registry ever sees this type:
//! tool failures are data, not control flow, once they leave `execute`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("tool '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("tool '{name}' panicked: {message}")]
    Panic { name: String, message: String },
}
