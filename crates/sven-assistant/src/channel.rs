// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Collaborator seams the [`crate::Assistant`] dispatcher talks to but does
//! not implement: channel delivery and access policy are protocol-specific
//! and out of scope here (SPEC_FULL.md's non-goals exclude "parsing specific
//! wire protocols" and a GUI) — concrete adapters live in a gateway crate.

use async_trait::async_trait;

/// One inbound message from a channel, already resolved to a session key.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub session_key: String,
    pub channel: String,
    pub chat_id: String,
    pub message_id: String,
    pub text: String,
}

/// What [`crate::Assistant::submit`] tells the caller about an inbound
/// message, per SPEC_FULL.md §6's `Assistant.Submit(inbound) → Ack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    Dropped(String),
    Rejected(String),
}

/// Delivers formatted text to a channel. `send` receives one already-chunked
/// piece at a time (see [`crate::BlockStreamer`]); the adapter is never asked
/// to do its own splitting.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn send(&self, chat_id: &str, chunk: &str);
    async fn send_typing(&self, chat_id: &str, typing: bool);
}

/// Whether an inbound message is allowed through at all, before it ever
/// reaches the arbiter or a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Block(String),
}

pub trait AccessPolicy: Send + Sync {
    fn check(&self, inbound: &Inbound) -> PolicyDecision;
}

/// The default policy when no collaborator is configured: allow everything.
/// Matches the teacher's pattern of permissive defaults with an opt-in guard
/// layered on top (see `sven_tools::ToolGuard::from_config`), rather than a
/// fail-closed default nothing can override without extra wiring.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _inbound: &Inbound) -> PolicyDecision {
        PolicyDecision::Allow
    }
}
