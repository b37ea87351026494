// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fan-out of per-session events to whatever collaborator is watching
//! (gateway, webui, CLI). One [`EventBus`] is shared process-wide; each
//! subscriber gets its own lagging-tolerant receiver.

use tokio::sync::broadcast;

use sven_core::AgentEvent;

/// A bus event, always tagged with the session it came from so a subscriber
/// filtering for one session can discard the rest cheaply.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub session_key: String,
    pub sequence: u64,
    pub kind: BusEventKind,
}

/// The event kinds named in SPEC_FULL.md's `EventBus.Subscribe` contract:
/// `delta`, `tool_use` (pre/post), `done`, `error`, plus a passthrough for
/// anything else an [`AgentEvent`] carries.
#[derive(Debug, Clone)]
pub enum BusEventKind {
    Delta(String),
    ToolUse { tool_name: String, is_pre: bool },
    Done { final_text: String },
    Error(String),
    Other(AgentEvent),
}

/// Maps a raw [`AgentEvent`] from one AgentRun into a [`BusEventKind`].
/// `final_text` accumulates text deltas so `Done` carries the full reply —
/// callers that only want the streaming deltas should match on `Delta`
/// themselves rather than waiting for `Done`.
pub fn classify_agent_event(event: &AgentEvent, accumulated_text: &str) -> BusEventKind {
    match event {
        AgentEvent::TextDelta(t) => BusEventKind::Delta(t.clone()),
        AgentEvent::ToolCallStarted(tc) => {
            BusEventKind::ToolUse { tool_name: tc.name.clone(), is_pre: true }
        }
        AgentEvent::ToolCallFinished { tool_name, .. } => {
            BusEventKind::ToolUse { tool_name: tool_name.clone(), is_pre: false }
        }
        AgentEvent::TurnComplete => BusEventKind::Done { final_text: accumulated_text.to_string() },
        AgentEvent::Error(msg) => BusEventKind::Error(msg.clone()),
        other => BusEventKind::Other(other.clone()),
    }
}

/// Process-wide broadcast of [`BusEvent`]s. Slow subscribers that fall behind
/// the ring buffer lose their oldest unread events rather than blocking
/// publishers — callers distinguish `Lagged` from a clean `Closed` end.
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publish; a `SendError` (no subscribers) is expected and silently
    /// dropped — nobody is required to be listening.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
