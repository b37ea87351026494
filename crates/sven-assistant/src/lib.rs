// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The assistant dispatcher: the glue between a channel frontend and the
//! agent execution core (SPEC_FULL.md §4.8).
//!
//! * [`Assistant`] — resolves a session, consults access policy, hands off
//!   to [`sven_scheduler::QueueArbiter`] and [`sven_scheduler::LaneScheduler`],
//!   and streams the result back through a [`ChannelAdapter`].
//! * [`EventBus`] — process-wide fan-out of per-session agent events.
//! * [`BlockStreamer`] — buffers model deltas into channel-sized chunks.

mod assistant;
mod block_streamer;
mod channel;
mod event_bus;

pub use assistant::{Assistant, RuntimeContextFactory};
pub use block_streamer::{BlockStreamer, BlockStreamerConfig};
pub use channel::{AccessPolicy, Ack, AllowAll, ChannelAdapter, Inbound, PolicyDecision};
pub use event_bus::{classify_agent_event, BusEvent, BusEventKind, EventBus};
