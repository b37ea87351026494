// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lane scheduling, per-session queue arbitration, and bounded subagent
//! spawning for the agent execution core.
//!
//! * [`LaneScheduler`] — three independent bounded-concurrency lanes
//!   (session / cron / subagent) so a burst in one never starves another.
//! * [`QueueArbiter`] — per (session × channel) debounce, deduplication, and
//!   queue-mode semantics for messages arriving while a run is in flight.
//! * [`SubagentManager`] — spawns, tracks, and cancels child AgentRuns.

pub mod arbiter;
pub mod error;
pub mod lane;
pub mod subagent;

pub use arbiter::{ArbiterAction, QueueArbiter};
pub use error::{Result, SchedulerError};
pub use lane::{Lane, LanePermit, LaneScheduler};
pub use subagent::{SpawnOptions, SubagentManager, SubagentResult};
