// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `LaneScheduler` — three named lanes, each with an independent bounded
//! concurrency limit, so that a burst of subagent spawns can never starve
//! user-facing session turns (and vice versa).

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use sven_config::LaneConfig;

use crate::error::{Result, SchedulerError};

/// The three work categories a [`LaneScheduler`] arbitrates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// User-message AgentRuns.
    Session,
    /// Scheduled-task AgentRuns triggered by a cron-like collaborator.
    Cron,
    /// Child AgentRuns spawned by [`crate::SubagentManager`].
    Subagent,
}

impl Lane {
    fn label(self) -> &'static str {
        match self {
            Lane::Session => "session",
            Lane::Cron => "cron",
            Lane::Subagent => "subagent",
        }
    }
}

/// Holds one permit for the lane it was acquired from. Dropping it returns
/// the permit to the lane's semaphore, freeing a concurrency slot.
pub struct LanePermit {
    lane: Lane,
    _permit: OwnedSemaphorePermit,
}

impl LanePermit {
    pub fn lane(&self) -> Lane {
        self.lane
    }
}

/// Three independent, non-blocking, bounded-concurrency lanes.
///
/// Submission never blocks the caller: [`Self::try_acquire`] either returns a
/// permit immediately or fails with [`SchedulerError::LaneBusy`], leaving the
/// caller's own retry/backlog policy to decide what happens next. Work queued
/// behind one lane's semaphore never blocks another lane because each lane
/// owns an independent [`Semaphore`].
pub struct LaneScheduler {
    session: Arc<Semaphore>,
    cron: Arc<Semaphore>,
    subagent: Arc<Semaphore>,
}

impl LaneScheduler {
    pub fn new(cfg: &LaneConfig) -> Self {
        Self {
            session: Arc::new(Semaphore::new(cfg.session)),
            cron: Arc::new(Semaphore::new(cfg.cron)),
            subagent: Arc::new(Semaphore::new(cfg.subagent)),
        }
    }

    fn semaphore(&self, lane: Lane) -> &Arc<Semaphore> {
        match lane {
            Lane::Session => &self.session,
            Lane::Cron => &self.cron,
            Lane::Subagent => &self.subagent,
        }
    }

    /// Non-blocking acquire: succeeds immediately if the lane has a spare
    /// slot, otherwise returns `LaneBusy` without waiting.
    pub fn try_acquire(&self, lane: Lane) -> Result<LanePermit> {
        match self.semaphore(lane).clone().try_acquire_owned() {
            Ok(permit) => {
                debug!(lane = lane.label(), "lane: permit acquired");
                Ok(LanePermit { lane, _permit: permit })
            }
            Err(_) => Err(SchedulerError::LaneBusy(lane.label().to_string())),
        }
    }

    /// Number of slots currently free in `lane` (for diagnostics/metrics).
    pub fn available(&self, lane: Lane) -> usize {
        self.semaphore(lane).available_permits()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
