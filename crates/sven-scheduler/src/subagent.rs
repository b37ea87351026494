// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `SubagentManager` — spawns bounded, isolated child AgentRuns and tracks
//! them in a registry keyed by subagent id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use sven_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use sven_config::{AgentMode, Config};
use sven_core::AgentEvent;
use sven_model::ModelProvider;

use crate::error::{Result, SchedulerError};
use crate::lane::{Lane, LaneScheduler};

/// Tighter budgets applied to every subagent, regardless of the parent's own
/// configuration — a runaway child must never out-run its parent.
const SUBAGENT_MAX_TURNS: u32 = 15;
const SUBAGENT_TURN_TIMEOUT_SECS: u64 = 300;

/// Options controlling one subagent spawn.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub mode: Option<AgentMode>,
}

#[derive(Debug, Clone)]
enum RunStatus {
    Running,
    Done(String),
    Failed(String),
    Cancelled,
}

struct RunEntry {
    status: Arc<Mutex<RunStatus>>,
    notify: Arc<Notify>,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Outcome of a finished subagent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubagentResult {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Spawns, tracks, and cancels subagent runs.
///
/// Subagents are owned by the manager; callers hold only an opaque id and
/// observe completion through [`Self::wait`]. Recursive spawning (a subagent
/// spawning its own subagent) is rejected per [`SchedulerError::RecursiveSubagent`].
pub struct SubagentManager {
    lanes: Arc<LaneScheduler>,
    config: Arc<Config>,
    model: Arc<dyn ModelProvider>,
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl SubagentManager {
    pub fn new(lanes: Arc<LaneScheduler>, config: Arc<Config>, model: Arc<dyn ModelProvider>) -> Self {
        Self {
            lanes,
            config,
            model,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a child AgentRun for `task`. `caller_is_subagent` must be `true`
    /// when the spawning context is itself a subagent — this enforces the
    /// single-level recursion rule.
    pub async fn spawn(
        &self,
        caller_is_subagent: bool,
        task: &str,
        options: SpawnOptions,
    ) -> Result<String> {
        if caller_is_subagent {
            return Err(SchedulerError::RecursiveSubagent);
        }

        let permit = self
            .lanes
            .try_acquire(Lane::Subagent)
            .map_err(|_| SchedulerError::LaneBusy("subagent".to_string()))?;

        let id = Uuid::new_v4().to_string();
        let mode = options.mode.unwrap_or(AgentMode::Agent);

        let mut sub_config: Config = (*self.config).clone();
        sub_config.agent_loop.max_turns = SUBAGENT_MAX_TURNS;
        sub_config.agent_loop.turn_timeout_secs = SUBAGENT_TURN_TIMEOUT_SECS;

        let model = self.model.clone();
        let task = task.to_string();
        let status = Arc::new(Mutex::new(RunStatus::Running));
        let notify = Arc::new(Notify::new());
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let status_for_task = status.clone();
        let notify_for_task = notify.clone();
        tokio::spawn(async move {
            // The permit is held for the lifetime of this task; dropping it
            // on completion frees a subagent-lane slot.
            let _permit = permit;

            let mut agent = AgentBuilder::new(Arc::new(sub_config))
                .with_runtime_context(RuntimeContext::empty())
                .build(mode, model, ToolSetProfile::SubAgent {
                    todos: Arc::new(Mutex::new(Vec::new())),
                });

            let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
            let mut output = String::new();
            let drain = tokio::spawn(async move {
                let mut text = String::new();
                while let Some(event) = rx.recv().await {
                    if let AgentEvent::TextDelta(delta) = event {
                        text.push_str(&delta);
                    }
                }
                text
            });

            let run = agent.submit_with_cancel(&task, tx, cancel_rx).await;
            let drained = drain.await.unwrap_or_default();
            output.push_str(&drained);

            let new_status = match run {
                Ok(()) if output.is_empty() => {
                    RunStatus::Done("(subagent produced no text output)".to_string())
                }
                Ok(()) => RunStatus::Done(output),
                Err(e) => RunStatus::Failed(e.to_string()),
            };
            *status_for_task.lock().await = new_status;
            notify_for_task.notify_waiters();
        });

        self.runs.lock().await.insert(
            id.clone(),
            RunEntry {
                status,
                notify,
                cancel_tx: Mutex::new(Some(cancel_tx)),
            },
        );
        debug!(subagent_id = %id, "subagent: spawned");
        Ok(id)
    }

    /// Wait for a subagent to finish, up to `timeout`.
    pub async fn wait(&self, id: &str, timeout: std::time::Duration) -> Result<SubagentResult> {
        let entry = {
            let runs = self.runs.lock().await;
            let entry = runs
                .get(id)
                .ok_or_else(|| SchedulerError::UnknownSubagent(id.to_string()))?;
            (entry.status.clone(), entry.notify.clone())
        };
        let (status, notify) = entry;

        loop {
            if let Some(result) = Self::resolve(&status).await {
                return Ok(result);
            }
            match tokio::time::timeout(timeout, notify.notified()).await {
                Ok(()) => continue,
                Err(_) => return Err(SchedulerError::Timeout(id.to_string())),
            }
        }
    }

    async fn resolve(status: &Arc<Mutex<RunStatus>>) -> Option<SubagentResult> {
        match &*status.lock().await {
            RunStatus::Running => None,
            RunStatus::Done(text) => Some(SubagentResult::Completed(text.clone())),
            RunStatus::Failed(e) => Some(SubagentResult::Failed(e.clone())),
            RunStatus::Cancelled => Some(SubagentResult::Cancelled),
        }
    }

    /// List all known subagent ids and whether each is still running.
    pub async fn list(&self) -> Vec<(String, bool)> {
        let runs = self.runs.lock().await;
        let mut out = Vec::with_capacity(runs.len());
        for (id, entry) in runs.iter() {
            let running = matches!(&*entry.status.lock().await, RunStatus::Running);
            out.push((id.clone(), running));
        }
        out
    }

    /// Request cancellation of a running subagent. No-op if it already finished.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let runs = self.runs.lock().await;
        let entry = runs
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownSubagent(id.to_string()))?;
        if let Some(tx) = entry.cancel_tx.lock().await.take() {
            let _ = tx.send(());
            *entry.status.lock().await = RunStatus::Cancelled;
            entry.notify.notify_waiters();
        } else {
            warn!(subagent_id = id, "subagent: stop requested after already finished");
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
