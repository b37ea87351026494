// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `QueueArbiter` — per (session × channel) debounce, deduplication, and
//! queue-mode semantics for inbound messages arriving while an AgentRun is
//! already in flight.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use sven_config::{QueueArbiterConfig, QueueMode};

/// What the caller should do with an inbound message, as decided by the
/// arbiter's configured [`QueueMode`] for this session/channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterAction {
    /// Start a new AgentRun now with this (possibly batched) text.
    Start(String),
    /// The message was absorbed into a pending queue; nothing to do now.
    Queued,
    /// A duplicate of a message seen within the dedup window; dropped.
    Deduplicated,
    /// Push this text into the running AgentRun's steering/interrupt channel.
    Steer(String),
    /// Cancel the current AgentRun and start a new one with this text.
    Interrupt(String),
}

struct SessionState {
    busy: bool,
    mode: QueueMode,
    generation: u64,
    collect_buffer: Vec<String>,
    followups: VecDeque<String>,
    last_seen: HashMap<String, Instant>,
}

impl SessionState {
    fn new(mode: QueueMode) -> Self {
        Self {
            busy: false,
            mode,
            generation: 0,
            collect_buffer: Vec::new(),
            followups: VecDeque::new(),
            last_seen: HashMap::new(),
        }
    }
}

/// Arbitrates inbound messages per (session, channel) pair.
pub struct QueueArbiter {
    cfg: QueueArbiterConfig,
    sessions: Mutex<HashMap<(String, String), SessionState>>,
}

impl QueueArbiter {
    pub fn new(cfg: QueueArbiterConfig) -> Self {
        Self {
            cfg,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Submit an inbound message identified by `message_id` for `session_id`
    /// on `channel`, carrying `text`. Decides what the caller should do with
    /// it per the session's elected [`QueueMode`].
    ///
    /// For `collect` mode this call can take up to
    /// `debounce_busy_new_ms`/`debounce_busy_followup_ms` to resolve: it
    /// sleeps out the debounce window and, if no newer message superseded
    /// this one in the meantime, drains the whole batch as one synthetic
    /// turn.
    pub async fn submit(
        &self,
        session_id: &str,
        channel: &str,
        message_id: &str,
        text: &str,
    ) -> ArbiterAction {
        let key = (session_id.to_string(), channel.to_string());
        let dedup_window = Duration::from_secs(self.cfg.dedup_window_secs);

        let (was_idle, mode, generation, debounce) = {
            let mut sessions = self.sessions.lock().await;
            let state = sessions
                .entry(key.clone())
                .or_insert_with(|| SessionState::new(self.cfg.default_mode));

            state.last_seen.retain(|_, t| t.elapsed() < dedup_window);
            if let Some(seen) = state.last_seen.get(message_id) {
                if seen.elapsed() < dedup_window {
                    debug!(session_id, channel, message_id, "arbiter: deduplicated");
                    return ArbiterAction::Deduplicated;
                }
            }
            state.last_seen.insert(message_id.to_string(), Instant::now());

            let was_idle = !state.busy;
            if was_idle {
                state.busy = true;
                state.generation += 1;
                (true, state.mode, state.generation, Duration::ZERO)
            } else {
                match state.mode {
                    QueueMode::Interrupt => {
                        state.collect_buffer.clear();
                        state.followups.clear();
                        state.generation += 1;
                        return ArbiterAction::Interrupt(text.to_string());
                    }
                    QueueMode::Steer => {
                        return ArbiterAction::Steer(text.to_string());
                    }
                    QueueMode::Followup => {
                        push_followup(&mut state.followups, self.cfg.followup_queue_cap, text);
                        return ArbiterAction::Queued;
                    }
                    QueueMode::SteerBacklog => {
                        // Steer the first message that arrives per busy
                        // period; anything after that queues as a followup
                        // so the steer channel isn't flooded.
                        if state.collect_buffer.is_empty() {
                            state.collect_buffer.push(text.to_string());
                            return ArbiterAction::Steer(text.to_string());
                        }
                        push_followup(&mut state.followups, self.cfg.followup_queue_cap, text);
                        return ArbiterAction::Queued;
                    }
                    QueueMode::Collect => {
                        state.collect_buffer.push(text.to_string());
                        state.generation += 1;
                        let debounce = if state.collect_buffer.len() == 1 {
                            Duration::from_millis(self.cfg.debounce_busy_new_ms)
                        } else {
                            Duration::from_millis(self.cfg.debounce_busy_followup_ms)
                        };
                        (false, state.mode, state.generation, debounce)
                    }
                }
            }
        };

        if was_idle {
            let _ = (mode, generation, debounce);
            return ArbiterAction::Start(text.to_string());
        }

        // Collect mode: wait out the debounce window, then drain the batch
        // if no newer submission has superseded this wait.
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        let mut sessions = self.sessions.lock().await;
        let state = match sessions.get_mut(&key) {
            Some(s) => s,
            None => return ArbiterAction::Queued,
        };
        if state.generation != generation {
            // A later message arrived; let its own debounce win the drain.
            return ArbiterAction::Queued;
        }
        let batch = std::mem::take(&mut state.collect_buffer).join("\n\n");
        ArbiterAction::Start(batch)
    }

    /// Pop the next queued followup for (session, channel), if any. Called
    /// by the run driver after an AgentRun completes.
    pub async fn next_followup(&self, session_id: &str, channel: &str) -> Option<String> {
        let key = (session_id.to_string(), channel.to_string());
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(&key).and_then(|s| s.followups.pop_front())
    }

    /// Mark (session, channel) idle again once its AgentRun has finished.
    pub async fn mark_idle(&self, session_id: &str, channel: &str) {
        let key = (session_id.to_string(), channel.to_string());
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&key) {
            state.busy = false;
            state.collect_buffer.clear();
        }
    }

    /// Override the queue mode for a specific session/channel (hot-reload of
    /// per-channel mode maps).
    pub async fn set_mode(&self, session_id: &str, channel: &str, mode: QueueMode) {
        let key = (session_id.to_string(), channel.to_string());
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(key)
            .or_insert_with(|| SessionState::new(mode))
            .mode = mode;
    }
}

fn push_followup(queue: &mut VecDeque<String>, cap: usize, text: &str) {
    if queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(text.to_string());
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
