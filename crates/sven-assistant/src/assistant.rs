// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `Assistant` dispatcher: the single entry point a gateway/channel
//! frontend calls with an inbound message and gets back a non-blocking Ack.
//! Ties together [`sven_scheduler::QueueArbiter`] (per-session queue mode),
//! [`sven_scheduler::LaneScheduler`] (bounded concurrency), a lazily built
//! per-session [`Agent`], the [`EventBus`], and the [`BlockStreamer`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use sven_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use sven_config::{AgentMode, Config};
use sven_core::{Agent, AgentEvent, HookManager};
use sven_model::ModelProvider;
use sven_scheduler::{ArbiterAction, Lane, LaneScheduler, QueueArbiter};

use crate::block_streamer::{BlockStreamer, BlockStreamerConfig};
use crate::channel::{AccessPolicy, Ack, AllowAll, ChannelAdapter, Inbound, PolicyDecision};
use crate::event_bus::{classify_agent_event, BusEvent, EventBus};

/// Per-(session, channel) bookkeeping for the one AgentRun currently in
/// flight, so `stop()` and `Steer` actions can reach it.
struct RunHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
    steer_tx: Option<mpsc::UnboundedSender<String>>,
    /// Distinguishes this run from a later one that reused the same
    /// (session, channel) key after an `Interrupt` — the cleanup at the end
    /// of a cancelled run must not evict the run that superseded it.
    token: u64,
}

fn run_key(session_key: &str, channel: &str) -> String {
    format!("{session_key}\u{0}{channel}")
}

/// Builds a fresh [`RuntimeContext`] for each per-session [`Agent`] — a
/// closure rather than a stored value because `RuntimeContext` does not
/// implement `Clone` (its git/CI detection fields don't either).
pub type RuntimeContextFactory = dyn Fn() -> RuntimeContext + Send + Sync;

/// Central dispatcher described in SPEC_FULL.md §4.8. One instance is shared
/// process-wide; each (session, channel) pair gets its own [`Agent`], built
/// lazily on first message and kept alive for the life of the `Assistant` so
/// later turns see the same conversation history.
pub struct Assistant {
    config: Arc<Config>,
    model: Arc<dyn ModelProvider>,
    runtime_ctx_factory: Arc<RuntimeContextFactory>,
    hooks: Arc<HookManager>,
    arbiter: Arc<QueueArbiter>,
    lanes: Arc<LaneScheduler>,
    bus: Arc<EventBus>,
    policy: Arc<dyn AccessPolicy>,
    channel_adapter: Arc<dyn ChannelAdapter>,
    streamer_cfg: BlockStreamerConfig,
    agents: Arc<Mutex<HashMap<String, Arc<Mutex<Agent>>>>>,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    sequence: std::sync::atomic::AtomicU64,
}

impl Assistant {
    pub fn new(
        config: Arc<Config>,
        model: Arc<dyn ModelProvider>,
        runtime_ctx_factory: Arc<RuntimeContextFactory>,
        channel_adapter: Arc<dyn ChannelAdapter>,
    ) -> Self {
        let arbiter = Arc::new(QueueArbiter::new(config.queue_arbiter.clone()));
        let lanes = Arc::new(LaneScheduler::new(&config.lanes));
        Self {
            config,
            model,
            runtime_ctx_factory,
            hooks: Arc::new(HookManager::new()),
            arbiter,
            lanes,
            bus: Arc::new(EventBus::default()),
            policy: Arc::new(AllowAll),
            channel_adapter,
            streamer_cfg: BlockStreamerConfig::default(),
            agents: Arc::new(Mutex::new(HashMap::new())),
            runs: Arc::new(Mutex::new(HashMap::new())),
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookManager>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Step 1-4 of SPEC_FULL.md §4.8: resolve policy, hand off to the
    /// arbiter, and either start, queue, steer, interrupt, or drop. Never
    /// blocks on the AgentRun itself — only on the arbiter's own debounce
    /// wait for `collect` mode, which is bounded by config.
    pub async fn submit(&self, inbound: Inbound) -> Ack {
        if let PolicyDecision::Block(reason) = self.policy.check(&inbound) {
            info!(
                session_key = %inbound.session_key,
                channel = %inbound.channel,
                reason = %reason,
                "assistant: dropped by access policy"
            );
            return Ack::Rejected(reason);
        }

        let action = self
            .arbiter
            .submit(&inbound.session_key, &inbound.channel, &inbound.message_id, &inbound.text)
            .await;

        match action {
            ArbiterAction::Deduplicated => Ack::Dropped("duplicate message".to_string()),
            ArbiterAction::Queued => Ack::Accepted,
            ArbiterAction::Steer(text) => {
                let key = run_key(&inbound.session_key, &inbound.channel);
                let runs = self.runs.lock().await;
                match runs.get(&key).and_then(|h| h.steer_tx.as_ref()) {
                    Some(tx) if tx.send(text).is_ok() => Ack::Accepted,
                    _ => {
                        warn!(session_key = %inbound.session_key, "assistant: steer target has no active run");
                        Ack::Dropped("no active run to steer".to_string())
                    }
                }
            }
            ArbiterAction::Interrupt(text) => {
                let key = run_key(&inbound.session_key, &inbound.channel);
                if let Some(handle) = self.runs.lock().await.remove(&key) {
                    if let Some(cancel_tx) = handle.cancel_tx {
                        let _ = cancel_tx.send(());
                    }
                }
                self.start_run(inbound.session_key.clone(), inbound.channel.clone(), inbound.chat_id.clone(), text)
                    .await
            }
            ArbiterAction::Start(text) => {
                self.start_run(inbound.session_key.clone(), inbound.channel.clone(), inbound.chat_id.clone(), text)
                    .await
            }
        }
    }

    /// Cancel the in-flight run for (session, channel), if any.
    pub async fn stop(&self, session_key: &str, channel: &str) -> bool {
        let key = run_key(session_key, channel);
        if let Some(handle) = self.runs.lock().await.remove(&key) {
            if let Some(cancel_tx) = handle.cancel_tx {
                let _ = cancel_tx.send(());
            }
            true
        } else {
            false
        }
    }

    async fn start_run(&self, session_key: String, channel: String, chat_id: String, text: String) -> Ack {
        let permit = match self.lanes.try_acquire(Lane::Session) {
            Ok(permit) => permit,
            Err(err) => {
                warn!(session_key = %session_key, "assistant: session lane saturated: {err}");
                self.arbiter.mark_idle(&session_key, &channel).await;
                return Ack::Dropped("session lane at capacity".to_string());
            }
        };

        let agent = self.get_or_build_agent(&session_key).await;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (steer_tx, steer_rx) = mpsc::unbounded_channel();
        let token = self.sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        self.runs.lock().await.insert(
            run_key(&session_key, &channel),
            RunHandle { cancel_tx: Some(cancel_tx), steer_tx: Some(steer_tx), token },
        );

        let this_bus = Arc::clone(&self.bus);
        let this_arbiter = Arc::clone(&self.arbiter);
        let this_channel_adapter = Arc::clone(&self.channel_adapter);
        let this_runs = Arc::clone(&self.runs);
        let streamer_cfg = self.streamer_cfg;

        tokio::spawn(async move {
            let _permit = permit;
            let mut cancel_rx = cancel_rx;
            let mut steer_rx = Some(steer_rx);
            let mut text = text;

            this_channel_adapter.send_typing(&chat_id, true).await;
            loop {
                let sequence = Arc::new(std::sync::atomic::AtomicU64::new(0));
                let (tx, rx) = mpsc::channel::<AgentEvent>(64);
                let drain = tokio::spawn(drain_events(
                    rx,
                    Arc::clone(&this_bus),
                    Arc::clone(&this_channel_adapter),
                    chat_id.clone(),
                    session_key.clone(),
                    sequence,
                    streamer_cfg,
                ));

                let result = {
                    let mut agent = agent.lock().await;
                    agent.submit_with_cancel(&text, tx, cancel_rx, steer_rx.take()).await
                };
                let _ = drain.await;
                if let Err(err) = result {
                    warn!(session_key = %session_key, "assistant: run failed: {err}");
                    break;
                }

                // Drain any followups queued while this turn was running
                // before releasing the lane — each gets its own cancel
                // channel since the prior one is already consumed.
                match this_arbiter.next_followup(&session_key, &channel).await {
                    Some(next) => {
                        text = next;
                        let (next_cancel_tx, next_cancel_rx) = oneshot::channel();
                        if let Some(handle) = this_runs.lock().await.get_mut(&run_key(&session_key, &channel)) {
                            handle.cancel_tx = Some(next_cancel_tx);
                        }
                        cancel_rx = next_cancel_rx;
                    }
                    None => break,
                }
            }

            this_channel_adapter.send_typing(&chat_id, false).await;
            this_arbiter.mark_idle(&session_key, &channel).await;
            let key = run_key(&session_key, &channel);
            let mut runs = this_runs.lock().await;
            if runs.get(&key).map(|h| h.token) == Some(token) {
                runs.remove(&key);
            }
        });

        Ack::Accepted
    }

    async fn get_or_build_agent(&self, session_key: &str) -> Arc<Mutex<Agent>> {
        let mut agents = self.agents.lock().await;
        if let Some(agent) = agents.get(session_key) {
            return Arc::clone(agent);
        }
        let built = AgentBuilder::new(Arc::clone(&self.config))
            .with_runtime_context((self.runtime_ctx_factory)())
            .build(
                AgentMode::Agent,
                Arc::clone(&self.model),
                ToolSetProfile::Full {
                    question_tx: None,
                    todos: Arc::new(Mutex::new(Vec::new())),
                    task_depth: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                },
            )
            .with_hooks(Arc::clone(&self.hooks));
        let wrapped = Arc::new(Mutex::new(built));
        agents.insert(session_key.to_string(), Arc::clone(&wrapped));
        wrapped
    }
}

/// Drains one AgentRun's events: republishes each onto the [`EventBus`] and
/// feeds text deltas through a [`BlockStreamer`] for progressive delivery.
/// Runs until the sender side closes (the run finished or aborted).
async fn drain_events(
    mut rx: mpsc::Receiver<AgentEvent>,
    bus: Arc<EventBus>,
    channel_adapter: Arc<dyn ChannelAdapter>,
    chat_id: String,
    session_key: String,
    sequence: Arc<std::sync::atomic::AtomicU64>,
    streamer_cfg: BlockStreamerConfig,
) {
    let mut streamer = BlockStreamer::new(streamer_cfg);
    let mut accumulated = String::new();

    while let Some(event) = rx.recv().await {
        if let AgentEvent::TextDelta(delta) = &event {
            accumulated.push_str(delta);
            if let Some(chunk) = streamer.push(delta) {
                channel_adapter.send(&chat_id, &chunk).await;
            }
        }
        let kind = classify_agent_event(&event, &accumulated);
        let seq = sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        bus.publish(BusEvent { session_key: session_key.clone(), sequence: seq, kind });
    }

    if let Some(chunk) = streamer.finish() {
        channel_adapter.send(&chat_id, &chunk).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex as TMutex;

    struct RecordingChannel {
        sent: TMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingChannel {
        async fn send(&self, _chat_id: &str, chunk: &str) {
            self.sent.lock().await.push(chunk.to_string());
        }
        async fn send_typing(&self, _chat_id: &str, _typing: bool) {}
    }

    struct DenyAll;
    impl AccessPolicy for DenyAll {
        fn check(&self, _inbound: &Inbound) -> PolicyDecision {
            PolicyDecision::Block("blocked in test".to_string())
        }
    }

    fn inbound(session: &str, msg_id: &str, text: &str) -> Inbound {
        Inbound {
            session_key: session.to_string(),
            channel: "test".to_string(),
            chat_id: "chat-1".to_string(),
            message_id: msg_id.to_string(),
            text: text.to_string(),
        }
    }

    fn test_assistant(channel_adapter: Arc<dyn ChannelAdapter>) -> Assistant {
        let config = Arc::new(Config::default());
        let model: Arc<dyn ModelProvider> =
            Arc::new(sven_model::ScriptedMockProvider::always_text("hi there"));
        Assistant::new(
            config,
            model,
            Arc::new(RuntimeContext::empty),
            channel_adapter,
        )
    }

    #[tokio::test]
    async fn policy_block_short_circuits_before_the_arbiter() {
        let channel_adapter: Arc<dyn ChannelAdapter> =
            Arc::new(RecordingChannel { sent: TMutex::new(Vec::new()) });
        let assistant = test_assistant(channel_adapter).with_policy(Arc::new(DenyAll));
        let ack = assistant.submit(inbound("s1", "m1", "hello")).await;
        assert!(matches!(ack, Ack::Rejected(_)));
    }

    #[tokio::test]
    async fn first_message_is_accepted_and_runs() {
        let channel_adapter: Arc<dyn ChannelAdapter> =
            Arc::new(RecordingChannel { sent: TMutex::new(Vec::new()) });
        let assistant = test_assistant(channel_adapter);
        let ack = assistant.submit(inbound("s1", "m1", "hello")).await;
        assert_eq!(ack, Ack::Accepted);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_dropped() {
        let channel_adapter: Arc<dyn ChannelAdapter> =
            Arc::new(RecordingChannel { sent: TMutex::new(Vec::new()) });
        let assistant = test_assistant(channel_adapter);
        assistant.submit(inbound("s1", "m1", "hello")).await;
        let ack = assistant.submit(inbound("s1", "m1", "hello")).await;
        assert!(matches!(ack, Ack::Dropped(_)));
    }

    #[tokio::test]
    async fn stop_with_no_active_run_returns_false() {
        let channel_adapter: Arc<dyn ChannelAdapter> =
            Arc::new(RecordingChannel { sent: TMutex::new(Vec::new()) });
        let assistant = test_assistant(channel_adapter);
        assert!(!assistant.stop("no-such-session", "test").await);
    }

    #[tokio::test]
    async fn repeated_lookups_for_the_same_session_reuse_one_agent() {
        let channel_adapter: Arc<dyn ChannelAdapter> =
            Arc::new(RecordingChannel { sent: TMutex::new(Vec::new()) });
        let assistant = test_assistant(channel_adapter);
        let a1 = assistant.get_or_build_agent("s1").await;
        let a2 = assistant.get_or_build_agent("s1").await;
        assert!(Arc::ptr_eq(&a1, &a2));
    }
}
