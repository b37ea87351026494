// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lifecycle dispatch for tool calls: `PreToolUse` can block a call or rewrite
//! its arguments before it runs; `PostToolUse` observes the result after.
//! Sync hooks run in priority order and can short-circuit; async hooks are
//! fire-and-forget with their own panic isolated away from the agent loop.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

/// Which lifecycle point a hook is being invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
}

/// What a hook is being told about the call in question.
///
/// `output` is `None` for `PreToolUse` (the call hasn't run yet) and `Some`
/// for `PostToolUse`.
#[derive(Debug, Clone)]
pub struct HookPayload {
    pub call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub output: Option<String>,
    pub is_error: Option<bool>,
}

/// The aggregate result of running every registered sync hook once.
#[derive(Debug, Clone, Default)]
pub struct HookDecision {
    /// Set once any hook in priority order votes to block the call.
    pub block: bool,
    /// The reason the blocking hook gave, if any.
    pub reason: Option<String>,
    /// Replacement arguments from the last hook that supplied one.
    pub modified_args: Option<Value>,
}

impl HookDecision {
    fn merge(&mut self, other: HookOutcome) {
        if let Some(args) = other.modified_args {
            self.modified_args = Some(args);
        }
        if other.block {
            self.block = true;
            self.reason = other.reason;
        }
    }
}

/// What a single sync hook returns from one invocation.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub block: bool,
    pub reason: Option<String>,
    pub modified_args: Option<Value>,
}

impl HookOutcome {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self { block: true, reason: Some(reason.into()), ..Default::default() }
    }

    pub fn rewrite(args: Value) -> Self {
        Self { modified_args: Some(args), ..Default::default() }
    }
}

/// A synchronous lifecycle hook, dispatched in priority order and able to
/// block a tool call or rewrite its arguments before it runs.
pub trait SyncHook: Send + Sync {
    fn name(&self) -> &str;

    /// Higher runs first. Ties broken by registration order.
    fn priority(&self) -> i32 {
        0
    }

    fn handle(&self, event: HookEvent, payload: &HookPayload) -> HookOutcome;
}

/// An asynchronous, fire-and-forget lifecycle hook — logging, metrics,
/// notifications. Never blocks the agent loop and never observes or affects
/// the outcome of the call it was told about.
#[async_trait::async_trait]
pub trait AsyncHook: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: HookEvent, payload: HookPayload);
}

/// Dispatches `PreToolUse`/`PostToolUse` events to registered hooks.
///
/// The registry is a copy-on-write list: `register_*` takes a write lock only
/// to swap in a new `Arc<Vec<_>>`; `dispatch`/`dispatch_async` clone the
/// current `Arc` under a read lock and then run against that snapshot,
/// unaffected by any registration that happens concurrently.
#[derive(Default)]
pub struct HookManager {
    sync_hooks: RwLock<Arc<Vec<Arc<dyn SyncHook>>>>,
    async_hooks: RwLock<Arc<Vec<Arc<dyn AsyncHook>>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            sync_hooks: RwLock::new(Arc::new(Vec::new())),
            async_hooks: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub async fn register_sync(&self, hook: Arc<dyn SyncHook>) {
        let mut guard = self.sync_hooks.write().await;
        let mut next = (**guard).clone();
        next.push(hook);
        next.sort_by_key(|h| std::cmp::Reverse(h.priority()));
        *guard = Arc::new(next);
    }

    pub async fn register_async(&self, hook: Arc<dyn AsyncHook>) {
        let mut guard = self.async_hooks.write().await;
        let mut next = (**guard).clone();
        next.push(hook);
        *guard = Arc::new(next);
    }

    /// Run every sync hook in priority order against a snapshot of the
    /// registry, short-circuiting as soon as one votes to block.
    pub async fn dispatch(&self, event: HookEvent, payload: &HookPayload) -> HookDecision {
        let snapshot = Arc::clone(&*self.sync_hooks.read().await);
        let mut decision = HookDecision::default();
        for hook in snapshot.iter() {
            let outcome = hook.handle(event, payload);
            let blocked = outcome.block;
            decision.merge(outcome);
            if blocked {
                break;
            }
        }
        decision
    }

    /// Fire every async hook without waiting for any of them; a panicking
    /// handler is caught and logged, never propagated. Requires `self` behind
    /// an `Arc` so the spawned task can outlive this call.
    pub fn dispatch_async(self: &Arc<Self>, event: HookEvent, payload: HookPayload) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let snapshot = Arc::clone(&*this.async_hooks.read().await);
            for hook in snapshot.iter() {
                let hook = Arc::clone(hook);
                let payload = payload.clone();
                let handle = tokio::spawn(async move { hook.handle(event, payload).await });
                if let Err(join_err) = handle.await {
                    if join_err.is_panic() {
                        warn!("async hook panicked: {join_err}");
                    }
                }
            }
        });
    }
}
