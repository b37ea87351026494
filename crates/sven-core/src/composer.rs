// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Layered system-prompt assembly with priority-ordered budget enforcement
//! and lazy, TTL-cached producers for the layers that are expensive or
//! external (memory recall, skill discovery).
//!
//! The composer itself never knows *what* a layer's content means — it only
//! owns priority ordering, trim policy, character-budget accounting, and
//! cache freshness. Content production is an opaque `Fn() -> String`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

/// How a layer may be shrunk when the composed prompt exceeds its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimPolicy {
    /// Always kept verbatim, never touched by budget enforcement.
    Never,
    /// Kept verbatim; exempt from trimming because it's already small.
    NeverSmall,
    /// May be shortened (keeps the head, drops the tail) to make room.
    Compressible,
    /// May be dropped entirely.
    Droppable,
    /// May be shortened from the front, keeping the most recent content.
    TrimmedByAge,
}

/// Identity and budget policy for one prompt layer. Lower `priority` means
/// more important — the composer only ever trims layers with
/// `priority >= MIN_TRIMMABLE_PRIORITY`, starting from the highest priority
/// number (least important) first.
#[derive(Debug, Clone, Copy)]
pub struct LayerSpec {
    pub name: &'static str,
    pub priority: u32,
    pub trim: TrimPolicy,
}

/// Layers below this priority are never touched by budget enforcement,
/// regardless of their trim policy.
pub const MIN_TRIMMABLE_PRIORITY: u32 = 20;

/// A lazily-computed, TTL-cached layer value. On a cache miss or stale read,
/// the previous value (or an empty string on the very first call) is
/// returned immediately, and a background refresh is kicked off — callers
/// are never blocked on the producer.
pub struct LazyCache {
    producer: Arc<dyn Fn() -> String + Send + Sync>,
    ttl: Duration,
    state: StdMutex<CacheState>,
    refreshing: AtomicBool,
}

struct CacheState {
    value: String,
    fetched_at: Option<Instant>,
}

impl LazyCache {
    pub fn new(ttl: Duration, producer: Arc<dyn Fn() -> String + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            producer,
            ttl,
            state: StdMutex::new(CacheState { value: String::new(), fetched_at: None }),
            refreshing: AtomicBool::new(false),
        })
    }

    /// Return the current value, kicking off a background refresh if the
    /// cache is stale (or empty) and no refresh is already in flight.
    pub fn get(self: &Arc<Self>) -> String {
        let (value, needs_refresh) = {
            let state = self.state.lock().unwrap();
            let stale = state
                .fetched_at
                .map(|t| t.elapsed() >= self.ttl)
                .unwrap_or(true);
            (state.value.clone(), stale)
        };

        if needs_refresh && !self.refreshing.swap(true, Ordering::SeqCst) {
            let this = self.clone();
            tokio::spawn(async move {
                let fresh = (this.producer)();
                let mut state = this.state.lock().unwrap();
                state.value = fresh;
                state.fetched_at = Some(Instant::now());
                this.refreshing.store(false, Ordering::SeqCst);
            });
        }

        value
    }
}

/// Source of a layer's rendered content.
pub enum LayerContent {
    /// Already-rendered, static for this composition.
    Static(String),
    /// Lazily produced and cached across compositions.
    Cached(Arc<LazyCache>),
}

/// Assembles named, prioritized layers into one system prompt, trimming or
/// dropping lower-priority layers until the total fits within a fraction of
/// the model's context budget.
pub struct PromptComposer {
    /// Fraction of the model's context window the composed prompt may use.
    pub budget_fraction: f32,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self { budget_fraction: 0.40 }
    }
}

impl PromptComposer {
    pub fn new(budget_fraction: f32) -> Self {
        Self { budget_fraction }
    }

    /// Approximate tokens for `s` using the same chars/4 heuristic as
    /// [`crate::Session::push`]'s token accounting.
    fn approx_tokens(s: &str) -> usize {
        (s.len() as f32 / 4.0).ceil() as usize
    }

    /// Render `layers` (name → spec/content pairs) into one prompt, enforcing
    /// the context budget. `max_context_tokens` is the model's full context
    /// window; the composed prompt may use at most `budget_fraction` of it.
    ///
    /// Layers are concatenated in ascending priority order (lowest number
    /// first). When the total exceeds budget, layers with
    /// `priority >= MIN_TRIMMABLE_PRIORITY` are compressed or dropped in
    /// descending priority order (least important first) until the budget is
    /// met or no further reduction is possible.
    pub fn compose(&self, mut layers: Vec<(LayerSpec, LayerContent)>, max_context_tokens: usize) -> String {
        let budget_tokens = (max_context_tokens as f32 * self.budget_fraction) as usize;

        let mut rendered: Vec<(LayerSpec, String)> = layers
            .drain(..)
            .map(|(spec, content)| {
                let text = match content {
                    LayerContent::Static(s) => s,
                    LayerContent::Cached(cache) => cache.get(),
                };
                (spec, text)
            })
            .filter(|(_, text)| !text.is_empty())
            .collect();

        let total = |r: &[(LayerSpec, String)]| -> usize {
            r.iter().map(|(_, t)| Self::approx_tokens(t)).sum()
        };

        if total(&rendered) > budget_tokens {
            let mut trim_order: Vec<usize> = (0..rendered.len())
                .filter(|&i| rendered[i].0.priority >= MIN_TRIMMABLE_PRIORITY)
                .collect();
            trim_order.sort_by_key(|&i| std::cmp::Reverse(rendered[i].0.priority));

            for idx in trim_order {
                if total(&rendered) <= budget_tokens {
                    break;
                }
                let (spec, text) = &mut rendered[idx];
                match spec.trim {
                    TrimPolicy::Never | TrimPolicy::NeverSmall => {}
                    TrimPolicy::Droppable => text.clear(),
                    TrimPolicy::Compressible => {
                        let keep = text.len() / 2;
                        text.truncate(floor_char_boundary(text, keep));
                        text.push_str("\n…[truncated]");
                    }
                    TrimPolicy::TrimmedByAge => {
                        let drop = text.len() / 2;
                        let start = floor_char_boundary(text, drop);
                        *text = format!("…[older context trimmed]\n{}", &text[start..]);
                    }
                }
            }
            rendered.retain(|(_, t)| !t.is_empty());
        }

        rendered.sort_by_key(|(spec, _)| spec.priority);
        rendered
            .into_iter()
            .map(|(_, t)| t)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Largest byte index `<= idx` that lies on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
