// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Progressive delivery: buffers model text deltas and flushes chunks at
//! natural boundaries (paragraph, sentence, list item, then a hard cut),
//! so a channel sees readable pieces instead of one delta at a time or one
//! giant message at the end.

use std::time::{Duration, Instant};

/// Tuning knobs, mirroring SPEC_FULL.md's "min_chars / max_chars / idle_ms".
#[derive(Debug, Clone, Copy)]
pub struct BlockStreamerConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    pub idle: Duration,
}

impl Default for BlockStreamerConfig {
    fn default() -> Self {
        Self { min_chars: 80, max_chars: 1200, idle: Duration::from_millis(900) }
    }
}

/// Buffers streamed text and decides when enough has accumulated to flush a
/// chunk. Call [`Self::push`] for every delta and [`Self::poll_idle`] on a
/// timer tick; both return any chunk that should be sent now.
pub struct BlockStreamer {
    cfg: BlockStreamerConfig,
    buffer: String,
    in_fence: bool,
    last_push: Instant,
}

impl BlockStreamer {
    pub fn new(cfg: BlockStreamerConfig) -> Self {
        Self { cfg, buffer: String::new(), in_fence: false, last_push: Instant::now() }
    }

    /// Feed a new delta. Returns a chunk to flush now, if a boundary and the
    /// min-chars floor were both reached, or the buffer hit `max_chars`.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.last_push = Instant::now();
        self.buffer.push_str(delta);
        track_fences(&mut self.in_fence, delta);

        if self.buffer.chars().count() >= self.cfg.max_chars {
            return Some(self.take_prefix(self.cfg.max_chars));
        }
        if self.in_fence {
            // Never split inside a fenced code block.
            return None;
        }
        if self.buffer.chars().count() < self.cfg.min_chars {
            return None;
        }
        find_boundary(&self.buffer).map(|at| self.take_prefix(at))
    }

    /// Call on a timer; if nothing has arrived for `idle` and the buffer is
    /// non-empty, flush whatever's there regardless of boundary/min_chars.
    pub fn poll_idle(&mut self) -> Option<String> {
        if self.buffer.is_empty() || self.in_fence {
            return None;
        }
        if self.last_push.elapsed() >= self.cfg.idle {
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    /// Flush whatever remains (end of stream).
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn take_prefix(&mut self, at: usize) -> String {
        let byte_at = self.buffer.char_indices().nth(at).map(|(i, _)| i).unwrap_or(self.buffer.len());
        let rest = self.buffer.split_off(byte_at);
        std::mem::replace(&mut self.buffer, rest)
    }
}

/// Track whether `delta` has left us inside a fenced code block, counting
/// ``` occurrences seen so far across pushes.
fn track_fences(in_fence: &mut bool, delta: &str) {
    let fences = delta.matches("```").count();
    if fences % 2 == 1 {
        *in_fence = !*in_fence;
    }
}

/// Preferred boundary search: paragraph break, then sentence end, then list
/// item start, in that priority order — the first one found past `min_chars`
/// from the start of the buffer wins. Returns a char-index cut point.
fn find_boundary(buf: &str) -> Option<usize> {
    let chars: Vec<char> = buf.chars().collect();

    if let Some(idx) = find_paragraph_break(&chars) {
        return Some(idx);
    }
    if let Some(idx) = find_sentence_end(&chars) {
        return Some(idx);
    }
    find_list_item(&chars)
}

fn find_paragraph_break(chars: &[char]) -> Option<usize> {
    for i in 0..chars.len().saturating_sub(1) {
        if chars[i] == '\n' && chars[i + 1] == '\n' {
            return Some(i + 2);
        }
    }
    None
}

fn find_sentence_end(chars: &[char]) -> Option<usize> {
    let mut best = None;
    for i in 0..chars.len() {
        if matches!(chars[i], '.' | '!' | '?') {
            let followed_by_space_or_end =
                chars.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(true);
            if followed_by_space_or_end {
                best = Some(i + 1);
            }
        }
    }
    best
}

fn find_list_item(chars: &[char]) -> Option<usize> {
    for i in 0..chars.len().saturating_sub(1) {
        if chars[i] == '\n' && (chars[i + 1] == '-' || chars[i + 1] == '*') {
            return Some(i + 1);
        }
    }
    None
}
