// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fallback chain across model providers with per-model cooldowns.

use std::time::{Duration, Instant};

use crate::ModelProvider;

struct Entry {
    provider: Box<dyn ModelProvider>,
    cooldown_until: Option<Instant>,
}

/// A list of `(model, cooldownUntil)` pairs. [`Self::current`] returns the
/// first provider not presently in cooldown; [`Self::mark_failed`] rotates
/// past a provider for `cooldown` before it is tried again.
pub struct FailoverChain {
    entries: Vec<Entry>,
}

impl FailoverChain {
    pub fn new(providers: Vec<Box<dyn ModelProvider>>) -> Self {
        Self {
            entries: providers
                .into_iter()
                .map(|provider| Entry { provider, cooldown_until: None })
                .collect(),
        }
    }

    /// The first provider currently out of cooldown, or `None` if every
    /// provider in the chain is cooling down.
    pub fn current(&self) -> Option<&dyn ModelProvider> {
        let now = Instant::now();
        self.entries
            .iter()
            .find(|e| e.cooldown_until.map(|until| now >= until).unwrap_or(true))
            .map(|e| e.provider.as_ref())
    }

    /// Put the named provider into cooldown so [`Self::current`] skips it
    /// until `cooldown` elapses.
    pub fn mark_failed(&mut self, provider_name: &str, cooldown: Duration) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.provider.name() == provider_name) {
            e.cooldown_until = Some(Instant::now() + cooldown);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
