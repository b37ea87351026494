// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::sync::Mutex;

use regex::Regex;
use sven_config::ToolsConfig;
use tokio::sync::oneshot;

/// Per-tool approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Always run without asking
    Auto,
    /// Ask user before each invocation
    Ask,
    /// Never run; return an error
    Deny,
}

/// Policy engine that maps a tool call to an approval decision.
#[derive(Debug)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            auto_patterns: compile(&cfg.auto_approve_patterns),
            deny_patterns: compile(&cfg.deny_patterns),
        }
    }

    /// Decide whether a tool call (identified by its command string) should
    /// run automatically, prompt the user, or be denied.
    pub fn decide(&self, command: &str) -> ApprovalPolicy {
        for re in &self.deny_patterns {
            if re.is_match(command) {
                return ApprovalPolicy::Deny;
            }
        }
        for re in &self.auto_patterns {
            if re.is_match(command) {
                return ApprovalPolicy::Auto;
            }
        }
        ApprovalPolicy::Ask
    }
}

/// Outcome of evaluating a tool call against a [`ToolGuard`].
///
/// Extends [`ApprovalPolicy`]'s three states with `Log`: a call that is
/// allowed to run but whose invocation is recorded for audit, distinct from
/// the silent `Allow` path. The agent loop matches on this, not on
/// `ApprovalPolicy`, whenever it needs the out-of-band approval flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Run immediately, no record kept beyond normal tracing.
    Allow,
    /// Run immediately, but emit an audit-log entry first.
    Log,
    /// Suspend the tool call and wait for an external approval decision.
    RequireApproval,
    /// Refuse to run; return an error to the model without invoking the tool.
    Deny,
}

/// One-shot approval request raised by [`ToolGuard::check`] when a call needs
/// [`GuardDecision::RequireApproval`].
///
/// The agent loop surfaces `question` to the channel adapter (chat UI, CLI
/// prompt) and sends the user's answer back on `reply`. Dropping the
/// `ToolApprovalRequest` without sending is treated as a denial by the
/// receiving end.
pub struct ToolApprovalRequest {
    pub question: String,
    pub reply: oneshot::Sender<bool>,
}

/// A token that pre-approves a command pattern for the remainder of a
/// session, so the user is not asked the same question on every turn.
///
/// Tokens are scoped to the session that earned them; [`ToolGuard`] does not
/// persist them across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrustToken(pub String);

/// Wraps [`ToolPolicy`] with the async out-of-band approval flow and a
/// session-scoped set of standing trust grants.
///
/// `Ask`-policy calls normally resolve to [`GuardDecision::RequireApproval`];
/// once the caller records a trust grant for that exact command (via
/// [`Self::trust`]), subsequent identical calls resolve to `Allow` without
/// re-prompting.
pub struct ToolGuard {
    policy: ToolPolicy,
    trusted: Mutex<HashSet<TrustToken>>,
}

impl ToolGuard {
    pub fn new(policy: ToolPolicy) -> Self {
        Self { policy, trusted: Mutex::new(HashSet::new()) }
    }

    pub fn from_config(cfg: &ToolsConfig) -> Self {
        Self::new(ToolPolicy::from_config(cfg))
    }

    /// Evaluate a tool call's command string against policy and standing
    /// trust grants.
    ///
    /// Policy is checked first: a `Deny` match is terminal and cannot be
    /// bypassed by an earlier trust grant. Only `Ask` results consult the
    /// trust cache.
    pub fn check(&self, command: &str) -> GuardDecision {
        match self.policy.decide(command) {
            ApprovalPolicy::Auto => GuardDecision::Allow,
            ApprovalPolicy::Deny => GuardDecision::Deny,
            ApprovalPolicy::Ask => {
                if self.trusted.lock().unwrap().contains(&TrustToken(command.to_string())) {
                    GuardDecision::Allow
                } else {
                    GuardDecision::RequireApproval
                }
            }
        }
    }

    /// Record a standing trust grant for `command` so future `check` calls
    /// for the identical command string resolve to `Allow`.
    pub fn trust(&self, command: &str) {
        self.trusted.lock().unwrap().insert(TrustToken(command.to_string()));
    }

    pub fn is_trusted(&self, command: &str) -> bool {
        self.trusted.lock().unwrap().contains(&TrustToken(command.to_string()))
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
