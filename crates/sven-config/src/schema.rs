// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent_loop: AgentLoopConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    #[serde(default)]
    pub tool_executor: ToolExecutorConfig,
    #[serde(default)]
    pub lanes: LaneConfig,
    #[serde(default)]
    pub queue_arbiter: QueueArbiterConfig,
    #[serde(default)]
    pub prompt_composer: PromptComposerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider configurations. Define custom endpoints, local models,
    /// or additional accounts here and reference them by name.
    ///
    /// ```yaml
    /// providers:
    ///   my_ollama:
    ///     provider: openai
    ///     base_url: http://localhost:11434/v1
    ///     name: llama3.2
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

/// Provider endpoint/credential configuration. Restart-only: unlike the
/// rest of `Config`, a running process never hot-reloads these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "openai" | "mock".
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override. Useful for local proxies or self-hosted endpoints.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: Option<f32>,
    /// Attach an explicit cache-control marker to the system message, where
    /// the provider supports prompt caching.
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,
    /// Path to YAML mock-responses file (used when provider = "mock").
    pub mock_responses_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-1".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            cache_system_prompt: true,
            mock_responses_file: None,
        }
    }
}

fn default_max_turns() -> u32 {
    25
}
fn default_turn_timeout_secs() -> u64 {
    300
}
fn default_max_continuations() -> u32 {
    2
}
fn default_max_compaction_attempts() -> u32 {
    3
}
fn default_reflection_interval() -> u32 {
    8
}
fn default_context_prune_soft_turns() -> u32 {
    4
}

/// Configuration for the main LLM/tool round-trip state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Maximum number of LLM turns in a single run before the loop either
    /// auto-continues (subject to `max_continuations`) or terminates.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Wall-clock budget for a single LLM turn.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    /// How many times a run may auto-continue after exhausting `max_turns`
    /// while the model still has pending tool calls.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
    /// Inject a reflection prompt every Nth turn.
    #[serde(default = "default_true")]
    pub reflection_enabled: bool,
    #[serde(default = "default_reflection_interval")]
    pub reflection_interval: u32,
    /// Attempts to recover from a context-overflow error via compaction
    /// before the run terminates with a fatal error.
    #[serde(default = "default_max_compaction_attempts")]
    pub max_compaction_attempts: u32,
    /// Turns-old threshold above which a stored tool result is soft-trimmed
    /// (summarised) during the per-turn context-pruning pass. Hard-trim
    /// (removed entirely) happens at `2 * context_prune_soft_turns`.
    #[serde(default = "default_context_prune_soft_turns")]
    pub context_prune_soft_turns: u32,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            turn_timeout_secs: default_turn_timeout_secs(),
            max_continuations: default_max_continuations(),
            reflection_enabled: true,
            reflection_interval: default_reflection_interval(),
            max_compaction_attempts: default_max_compaction_attempts(),
            context_prune_soft_turns: default_context_prune_soft_turns(),
        }
    }
}

fn default_compaction_threshold() -> f32 {
    0.80
}
fn default_compaction_keep_ratio() -> f32 {
    0.25
}
fn default_max_messages() -> usize {
    400
}
fn default_session_ttl_secs() -> u64 {
    86_400 * 7
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Summarize,
    Truncate,
    Sliding,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Summarize => write!(f, "summarize"),
            CompactionStrategy::Truncate => write!(f, "truncate"),
            CompactionStrategy::Sliding => write!(f, "sliding"),
        }
    }
}

/// Configuration for the session store: history retention and compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    /// Hard cap on stored messages per session; any append beyond it
    /// triggers synchronous compaction.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Fraction of `max_messages` at which *preventive* (background)
    /// compaction is scheduled.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Fraction of history kept verbatim after a `summarize` compaction.
    #[serde(default = "default_compaction_keep_ratio")]
    pub compaction_keep_ratio: f32,
    /// Sessions idle longer than this are eligible for `prune()`.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            compaction_threshold: default_compaction_threshold(),
            compaction_strategy: CompactionStrategy::default(),
            compaction_keep_ratio: default_compaction_keep_ratio(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

fn default_max_parallel() -> usize {
    5
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_tool_result_char_cap() -> usize {
    2000
}

/// Configuration for tool dispatch: parallelism, timeouts, and truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutorConfig {
    /// Maximum number of parallel-safe tool calls in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-call timeout, overridable per tool.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Character cap applied to a tool result before it enters the session.
    #[serde(default = "default_tool_result_char_cap")]
    pub tool_result_char_cap: usize,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            tool_timeout_secs: default_tool_timeout_secs(),
            tool_result_char_cap: default_tool_result_char_cap(),
        }
    }
}

fn default_session_lane() -> usize {
    10
}
fn default_cron_lane() -> usize {
    3
}
fn default_subagent_lane() -> usize {
    4
}

/// Per-lane concurrency limits for the [`LaneScheduler`](../sven_scheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default = "default_session_lane")]
    pub session: usize,
    #[serde(default = "default_cron_lane")]
    pub cron: usize,
    #[serde(default = "default_subagent_lane")]
    pub subagent: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            session: default_session_lane(),
            cron: default_cron_lane(),
            subagent: default_subagent_lane(),
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    5
}
fn default_followup_queue_cap() -> usize {
    20
}
fn default_debounce_idle_ms() -> u64 {
    0
}
fn default_debounce_busy_new_ms() -> u64 {
    200
}
fn default_debounce_busy_followup_ms() -> u64 {
    500
}

/// Queue mode selecting how an inbound message is handled while a session's
/// agent run is already busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    #[default]
    Collect,
    Steer,
    Followup,
    Interrupt,
    SteerBacklog,
}

/// Configuration for per-session inbound-message arbitration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueArbiterConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_followup_queue_cap")]
    pub followup_queue_cap: usize,
    #[serde(default = "default_debounce_idle_ms")]
    pub debounce_idle_ms: u64,
    #[serde(default = "default_debounce_busy_new_ms")]
    pub debounce_busy_new_ms: u64,
    #[serde(default = "default_debounce_busy_followup_ms")]
    pub debounce_busy_followup_ms: u64,
    #[serde(default)]
    pub default_mode: QueueMode,
}

impl Default for QueueArbiterConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            followup_queue_cap: default_followup_queue_cap(),
            debounce_idle_ms: default_debounce_idle_ms(),
            debounce_busy_new_ms: default_debounce_busy_new_ms(),
            debounce_busy_followup_ms: default_debounce_busy_followup_ms(),
            default_mode: QueueMode::default(),
        }
    }
}

fn default_budget_fraction() -> f32 {
    0.40
}
fn default_layer_cache_ttl_secs() -> u64 {
    60
}

/// Configuration for the layered system-prompt builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptComposerConfig {
    /// Maximum fraction of the model's context budget the composed system
    /// prompt may consume before compressible/droppable layers are trimmed.
    #[serde(default = "default_budget_fraction")]
    pub budget_fraction: f32,
    /// TTL for the lazily-cached Memory and Skills layers.
    #[serde(default = "default_layer_cache_ttl_secs")]
    pub layer_cache_ttl_secs: u64,
}

impl Default for PromptComposerConfig {
    fn default() -> Self {
        Self {
            budget_fraction: default_budget_fraction(),
            layer_cache_ttl_secs: default_layer_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve shell commands matching these glob patterns.
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns outright.
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call (mirrors
    /// `tool_executor.tool_timeout_secs`; kept separate so tool-policy
    /// config can be supplied independently of dispatch config).
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec!["ls *".into(), "rg *".into(), "git status".into()],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Pure research - read-only tools, no writes.
    Research,
    /// Generate a structured plan, no code changes.
    Plan,
    /// Full agent with read/write tools.
    Agent,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Research => write!(f, "research"),
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Agent => write!(f, "agent"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
