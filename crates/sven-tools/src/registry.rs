// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sven_config::AgentMode;

use crate::{error::ToolError, Tool, ToolCall, ToolOutput};

/// A tool schema – mirrors sven_model::ToolSchema but keeps tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Per-call wall-clock ceiling applied by [`Self::execute`]. `None` means
    /// no ceiling beyond whatever the individual tool enforces internally.
    tool_timeout: Option<Duration>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self)
// - Parallel tool execution is safe because tools are immutable after registration
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), tool_timeout: None }
    }

    /// Apply a per-call timeout to every tool executed through this registry.
    /// A call that exceeds `timeout` is aborted and reported as a tool error
    /// rather than left to hang the agent loop indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for ALL registered tools (mode-unfiltered).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        }).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas only for tools available in the given mode.
    pub fn schemas_for_mode(&self, mode: AgentMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Run `call` against the registered tool, isolating both a panic inside
    /// the tool and (when configured) a timeout, and always returning a
    /// [`ToolOutput`] — never propagating an `Err` to the agent loop. This is
    /// the boundary where the "tool panic" and "tool timeout" error-taxonomy
    /// Kinds become conversation data instead of a crashed task.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let tool = match self.tools.get(&call.name) {
            Some(tool) => tool.clone(),
            None => {
                return ToolOutput::err(&call.id, ToolError::NotFound(call.name.clone()).to_string());
            }
        };
        let call_owned = call.clone();
        let handle = tokio::spawn(async move { tool.execute(&call_owned).await });
        let abort_handle = handle.abort_handle();

        let join_result = match self.tool_timeout {
            Some(d) => match tokio::time::timeout(d, handle).await {
                Ok(joined) => joined,
                Err(_elapsed) => {
                    abort_handle.abort();
                    return ToolOutput::err(
                        &call.id,
                        ToolError::Timeout { name: call.name.clone(), timeout: d }.to_string(),
                    );
                }
            },
            None => handle.await,
        };

        match join_result {
            Ok(output) => output,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    // `panic!("literal")` carries a `&'static str` payload;
                    // `panic!("{}", x)` / `.expect(&fmt)` carry a `String`.
                    payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "tool task panicked".to_string())
                } else {
                    "tool task was cancelled".to_string()
                };
                ToolOutput::err(
                    &call.id,
                    ToolError::Panic { name: call.name.clone(), message }.to_string(),
                )
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn names_for_mode(&self, mode: AgentMode) -> Vec<String> {
        let mut names: Vec<String> = self.tools.values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
