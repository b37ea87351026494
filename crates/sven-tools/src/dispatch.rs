// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Batch dispatch: turns a model's tool-call batch into a set of
//! [`ToolOutput`]s, honoring each tool's [`ToolClassification`] and the
//! [`ToolGuard`]'s approval decision.
//!
//! Dispatch proceeds in two passes over the batch, in the order the model
//! emitted the calls:
//! 1. Every `Parallel`-classified call whose guard decision is `Allow` or
//!    `Log` runs concurrently via `futures::future::join_all`.
//! 2. Every `Sequential`-classified call, and every call that needs
//!    approval, runs one at a time in call order. A `RequireApproval` call
//!    blocks on `approve` before running; a `Deny` never runs.
//!
//! This matches the rest of the batch running even when one call is denied
//! or awaiting approval — the executor does not fail the whole turn for one
//! bad call.

use futures::future::join_all;

use crate::policy::GuardDecision;
use crate::registry::ToolRegistry;
use crate::tool::{ToolCall, ToolClassification, ToolOutput};
use crate::ToolGuard;

/// Per-call result of [`dispatch_batch`], tagging *why* the call ended up
/// with its [`ToolOutput`] so callers (and tests) can distinguish a denied
/// call from one that actually ran.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The tool executed; `output.is_error` reflects the tool's own result.
    Completed(ToolOutput),
    /// The guard denied the call outright; the tool never ran.
    Denied(ToolOutput),
    /// Approval was requested and refused; the tool never ran.
    ApprovalRefused(ToolOutput),
}

impl DispatchOutcome {
    pub fn into_output(self) -> ToolOutput {
        match self {
            Self::Completed(o) | Self::Denied(o) | Self::ApprovalRefused(o) => o,
        }
    }
}

/// Dispatch a batch of tool calls against `registry`, gated by `guard`.
///
/// `approve` is invoked once per call that resolves to
/// [`GuardDecision::RequireApproval`], with the tool name and raw argument
/// JSON rendered as a string; it must resolve to `true` to let the call
/// proceed. Calls requiring approval are never batched in parallel with
/// anything else, since the approval round-trip may take arbitrarily long.
pub async fn dispatch_batch<F, Fut>(
    registry: &ToolRegistry,
    guard: &ToolGuard,
    calls: Vec<ToolCall>,
    approve: F,
) -> Vec<DispatchOutcome>
where
    F: Fn(&ToolCall) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let mut outcomes: Vec<Option<DispatchOutcome>> = (0..calls.len()).map(|_| None).collect();
    let mut parallel_indices = Vec::new();
    let mut sequential_indices = Vec::new();

    for (i, call) in calls.iter().enumerate() {
        let command = render_command(call);
        match guard.check(&command) {
            GuardDecision::Deny => {
                outcomes[i] = Some(DispatchOutcome::Denied(ToolOutput::err(
                    &call.id,
                    format!("tool call denied by policy: {}", call.name),
                )));
            }
            GuardDecision::RequireApproval => sequential_indices.push(i),
            GuardDecision::Allow | GuardDecision::Log => {
                let classification = registry
                    .get(&call.name)
                    .map(|t| t.classification())
                    .unwrap_or_default();
                match classification {
                    ToolClassification::Parallel => parallel_indices.push(i),
                    ToolClassification::Sequential => sequential_indices.push(i),
                }
            }
        }
    }

    if !parallel_indices.is_empty() {
        let futures = parallel_indices.iter().map(|&i| registry.execute(&calls[i]));
        let results = join_all(futures).await;
        for (i, output) in parallel_indices.into_iter().zip(results) {
            outcomes[i] = Some(DispatchOutcome::Completed(output));
        }
    }

    for i in sequential_indices {
        let call = &calls[i];
        let command = render_command(call);
        let decision = guard.check(&command);
        let outcome = match decision {
            GuardDecision::Deny => DispatchOutcome::Denied(ToolOutput::err(
                &call.id,
                format!("tool call denied by policy: {}", call.name),
            )),
            GuardDecision::RequireApproval => {
                if approve(call).await {
                    DispatchOutcome::Completed(registry.execute(call).await)
                } else {
                    DispatchOutcome::ApprovalRefused(ToolOutput::err(
                        &call.id,
                        format!("approval refused for tool call: {}", call.name),
                    ))
                }
            }
            GuardDecision::Allow | GuardDecision::Log => {
                DispatchOutcome::Completed(registry.execute(call).await)
            }
        };
        outcomes[i] = Some(outcome);
    }

    outcomes.into_iter().map(|o| o.expect("every index assigned exactly once")).collect()
}

fn render_command(call: &ToolCall) -> String {
    format!("{} {}", call.name, call.args)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::policy::ApprovalPolicy;
    use crate::policy::ToolPolicy;
    use sven_config::ToolsConfig;

    struct EchoTool {
        name: &'static str,
        classification: ToolClassification,
    }

    #[async_trait]
    impl crate::Tool for EchoTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "echoes its input" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        fn classification(&self) -> ToolClassification { self.classification }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("ran:{}", call.name))
        }
    }

    fn registry_with(tools: Vec<EchoTool>) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for t in tools {
            reg.register(t);
        }
        reg
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall { id: id.into(), name: name.into(), args: json!({}) }
    }

    fn never_approve(_: &ToolCall) -> std::future::Ready<bool> {
        std::future::ready(false)
    }

    fn always_approve(_: &ToolCall) -> std::future::Ready<bool> {
        std::future::ready(true)
    }

    #[tokio::test]
    async fn parallel_and_sequential_calls_both_run() {
        let reg = registry_with(vec![
            EchoTool { name: "a", classification: ToolClassification::Parallel },
            EchoTool { name: "b", classification: ToolClassification::Sequential },
        ]);
        let guard = ToolGuard::new(ToolPolicy::from_config(&ToolsConfig::default()));
        let calls = vec![call("1", "a"), call("2", "b")];
        let results = dispatch_batch(&reg, &guard, calls, never_approve).await;
        assert_eq!(results.len(), 2);
        for r in results {
            match r {
                DispatchOutcome::Completed(o) => assert!(!o.is_error),
                other => panic!("expected Completed, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn denied_call_never_executes() {
        let reg = registry_with(vec![EchoTool { name: "rm", classification: ToolClassification::Sequential }]);
        let guard = ToolGuard::new(ToolPolicy::from_config(&ToolsConfig {
            deny_patterns: vec!["rm *".into()],
            ..ToolsConfig::default()
        }));
        let calls = vec![call("1", "rm")];
        let results = dispatch_batch(&reg, &guard, calls, never_approve).await;
        match &results[0] {
            DispatchOutcome::Denied(o) => assert!(o.is_error),
            other => panic!("expected Denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approval_required_runs_only_when_approved() {
        let reg = registry_with(vec![EchoTool { name: "git_push", classification: ToolClassification::Sequential }]);
        let guard = ToolGuard::new(ToolPolicy::from_config(&ToolsConfig::default()));
        let calls = vec![call("1", "git_push")];

        let refused = dispatch_batch(&reg, &guard, calls.clone(), never_approve).await;
        assert!(matches!(refused[0], DispatchOutcome::ApprovalRefused(_)));

        let approved = dispatch_batch(&reg, &guard, calls, always_approve).await;
        assert!(matches!(approved[0], DispatchOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn trust_grant_skips_future_approval_prompts() {
        let reg = registry_with(vec![EchoTool { name: "git_push", classification: ToolClassification::Sequential }]);
        let guard = ToolGuard::new(ToolPolicy::from_config(&ToolsConfig::default()));
        guard.trust("git_push {}");
        let calls = vec![call("1", "git_push")];
        let results = dispatch_batch(&reg, &guard, calls, never_approve).await;
        assert!(matches!(results[0], DispatchOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn batch_preserves_call_order_in_output() {
        let reg = registry_with(vec![
            EchoTool { name: "a", classification: ToolClassification::Sequential },
            EchoTool { name: "b", classification: ToolClassification::Sequential },
            EchoTool { name: "c", classification: ToolClassification::Sequential },
        ]);
        let guard = ToolGuard::new(ToolPolicy::from_config(&ToolsConfig::default()));
        let calls = vec![call("1", "a"), call("2", "b"), call("3", "c")];
        let results = dispatch_batch(&reg, &guard, calls, never_approve).await;
        let ids: Vec<String> = results
            .into_iter()
            .map(|o| o.into_output().call_id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }
}
