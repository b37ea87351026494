// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Demo binary for the agent execution core.
//!
//! Channel adapters, the HTTP/WebSocket gateway, and the WebUI front-end are
//! out-of-scope external collaborators (see `SPEC_FULL.md` §1); this binary
//! exists only to drive the core end-to-end from a terminal: load config,
//! build one `Agent` via `AgentBuilder`, feed it a single prompt (arg or
//! stdin), and stream the reply to stdout.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use sven_bootstrap::{AgentBuilder, RuntimeContext, ToolSetProfile};
use sven_core::AgentEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let prompt = read_prompt().context("reading prompt")?;
    if prompt.trim().is_empty() {
        anyhow::bail!("usage: agentcore <prompt>  (or pipe a prompt on stdin)");
    }

    let config = Arc::new(sven_config::load(None).context("loading config")?);
    let model: Arc<dyn sven_model::ModelProvider> =
        Arc::from(sven_model::from_config(&config.model).context("constructing model provider")?);

    let todos = Arc::new(Mutex::new(Vec::new()));
    let mut agent = AgentBuilder::new(config)
        .with_runtime_context(RuntimeContext::auto_detect())
        .build(
            sven_config::AgentMode::Agent,
            model,
            ToolSetProfile::SubAgent { todos },
        );

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
    let drain = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::TextDelta(delta) => {
                    print!("{delta}");
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ToolCallStarted(call) => {
                    eprintln!("\n[tool] {} {}", call.name, call.args);
                }
                AgentEvent::Error(msg) => {
                    eprintln!("\n[error] {msg}");
                }
                _ => {}
            }
        }
    });

    agent.submit(&prompt, tx).await.context("running agent turn")?;
    let _ = drain.await;
    println!();

    Ok(())
}

/// Prompt comes from the first CLI argument, or stdin if no argument was given.
fn read_prompt() -> anyhow::Result<String> {
    let arg: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if !arg.trim().is_empty() {
        return Ok(arg);
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn init_logging() {
    let verbosity = std::env::var("SVEN_VERBOSE").is_ok() as u8;
    let level = if verbosity > 0 { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
