// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Subagent type discovery for the SubagentManager.
//!
//! A subagent *type* is a named, reusable delegation target: a system prompt
//! plus an optional model override, a read-only restriction, and a turn
//! budget tighter than the parent's.  `TaskTool` spawns a generic ad hoc
//! subagent from a free-form prompt; a discovered [`AgentInfo`] additionally
//! lets the user (or the model) invoke a pre-defined persona by name, e.g.
//! `/security-auditor check the payment module`.
//!
//! Subagent types are markdown files with YAML frontmatter under
//! `.sven/agents/` at or above the project root — the nearest definition
//! wins on a name collision.
//!
//! ```markdown
//! ---
//! name: security-auditor
//! description: Security specialist. Use when implementing auth or handling sensitive data.
//! model: fast
//! readonly: true
//! turn_budget: 12
//! ---
//!
//! You are a security expert auditing code for vulnerabilities.
//! ```
//!
//! | Field         | Required | Description                                          |
//! |:--------------|:---------|:------------------------------------------------------|
//! | `name`        | No       | Unique identifier. Defaults to filename stem.         |
//! | `description` | No      | When to use this subagent. Defaults to first body line. |
//! | `model`       | No       | A specific model ID, or absent to inherit the parent's. |
//! | `readonly`    | No       | If `true`, the subagent's tool set excludes writes.   |
//! | `turn_budget` | No       | Max tool-call rounds, tighter than the parent's `max_turns`. |

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::shared::Shared;

const MAX_AGENT_FILE_BYTES: u64 = 256 * 1024;

// ── Public types ──────────────────────────────────────────────────────────────

/// A discovered subagent type.
#[derive(Clone, Debug)]
pub struct AgentInfo {
    /// Unique name used for slash-command invocation (e.g. `"security-auditor"`).
    pub name: String,
    /// Human-readable description that guides automatic delegation.
    pub description: String,
    /// Model override. `None` means inherit the parent's model.
    pub model: Option<String>,
    /// When `true`, the subagent's tool set excludes file writes and shell
    /// commands that mutate state.
    pub readonly: bool,
    /// Maximum tool-call rounds for this subagent, if tighter than the
    /// caller's default `max_turns`.
    pub turn_budget: Option<u32>,
    /// System prompt body (everything after the closing `---` fence).
    pub content: String,
    /// Absolute path to the agent markdown file.
    pub agent_md_path: PathBuf,
}

/// A shared, live-refreshable collection of discovered subagent types.
///
/// Both the TUI command registry and the running agent hold a clone of the
/// same `SharedAgents` instance; calling [`refresh`][Shared::<AgentInfo>::refresh]
/// atomically replaces the inner slice so the next turn and the next TUI
/// command lookup both see updated agents without restarting.
pub type SharedAgents = Shared<AgentInfo>;

impl Shared<AgentInfo> {
    /// Re-run subagent discovery and atomically replace the agent list.
    pub fn refresh(&self, project_root: Option<&Path>) {
        self.set(discover_agents(project_root));
    }
}

// ── Frontmatter schema ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    readonly: bool,
    #[serde(default)]
    turn_budget: Option<u32>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a raw agent markdown file into an [`AgentInfo`].
///
/// If the file has no YAML frontmatter the whole body is used as the content
/// and the description is synthesised from the first non-empty line.
fn parse_agent_file(raw: &str, stem: &str, path: &Path) -> Option<AgentInfo> {
    let rest = raw.trim_start_matches('\n');

    let (fm, content) = if let Some(after_open) = rest.strip_prefix("---") {
        let close = after_open.find("\n---")?;
        let yaml_block = &after_open[..close];
        let body = after_open[close + 4..].trim_start_matches('\n').to_string();

        let fm: AgentFrontmatter = match serde_yaml::from_str(yaml_block) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse agent frontmatter — skipping");
                return None;
            }
        };
        (fm, body)
    } else {
        (
            AgentFrontmatter { name: None, description: None, model: None, readonly: false, turn_budget: None },
            rest.to_string(),
        )
    };

    let description = fm
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            content
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or(stem)
                .trim_start_matches('#')
                .trim()
                .to_string()
        });

    if description.trim().is_empty() {
        return None;
    }

    let name = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| stem.to_string());

    Some(AgentInfo {
        name,
        description,
        model: fm.model.filter(|m| !m.trim().is_empty()),
        readonly: fm.readonly,
        turn_budget: fm.turn_budget,
        content,
        agent_md_path: path.to_path_buf(),
    })
}

fn try_load_agent(path: &Path) -> Option<AgentInfo> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_AGENT_FILE_BYTES {
        warn!(path = %path.display(), size, max = MAX_AGENT_FILE_BYTES, "skipping oversized agent file");
        return None;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("agent");

    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read agent file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        return None;
    }

    parse_agent_file(&raw, stem, path)
}

// ── Directory walking ─────────────────────────────────────────────────────────

/// Walk up from `start` to `/`, collecting every directory, root-first so
/// callers can load lowest-precedence first.
fn ancestor_chain(start: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut cur = start.to_path_buf();
    loop {
        dirs.push(cur.clone());
        match cur.parent() {
            Some(p) if p != cur => cur = p.to_path_buf(),
            _ => break,
        }
    }
    dirs.reverse();
    dirs
}

fn agent_name_from_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let raw: String = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    raw.strip_suffix(".md").map(str::to_string).unwrap_or(raw)
}

fn enumerate_md_files(dir: &Path, out: &mut Vec<(String, PathBuf)>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    let mut entries: Vec<_> = entries.flatten().collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_file() {
            let is_md = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            if is_md {
                out.push((agent_name_from_path(dir, &path), path));
            }
        } else if path.is_dir() {
            enumerate_md_files(&path, out);
        }
    }
}

fn scan_agents_dir(dir: &Path) -> Vec<(String, AgentInfo)> {
    let mut files = Vec::new();
    enumerate_md_files(dir, &mut files);
    files
        .into_iter()
        .filter_map(|(key, path)| try_load_agent(&path).map(|a| (key, a)))
        .collect()
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Discover subagent types from `.sven/agents/` at every directory between
/// the project root (or current working directory, when `None`) and `/`.
/// Definitions closer to the project root win on a name collision.
#[must_use]
pub fn discover_agents(project_root: Option<&Path>) -> Vec<AgentInfo> {
    let base = project_root
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"));

    let mut map: HashMap<String, AgentInfo> = HashMap::new();
    for dir in ancestor_chain(&base) {
        for (key, agent) in scan_agents_dir(&dir.join(".sven").join("agents")) {
            map.insert(key, agent);
        }
    }

    let mut result: Vec<AgentInfo> = map.into_values().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
