// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Local;
use std::path::Path;
use std::sync::Arc;

use sven_config::AgentMode;
use sven_runtime::AgentInfo;

use crate::composer::{LayerContent, LayerSpec, PromptComposer, TrimPolicy};

/// All optional contextual blocks that can be injected into the system prompt.
#[derive(Debug)]
pub struct PromptContext<'a> {
    /// Absolute path to the project root (from `.git` detection).
    pub project_root: Option<&'a Path>,
    /// Pre-formatted git context (branch, commit, dirty status).
    ///
    /// **Caching note**: this field is *volatile* — it changes on every commit
    /// and with every file edit (dirty count).  When prompt caching is enabled
    /// this content is placed in a *separate, uncached* system block so that
    /// the stable prefix remains cacheable across sessions.
    pub git_context: Option<&'a str>,
    /// Contents of the project context file (AGENTS.md / .sven/context.md).
    pub project_context_file: Option<&'a str>,
    /// Pre-formatted CI environment block.
    ///
    /// **Caching note**: like `git_context`, this is volatile between CI runs.
    pub ci_context: Option<&'a str>,
    /// Text appended verbatim after the default Guidelines section.
    pub append: Option<&'a str>,
    /// Already-rendered `<available_skills>`/business-context block.
    ///
    /// Skill and plugin discovery are an out-of-scope collaborator: whatever
    /// loader a deployment wires up renders its own XML/markdown and hands it
    /// here as plain text.  `PromptContext`/`PromptComposer` never parse or
    /// discover skills themselves — they only place this block and, in
    /// [`compose_system_prompt`], trim it as a `Compressible` layer.
    pub skills_block: Option<&'a str>,
    /// Discovered subagents.  Names and descriptions are injected into the
    /// stable system prompt so the model can suggest delegation and the user
    /// can invoke them via slash commands.  Subagents are owned by the
    /// SubagentManager, not by an external loader, so this stays structured.
    pub agents: Arc<[AgentInfo]>,
    /// Already-rendered knowledge-base overview block (see `skills_block`).
    pub knowledge_block: Option<&'a str>,
    /// Pre-formatted knowledge drift warning (computed once at session start).
    /// Injected verbatim into the stable system-prompt block.  `None` when all
    /// knowledge documents are current or no `updated:` fields are set.
    pub knowledge_drift_note: Option<&'a str>,
}

impl<'a> Default for PromptContext<'a> {
    fn default() -> Self {
        Self {
            project_root: None,
            git_context: None,
            project_context_file: None,
            ci_context: None,
            append: None,
            skills_block: None,
            agents: Arc::from(Vec::<AgentInfo>::new()),
            knowledge_block: None,
            knowledge_drift_note: None,
        }
    }
}

impl<'a> PromptContext<'a> {
    /// Return a version of this context with the volatile fields cleared.
    ///
    /// Used to build the *stable* (cacheable) portion of the system prompt.
    /// Skills, agents, knowledge docs, and drift notes are stable within a
    /// session (discovered once at startup) so they are included in the stable
    /// slice.
    pub fn stable_only(&self) -> Self {
        Self {
            project_root: self.project_root,
            git_context: None,
            project_context_file: self.project_context_file,
            ci_context: None,
            append: self.append,
            skills_block: self.skills_block,
            agents: self.agents.clone(),
            knowledge_block: self.knowledge_block,
            knowledge_drift_note: self.knowledge_drift_note,
        }
    }

    /// Format the volatile fields (git + CI context) as a block suitable for
    /// appending to the system prompt outside the cached region.
    ///
    /// Returns `None` when neither git nor CI context is present.
    pub fn dynamic_block(&self) -> Option<String> {
        let git = self
            .git_context
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string());
        let ci = self
            .ci_context
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string());
        match (git, ci) {
            (None, None) => None,
            (Some(g), None) => Some(g),
            (None, Some(c)) => Some(c),
            (Some(g), Some(c)) => Some(format!("{g}\n\n{c}")),
        }
    }
}

// ─── Guidelines Module ───────────────────────────────────────────────────────
// Modular guidelines for easier maintenance and testing

mod guidelines {
    pub fn general() -> &'static str {
        "- Be concise and precise. Use tools instead of guessing.\n\
         - Project conventions and knowledge-base context, when available, are injected \
           automatically into this prompt — you do not need to fetch them yourself."
    }

    pub fn tool_usage() -> &'static str {
        "- NEVER use `shell` for file I/O — use `read_file`/`write`/`search_codebase` instead.\n\
         - Use `search_codebase` for whole-repo discovery before narrowing with `read_file` on specific ranges.\n\
         - Use `shell` one-liners like sed and awk for bulk text transformations the other tools don't cover.\n\
         - Batch `read_file` calls in parallel — read all potentially relevant files in one turn."
    }

    pub fn code_quality() -> &'static str {
        "- Make sure all the code you generate is production quality and follows good separation of concerns and clean code principles.\n\
         - NEVER create new files proactively unless explicitly requested. Do not create 'summary' md files unless requested.\n\
         - Write tests when adding new functionality. \n\
         - Preserve existing code structure and coding style patterns."
    }

    pub fn workflow_efficiency() -> &'static str {
        "- Use `todo_write` for multi-step tasks (3+ steps); update silently and mark complete after completing each step.\n\
         - Use `switch_mode` to transition between Research, Plan, and Agent modes proactively.\n\
         - Use `ask_question` instead of a free-form prose question when the user is interactive and the answer has a small set of options.\n\
         - Batch independent tool calls in parallel to increase efficiency.\n\
         - Delegate a self-contained subtask to a subagent via `task` when it would otherwise consume a large share of the current turn budget."
    }

    pub fn error_handling() -> &'static str {
        "- When a tool fails, try a different approach.\n\
         - Always set `workdir` in `shell` to project_root for commands that depend on location.\n\
         - NEVER skip git hooks or force-push without explicit user permission."
    }

    pub fn debugging() -> &'static str {
        "- When asked to debug, diagnose a crash, or inspect runtime state: prefer running the \
           failing command or test through `shell` and reading its actual output over guessing \
           from source alone. Use `read_file`/`search_codebase` to correlate the failure with \
           the relevant code before proposing a fix."
    }
}

// ─── Agents section ───────────────────────────────────────────────────────────

/// Maximum total characters for the `<available_agents>` block.
pub const MAX_AGENTS_PROMPT_CHARS: usize = 10_000;

/// Format the available-agents block for injection into the system prompt.
///
/// Returns an empty string when `agents` is empty.
pub fn build_agents_section(agents: &[AgentInfo]) -> String {
    if agents.is_empty() {
        return String::new();
    }

    let entries: Vec<String> = agents
        .iter()
        .map(|a| {
            let model_hint = match a.model.as_deref() {
                Some(m) => format!("\n    <model>{m}</model>"),
                None => String::new(),
            };
            let budget_hint = match a.turn_budget {
                Some(b) => format!("\n    <turn_budget>{b}</turn_budget>"),
                None => String::new(),
            };
            let ro_hint = if a.readonly { "\n    <readonly>true</readonly>" } else { "" };
            format!(
                "  <agent>\n    <name>{}</name>\n    <description>{}</description>{}{}{}\n  </agent>",
                a.name,
                a.description.trim(),
                model_hint,
                budget_hint,
                ro_hint,
            )
        })
        .collect();

    // Fit entries within budget.
    let mut used = 0usize;
    let fitted_count = entries
        .iter()
        .take_while(|e| {
            let next = used + e.len();
            if next <= MAX_AGENTS_PROMPT_CHARS {
                used = next;
                true
            } else {
                false
            }
        })
        .count();

    if fitted_count == 0 {
        return String::new();
    }

    let fitted = &entries[..fitted_count];
    let truncation_note = if fitted_count < entries.len() {
        format!(
            "\n⚠ Agents truncated: showing {} of {}.",
            fitted_count,
            agents.len()
        )
    } else {
        String::new()
    };

    format!(
        "## Subagents\n\n\
         The following subagents are available for delegation.  When the user's task \
         clearly matches a subagent's description, suggest invoking it explicitly with \
         a slash command (e.g. `/verifier confirm the auth flow`).  Users can also \
         invoke subagents directly by typing `/<name> <task>` in the input box.\
         {truncation_note}\n\n\
         <available_agents>\n{}\n</available_agents>",
        fitted.join("\n")
    )
}

fn build_guidelines_section() -> String {
    format!(
        "## Guidelines\n\n\
         ### General Principles\n\
         {}\n\n\
         ### Tool Usage Patterns\n\
         {}\n\n\
         ### Code Quality\n\
         {}\n\n\
         ### Workflow Efficiency\n\
         {}\n\n\
         ### Error Handling\n\
         {}\n\n\
         ### Debugging\n\
         {}",
        guidelines::general(),
        guidelines::tool_usage(),
        guidelines::code_quality(),
        guidelines::workflow_efficiency(),
        guidelines::error_handling(),
        guidelines::debugging()
    )
}

/// Build the system prompt for the given agent mode.
///
/// `ctx` carries optional project / CI / git context injected when running
/// in headless mode.
pub fn system_prompt(mode: AgentMode, custom: Option<&str>, ctx: PromptContext<'_>) -> String {
    if let Some(custom) = custom {
        // Even with a custom prompt, honour append if set.
        if let Some(extra) = ctx.append {
            return format!("{}\n\n{}", custom.trim_end(), extra);
        }
        return custom.to_string();
    }

    let identity = identity_block(mode);

    let project_section = if let Some(root) = ctx.project_root {
        format!(
            "\n\n## Project Context\n\
             Project root directory: `{}`\n\
             - Use this absolute path for all file read/write operations.\n\
             - Pass this path as the `workdir` argument to `shell` \
               so shell commands execute in the correct directory.\n\
             - Prefer absolute paths over relative paths in every tool call.",
            root.display()
        )
    } else {
        String::new()
    };

    let git_section = if let Some(git) = ctx.git_context {
        format!("\n\n{git}")
    } else {
        String::new()
    };

    // Project context file (AGENTS.md / .sven/context.md) — injected as a
    // labelled section so the model treats it as authoritative instructions.
    let context_file_section = if let Some(content) = ctx.project_context_file {
        format!("\n\n## Project Instructions\n\n{content}")
    } else {
        String::new()
    };

    let ci_section = if let Some(ci) = ctx.ci_context {
        format!("\n\n{ci}")
    } else {
        String::new()
    };

    // Skills — stable, injected after project instructions and before CI/git.
    // Rendered by an out-of-scope discovery collaborator; this layer just
    // places whatever string (if any) it handed us.
    let skills_section = ctx
        .skills_block
        .filter(|s| !s.is_empty())
        .map(|s| format!("\n\n{s}"))
        .unwrap_or_default();

    // Agents — stable, injected after skills.
    let agents_section = {
        let s = build_agents_section(&ctx.agents);
        if s.is_empty() {
            String::new()
        } else {
            format!("\n\n{s}")
        }
    };

    // Knowledge base overview — stable, injected after agents.
    let knowledge_section = ctx
        .knowledge_block
        .filter(|s| !s.is_empty())
        .map(|s| format!("\n\n{s}"))
        .unwrap_or_default();

    // Knowledge drift warning — stable (computed once at session start).
    let knowledge_drift_section = if let Some(note) = ctx.knowledge_drift_note {
        format!("\n\n{note}")
    } else {
        String::new()
    };

    let guidelines_section = build_guidelines_section();

    let append_section = if let Some(extra) = ctx.append {
        format!("\n\n{extra}")
    } else {
        String::new()
    };

    format!(
        "{identity}{project_section}{git_section}\
         {context_file_section}{skills_section}{agents_section}\
         {knowledge_section}{knowledge_drift_section}{ci_section}\n\n\
         {guidelines_section}\
         {append_section}",
    )
}

/// Agent identity plus mode-specific operating instructions. Shared by
/// [`system_prompt`] (teacher's single-pass builder) and
/// [`compose_system_prompt`] (layered, budget-aware builder) as the "Core"
/// layer — never trimmed.
fn identity_block(mode: AgentMode) -> String {
    let agent_identity = format!(
        "You are Sven, a specialized AI coding agent built for professional software engineering.\n\n\
         Operating Mode: `{mode}`\n\n\
         Current date and time: `{current_date_time}`\n\n\
         Current working directory: `{current_working_directory}`\n\
         Core Capabilities:\n\
         - Multi-mode operation (Research, Plan, Agent) with dynamic mode switching\n\
         - Subagent delegation for self-contained subtasks via the `task` tool\n\
         - Shell-driven debugging: reproduce failures and read real output instead of guessing\n\
         - Markdown-driven subagent definitions with frontmatter configuration\n\
         - Full CI/CD pipeline integration and awareness",
        current_date_time = Local::now().format("%Y-%m-%d %H:%M:%S"),
        current_working_directory = std::env::current_dir().unwrap().display());

    let mode_instructions = match mode {
        AgentMode::Research => {
            "You are a research assistant.  You may read files, search the codebase, and look up \
             information.  You MUST NOT write, modify, or delete any files. Research mode \
             is non-destructive. Focus on gathering all the information needed in order to \
             satisfy user's request."
        }
        AgentMode::Plan => {
            "You are a planning assistant.  Analyse the request and produce a clear, structured \
             plan with numbered steps.  You may read files to inform the plan, but MUST NOT \
             modify them.  Output the plan in Markdown. \
             When a task is ambiguous or you need information to proceed, use the `ask_question` \
             tool to collect structured answers from the user rather than making assumptions or \
             writing a prose question. The `ask_question` tool presents a modal dialog in the TUI; \
             prefer it over free-form text questions whenever the user is interactive."
        }
        AgentMode::Agent => {
            "You are a capable coding agent.  You can read and write files, run shell commands, \
             and search the codebase.  Work systematically, verify your changes, and report \
             your progress clearly.\n\
             Keep in mind the following:
             - Maximize parallel tool calls.\n\
             - Always complete all todos before completing your turn.\n\
             - Always complete the task requested by the user before completion your turn."
        }
    };

    format!("{agent_identity}\n\n{mode_instructions}")
}

/// Layered, budget-aware alternative to [`system_prompt`]: the same content
/// sources (identity, guidelines, skills, agents, knowledge, project/CI
/// context), but assembled through a [`PromptComposer`] so the result never
/// exceeds `budget_fraction` of `max_context_tokens`, trimming lower-priority
/// layers first. A `custom` override bypasses layering entirely, same as
/// [`system_prompt`].
pub fn compose_system_prompt(
    mode: AgentMode,
    custom: Option<&str>,
    ctx: PromptContext<'_>,
    max_context_tokens: usize,
) -> String {
    if custom.is_some() {
        return system_prompt(mode, custom, ctx);
    }

    let core = identity_block(mode);
    let guidelines = build_guidelines_section();

    let bootstrap = ctx
        .project_root
        .map(|root| {
            format!(
                "## Project Context\n\
                 Project root directory: `{}`\n\
                 - Use this absolute path for all file read/write operations.\n\
                 - Pass this path as the `workdir` argument to `shell` \
                   so shell commands execute in the correct directory.\n\
                 - Prefer absolute paths over relative paths in every tool call.",
                root.display()
            )
        })
        .unwrap_or_default();

    let identity_and_append = match (ctx.project_context_file, ctx.append) {
        (None, None) => String::new(),
        (Some(c), None) => format!("## Project Instructions\n\n{c}"),
        (None, Some(a)) => a.to_string(),
        (Some(c), Some(a)) => format!("## Project Instructions\n\n{c}\n\n{a}"),
    };

    let skills_and_agents = {
        let s = ctx.skills_block.unwrap_or_default();
        let a = build_agents_section(&ctx.agents);
        match (s.is_empty(), a.is_empty()) {
            (true, true) => String::new(),
            (false, true) => s.to_string(),
            (true, false) => a,
            (false, false) => format!("{s}\n\n{a}"),
        }
    };

    let business_context = ctx.knowledge_block.unwrap_or_default().to_string();
    let temporal = ctx.dynamic_block().unwrap_or_default();
    let runtime = ctx.knowledge_drift_note.map(str::to_string).unwrap_or_default();

    let layers = vec![
        (LayerSpec { name: "core", priority: 0, trim: TrimPolicy::Never }, LayerContent::Static(core)),
        (LayerSpec { name: "safety", priority: 5, trim: TrimPolicy::Never }, LayerContent::Static(guidelines)),
        (
            LayerSpec { name: "identity", priority: 10, trim: TrimPolicy::Never },
            LayerContent::Static(identity_and_append),
        ),
        (LayerSpec { name: "bootstrap", priority: 15, trim: TrimPolicy::Never }, LayerContent::Static(bootstrap)),
        (
            LayerSpec { name: "business_context", priority: 20, trim: TrimPolicy::Compressible },
            LayerContent::Static(business_context),
        ),
        (
            LayerSpec { name: "skills", priority: 40, trim: TrimPolicy::Compressible },
            LayerContent::Static(skills_and_agents),
        ),
        (
            LayerSpec { name: "temporal", priority: 60, trim: TrimPolicy::NeverSmall },
            LayerContent::Static(temporal),
        ),
        (
            LayerSpec { name: "runtime", priority: 80, trim: TrimPolicy::Droppable },
            LayerContent::Static(runtime),
        ),
    ];

    PromptComposer::default().compose(layers, max_context_tokens)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
