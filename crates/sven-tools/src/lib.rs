// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod policy;
pub mod registry;
pub mod tool;

pub use dispatch::{dispatch_batch, DispatchOutcome};
pub use error::ToolError;
pub use events::{TodoItem, ToolEvent};
pub use policy::{ApprovalPolicy, GuardDecision, ToolApprovalRequest, ToolGuard, ToolPolicy, TrustToken};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolClassification, ToolOutput, ToolOutputPart};

pub use builtin::ask_question::{AskQuestionTool, Question, QuestionRequest};
pub use builtin::read_file::ReadFileTool;
pub use builtin::search_codebase::SearchCodebaseTool;
pub use builtin::switch_mode::SwitchModeTool;
pub use builtin::todo_write::TodoWriteTool;
pub use builtin::write::WriteTool;

pub use builtin::shell::ShellTool;
