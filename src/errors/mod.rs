// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Error types for agenda compilation, scheduling and evaluation
//!
//! All fatal conditions funnel into [`TickleError`]; task subprocess
//! failures travel through the evaluator as [`TaskError`] values so that
//! online mode can keep running after a failed task.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for tickle operations
pub type TickleResult<T> = Result<T, TickleError>;

/// Main error type for tickle
#[derive(Error, Debug, Diagnostic)]
pub enum TickleError {
    // ─────────────────────────────────────────────────────────────────────────
    // Schema Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to decode '{path}': {message}")]
    #[diagnostic(code(tickle::schema_error))]
    Schema { path: PathBuf, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Agenda Consistency Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Unknown proc '{proc}' referenced by {site}")]
    #[diagnostic(
        code(tickle::unknown_proc),
        help("Define '{proc}' under the agenda's procs section")
    )]
    UnknownProc { proc: String, site: String },

    #[error("Proc '{proc}' appears in more than one stage of flow '{flow}'")]
    #[diagnostic(
        code(tickle::duplicate_in_flow),
        help("A proc may be pinned to at most one stage per flow")
    )]
    DuplicateInFlow { flow: String, proc: String },

    #[error("Task '{task}' references unknown flow '{flow}'")]
    #[diagnostic(
        code(tickle::unknown_flow),
        help("Define '{flow}' under the agenda's flows section")
    )]
    UnknownFlow { task: String, flow: String },

    #[error("Task '{task}' is invalid: {reason}")]
    #[diagnostic(code(tickle::invalid_task))]
    InvalidTask { task: String, reason: String },

    #[error("Missing argument '{param}' for proc '{proc}'")]
    #[diagnostic(code(tickle::missing_argument))]
    MissingArgument { proc: String, param: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Multiple tasks output to {path}")]
    #[diagnostic(
        code(tickle::multiple_output_producers),
        help("Declared by both '{first}' and '{second}'")
    )]
    MultipleOutputProducers {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error(
        "Task '{consumer}' can not depend on task '{producer}' of a later stage in flow '{flow}'"
    )]
    #[diagnostic(code(tickle::stage_order_violation))]
    StageOrderViolation {
        flow: String,
        consumer: String,
        producer: String,
    },

    #[error("Cycle detected in task graph: {}", .tasks.join(" -> "))]
    #[diagnostic(
        code(tickle::agenda_cycle),
        help("Review task inputs and outputs to remove the cycle")
    )]
    AgendaCycle { tasks: Vec<String> },

    #[error("Cycle found in depend: {}", .files.join(" -> "))]
    #[diagnostic(
        code(tickle::depend_cycle),
        help("Review the depend entries among these files to remove the cycle")
    )]
    DependCycle { files: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Task \"{description}\" failed")]
    #[diagnostic(code(tickle::task_failed))]
    TaskFailed { description: String, stderr: String },

    #[error("Evaluator can not {action} {condition}")]
    #[diagnostic(code(tickle::evaluator_state))]
    EvaluatorState {
        action: &'static str,
        condition: &'static str,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Agenda file not found: {path}")]
    #[diagnostic(
        code(tickle::agenda_not_found),
        help("Pass --agenda or create agenda.yaml in the target directory")
    )]
    AgendaNotFound { path: PathBuf },

    #[error("Cache error: {message}")]
    #[diagnostic(code(tickle::cache_error))]
    Cache { message: String },

    #[error("File watcher error: {message}")]
    #[diagnostic(code(tickle::watch_error))]
    Watch { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(tickle::io_error))]
    Io { message: String },
}

impl From<std::io::Error> for TickleError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<notify::Error> for TickleError {
    fn from(e: notify::Error) -> Self {
        Self::Watch {
            message: e.to_string(),
        }
    }
}

impl TickleError {
    /// Create a schema error for a malformed agenda or depend file
    pub fn schema(path: &std::path::Path, error: serde_yaml::Error) -> Self {
        Self::Schema {
            path: path.to_path_buf(),
            message: error.to_string(),
        }
    }

    /// Create a cache error with context
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }
}

/// Failure of a single task's work closure
///
/// Carries the task description and the child process stderr. Offline
/// mode treats it as fatal; online mode logs it and keeps evaluating.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub description: String,
    pub stderr: String,
}

impl TaskError {
    pub fn new(description: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            stderr: stderr.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task \"{}\" failed", self.description)
    }
}

impl From<TaskError> for TickleError {
    fn from(e: TaskError) -> Self {
        Self::TaskFailed {
            description: e.description,
            stderr: e.stderr,
        }
    }
}
