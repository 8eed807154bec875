use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, ExternalErrorKind, Result};
use crate::workflow::types::{PullRequestRef, ReviewResult};

/// Kind of repository entity a workflow targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Issue,
    PullRequest,
    Comment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Issue => "issue",
            EntityKind::PullRequest => "pull_request",
            EntityKind::Comment => "comment",
        }
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "issue" => Ok(EntityKind::Issue),
            "pull_request" | "pr" => Ok(EntityKind::PullRequest),
            "comment" => Ok(EntityKind::Comment),
            other => Err(AppError::InvalidEvent(format!("Unknown entity kind: {other}"))),
        }
    }
}

/// Identity of one logical automation target. At most one workflow runs per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetKey {
    repository: String,
    entity: EntityKind,
    number: u64,
}

impl TargetKey {
    pub fn new(repository: &str, entity: EntityKind, number: u64) -> Result<Self> {
        let repository = repository.trim();
        if repository.is_empty() {
            return Err(AppError::InvalidEvent(
                "Target key requires a repository".to_string(),
            ));
        }
        if number == 0 {
            return Err(AppError::InvalidEvent(format!(
                "Target key for {repository} requires a positive entity number"
            )));
        }
        Ok(Self {
            repository: repository.to_string(),
            entity,
            number,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}-{}",
            self.repository,
            self.entity.as_str(),
            self.number
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Turn an issue into a change set and open a pull request.
    CodeGeneration,
    /// Review a pull request and, when allowed, push fixes.
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for EditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EditKind::Create => "create",
            EditKind::Modify => "modify",
            EditKind::Delete => "delete",
        })
    }
}

/// A single proposed file edit. `content` is the complete new file body and is
/// ignored for deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "action")]
    pub kind: EditKind,
}

pub type ChangeSet = Vec<FileEdit>;

/// A file excerpt gathered during analysis.
#[derive(Debug, Clone, Serialize)]
pub struct Excerpt {
    pub path: String,
    pub content: String,
}

/// Read-only data accumulated over a task's lifetime. Append-only: nothing
/// here is ever removed while the task runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskContext {
    languages: Vec<(String, usize)>,
    excerpts: Vec<Excerpt>,
    feedback: Vec<String>,
    notes: Vec<String>,
}

impl TaskContext {
    pub fn add_language(&mut self, language: &str, files: usize) {
        if !self.languages.iter().any(|(l, _)| l == language) {
            self.languages.push((language.to_string(), files));
        }
    }

    pub fn add_excerpt(&mut self, path: &str, content: &str) {
        if !self.excerpts.iter().any(|e| e.path == path) {
            self.excerpts.push(Excerpt {
                path: path.to_string(),
                content: content.to_string(),
            });
        }
    }

    pub fn add_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback.push(feedback.into());
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn languages(&self) -> &[(String, usize)] {
        &self.languages
    }

    /// Most common language by file count, if any were detected.
    pub fn primary_language(&self) -> Option<&str> {
        self.languages
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(l, _)| l.as_str())
    }

    pub fn excerpts(&self) -> &[Excerpt] {
        &self.excerpts
    }

    pub fn feedback(&self) -> &[String] {
        &self.feedback
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// Total number of entries; never decreases.
    pub fn len(&self) -> usize {
        self.languages.len() + self.excerpts.len() + self.feedback.len() + self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a workflow instance ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TerminalResult {
    Success,
    RejectedByPolicy { violations: Vec<String> },
    ValidationExhausted { last_error: String },
    IterationsExhausted { iterations: u32 },
    ExternalFailure { kind: ExternalErrorKind, error: String },
    Cancelled,
}

impl TerminalResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalResult::Success)
    }

    pub fn external(error: &AppError) -> Self {
        TerminalResult::ExternalFailure {
            kind: error.external_kind(),
            error: error.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TerminalResult::Success => "success",
            TerminalResult::RejectedByPolicy { .. } => "rejected_by_policy",
            TerminalResult::ValidationExhausted { .. } => "validation_exhausted",
            TerminalResult::IterationsExhausted { .. } => "iterations_exhausted",
            TerminalResult::ExternalFailure { .. } => "external_failure",
            TerminalResult::Cancelled => "cancelled",
        }
    }
}

/// State of one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Received,
    Analyzing,
    Generating,
    Validating,
    Committing,
    AwaitingReview,
    Reviewing,
    Fixing,
    Terminated(TerminalResult),
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Terminated(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Received => "received",
            WorkflowState::Analyzing => "analyzing",
            WorkflowState::Generating => "generating",
            WorkflowState::Validating => "validating",
            WorkflowState::Committing => "committing",
            WorkflowState::AwaitingReview => "awaiting_review",
            WorkflowState::Reviewing => "reviewing",
            WorkflowState::Fixing => "fixing",
            WorkflowState::Terminated(_) => "terminated",
        }
    }
}

/// What a task produced on the way to its terminal state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskOutcome {
    pub pull_request: Option<PullRequestRef>,
    pub commits: Vec<String>,
    pub review: Option<ReviewResult>,
}

/// One unit of work, exclusively owned by the state machine running it.
#[derive(Debug)]
pub struct WorkflowTask {
    pub key: TargetKey,
    pub kind: TaskKind,
    pub state: WorkflowState,
    pub iteration: u32,
    pub change_set: ChangeSet,
    pub context: TaskContext,
    pub terminal_result: Option<TerminalResult>,
    pub outcome: TaskOutcome,
}

impl WorkflowTask {
    pub fn new(key: TargetKey, kind: TaskKind) -> Self {
        Self {
            key,
            kind,
            state: WorkflowState::Received,
            iteration: 0,
            change_set: Vec::new(),
            context: TaskContext::default(),
            terminal_result: None,
            outcome: TaskOutcome::default(),
        }
    }

    pub fn replace_change_set(&mut self, change_set: ChangeSet) {
        self.change_set = change_set;
    }

    pub fn into_report(self) -> TaskReport {
        TaskReport {
            key: self.key.to_string(),
            kind: self.kind,
            iteration: self.iteration,
            result: self.terminal_result.unwrap_or(TerminalResult::ExternalFailure {
                kind: ExternalErrorKind::Other,
                error: "Task ended without a terminal result".to_string(),
            }),
            outcome: self.outcome,
        }
    }
}

/// Final, caller-facing summary of a finished task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub key: String,
    pub kind: TaskKind,
    pub iteration: u32,
    pub result: TerminalResult,
    pub outcome: TaskOutcome,
}
