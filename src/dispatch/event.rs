use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::platform::types::RepoRef;
use crate::workflow::task::{EntityKind, TargetKey, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IssueOpened,
    PrOpened,
    ReviewComment,
    CiCompleted,
}

impl EventKind {
    pub fn task_kind(&self) -> TaskKind {
        match self {
            EventKind::IssueOpened => TaskKind::CodeGeneration,
            EventKind::PrOpened | EventKind::ReviewComment | EventKind::CiCompleted => {
                TaskKind::Review
            }
        }
    }

    /// Review comments and CI results on a PR share the PR's key, so they
    /// can never run concurrently.
    pub fn entity(&self) -> EntityKind {
        match self {
            EventKind::IssueOpened => EntityKind::Issue,
            EventKind::PrOpened | EventKind::ReviewComment | EventKind::CiCompleted => {
                EntityKind::PullRequest
            }
        }
    }
}

/// Kind-specific event data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Issue body, comment text or CI summary, depending on the event.
    #[serde(default)]
    pub text: Option<String>,
    /// Publish the review on the pull request.
    #[serde(default)]
    pub publish: bool,
    /// Allow the review task to push fixes.
    #[serde(default)]
    pub allow_fix: bool,
}

/// A repository event normalised for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub repository: RepoRef,
    pub kind: EventKind,
    pub number: u64,
    #[serde(default)]
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn new(repository: RepoRef, kind: EventKind, number: u64, payload: EventPayload) -> Self {
        Self {
            repository,
            kind,
            number,
            payload,
        }
    }

    /// Fails with `InvalidEvent` for an empty repository or a zero number.
    pub fn target_key(&self) -> Result<TargetKey> {
        TargetKey::new(&self.repository.full_name, self.kind.entity(), self.number)
    }
}
