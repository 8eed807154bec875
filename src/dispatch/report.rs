use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::dispatcher::TaskReporter;
use crate::dispatch::event::InboundEvent;
use crate::platform::SourceHostingGateway;
use crate::workflow::task::{TaskKind, TaskReport, TerminalResult};

const SIGNATURE: &str = "\n\n---\n*Patcher*";

/// Posts the outcome of each finished task back to its issue or pull request.
pub struct GitHubReporter {
    gateway: Arc<dyn SourceHostingGateway>,
}

impl GitHubReporter {
    pub fn new(gateway: Arc<dyn SourceHostingGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl TaskReporter for GitHubReporter {
    async fn report(&self, event: &InboundEvent, report: &TaskReport) {
        tracing::info!(
            key = %report.key,
            result = report.result.label(),
            iteration = report.iteration,
            "Task finished"
        );

        let Some(body) = render(report) else {
            return;
        };
        if let Err(e) = self
            .gateway
            .post_comment(&event.repository, event.number, &body)
            .await
        {
            tracing::warn!(key = %report.key, error = %e, "Failed to post task report");
        }
    }
}

/// Comment text for a finished task, or `None` when nothing should be posted.
///
/// Successful reviews already speak through the published review, and
/// cancelled tasks stay silent.
pub fn render(report: &TaskReport) -> Option<String> {
    let message = match (&report.result, report.kind) {
        (TerminalResult::Success, TaskKind::CodeGeneration) => match &report.outcome.pull_request {
            Some(pr) => format!("I've opened #{} to resolve this issue: {}", pr.number, pr.url),
            // A generation only succeeds once its pull request exists.
            None => {
                tracing::error!(key = %report.key, "Generation succeeded without a pull request");
                "Internal error: the run finished without opening a pull request. Please check the service logs.".to_string()
            }
        },
        (TerminalResult::Success, TaskKind::Review) | (TerminalResult::Cancelled, _) => {
            return None;
        }
        (TerminalResult::RejectedByPolicy { violations }, _) => format!(
            "The proposed changes touch protected paths and were not committed:\n\n{}",
            violations
                .iter()
                .map(|v| format!("- `{v}`"))
                .collect::<Vec<_>>()
                .join("\n")
        ),
        (TerminalResult::ValidationExhausted { last_error }, _) => format!(
            "I couldn't produce a well-formed change after several attempts.\n\nLast error:\n```\n{last_error}\n```"
        ),
        (TerminalResult::IterationsExhausted { iterations }, _) => format!(
            "I stopped after {iterations} fix iterations without reaching an approved state. A human should take it from here."
        ),
        (TerminalResult::ExternalFailure { kind, error }, _) => format!(
            "I encountered an error ({}) while working on this:\n\n```\n{error}\n```",
            serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "other".to_string())
        ),
    };
    Some(format!("{message}{SIGNATURE}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalErrorKind;
    use crate::workflow::task::TaskOutcome;
    use crate::workflow::types::PullRequestRef;

    fn report(kind: TaskKind, result: TerminalResult) -> TaskReport {
        TaskReport {
            key: "r/p#issue-42".to_string(),
            kind,
            iteration: 0,
            result,
            outcome: TaskOutcome::default(),
        }
    }

    #[test]
    fn test_successful_review_is_silent() {
        assert!(render(&report(TaskKind::Review, TerminalResult::Success)).is_none());
        assert!(render(&report(TaskKind::CodeGeneration, TerminalResult::Cancelled)).is_none());
    }

    #[test]
    fn test_generation_success_links_pull_request() {
        let mut r = report(TaskKind::CodeGeneration, TerminalResult::Success);
        r.outcome.pull_request = Some(PullRequestRef {
            number: 7,
            url: "https://github.com/r/p/pull/7".to_string(),
            head_branch: "patcher/issue-42".to_string(),
        });
        let body = render(&r).unwrap();
        assert!(body.starts_with("I've opened #7"));
        assert!(body.ends_with("*Patcher*"));
    }

    #[test]
    fn test_generation_success_without_pull_request_is_an_internal_error() {
        let body = render(&report(TaskKind::CodeGeneration, TerminalResult::Success)).unwrap();
        assert!(body.starts_with("Internal error"));
        assert!(!body.contains("didn't find any code changes"));
    }

    #[test]
    fn test_failures_name_their_cause() {
        let rejected = render(&report(
            TaskKind::CodeGeneration,
            TerminalResult::RejectedByPolicy {
                violations: vec![".github/workflows/ci.yml".to_string()],
            },
        ))
        .unwrap();
        assert!(rejected.contains("- `.github/workflows/ci.yml`"));

        let failed = render(&report(
            TaskKind::Review,
            TerminalResult::ExternalFailure {
                kind: ExternalErrorKind::RateLimit,
                error: "slow down".to_string(),
            },
        ))
        .unwrap();
        assert!(failed.contains("(rate_limit)"));
    }
}
