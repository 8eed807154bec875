use regex::Regex;

use crate::config::GitHubConfig;
use crate::dispatch::event::{EventKind, EventPayload, InboundEvent};
use crate::error::{AppError, Result};
use crate::webhook::events::*;
use crate::workflow::task::{EntityKind, TargetKey};

/// What the webhook handler should do with a delivery.
#[derive(Debug)]
pub enum Routing {
    Submit(InboundEvent),
    Cancel(TargetKey),
    Ignore(&'static str),
}

/// Maps GitHub deliveries onto dispatcher events.
pub struct EventNormalizer {
    trigger_label: String,
    branch_prefix: String,
    mention: Regex,
}

impl EventNormalizer {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let mention = Regex::new(&format!(
            r"(?i)(?:^|[^\w])[@/]{}\b",
            regex::escape(&config.mention)
        ))
        .map_err(|e| AppError::Config(format!("Invalid mention {:?}: {e}", config.mention)))?;

        Ok(Self {
            trigger_label: config.trigger_label.clone(),
            branch_prefix: config.branch_prefix.clone(),
            mention,
        })
    }

    pub fn mentions(&self, text: &str) -> bool {
        self.mention.is_match(text)
    }

    fn is_own_branch(&self, branch: &str) -> bool {
        branch.starts_with(&self.branch_prefix)
    }

    /// Fails with `InvalidEvent` when a relevant delivery lacks its installation.
    pub fn normalize(&self, event: WebhookEvent) -> Result<Routing> {
        match event {
            WebhookEvent::Issues(event) => self.issues(event),
            WebhookEvent::PullRequest(event) => self.pull_request(event),
            WebhookEvent::PullRequestReview(event) => self.pull_request_review(event),
            WebhookEvent::IssueComment(event) => self.issue_comment(event),
            WebhookEvent::PullRequestReviewComment(event) => self.review_comment(event),
            WebhookEvent::CheckSuite(event) => self.check_suite(event),
            WebhookEvent::Ping => Ok(Routing::Ignore("ping")),
            WebhookEvent::Unsupported(_) => Ok(Routing::Ignore("unsupported event")),
        }
    }

    fn issues(&self, event: IssuesEvent) -> Result<Routing> {
        if event.issue.pull_request.is_some() {
            return Ok(Routing::Ignore("pull request issue event"));
        }

        let trigger_changed = event
            .label
            .as_ref()
            .is_some_and(|l| l.name == self.trigger_label);

        match event.action.as_str() {
            "closed" => Ok(Routing::Cancel(TargetKey::new(
                &event.repository.full_name,
                EntityKind::Issue,
                event.issue.number,
            )?)),
            "unlabeled" if trigger_changed => Ok(Routing::Cancel(TargetKey::new(
                &event.repository.full_name,
                EntityKind::Issue,
                event.issue.number,
            )?)),
            "opened" | "labeled" => {
                let labelled = if event.action == "labeled" {
                    trigger_changed
                } else {
                    event
                        .issue
                        .labels
                        .iter()
                        .any(|l| l.name == self.trigger_label)
                };
                if !labelled {
                    return Ok(Routing::Ignore("missing trigger label"));
                }

                let repo = event
                    .repository
                    .to_repo_ref(event.installation.as_ref())?;
                Ok(Routing::Submit(InboundEvent::new(
                    repo,
                    EventKind::IssueOpened,
                    event.issue.number,
                    EventPayload {
                        text: event.issue.body,
                        ..Default::default()
                    },
                )))
            }
            _ => Ok(Routing::Ignore("unsupported issue action")),
        }
    }

    fn pull_request(&self, event: PullRequestEvent) -> Result<Routing> {
        match event.action.as_str() {
            "closed" => Ok(Routing::Cancel(TargetKey::new(
                &event.repository.full_name,
                EntityKind::PullRequest,
                event.pull_request.number,
            )?)),
            "opened" | "reopened" | "synchronize" => {
                // Pushes made by the app itself would otherwise re-trigger a review
                if event.sender.is_bot() {
                    return Ok(Routing::Ignore("pull request updated by a bot"));
                }
                let repo = event
                    .repository
                    .to_repo_ref(event.installation.as_ref())?;
                Ok(Routing::Submit(InboundEvent::new(
                    repo,
                    EventKind::PrOpened,
                    event.pull_request.number,
                    EventPayload {
                        text: None,
                        publish: true,
                        allow_fix: false,
                    },
                )))
            }
            _ => Ok(Routing::Ignore("unsupported pull request action")),
        }
    }

    fn pull_request_review(&self, event: PullRequestReviewEvent) -> Result<Routing> {
        if event.action != "submitted" || event.review.state != "changes_requested" {
            return Ok(Routing::Ignore("not a change request"));
        }
        if !self.is_own_branch(&event.pull_request.head.ref_name) {
            return Ok(Routing::Ignore("not a patcher pull request"));
        }

        let repo = event
            .repository
            .to_repo_ref(event.installation.as_ref())?;
        Ok(Routing::Submit(feedback_event(
            repo,
            event.pull_request.number,
            event.review.body.unwrap_or_default(),
        )))
    }

    fn issue_comment(&self, event: IssueCommentEvent) -> Result<Routing> {
        if event.action != "created" {
            return Ok(Routing::Ignore("unsupported comment action"));
        }
        if event.issue.pull_request.is_none() {
            return Ok(Routing::Ignore("comment on an issue"));
        }
        // Bot comments include our own reports
        if event.comment.user.is_bot() {
            return Ok(Routing::Ignore("comment from a bot"));
        }
        let body = event.comment.body.unwrap_or_default();
        if !self.mentions(&body) {
            return Ok(Routing::Ignore("no mention"));
        }

        let repo = event
            .repository
            .to_repo_ref(event.installation.as_ref())?;
        Ok(Routing::Submit(feedback_event(repo, event.issue.number, body)))
    }

    fn review_comment(&self, event: PullRequestReviewCommentEvent) -> Result<Routing> {
        if event.action != "created" {
            return Ok(Routing::Ignore("unsupported comment action"));
        }
        if event.comment.user.is_bot() {
            return Ok(Routing::Ignore("comment from a bot"));
        }
        let comment_body = event.comment.body.clone().unwrap_or_default();
        if !self.mentions(&comment_body) {
            return Ok(Routing::Ignore("no mention"));
        }

        let location = match (&event.comment.path, event.comment.line) {
            (Some(path), Some(line)) => format!("Line comment on `{path}` line {line}"),
            (Some(path), None) => format!("Line comment on `{path}`"),
            _ => "Line comment".to_string(),
        };
        let diff_context = event
            .comment
            .diff_hunk
            .as_deref()
            .map(|h| format!("\n\nDiff context:\n```\n{h}\n```"))
            .unwrap_or_default();

        let repo = event
            .repository
            .to_repo_ref(event.installation.as_ref())?;
        Ok(Routing::Submit(feedback_event(
            repo,
            event.pull_request.number,
            format!("{location}:\n\n{comment_body}{diff_context}"),
        )))
    }

    fn check_suite(&self, event: CheckSuiteEvent) -> Result<Routing> {
        if event.action != "completed" {
            return Ok(Routing::Ignore("check suite not completed"));
        }
        let conclusion = event.check_suite.conclusion.as_deref().unwrap_or_default();
        if !matches!(conclusion, "failure" | "timed_out") {
            return Ok(Routing::Ignore("check suite did not fail"));
        }
        let own_branch = event
            .check_suite
            .head_branch
            .as_deref()
            .is_some_and(|b| self.is_own_branch(b));
        if !own_branch {
            return Ok(Routing::Ignore("not a patcher pull request"));
        }
        let Some(pr) = event.check_suite.pull_requests.first() else {
            return Ok(Routing::Ignore("check suite without pull request"));
        };

        let repo = event
            .repository
            .to_repo_ref(event.installation.as_ref())?;
        Ok(Routing::Submit(InboundEvent::new(
            repo,
            EventKind::CiCompleted,
            pr.number,
            EventPayload {
                text: Some(format!(
                    "CI {conclusion} on {}",
                    event.check_suite.head_sha
                )),
                publish: true,
                allow_fix: true,
            },
        )))
    }
}

fn feedback_event(repo: crate::platform::types::RepoRef, number: u64, text: String) -> InboundEvent {
    InboundEvent::new(
        repo,
        EventKind::ReviewComment,
        number,
        EventPayload {
            text: Some(text),
            publish: true,
            allow_fix: true,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn normalizer() -> EventNormalizer {
        EventNormalizer::new(&GitHubConfig {
            app_id: 1,
            private_key_path: PathBuf::from("/dev/null"),
            webhook_secret: "s".to_string(),
            trigger_label: "patcher".to_string(),
            branch_prefix: "patcher/".to_string(),
            mention: "patcher".to_string(),
        })
        .unwrap()
    }

    fn parse(kind: &str, json: serde_json::Value) -> WebhookEvent {
        WebhookEvent::parse(kind, json.to_string().as_bytes()).unwrap()
    }

    fn repository() -> serde_json::Value {
        serde_json::json!({
            "id": 1,
            "full_name": "r/p",
            "clone_url": "https://github.com/r/p.git",
            "default_branch": "main"
        })
    }

    fn issue_event(action: &str, labels: &[&str], label: Option<&str>) -> WebhookEvent {
        parse(
            "issues",
            serde_json::json!({
                "action": action,
                "issue": {
                    "number": 42,
                    "title": "Add flag",
                    "body": "please",
                    "labels": labels.iter().map(|l| serde_json::json!({"name": l})).collect::<Vec<_>>(),
                    "user": {"login": "alice", "id": 2}
                },
                "label": label.map(|l| serde_json::json!({"name": l})),
                "repository": repository(),
                "installation": {"id": 9}
            }),
        )
    }

    #[test]
    fn test_mention_detection() {
        let n = normalizer();
        assert!(n.mentions("@patcher please fix"));
        assert!(n.mentions("ok\n/patcher"));
        assert!(n.mentions("Hey @Patcher."));
        assert!(!n.mentions("patcher is great"));
        assert!(!n.mentions("@patchers"));
        assert!(!n.mentions("mail@patcher.dev"));
    }

    #[test]
    fn test_labeled_issue_is_submitted() {
        let routing = normalizer()
            .normalize(issue_event("labeled", &["patcher"], Some("patcher")))
            .unwrap();
        let Routing::Submit(event) = routing else {
            panic!("expected submit, got {routing:?}");
        };
        assert_eq!(event.kind, EventKind::IssueOpened);
        assert_eq!(event.number, 42);
        assert_eq!(event.repository.installation_id, 9);
        assert_eq!(event.payload.text.as_deref(), Some("please"));
    }

    #[test]
    fn test_issue_without_trigger_is_ignored() {
        let n = normalizer();
        assert!(matches!(
            n.normalize(issue_event("opened", &["bug"], None)).unwrap(),
            Routing::Ignore(_)
        ));
        assert!(matches!(
            n.normalize(issue_event("labeled", &["patcher", "bug"], Some("bug")))
                .unwrap(),
            Routing::Ignore(_)
        ));
    }

    #[test]
    fn test_closed_or_unlabeled_issue_cancels() {
        let n = normalizer();
        for event in [
            issue_event("closed", &[], None),
            issue_event("unlabeled", &[], Some("patcher")),
        ] {
            let Routing::Cancel(key) = n.normalize(event).unwrap() else {
                panic!("expected cancel");
            };
            assert_eq!(key.to_string(), "r/p#issue-42");
        }
    }

    #[test]
    fn test_comment_needs_mention_and_human() {
        let n = normalizer();
        let comment = |body: &str, user_type: &str| {
            parse(
                "issue_comment",
                serde_json::json!({
                    "action": "created",
                    "issue": {
                        "number": 7,
                        "title": "PR",
                        "body": null,
                        "labels": [],
                        "user": {"login": "alice", "id": 2},
                        "pull_request": {}
                    },
                    "comment": {"id": 1, "body": body, "user": {"login": "bob", "id": 3, "type": user_type}},
                    "repository": repository(),
                    "installation": {"id": 9}
                }),
            )
        };

        let Routing::Submit(event) = n.normalize(comment("@patcher rename it", "User")).unwrap()
        else {
            panic!("expected submit");
        };
        assert_eq!(event.kind, EventKind::ReviewComment);
        assert!(event.payload.allow_fix);

        assert!(matches!(
            n.normalize(comment("rename it", "User")).unwrap(),
            Routing::Ignore(_)
        ));
        assert!(matches!(
            n.normalize(comment("@patcher rename it", "Bot")).unwrap(),
            Routing::Ignore(_)
        ));
    }

    #[test]
    fn test_failed_check_suite_on_own_branch() {
        let n = normalizer();
        let suite = |branch: &str, conclusion: &str| {
            parse(
                "check_suite",
                serde_json::json!({
                    "action": "completed",
                    "check_suite": {
                        "id": 1,
                        "head_branch": branch,
                        "head_sha": "abc",
                        "conclusion": conclusion,
                        "pull_requests": [{"number": 7}]
                    },
                    "repository": repository(),
                    "installation": {"id": 9}
                }),
            )
        };

        let Routing::Submit(event) = n.normalize(suite("patcher/issue-42", "failure")).unwrap()
        else {
            panic!("expected submit");
        };
        assert_eq!(event.kind, EventKind::CiCompleted);
        assert_eq!(event.target_key().unwrap().to_string(), "r/p#pull_request-7");

        assert!(matches!(
            n.normalize(suite("patcher/issue-42", "success")).unwrap(),
            Routing::Ignore(_)
        ));
        assert!(matches!(
            n.normalize(suite("feature/x", "failure")).unwrap(),
            Routing::Ignore(_)
        ));
    }

    #[test]
    fn test_missing_installation_is_rejected() {
        let event = parse(
            "issues",
            serde_json::json!({
                "action": "opened",
                "issue": {
                    "number": 42,
                    "title": "t",
                    "body": null,
                    "labels": [{"name": "patcher"}],
                    "user": {"login": "alice", "id": 2}
                },
                "repository": repository()
            }),
        );
        assert!(matches!(
            normalizer().normalize(event),
            Err(AppError::InvalidEvent(_))
        ));
    }
}
