#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;

use patcher::context::{Checkout, CodeContextProvider, FileSummary, RepoMap, SearchHit};
use patcher::dispatch::{EventKind, EventPayload, InboundEvent};
use patcher::error::{AppError, Result};
use patcher::llm::{ModelGateway, PromptContext, SchemaHint};
use patcher::platform::types::*;
use patcher::platform::SourceHostingGateway;
use patcher::workflow::machine::{Collaborators, WorkflowPolicy, WorkflowStateMachine};
use patcher::workflow::task::FileEdit;
use patcher::workflow::types::{CommitRef, PullRequestRef};

pub const OWN_BRANCH: &str = "patcher/issue-42-add-dry-run";

pub fn repo() -> RepoRef {
    RepoRef {
        full_name: "r/p".to_string(),
        clone_url: "https://github.com/r/p.git".to_string(),
        default_branch: "main".to_string(),
        installation_id: 1,
    }
}

pub fn issue(number: u64) -> Issue {
    Issue {
        number,
        title: "Add --dry-run".to_string(),
        body: "The `run` command should accept --dry-run.".to_string(),
        labels: vec!["patcher".to_string()],
        comments: vec![],
    }
}

pub fn pull_request(number: u64, head_branch: &str) -> PullRequest {
    PullRequest {
        number,
        title: "Fix #42: Add --dry-run".to_string(),
        body: "## Summary\n\nResolves #42".to_string(),
        url: format!("https://github.com/r/p/pull/{number}"),
        head_branch: head_branch.to_string(),
        head_sha: "head0".to_string(),
        base_branch: "main".to_string(),
    }
}

pub fn issue_event(number: u64) -> InboundEvent {
    InboundEvent::new(repo(), EventKind::IssueOpened, number, EventPayload::default())
}

pub fn review_event(number: u64, publish: bool, allow_fix: bool) -> InboundEvent {
    InboundEvent::new(
        repo(),
        EventKind::ReviewComment,
        number,
        EventPayload {
            text: Some("Please handle the empty case".to_string()),
            publish,
            allow_fix,
        },
    )
}

pub fn generation(files: &[(&str, &str)]) -> String {
    let files: Vec<_> = files
        .iter()
        .map(|(path, action)| json!({"path": path, "content": "print('ok')\n", "action": action}))
        .collect();
    json!({"files": files, "explanation": "Adds the flag"}).to_string()
}

pub fn review(approved: bool) -> String {
    let issues = if approved {
        json!([])
    } else {
        json!([{
            "severity": "error",
            "file_path": "src/cli.py",
            "line": 3,
            "description": "dry run still writes files",
            "suggestion": "guard the write"
        }])
    };
    json!({
        "assessment": if approved { "Looks good" } else { "Needs work" },
        "issues": issues,
        "requirements_met": approved,
        "approved": approved
    })
    .to_string()
}

pub fn policy() -> WorkflowPolicy {
    WorkflowPolicy {
        max_iterations: 3,
        validator_retry_limit: 2,
        protected_path_patterns: patcher::config::default_protected_path_patterns(),
        call_timeout: Duration::from_secs(5),
        branch_prefix: "patcher/".to_string(),
        max_context_files: 5,
        ci_wait: Duration::from_millis(200),
        ci_poll_interval: Duration::from_millis(10),
        own_check_patterns: patcher::config::default_own_check_patterns(),
    }
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub model: Arc<ScriptedModel>,
    pub context: Arc<FakeContext>,
}

impl Harness {
    pub fn new(gateway: FakeGateway, responses: Vec<Result<String>>) -> Self {
        Self {
            gateway: Arc::new(gateway),
            model: Arc::new(ScriptedModel::new(responses)),
            context: Arc::new(FakeContext::default()),
        }
    }

    pub fn machine(&self, policy: WorkflowPolicy) -> WorkflowStateMachine {
        WorkflowStateMachine::new(
            Collaborators {
                gateway: self.gateway.clone(),
                model: self.model.clone(),
                context: self.context.clone(),
            },
            policy,
        )
        .unwrap()
    }
}

/// In-memory source host that records every write.
#[derive(Default)]
pub struct FakeGateway {
    pub issues: Mutex<HashMap<u64, Issue>>,
    pub pulls: Mutex<HashMap<u64, PullRequest>>,
    pub diff: Mutex<String>,
    pub ci: Mutex<CiStatus>,
    /// Statuses served one per `get_ci_status` before falling back to `ci`.
    pub ci_sequence: Mutex<VecDeque<CiStatus>>,
    pub ci_polls: AtomicUsize,
    /// Error returned by `get_issue` instead of the issue.
    pub issue_error: Mutex<Option<AppError>>,
    /// Delay applied to `get_issue`.
    pub delay: Mutex<Option<Duration>>,
    /// When set, every `get_issue` consumes a permit first.
    pub gate: Mutex<Option<Arc<Semaphore>>>,

    pub applied: Mutex<Vec<(String, String, Vec<FileEdit>)>>,
    pub opened: Mutex<Vec<CreatePullRequest>>,
    pub bodies: Mutex<Vec<(u64, String)>>,
    pub reviews: Mutex<Vec<ReviewSubmission>>,
    pub comments: Mutex<Vec<(u64, String)>>,
}

impl FakeGateway {
    pub fn with_issue(self, issue: Issue) -> Self {
        self.issues.lock().unwrap().insert(issue.number, issue);
        self
    }

    pub fn with_pull(self, pr: PullRequest) -> Self {
        self.pulls.lock().unwrap().insert(pr.number, pr);
        self
    }

    pub fn with_diff(self, diff: &str) -> Self {
        *self.diff.lock().unwrap() = diff.to_string();
        self
    }

    pub fn with_failing_check(self, name: &str) -> Self {
        self.ci.lock().unwrap().checks.push(CiCheck {
            name: name.to_string(),
            state: CheckState::Failure,
            output: Some("assert dry_run".to_string()),
        });
        self
    }

    pub fn with_check(self, name: &str, state: CheckState) -> Self {
        self.ci.lock().unwrap().checks.push(CiCheck {
            name: name.to_string(),
            state,
            output: None,
        });
        self
    }

    /// CI reports `name` as running for `polls` requests, then as passed.
    pub fn with_check_finishing_after(self, name: &str, polls: usize) -> Self {
        let running = CiStatus {
            checks: vec![CiCheck {
                name: name.to_string(),
                state: CheckState::Pending,
                output: None,
            }],
        };
        self.ci_sequence
            .lock()
            .unwrap()
            .extend(std::iter::repeat(running).take(polls));
        self.with_check(name, CheckState::Success)
    }

    pub fn ci_poll_count(&self) -> usize {
        self.ci_polls.load(Ordering::SeqCst)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceHostingGateway for FakeGateway {
    async fn get_issue(&self, _repo: &RepoRef, number: u64) -> Result<Issue> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?
                .forget();
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.issue_error.lock().unwrap().take() {
            return Err(e);
        }
        self.issues
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| AppError::GitHubNotFound(format!("issue {number}")))
    }

    async fn get_pull_request(&self, _repo: &RepoRef, number: u64) -> Result<PullRequest> {
        self.pulls
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| AppError::GitHubNotFound(format!("pull request {number}")))
    }

    async fn get_pull_request_diff(&self, _repo: &RepoRef, _number: u64) -> Result<String> {
        Ok(self.diff.lock().unwrap().clone())
    }

    async fn apply_change_set(
        &self,
        _repo: &RepoRef,
        branch: &str,
        base: &str,
        change_set: &[FileEdit],
        _message: &str,
    ) -> Result<CommitRef> {
        let mut applied = self.applied.lock().unwrap();
        applied.push((branch.to_string(), base.to_string(), change_set.to_vec()));
        Ok(CommitRef {
            sha: format!("sha{}", applied.len()),
            branch: branch.to_string(),
        })
    }

    async fn open_pull_request(
        &self,
        _repo: &RepoRef,
        pr: &CreatePullRequest,
    ) -> Result<PullRequestRef> {
        self.opened.lock().unwrap().push(pr.clone());
        Ok(PullRequestRef {
            number: 100,
            url: "https://github.com/r/p/pull/100".to_string(),
            head_branch: pr.head_branch.clone(),
        })
    }

    async fn update_pull_request_body(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.bodies.lock().unwrap().push((number, body.to_string()));
        Ok(())
    }

    async fn publish_review(
        &self,
        _repo: &RepoRef,
        _number: u64,
        review: &ReviewSubmission,
    ) -> Result<()> {
        self.reviews.lock().unwrap().push(review.clone());
        Ok(())
    }

    async fn get_ci_status(&self, _repo: &RepoRef, _git_ref: &str) -> Result<CiStatus> {
        self.ci_polls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.ci_sequence.lock().unwrap().pop_front() {
            return Ok(status);
        }
        Ok(self.ci.lock().unwrap().clone())
    }

    async fn post_comment(&self, _repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.comments.lock().unwrap().push((number, body.to_string()));
        Ok(())
    }
}

/// Model that replays a fixed list of responses and records what it was asked.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
    /// Schema name and number of corrections for every call.
    pub requests: Mutex<Vec<(&'static str, usize)>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for ScriptedModel {
    async fn complete(&self, prompt: &PromptContext, schema: &SchemaHint) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((schema.name, prompt.corrections().len()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::ModelApi("script exhausted".to_string())))
    }
}

/// Code context over a fixed set of files.
#[derive(Default)]
pub struct FakeContext {
    pub files: Mutex<HashMap<String, String>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

#[async_trait]
impl CodeContextProvider for FakeContext {
    async fn open(&self, _repo: &RepoRef, git_ref: &str, slot: u64) -> Result<Checkout> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Checkout {
            slot,
            root: PathBuf::from("/nonexistent/checkout"),
            git_ref: git_ref.to_string(),
        })
    }

    async fn map_repository(&self, _checkout: &Checkout) -> Result<RepoMap> {
        let files = self.files.lock().unwrap();
        let mut paths: Vec<&String> = files.keys().collect();
        paths.sort();
        Ok(RepoMap {
            languages: vec![("python".to_string(), paths.len())],
            files: paths
                .into_iter()
                .map(|path| FileSummary {
                    path: path.clone(),
                    language: "python",
                    symbols: vec![],
                })
                .collect(),
        })
    }

    async fn search_code(&self, _checkout: &Checkout, _query: &str) -> Result<Vec<SearchHit>> {
        Ok(vec![])
    }

    async fn read_file(&self, _checkout: &Checkout, path: &str) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::Workspace(format!("File not found: {path}")))
    }

    async fn find_definition(
        &self,
        _checkout: &Checkout,
        symbol: &str,
        _language: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter(|(_, content)| content.contains(&format!("def {symbol}")))
            .map(|(path, _)| SearchHit {
                path: path.clone(),
                line: 1,
                text: format!("def {symbol}():"),
            })
            .collect())
    }

    async fn close(&self, _checkout: Checkout) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
