use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::context::{Checkout, CodeContextProvider, RepoMap};
use crate::dispatch::event::InboundEvent;
use crate::dispatch::registry::CancelToken;
use crate::error::{AppError, Result};
use crate::llm::{ModelGateway, PromptContext};
use crate::platform::state::{requirements_hash, visible_body, IterationStatus, PrState};
use crate::platform::types::{
    CreatePullRequest, InlineComment, Issue, PullRequest, ReviewEvent, ReviewSubmission,
};
use crate::platform::SourceHostingGateway;
use crate::workflow::iteration::{IterationController, IterationDecision};
use crate::workflow::prompt;
use crate::workflow::restriction::{PolicyDecision, RestrictionEnforcer};
use crate::workflow::schemas::{CodeGeneration, CodeReview};
use crate::workflow::task::{FileEdit, TaskKind, TerminalResult, WorkflowState, WorkflowTask};
use crate::workflow::types::{CiAnalysis, ReviewIssue, ReviewResult};
use crate::workflow::validator::{StructuredOutputValidator, ValidationOutcome};

const MAX_MAP_FILES: usize = 200;
const MAX_SEARCH_TERMS: usize = 8;
const MAX_SLUG_LEN: usize = 40;

/// External systems the machine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn SourceHostingGateway>,
    pub model: Arc<dyn ModelGateway>,
    pub context: Arc<dyn CodeContextProvider>,
}

/// Limits and policy applied to every task.
#[derive(Debug, Clone)]
pub struct WorkflowPolicy {
    pub max_iterations: u32,
    pub validator_retry_limit: u32,
    pub protected_path_patterns: Vec<String>,
    pub call_timeout: Duration,
    pub branch_prefix: String,
    pub max_context_files: usize,
    /// Upper bound on waiting for running checks during a review.
    pub ci_wait: Duration,
    pub ci_poll_interval: Duration,
    pub own_check_patterns: Vec<String>,
}

impl WorkflowPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.orchestration.max_iterations,
            validator_retry_limit: config.orchestration.validator_retry_limit,
            protected_path_patterns: config.orchestration.protected_path_patterns.clone(),
            call_timeout: config.orchestration.external_call_timeout(),
            branch_prefix: config.github.branch_prefix.clone(),
            max_context_files: config.agent.max_context_files,
            ci_wait: config.orchestration.ci_wait(),
            ci_poll_interval: config.orchestration.ci_poll_interval(),
            own_check_patterns: config.orchestration.own_check_patterns.clone(),
        }
    }
}

/// Values a single run picks up along the way. Dropped when the run ends.
struct Scratch<'a> {
    event: &'a InboundEvent,
    cancel: &'a CancelToken,
    issue: Option<Issue>,
    pr: Option<PullRequest>,
    checkout: Option<Checkout>,
    ci: Option<CiAnalysis>,
    pr_state: Option<PrState>,
    explanation: String,
}

impl<'a> Scratch<'a> {
    fn new(event: &'a InboundEvent, cancel: &'a CancelToken) -> Self {
        Self {
            event,
            cancel,
            issue: None,
            pr: None,
            checkout: None,
            ci: None,
            pr_state: None,
            explanation: String::new(),
        }
    }

    fn pr(&self) -> Result<&PullRequest> {
        self.pr
            .as_ref()
            .ok_or_else(|| AppError::Internal("Pull request not loaded".to_string()))
    }
}

/// Drives one task from `Received` to a terminal state.
pub struct WorkflowStateMachine {
    collaborators: Collaborators,
    enforcer: RestrictionEnforcer,
    iterations: IterationController,
    validator: StructuredOutputValidator,
    call_timeout: Duration,
    branch_prefix: String,
    max_context_files: usize,
    ci_wait: Duration,
    ci_poll_interval: Duration,
    own_check_patterns: Vec<String>,
    next_slot: AtomicU64,
}

impl WorkflowStateMachine {
    /// Fails when a protected-path pattern does not compile.
    pub fn new(collaborators: Collaborators, policy: WorkflowPolicy) -> Result<Self> {
        Ok(Self {
            collaborators,
            enforcer: RestrictionEnforcer::new(&policy.protected_path_patterns)?,
            iterations: IterationController::new(policy.max_iterations),
            validator: StructuredOutputValidator::new(
                policy.validator_retry_limit,
                policy.call_timeout,
            ),
            call_timeout: policy.call_timeout,
            branch_prefix: policy.branch_prefix,
            max_context_files: policy.max_context_files,
            ci_wait: policy.ci_wait,
            ci_poll_interval: policy.ci_poll_interval,
            own_check_patterns: policy.own_check_patterns,
            next_slot: AtomicU64::new(1),
        })
    }

    pub fn max_iterations(&self) -> u32 {
        self.iterations.max_iterations()
    }

    /// Run `task` to completion. Cancellation is observed between states.
    pub async fn run(
        &self,
        mut task: WorkflowTask,
        event: &InboundEvent,
        cancel: &CancelToken,
    ) -> WorkflowTask {
        let mut scratch = Scratch::new(event, cancel);

        while !task.state.is_terminal() {
            let next = if cancel.is_cancelled() {
                WorkflowState::Terminated(TerminalResult::Cancelled)
            } else {
                self.step(&mut task, &mut scratch).await
            };
            Self::transition(&mut task, next);
        }

        if let Some(checkout) = scratch.checkout.take() {
            let context = Arc::clone(&self.collaborators.context);
            if let Err(e) = self.call("close checkout", context.close(checkout)).await {
                tracing::warn!(key = %task.key, error = %e, "Failed to close checkout");
            }
        }

        task
    }

    fn transition(task: &mut WorkflowTask, next: WorkflowState) {
        tracing::info!(
            key = %task.key,
            from = task.state.name(),
            to = next.name(),
            iteration = task.iteration,
            "State transition"
        );

        if let WorkflowState::Terminated(result) = &next {
            match result {
                TerminalResult::Success => {
                    tracing::info!(key = %task.key, iteration = task.iteration, "Task succeeded")
                }
                other => tracing::warn!(
                    key = %task.key,
                    result = other.label(),
                    iteration = task.iteration,
                    "Task ended without success"
                ),
            }
            task.terminal_result = Some(result.clone());
        }
        task.state = next;
    }

    /// The transition function. Every state maps to exactly one next state;
    /// errors from collaborators become `ExternalFailure`.
    async fn step(&self, task: &mut WorkflowTask, scratch: &mut Scratch<'_>) -> WorkflowState {
        let state = task.state.clone();
        let next = match &state {
            WorkflowState::Received => Ok(WorkflowState::Analyzing),
            WorkflowState::Analyzing => self.analyze(task, scratch).await,
            WorkflowState::Generating => self.generate(task, scratch).await,
            WorkflowState::Validating => Ok(self.enforce(task)),
            WorkflowState::Committing => self.commit(task, scratch).await,
            WorkflowState::AwaitingReview => {
                Ok(WorkflowState::Terminated(TerminalResult::Success))
            }
            WorkflowState::Reviewing => self.review(task, scratch).await,
            WorkflowState::Fixing => self.fix(task, scratch).await,
            WorkflowState::Terminated(result) => Ok(WorkflowState::Terminated(result.clone())),
        };

        next.unwrap_or_else(|e| {
            tracing::warn!(
                key = %task.key,
                state = state.name(),
                error = %e,
                kind = ?e.external_kind(),
                "External call failed"
            );
            WorkflowState::Terminated(TerminalResult::external(&e))
        })
    }

    /// Bound an external call by the configured timeout.
    async fn call<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "{what} exceeded {}s",
                    self.call_timeout.as_secs()
                ))
            })?
    }

    async fn analyze(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        let gateway = Arc::clone(&self.collaborators.gateway);
        let repo = &scratch.event.repository;
        let number = task.key.number();

        let (git_ref, search_text) = match task.kind {
            TaskKind::CodeGeneration => {
                let issue = self.call("get_issue", gateway.get_issue(repo, number)).await?;
                let text = format!("{}\n{}\n{}", issue.title, issue.body, issue.format_comments());
                scratch.issue = Some(issue);
                (repo.default_branch.clone(), text)
            }
            TaskKind::Review => {
                let pr = self
                    .call("get_pull_request", gateway.get_pull_request(repo, number))
                    .await?;

                let pr_state = PrState::extract(&pr.body);
                if let Some(state) = &pr_state {
                    self.iterations.resume(task, state.fix_iterations());
                }

                let linked = pr_state
                    .as_ref()
                    .map(|s| s.issue_number)
                    .filter(|n| *n > 0)
                    .or_else(|| linked_issue(&pr.body));
                if let Some(issue_number) = linked {
                    match self
                        .call("get_issue", gateway.get_issue(repo, issue_number))
                        .await
                    {
                        Ok(issue) => scratch.issue = Some(issue),
                        Err(e) => {
                            tracing::warn!(key = %task.key, issue = issue_number, error = %e, "Linked issue unavailable");
                            task.context
                                .add_note(format!("Linked issue #{issue_number} could not be loaded."));
                        }
                    }
                }

                if let Some(text) = &scratch.event.payload.text {
                    if !text.trim().is_empty() {
                        task.context.add_feedback(text.trim());
                    }
                }

                let text = format!(
                    "{}\n{}\n{}",
                    pr.title,
                    visible_body(&pr.body),
                    scratch.event.payload.text.as_deref().unwrap_or_default()
                );
                let git_ref = pr.head_branch.clone();
                scratch.pr_state = pr_state;
                scratch.pr = Some(pr);
                (git_ref, text)
            }
        };

        let context = Arc::clone(&self.collaborators.context);
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let checkout = self
            .call("open checkout", context.open(repo, &git_ref, slot))
            .await?;
        let checkout = scratch.checkout.insert(checkout);

        let map = self
            .call("map_repository", context.map_repository(checkout))
            .await?;
        for (language, files) in &map.languages {
            task.context.add_language(language, *files);
        }
        if !map.files.is_empty() {
            task.context
                .add_note(format!("## Repository Map\n{}", map.render(MAX_MAP_FILES)));
        }

        let paths = self.relevant_paths(task, checkout, &map, &search_text).await;
        self.add_excerpts(task, checkout, paths).await;

        Ok(match task.kind {
            TaskKind::CodeGeneration => WorkflowState::Generating,
            TaskKind::Review => WorkflowState::Reviewing,
        })
    }

    /// Files worth showing the model: definitions of identifiers quoted in
    /// `text`, then files whose path `text` names. Lookup failures are skipped.
    async fn relevant_paths(
        &self,
        task: &WorkflowTask,
        checkout: &Checkout,
        map: &RepoMap,
        text: &str,
    ) -> Vec<String> {
        let context = &self.collaborators.context;
        let language = task.context.primary_language();
        let mut paths: Vec<String> = Vec::new();

        for term in quoted_identifiers(text) {
            let mut hits = self
                .call("find_definition", context.find_definition(checkout, &term, language))
                .await
                .unwrap_or_else(|e| {
                    tracing::debug!(term, error = %e, "Definition lookup failed");
                    Vec::new()
                });
            if hits.is_empty() {
                hits = self
                    .call("search_code", context.search_code(checkout, &regex::escape(&term)))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::debug!(term, error = %e, "Code search failed");
                        Vec::new()
                    });
            }
            for hit in hits {
                if !paths.contains(&hit.path) {
                    paths.push(hit.path);
                }
            }
        }

        for file in &map.files {
            if text.contains(&file.path) && !paths.contains(&file.path) {
                paths.push(file.path.clone());
            }
        }

        paths.truncate(self.max_context_files);
        paths
    }

    async fn add_excerpts(&self, task: &mut WorkflowTask, checkout: &Checkout, paths: Vec<String>) {
        let context = &self.collaborators.context;
        for path in paths {
            match self.call("read_file", context.read_file(checkout, &path)).await {
                Ok(content) => task.context.add_excerpt(&path, &content),
                Err(e) => tracing::debug!(path, error = %e, "Skipping unreadable file"),
            }
        }
    }

    async fn generate(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        let issue = scratch
            .issue
            .as_ref()
            .ok_or_else(|| AppError::Internal("Issue not loaded".to_string()))?;

        let request = PromptContext::new(
            prompt::system_prompt_for_code(
                &scratch.event.repository.full_name,
                self.enforcer_patterns().as_slice(),
            ),
            prompt::generation_prompt(issue, &task.context),
        );
        self.request_change_set(task, scratch, &request).await
    }

    fn enforcer_patterns(&self) -> Vec<String> {
        self.enforcer.patterns().map(str::to_string).collect()
    }

    async fn request_change_set(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
        request: &PromptContext,
    ) -> Result<WorkflowState> {
        let outcome = self
            .validator
            .request::<CodeGeneration>(self.collaborators.model.as_ref(), request)
            .await?;

        Ok(match outcome {
            ValidationOutcome::Parsed(generation) => {
                let (change_set, explanation) = generation.into_change_set();
                tracing::info!(key = %task.key, files = change_set.len(), "Change set generated");
                task.replace_change_set(change_set);
                scratch.explanation = explanation;
                WorkflowState::Validating
            }
            ValidationOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                tracing::warn!(key = %task.key, attempts, error = %last_error, "Code generation output never validated");
                WorkflowState::Terminated(TerminalResult::ValidationExhausted { last_error })
            }
        })
    }

    fn enforce(&self, task: &WorkflowTask) -> WorkflowState {
        match self.enforcer.check(&task.change_set) {
            PolicyDecision::Allow => WorkflowState::Committing,
            PolicyDecision::Reject(violations) => {
                tracing::warn!(key = %task.key, ?violations, "Change set touches protected paths");
                WorkflowState::Terminated(TerminalResult::RejectedByPolicy { violations })
            }
        }
    }

    async fn commit(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        match task.kind {
            TaskKind::CodeGeneration => self.open_pull_request(task, scratch).await,
            TaskKind::Review => self.push_fix(task, scratch).await,
        }
    }

    async fn open_pull_request(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        let gateway = Arc::clone(&self.collaborators.gateway);
        let repo = &scratch.event.repository;
        let issue = scratch
            .issue
            .as_ref()
            .ok_or_else(|| AppError::Internal("Issue not loaded".to_string()))?;

        let branch = branch_name(&self.branch_prefix, issue.number, &issue.title);
        let message = format!(
            "Resolve #{}: {}\n\n{}",
            issue.number, issue.title, scratch.explanation
        );
        let commit = self
            .call(
                "apply_change_set",
                gateway.apply_change_set(
                    repo,
                    &branch,
                    &repo.default_branch,
                    &task.change_set,
                    message.trim_end(),
                ),
            )
            .await?;
        task.outcome.commits.push(commit.sha.clone());

        let mut state = PrState::new(
            issue.number,
            &branch,
            requirements_hash(&format!("{}\n{}", issue.title, issue.body)),
        );
        state.record(
            0,
            IterationStatus::AwaitingReview,
            changed_paths(&task.change_set),
            None,
            None,
            Some(commit.sha.clone()),
        );

        let body = state.embed(&pull_request_body(issue, &scratch.explanation, &task.change_set))?;
        let request = CreatePullRequest {
            title: format!("Fix #{}: {}", issue.number, issue.title),
            body,
            head_branch: branch,
            base_branch: repo.default_branch.clone(),
        };
        let pr = self
            .call("open_pull_request", gateway.open_pull_request(repo, &request))
            .await?;

        tracing::info!(key = %task.key, pr = pr.number, url = %pr.url, "Opened pull request");
        task.outcome.pull_request = Some(pr);
        scratch.pr_state = Some(state);

        Ok(WorkflowState::AwaitingReview)
    }

    async fn push_fix(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        let gateway = Arc::clone(&self.collaborators.gateway);
        let repo = &scratch.event.repository;
        let pr = scratch.pr()?.clone();

        let message = format!(
            "Address review feedback (iteration {})\n\n{}",
            task.iteration, scratch.explanation
        );
        let commit = self
            .call(
                "apply_change_set",
                gateway.apply_change_set(
                    repo,
                    &pr.head_branch,
                    &pr.head_branch,
                    &task.change_set,
                    message.trim_end(),
                ),
            )
            .await?;
        task.outcome.commits.push(commit.sha.clone());

        let mut state = scratch.pr_state.take().unwrap_or_else(|| {
            let issue_number = scratch.issue.as_ref().map(|i| i.number).unwrap_or(0);
            PrState::new(issue_number, &pr.head_branch, String::new())
        });
        state.pr_number = Some(pr.number);
        state.record(
            task.iteration,
            IterationStatus::AwaitingReview,
            changed_paths(&task.change_set),
            task.context.feedback().last().cloned(),
            scratch
                .ci
                .as_ref()
                .map(|ci| ci.verdict().to_string()),
            Some(commit.sha.clone()),
        );
        let body = state.embed(&pr.body)?;
        self.call(
            "update_pull_request_body",
            gateway.update_pull_request_body(repo, pr.number, &body),
        )
        .await?;

        if let Some(pr) = scratch.pr.as_mut() {
            pr.body = body;
            pr.head_sha = commit.sha;
        }
        scratch.pr_state = Some(state);

        Ok(WorkflowState::Reviewing)
    }

    async fn review(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        let gateway = Arc::clone(&self.collaborators.gateway);
        let repo = &scratch.event.repository;
        let pr = scratch.pr()?.clone();

        let diff = self
            .call("get_pull_request_diff", gateway.get_pull_request_diff(repo, pr.number))
            .await?;
        let ci = self.settled_ci(task, scratch, &pr.head_sha).await?;

        // The checkout matches the PR head until this run pushes a fix.
        if task.outcome.commits.is_empty() {
            if let Some(checkout) = scratch.checkout.clone() {
                let mut changed = diff_paths(&diff);
                changed.truncate(self.max_context_files);
                self.add_excerpts(task, &checkout, changed).await;
            }
        }

        let request = PromptContext::new(
            prompt::system_prompt_for_review(&repo.full_name),
            prompt::review_prompt(&pr, scratch.issue.as_ref(), &diff, &ci),
        );
        let review = match self
            .validator
            .request::<CodeReview>(self.collaborators.model.as_ref(), &request)
            .await?
        {
            ValidationOutcome::Parsed(review) => review.into_review_result(),
            ValidationOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                tracing::warn!(key = %task.key, attempts, error = %last_error, "Review output never validated");
                return Ok(WorkflowState::Terminated(
                    TerminalResult::ValidationExhausted { last_error },
                ));
            }
        };

        let approved = review.approved && ci.passed;
        let needs_changes = !review.approved || ci.has_failures();
        let own_branch = pr.head_branch.starts_with(&self.branch_prefix);
        tracing::info!(
            key = %task.key,
            approved,
            ci = ci.verdict(),
            issues = review.issues.len(),
            "Review complete"
        );

        if scratch.event.payload.publish {
            let submission = review_submission(&review, &ci, approved, needs_changes, own_branch);
            self.call(
                "publish_review",
                gateway.publish_review(repo, pr.number, &submission),
            )
            .await?;
        }

        if ci.has_failures() {
            task.context.add_note(format!(
                "CI failing at {}: {}",
                pr.head_sha,
                ci.failures
                    .iter()
                    .map(|f| f.check.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        } else if ci.is_pending() {
            task.context.add_note(format!(
                "CI still running at {}: {}",
                pr.head_sha,
                ci.pending.join(", ")
            ));
        }

        // Running checks alone never trigger a fix.
        let fixable = scratch.event.payload.allow_fix && own_branch;
        if needs_changes && fixable {
            if !review.requirements_met {
                task.context
                    .add_feedback(format!("Requirements not met: {}", review.summary));
            }
            for issue in review.blocking_issues() {
                task.context.add_feedback(describe_issue(issue));
            }
        }

        task.outcome.review = Some(review);
        scratch.ci = Some(ci);

        Ok(if needs_changes && fixable {
            WorkflowState::Fixing
        } else {
            WorkflowState::Terminated(TerminalResult::Success)
        })
    }

    /// Poll CI until no relevant check is running or the wait runs out.
    /// Whatever is still pending then is reported as pending.
    async fn settled_ci(
        &self,
        task: &WorkflowTask,
        scratch: &Scratch<'_>,
        head_sha: &str,
    ) -> Result<CiAnalysis> {
        let gateway = Arc::clone(&self.collaborators.gateway);
        let repo = &scratch.event.repository;
        let deadline = tokio::time::Instant::now() + self.ci_wait;

        loop {
            let status = self
                .call("get_ci_status", gateway.get_ci_status(repo, head_sha))
                .await?;
            let ci = CiAnalysis::from_status(&status, &self.own_check_patterns);
            if !ci.is_pending() || scratch.cancel.is_cancelled() {
                return Ok(ci);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(
                    key = %task.key,
                    pending = ?ci.pending,
                    waited_secs = self.ci_wait.as_secs(),
                    "CI still running after wait"
                );
                return Ok(ci);
            }
            tracing::debug!(key = %task.key, pending = ?ci.pending, "Waiting for CI");
            tokio::time::sleep(self.ci_poll_interval.min(deadline - now)).await;
        }
    }

    async fn fix(
        &self,
        task: &mut WorkflowTask,
        scratch: &mut Scratch<'_>,
    ) -> Result<WorkflowState> {
        let iteration = match self.iterations.advance(task) {
            IterationDecision::Continue(n) => n,
            IterationDecision::Exceeded => {
                return Ok(WorkflowState::Terminated(
                    TerminalResult::IterationsExhausted {
                        iterations: task.iteration,
                    },
                ));
            }
        };
        tracing::info!(key = %task.key, iteration, max = self.max_iterations(), "Starting fix cycle");

        let pr = scratch.pr()?;
        let request = PromptContext::new(
            prompt::system_prompt_for_code(
                &scratch.event.repository.full_name,
                self.enforcer_patterns().as_slice(),
            ),
            prompt::fix_prompt(
                scratch.issue.as_ref(),
                pr,
                scratch.ci.as_ref(),
                &task.change_set,
                &task.context,
            ),
        );
        self.request_change_set(task, scratch, &request).await
    }
}

/// `<prefix>issue-<n>-<slug>`, with the slug cut to a readable length.
pub fn branch_name(prefix: &str, issue_number: u64, title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        format!("{prefix}issue-{issue_number}")
    } else {
        format!("{prefix}issue-{issue_number}-{slug}")
    }
}

/// Issue number from a "Resolves #N" style reference.
pub fn linked_issue(body: &str) -> Option<u64> {
    let lower = body.to_lowercase();
    ["resolves", "fixes", "closes"].iter().find_map(|keyword| {
        lower.match_indices(keyword).find_map(|(i, _)| {
            let rest = lower[i + keyword.len()..].trim_start();
            let digits: String = rest
                .strip_prefix('#')?
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok().filter(|n| *n > 0)
        })
    })
}

/// Identifiers quoted with backticks in free text.
fn quoted_identifiers(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for (i, span) in text.split('`').enumerate() {
        let span = span.trim();
        let is_identifier = i % 2 == 1
            && (3..=64).contains(&span.len())
            && span.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !span.starts_with(|c: char| c.is_ascii_digit());
        if is_identifier && !terms.iter().any(|t| t == span) {
            terms.push(span.to_string());
        }
        if terms.len() >= MAX_SEARCH_TERMS {
            break;
        }
    }
    terms
}

/// Paths touched by a unified diff.
fn diff_paths(diff: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in diff.lines() {
        if let Some(path) = line.strip_prefix("+++ b/") {
            let path = path.trim().to_string();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

fn changed_paths(change_set: &[FileEdit]) -> Vec<String> {
    change_set
        .iter()
        .map(|f| format!("{} ({})", f.path, f.kind))
        .collect()
}

fn pull_request_body(issue: &Issue, explanation: &str, change_set: &[FileEdit]) -> String {
    let changes = change_set
        .iter()
        .map(|f| format!("- `{}` ({})", f.path, f.kind))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "## Summary\n\n{}\n\nResolves #{}\n\n## Changes\n\n{changes}\n\n---\n*Generated by Patcher*",
        if explanation.trim().is_empty() {
            issue.title.as_str()
        } else {
            explanation.trim()
        },
        issue.number,
    )
}

fn describe_issue(issue: &ReviewIssue) -> String {
    let location = match &issue.location {
        Some(loc) => match loc.line {
            Some(line) => format!("{}:{line}: ", loc.path),
            None => format!("{}: ", loc.path),
        },
        None => String::new(),
    };
    match &issue.suggestion {
        Some(suggestion) => format!("{location}{} (suggestion: {suggestion})", issue.description),
        None => format!("{location}{}", issue.description),
    }
}

/// GitHub does not let an app request changes on its own pull request, so
/// rejections on patcher branches are posted as comments. A review that
/// only waits on running checks is a comment too.
fn review_submission(
    review: &ReviewResult,
    ci: &CiAnalysis,
    approved: bool,
    needs_changes: bool,
    own_branch: bool,
) -> ReviewSubmission {
    let event = if approved {
        ReviewEvent::Approve
    } else if needs_changes && !own_branch {
        ReviewEvent::RequestChanges
    } else {
        ReviewEvent::Comment
    };
    let comments = review
        .issues
        .iter()
        .filter_map(|issue| {
            let location = issue.location.as_ref()?;
            Some(InlineComment {
                path: location.path.clone(),
                line: location.line?,
                body: match &issue.suggestion {
                    Some(s) => format!("**{:?}**: {}\n\n{s}", issue.severity, issue.description),
                    None => format!("**{:?}**: {}", issue.severity, issue.description),
                },
            })
        })
        .collect();

    ReviewSubmission {
        event,
        body: review.render(Some(ci)),
        comments,
    }
}
