mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use common::*;
use patcher::dispatch::CancelToken;
use patcher::error::{AppError, ExternalErrorKind};
use patcher::platform::state::{IterationStatus, PrState};
use patcher::platform::types::{CheckState, ReviewEvent};
use patcher::workflow::task::{
    EditKind, TargetKey, TaskKind, TerminalResult, WorkflowState, WorkflowTask,
};

async fn run_event(
    harness: &Harness,
    policy: patcher::workflow::machine::WorkflowPolicy,
    event: patcher::dispatch::InboundEvent,
) -> WorkflowTask {
    let machine = harness.machine(policy);
    let task = WorkflowTask::new(event.target_key().unwrap(), event.kind.task_kind());
    machine.run(task, &event, &CancelToken::default()).await
}

fn result(task: &WorkflowTask) -> &TerminalResult {
    task.terminal_result.as_ref().expect("terminal result")
}

#[tokio::test]
async fn test_issue_becomes_pull_request() {
    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)),
        vec![Ok(generation(&[("src/cli.py", "modify")]))],
    );
    harness
        .context
        .files
        .lock()
        .unwrap()
        .insert("src/cli.py".to_string(), "def run():\n    pass\n".to_string());

    let task = run_event(&harness, policy(), issue_event(42)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    assert!(matches!(task.state, WorkflowState::Terminated(TerminalResult::Success)));
    assert_eq!(harness.model.calls(), 1);

    let applied = harness.gateway.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, OWN_BRANCH);
    assert_eq!(applied[0].1, "main");

    let opened = harness.gateway.opened.lock().unwrap();
    assert_eq!(opened[0].title, "Fix #42: Add --dry-run");
    assert!(opened[0].body.contains("Resolves #42"));
    let state = PrState::extract(&opened[0].body).expect("state block");
    assert_eq!(state.issue_number, 42);
    assert_eq!(state.fix_iterations(), 0);

    assert_eq!(task.outcome.pull_request.as_ref().unwrap().number, 100);
    assert_eq!(task.outcome.commits, vec!["sha1".to_string()]);
    // `run` was quoted in the issue, so its definition was read
    assert_eq!(task.context.excerpts()[0].path, "src/cli.py");
    assert_eq!(harness.context.opened.load(Ordering::SeqCst), 1);
    assert_eq!(harness.context.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_protected_path_rejects_whole_change_set() {
    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)),
        vec![Ok(generation(&[
            ("src/cli.py", "modify"),
            (".github/workflows/ci.yml", "create"),
        ]))],
    );

    let task = run_event(&harness, policy(), issue_event(42)).await;

    assert_eq!(
        result(&task),
        &TerminalResult::RejectedByPolicy {
            violations: vec!["/.github/workflows/ci.yml".to_string()]
        }
    );
    assert_eq!(harness.gateway.applied_count(), 0);
    assert!(harness.gateway.opened.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_validation_gives_up_after_retry_limit() {
    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)),
        vec![
            Ok("I think you should edit cli.py".to_string()),
            Ok("{}".to_string()),
            Ok(r#"{"files": [], "explanation": "nothing"}"#.to_string()),
            Ok(generation(&[("src/cli.py", "modify")])),
        ],
    );

    let task = run_event(&harness, policy(), issue_event(42)).await;

    let TerminalResult::ValidationExhausted { last_error } = result(&task) else {
        panic!("unexpected result {:?}", task.terminal_result);
    };
    assert!(last_error.contains("at least one change"));
    assert_eq!(harness.model.calls(), 3);
    // every retry carries all earlier corrections
    let requests = harness.model.requests.lock().unwrap();
    let corrections: Vec<usize> = requests.iter().map(|(_, c)| *c).collect();
    assert_eq!(corrections, vec![0, 1, 2]);
    assert_eq!(harness.gateway.applied_count(), 0);
}

#[tokio::test]
async fn test_validation_recovers_on_retry() {
    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)),
        vec![
            Ok("```json\n{\"files\": [{\"path\": \"a.py\"}]}\n```".to_string()),
            Ok(generation(&[("src/cli.py", "modify")])),
        ],
    );

    let task = run_event(&harness, policy(), issue_event(42)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(harness.model.calls(), 2);
}

#[tokio::test]
async fn test_missing_action_is_sent_back_not_defaulted() {
    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)),
        vec![
            Ok(r#"{"files":[{"path":"new_module.py","content":"x"}]}"#.to_string()),
            Ok(generation(&[("new_module.py", "create")])),
        ],
    );

    let task = run_event(&harness, policy(), issue_event(42)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(harness.model.calls(), 2);
    let applied = harness.gateway.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].2[0].kind, EditKind::Create);
}

#[tokio::test]
async fn test_gateway_error_is_external_failure() {
    let gateway = FakeGateway::default().with_issue(issue(42));
    *gateway.issue_error.lock().unwrap() = Some(AppError::GitHubRateLimited("limit".into()));
    let harness = Harness::new(gateway, vec![]);

    let task = run_event(&harness, policy(), issue_event(42)).await;

    let TerminalResult::ExternalFailure { kind, .. } = result(&task) else {
        panic!("unexpected result {:?}", task.terminal_result);
    };
    assert_eq!(*kind, ExternalErrorKind::RateLimit);
    assert_eq!(harness.model.calls(), 0);
    assert_eq!(harness.context.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_model_error_is_not_retried() {
    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)),
        vec![
            Err(AppError::ModelAuth("bad key".into())),
            Ok(generation(&[("src/cli.py", "modify")])),
        ],
    );

    let task = run_event(&harness, policy(), issue_event(42)).await;

    let TerminalResult::ExternalFailure { kind, .. } = result(&task) else {
        panic!("unexpected result {:?}", task.terminal_result);
    };
    assert_eq!(*kind, ExternalErrorKind::Auth);
    assert_eq!(harness.model.calls(), 1);
    // the checkout opened during analysis is still released
    assert_eq!(harness.context.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_call_times_out() {
    let gateway = FakeGateway::default().with_issue(issue(42));
    *gateway.delay.lock().unwrap() = Some(Duration::from_millis(500));
    let harness = Harness::new(gateway, vec![]);

    let mut policy = policy();
    policy.call_timeout = Duration::from_millis(20);
    let task = run_event(&harness, policy, issue_event(42)).await;

    let TerminalResult::ExternalFailure { kind, .. } = result(&task) else {
        panic!("unexpected result {:?}", task.terminal_result);
    };
    assert_eq!(*kind, ExternalErrorKind::Timeout);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let harness = Harness::new(FakeGateway::default().with_issue(issue(42)), vec![]);
    let machine = harness.machine(policy());
    let event = issue_event(42);
    let cancel = CancelToken::default();
    cancel.cancel();

    let task = WorkflowTask::new(event.target_key().unwrap(), TaskKind::CodeGeneration);
    let task = machine.run(task, &event, &cancel).await;

    assert_eq!(result(&task), &TerminalResult::Cancelled);
    assert_eq!(harness.context.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_between_states() {
    let gate = Arc::new(Semaphore::new(0));
    let gateway = FakeGateway::default().with_issue(issue(42));
    *gateway.gate.lock().unwrap() = Some(Arc::clone(&gate));
    let harness = Harness::new(gateway, vec![Ok(generation(&[("src/cli.py", "modify")]))]);
    let machine = Arc::new(harness.machine(policy()));

    let event = issue_event(42);
    let cancel = CancelToken::default();
    let handle = {
        let machine = Arc::clone(&machine);
        let cancel = cancel.clone();
        let event = event.clone();
        tokio::spawn(async move {
            let task = WorkflowTask::new(event.target_key().unwrap(), TaskKind::CodeGeneration);
            machine.run(task, &event, &cancel).await
        })
    };

    cancel.cancel();
    gate.add_permits(1);
    let task = handle.await.unwrap();

    assert_eq!(result(&task), &TerminalResult::Cancelled);
    assert_eq!(harness.model.calls(), 0);
    assert_eq!(harness.gateway.applied_count(), 0);
    assert_eq!(
        harness.context.opened.load(Ordering::SeqCst),
        harness.context.closed.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_review_of_foreign_pull_request() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, "feature/dry-run"))
            .with_diff("+++ b/src/cli.py\n+print('x')\n"),
        vec![Ok(review(false)), Ok(generation(&[("src/cli.py", "modify")]))],
    );

    let task = run_event(&harness, policy(), review_event(7, true, true)).await;

    // not a patcher branch, so the review stands and nothing is pushed
    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(harness.model.calls(), 1);
    assert_eq!(harness.gateway.applied_count(), 0);

    let reviews = harness.gateway.reviews.lock().unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].event, ReviewEvent::RequestChanges);
    assert_eq!(reviews[0].comments[0].path, "src/cli.py");
    assert!(!task.outcome.review.as_ref().unwrap().approved);
}

#[tokio::test]
async fn test_fix_cycle_until_approved() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, OWN_BRANCH)),
        vec![
            Ok(review(false)),
            Ok(generation(&[("src/cli.py", "modify")])),
            Ok(review(true)),
        ],
    );

    let task = run_event(&harness, policy(), review_event(7, true, true)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(task.iteration, 1);
    assert_eq!(harness.model.calls(), 3);

    let applied = harness.gateway.applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, OWN_BRANCH);
    assert_eq!(applied[0].1, OWN_BRANCH);

    let bodies = harness.gateway.bodies.lock().unwrap();
    let state = PrState::extract(&bodies[0].1).expect("state block");
    assert_eq!(state.fix_iterations(), 1);
    assert_eq!(state.pr_number, Some(7));

    let reviews = harness.gateway.reviews.lock().unwrap();
    let events: Vec<ReviewEvent> = reviews.iter().map(|r| r.event).collect();
    assert_eq!(events, vec![ReviewEvent::Comment, ReviewEvent::Approve]);
    assert!(task
        .context
        .feedback()
        .iter()
        .any(|f| f.contains("dry run still writes files")));
}

#[tokio::test]
async fn test_iteration_ceiling_stops_without_extra_model_call() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, OWN_BRANCH)),
        vec![
            Ok(review(false)),
            Ok(generation(&[("src/cli.py", "modify")])),
            Ok(review(false)),
            Ok(generation(&[("src/cli.py", "modify")])),
            Ok(review(false)),
            Ok(generation(&[("src/cli.py", "modify")])),
        ],
    );
    let mut policy = policy();
    policy.max_iterations = 2;

    let task = run_event(&harness, policy, review_event(7, false, true)).await;

    assert_eq!(
        result(&task),
        &TerminalResult::IterationsExhausted { iterations: 2 }
    );
    assert_eq!(task.iteration, 2);
    assert_eq!(harness.model.calls(), 5);
    assert_eq!(harness.gateway.applied_count(), 2);
    assert!(harness.gateway.reviews.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_ceiling_holds_across_events() {
    let mut state = PrState::new(42, OWN_BRANCH, "hash".to_string());
    for n in 1..=3 {
        state.record(n, IterationStatus::AwaitingReview, vec![], None, None, None);
    }
    let mut pr = pull_request(7, OWN_BRANCH);
    pr.body = state.embed(&pr.body).unwrap();

    let harness = Harness::new(
        FakeGateway::default().with_issue(issue(42)).with_pull(pr),
        vec![Ok(review(false)), Ok(generation(&[("src/cli.py", "modify")]))],
    );

    let task = run_event(&harness, policy(), review_event(7, false, true)).await;

    assert_eq!(
        result(&task),
        &TerminalResult::IterationsExhausted { iterations: 3 }
    );
    assert_eq!(harness.model.calls(), 1);
    assert_eq!(harness.gateway.applied_count(), 0);
}

#[tokio::test]
async fn test_failing_ci_blocks_approval() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, OWN_BRANCH))
            .with_failing_check("pytest"),
        vec![Ok(review(true))],
    );

    let task = run_event(&harness, policy(), review_event(7, true, false)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    let reviews = harness.gateway.reviews.lock().unwrap();
    assert_eq!(reviews[0].event, ReviewEvent::Comment);
    assert!(task.context.notes().iter().any(|n| n.contains("pytest")));
}

#[tokio::test]
async fn test_review_waits_for_running_checks() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, OWN_BRANCH))
            .with_check_finishing_after("pytest", 2),
        vec![Ok(review(true))],
    );

    let task = run_event(&harness, policy(), review_event(7, true, true)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(harness.gateway.ci_poll_count(), 3);
    let reviews = harness.gateway.reviews.lock().unwrap();
    assert_eq!(reviews[0].event, ReviewEvent::Approve);
    assert!(reviews[0].body.contains("- CI passed"));
}

#[tokio::test]
async fn test_pending_ci_withholds_approval() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, OWN_BRANCH))
            .with_check("pytest", CheckState::Pending),
        vec![Ok(review(true)), Ok(generation(&[("src/cli.py", "modify")]))],
    );

    let task = run_event(&harness, policy(), review_event(7, true, true)).await;

    // still running after the wait: no approval, and nothing to fix
    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(harness.model.calls(), 1);
    assert_eq!(harness.gateway.applied_count(), 0);
    assert!(harness.gateway.ci_poll_count() > 1);

    let reviews = harness.gateway.reviews.lock().unwrap();
    assert_eq!(reviews[0].event, ReviewEvent::Comment);
    assert!(reviews[0].body.contains("CI still running (pytest)"));
    assert!(!reviews[0].body.contains("CI passed"));
    assert!(!reviews[0].body.contains("Approved for merge"));
    assert!(task.context.notes().iter().any(|n| n.contains("still running")));
}

#[tokio::test]
async fn test_own_checks_do_not_gate_review() {
    let harness = Harness::new(
        FakeGateway::default()
            .with_issue(issue(42))
            .with_pull(pull_request(7, OWN_BRANCH))
            .with_check("Patcher Review", CheckState::Pending)
            .with_check("pytest", CheckState::Success),
        vec![Ok(review(true))],
    );

    let task = run_event(&harness, policy(), review_event(7, true, true)).await;

    assert_eq!(result(&task), &TerminalResult::Success);
    assert_eq!(harness.gateway.ci_poll_count(), 1);
    let reviews = harness.gateway.reviews.lock().unwrap();
    assert_eq!(reviews[0].event, ReviewEvent::Approve);
}

#[tokio::test]
async fn test_missing_pull_request_is_not_found() {
    let harness = Harness::new(FakeGateway::default(), vec![]);
    let event = review_event(9, true, true);
    assert_eq!(
        event.target_key().unwrap(),
        TargetKey::new("r/p", patcher::workflow::task::EntityKind::PullRequest, 9).unwrap()
    );

    let task = run_event(&harness, policy(), event).await;

    let TerminalResult::ExternalFailure { kind, .. } = result(&task) else {
        panic!("unexpected result {:?}", task.terminal_result);
    };
    assert_eq!(*kind, ExternalErrorKind::NotFound);
}
