use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::dispatch::event::InboundEvent;
use crate::dispatch::registry::{Claim, TaskRegistry};
use crate::error::{AppError, Result};
use crate::workflow::machine::WorkflowStateMachine;
use crate::workflow::task::{TargetKey, TaskReport, WorkflowTask};

/// Completion hook, called once per finished task while its key is still held.
#[async_trait]
pub trait TaskReporter: Send + Sync {
    async fn report(&self, event: &InboundEvent, report: &TaskReport);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// A workflow for the same target is still running. The event is dropped.
    AlreadyInFlight { key: TargetKey },
}

#[derive(Debug)]
pub enum Submission {
    Accepted {
        key: TargetKey,
        handle: JoinHandle<TaskReport>,
    },
    Rejected(Rejected),
}

/// Routes events to workflow runs, at most one per target key.
pub struct EventDispatcher {
    registry: Arc<TaskRegistry>,
    machine: Arc<WorkflowStateMachine>,
    reporter: Option<Arc<dyn TaskReporter>>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<TaskRegistry>, machine: Arc<WorkflowStateMachine>) -> Self {
        Self {
            registry,
            machine,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Admit `event` and run it on its own tokio task.
    ///
    /// Fails with `InvalidEvent` before the registry is touched when the event
    /// has no usable key.
    pub fn submit(&self, event: InboundEvent) -> Result<Submission> {
        let claim = match self.claim(&event)? {
            Ok(claim) => claim,
            Err(rejected) => return Ok(Submission::Rejected(rejected)),
        };
        let key = claim.key().clone();

        let machine = Arc::clone(&self.machine);
        let reporter = self.reporter.clone();
        let handle = tokio::spawn(async move {
            let report = execute(&machine, reporter.as_deref(), &event, &claim).await;
            drop(claim);
            report
        });

        Ok(Submission::Accepted { key, handle })
    }

    /// Admit `event` like `submit` and wait for its report.
    ///
    /// The run lives on its own tokio task, so dropping this future only stops
    /// the waiting. The workflow still finishes and reports.
    pub async fn run_now(
        &self,
        event: InboundEvent,
    ) -> Result<std::result::Result<TaskReport, Rejected>> {
        match self.submit(event)? {
            Submission::Accepted { key, handle } => {
                let report = handle.await.map_err(|e| {
                    AppError::Internal(format!("Workflow task for {key} failed: {e}"))
                })?;
                Ok(Ok(report))
            }
            Submission::Rejected(rejected) => Ok(Err(rejected)),
        }
    }

    fn claim(&self, event: &InboundEvent) -> Result<std::result::Result<Claim, Rejected>> {
        let key = event.target_key()?;

        match self.registry.try_claim(key.clone()) {
            Some(claim) => {
                tracing::info!(
                    key = %key,
                    kind = ?event.kind,
                    in_flight = self.registry.in_flight().len(),
                    "Accepted event"
                );
                Ok(Ok(claim))
            }
            None => {
                tracing::info!(key = %key, kind = ?event.kind, "Target already in flight, dropping event");
                Ok(Err(Rejected::AlreadyInFlight { key }))
            }
        }
    }
}

async fn execute(
    machine: &WorkflowStateMachine,
    reporter: Option<&dyn TaskReporter>,
    event: &InboundEvent,
    claim: &Claim,
) -> TaskReport {
    let task = WorkflowTask::new(claim.key().clone(), event.kind.task_kind());
    let task = machine.run(task, event, &claim.token()).await;
    let report = task.into_report();

    if let Some(reporter) = reporter {
        reporter.report(event, &report).await;
    }
    report
}
