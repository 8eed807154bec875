use crate::workflow::task::WorkflowTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationDecision {
    Continue(u32),
    Exceeded,
}

/// Counts fix cycles against a fixed ceiling. `task.iteration` never exceeds
/// `max_iterations`.
#[derive(Debug, Clone, Copy)]
pub struct IterationController {
    max_iterations: u32,
}

impl IterationController {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Start a fix cycle. On `Exceeded` the task is left untouched.
    pub fn advance(&self, task: &mut WorkflowTask) -> IterationDecision {
        if task.iteration >= self.max_iterations {
            return IterationDecision::Exceeded;
        }
        task.iteration += 1;
        IterationDecision::Continue(task.iteration)
    }

    /// Carry over fix cycles already spent on the same target by earlier tasks.
    pub fn resume(&self, task: &mut WorkflowTask, spent: u32) {
        task.iteration = task.iteration.max(spent.min(self.max_iterations));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::task::{EntityKind, TargetKey, TaskKind};

    fn task() -> WorkflowTask {
        let key = TargetKey::new("r/p", EntityKind::PullRequest, 9).unwrap();
        WorkflowTask::new(key, TaskKind::Review)
    }

    #[test]
    fn test_advance_until_ceiling() {
        let controller = IterationController::new(3);
        let mut task = task();

        assert_eq!(controller.advance(&mut task), IterationDecision::Continue(1));
        assert_eq!(controller.advance(&mut task), IterationDecision::Continue(2));
        assert_eq!(controller.advance(&mut task), IterationDecision::Continue(3));
        assert_eq!(controller.advance(&mut task), IterationDecision::Exceeded);
        assert_eq!(task.iteration, 3);
        assert_eq!(controller.advance(&mut task), IterationDecision::Exceeded);
        assert_eq!(task.iteration, 3);
    }

    #[test]
    fn test_zero_ceiling_never_continues() {
        let controller = IterationController::new(0);
        let mut task = task();
        assert_eq!(controller.advance(&mut task), IterationDecision::Exceeded);
        assert_eq!(task.iteration, 0);
    }

    #[test]
    fn test_resume_is_clamped() {
        let controller = IterationController::new(3);
        let mut task = task();

        controller.resume(&mut task, 2);
        assert_eq!(task.iteration, 2);
        controller.resume(&mut task, 10);
        assert_eq!(task.iteration, 3);
        controller.resume(&mut task, 1);
        assert_eq!(task.iteration, 3);
    }
}
