pub mod dispatcher;
pub mod event;
pub mod registry;
pub mod report;

pub use dispatcher::{EventDispatcher, Rejected, Submission, TaskReporter};
pub use event::{EventKind, EventPayload, InboundEvent};
pub use registry::{CancelToken, Claim, TaskRegistry};
