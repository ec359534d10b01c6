pub mod service;
pub mod state_machine;

pub use service::{ApprovalService, CreatedRequest, NotifyKind, NotifyOutcome, ServiceSettings};
pub use state_machine::RequestStateMachine;
