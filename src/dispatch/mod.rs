//! Dispatch core: workers that move messages from the shared stream to the
//! sink, and the coordinator that runs them.

pub mod coordinator;
pub mod report;
pub mod worker;

pub use coordinator::{Coordinator, RunSummary};
pub use report::{Report, ReportKind};
pub use worker::{TerminationReason, Worker, WorkerId, WorkerState};
