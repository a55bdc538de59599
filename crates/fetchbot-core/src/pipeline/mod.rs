//! Job orchestration: the per-job pipeline and the dispatcher that runs it.

mod context;
mod dispatch;
mod job;

pub use context::FetchContext;
pub use dispatch::{Dispatcher, JobRequest, JobTicket};
pub use job::{run_job, ItemFailure, JobReport, JobScope};
