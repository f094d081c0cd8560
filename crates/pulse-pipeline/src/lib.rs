mod error;
pub mod extract;
pub mod load;
pub mod merge;
pub mod model;
mod retry;
mod runner;
mod schedule;
pub mod slice;

pub use error::{PipelineError, PipelineResult};
pub use extract::{ActionSource, ClickHouseActionSource};
pub use load::{ClickHouseReportSink, ReportSink};
pub use retry::{run_with_retries, RetryPolicy};
pub use runner::{yesterday, Pipeline, RunSummary, SliceCount};
pub use schedule::{run_daily, DailySchedule};
