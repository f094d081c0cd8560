use crate::model::{Dimension, RecordKey};
use chrono::NaiveDate;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("duplicate {side} row for key {key}")]
    DuplicateKey { side: &'static str, key: RecordKey },
    #[error(
        "{metric} total for {event_date} does not match in {dimension} slice: merged {merged}, sliced {sliced}"
    )]
    TotalsMismatch {
        event_date: NaiveDate,
        dimension: Dimension,
        metric: &'static str,
        merged: u64,
        sliced: u64,
    },
    #[error("task {task} failed after {attempts} attempt(s): {source:#}")]
    Task {
        task: &'static str,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn task(&self) -> Option<&'static str> {
        match self {
            PipelineError::Task { task, .. } => Some(task),
            _ => None,
        }
    }
}
