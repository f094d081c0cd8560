use crate::error::PipelineResult;
use crate::extract::{ActionSource, ClickHouseActionSource};
use crate::load::{report_rows, ClickHouseReportSink, ReportSink};
use crate::merge::merge_actions;
use crate::model::{Dimension, SliceRow};
use crate::retry::{run_with_retries, RetryPolicy};
use crate::slice::{slice_by, verify_totals};
use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use pulse_clickhouse::ClickHouseClient;
use pulse_config::{AppConfig, LoadMode};
use serde::Serialize;
use std::future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct SliceCount {
    pub dimension: Dimension,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub event_date: NaiveDate,
    pub feed_rows: usize,
    pub message_rows: usize,
    pub merged_rows: usize,
    pub slices: Vec<SliceCount>,
    pub report_rows: usize,
    pub load_mode: String,
    pub elapsed_ms: u64,
}

/// The fixed task graph: both extracts, merge, three slices, load.
pub struct Pipeline {
    source: Arc<dyn ActionSource>,
    sink: Arc<dyn ReportSink>,
    retry: RetryPolicy,
    load_mode: LoadMode,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ActionSource>,
        sink: Arc<dyn ReportSink>,
        retry: RetryPolicy,
        load_mode: LoadMode,
    ) -> Self {
        Self {
            source,
            sink,
            retry,
            load_mode,
        }
    }

    /// Wires ClickHouse-backed tasks from config. Each store gets its own
    /// client.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let source = ClickHouseActionSource::new(
            ClickHouseClient::new(cfg.source.clone())?,
            cfg.pipeline.source_schema.clone(),
            cfg.pipeline.demographic_policy,
        )?;
        let sink = ClickHouseReportSink::new(
            ClickHouseClient::new(cfg.destination.clone())?,
            cfg.pipeline.report_table.clone(),
        )?;

        Ok(Self::new(
            Arc::new(source),
            Arc::new(sink),
            RetryPolicy::from_config(&cfg.retry),
            cfg.pipeline.load_mode,
        ))
    }

    /// Processes one day end to end.
    pub async fn run(&self, event_date: NaiveDate) -> PipelineResult<RunSummary> {
        let started = Instant::now();
        info!(%event_date, "run started");

        let source = &self.source;
        let (feed, messages) = tokio::try_join!(
            run_with_retries("extract_feed", &self.retry, move || {
                source.fetch_feed(event_date)
            }),
            run_with_retries("extract_messages", &self.retry, move || {
                source.fetch_messages(event_date)
            }),
        )?;
        info!(
            feed_rows = feed.len(),
            message_rows = messages.len(),
            "extracts finished"
        );

        let (feed_batch, message_batch) = (&feed, &messages);
        let merged = run_with_retries("merge", &self.retry, move || {
            future::ready(merge_actions(feed_batch, message_batch).map_err(anyhow::Error::from))
        })
        .await?;
        info!(merged_rows = merged.len(), "merge finished");

        let merged_batch = &merged;
        let mut slices: Vec<Vec<SliceRow>> = Vec::with_capacity(Dimension::ALL.len());
        for dimension in Dimension::ALL {
            let rows = run_with_retries(dimension.slice_task(), &self.retry, move || {
                future::ready(Ok::<_, anyhow::Error>(slice_by(merged_batch, dimension)))
            })
            .await?;
            info!(%dimension, rows = rows.len(), "slice finished");
            slices.push(rows);
        }
        let counts: Vec<SliceCount> = Dimension::ALL
            .into_iter()
            .zip(&slices)
            .map(|(dimension, rows)| SliceCount {
                dimension,
                rows: rows.len(),
            })
            .collect();

        let stacked = slices.concat();
        let slice_batch = &stacked;
        run_with_retries("verify_totals", &self.retry, move || {
            future::ready(verify_totals(merged_batch, slice_batch).map_err(anyhow::Error::from))
        })
        .await?;
        let rows = report_rows(slices);

        let sink = &self.sink;
        let batch = &rows;
        let load_mode = self.load_mode;
        run_with_retries("load", &self.retry, move || {
            sink.write(event_date, batch, load_mode)
        })
        .await?;

        let summary = RunSummary {
            event_date,
            feed_rows: feed.len(),
            message_rows: messages.len(),
            merged_rows: merged.len(),
            slices: counts,
            report_rows: rows.len(),
            load_mode: load_mode.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %event_date,
            report_rows = summary.report_rows,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }
}

/// The day a run triggered at `now` processes.
pub fn yesterday(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}
