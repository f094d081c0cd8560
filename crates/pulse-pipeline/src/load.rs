use crate::model::{ReportRow, SliceRow};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use pulse_clickhouse::{
    escape_identifier, escape_literal, materialize_sql, validate_identifier, ClickHouseClient,
};
use pulse_config::LoadMode;
use tracing::info;

const REPORT_TABLE_TEMPLATE: &str = include_str!("../../../sql/001_report_table.sql");

/// Write side of the job.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Writes one day's report rows. In [`LoadMode::Replace`] rows already
    /// stored for `event_date` are removed first, so repeating a run leaves a
    /// single batch for the date.
    async fn write(&self, event_date: NaiveDate, rows: &[ReportRow], mode: LoadMode)
        -> Result<()>;
}

/// Stacks the slices (no joining) in the order given and converts them to
/// report rows.
pub fn report_rows(slices: impl IntoIterator<Item = Vec<SliceRow>>) -> Vec<ReportRow> {
    slices
        .into_iter()
        .flatten()
        .map(ReportRow::from)
        .collect()
}

pub struct ClickHouseReportSink {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseReportSink {
    pub fn new(client: ClickHouseClient, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table).context("invalid report table")?;
        Ok(Self { client, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn ensure_table(&self) -> Result<()> {
        let ddl = materialize_sql(
            REPORT_TABLE_TEMPLATE,
            &self.client.config().database,
            &self.table,
        )?;
        self.client.execute(&ddl, &[]).await?;
        info!(table = %self.table, "report table ready");
        Ok(())
    }

    fn delete_statement(&self, event_date: NaiveDate) -> String {
        format!(
            "ALTER TABLE {}.{} DELETE WHERE event_date = toDate({})",
            escape_identifier(&self.client.config().database),
            escape_identifier(&self.table),
            escape_literal(&event_date.format("%Y-%m-%d").to_string())
        )
    }
}

#[async_trait]
impl ReportSink for ClickHouseReportSink {
    async fn write(
        &self,
        event_date: NaiveDate,
        rows: &[ReportRow],
        mode: LoadMode,
    ) -> Result<()> {
        if let Some(stray) = rows.iter().find(|row| row.event_date != event_date) {
            bail!(
                "report row for {} does not belong to run date {event_date}",
                stray.event_date
            );
        }

        if mode == LoadMode::Replace {
            // Wait for the mutation so the insert below cannot be removed by it.
            self.client
                .execute(&self.delete_statement(event_date), &[("mutations_sync", "1")])
                .await
                .context("failed to clear previous rows for date")?;
        }

        self.client.insert_json_rows(&self.table, rows).await?;
        info!(
            table = %self.table,
            %event_date,
            %mode,
            rows = rows.len(),
            "report rows written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionMetrics, Dimension};
    use pulse_config::ClickHouseConfig;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 19).unwrap()
    }

    fn slice(dimension: Dimension, value: &str, views: u64) -> SliceRow {
        SliceRow {
            event_date: day(),
            dimension,
            dimension_value: value.to_string(),
            metrics: ActionMetrics {
                views,
                ..ActionMetrics::default()
            },
        }
    }

    fn sink() -> ClickHouseReportSink {
        let cfg = ClickHouseConfig {
            database: "test".to_string(),
            ..ClickHouseConfig::default()
        };
        ClickHouseReportSink::new(ClickHouseClient::new(cfg).expect("client"), "slices")
            .expect("sink")
    }

    #[test]
    fn report_rows_stack_slices_in_order() {
        let rows = report_rows([
            vec![slice(Dimension::Gender, "0", 1), slice(Dimension::Gender, "1", 2)],
            vec![slice(Dimension::Age, "25", 3)],
            vec![slice(Dimension::Os, "iOS", 3)],
        ]);

        let labels: Vec<(Dimension, &str)> = rows
            .iter()
            .map(|r| (r.dimension, r.dimension_value.as_str()))
            .collect();
        assert_eq!(
            labels,
            vec![
                (Dimension::Gender, "0"),
                (Dimension::Gender, "1"),
                (Dimension::Age, "25"),
                (Dimension::Os, "iOS"),
            ]
        );
    }

    #[test]
    fn delete_statement_targets_one_date() {
        assert_eq!(
            sink().delete_statement(day()),
            "ALTER TABLE `test`.`slices` DELETE WHERE event_date = toDate('2025-02-19')"
        );
    }

    #[test]
    fn report_table_template_materializes() {
        let ddl = materialize_sql(REPORT_TABLE_TEMPLATE, "test", "slices").expect("ddl");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS test.slices"));
        assert!(ddl.contains("ORDER BY (event_date, dimension, dimension_value)"));
    }

    #[tokio::test]
    async fn rows_from_other_dates_are_refused() {
        let mut row = ReportRow::from(slice(Dimension::Os, "iOS", 1));
        row.event_date = NaiveDate::from_ymd_opt(2025, 2, 18).unwrap();

        let err = sink()
            .write(day(), &[row], LoadMode::Append)
            .await
            .expect_err("stray date refused before any request");
        assert!(err.to_string().contains("does not belong to run date"));
    }

    #[test]
    fn invalid_table_names_are_refused() {
        let client = ClickHouseClient::new(ClickHouseConfig::default()).expect("client");
        assert!(ClickHouseReportSink::new(client, "slices`; --").is_err());
    }
}
