use crate::runner::{yesterday, Pipeline};
use chrono::{DateTime, Days, NaiveTime, Utc};
use pulse_config::ScheduleConfig;
use std::future::Future;
use tracing::{error, info};

/// Once-a-day trigger at a fixed UTC time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|at| Self { at })
    }

    pub fn from_config(cfg: &ScheduleConfig) -> anyhow::Result<Self> {
        Self::new(cfg.hour, cfg.minute).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid schedule time {:02}:{:02}",
                cfg.hour,
                cfg.minute
            )
        })
    }

    /// First trigger strictly after `now`. Earlier triggers are never
    /// returned, so runs missed while the process was down are skipped.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            return today;
        }
        now.date_naive()
            .checked_add_days(Days::new(1))
            .map(|date| date.and_time(self.at).and_utc())
            .unwrap_or(today)
    }
}

/// Runs the pipeline once per trigger, one run at a time, until `shutdown`
/// resolves. A failed run is logged and the loop waits for the next trigger.
pub async fn run_daily(
    pipeline: &Pipeline,
    schedule: DailySchedule,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    loop {
        let now = Utc::now();
        let fire_at = schedule.next_after(now);
        let wait = (fire_at - now).to_std().unwrap_or_default();
        info!(%fire_at, "next run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = &mut shutdown => {
                info!("shutdown signal received; scheduler stopping");
                return;
            }
        }

        let event_date = yesterday(fire_at);
        tokio::select! {
            result = pipeline.run(event_date) => match result {
                Ok(summary) => info!(
                    %event_date,
                    report_rows = summary.report_rows,
                    "scheduled run succeeded"
                ),
                Err(exc) => error!(%event_date, "scheduled run failed: {exc}"),
            },
            _ = &mut shutdown => {
                info!(%event_date, "shutdown signal received during run; abandoning it");
                return;
            }
        }
    }
}
