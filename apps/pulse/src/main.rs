mod cli;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use cli::{CliCommand, DbCommand};
use pulse_clickhouse::ClickHouseClient;
use pulse_config::{AppConfig, ClickHouseConfig};
use pulse_pipeline::{run_daily, yesterday, ClickHouseReportSink, DailySchedule, Pipeline};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = cli::parse_args();
    let config_path = pulse_config::resolve_config_path(args.config);
    let config = pulse_config::load_config(&config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    match args.command {
        CliCommand::Run(run) => {
            let event_date = run.date.unwrap_or_else(|| yesterday(Utc::now()));
            let pipeline = Pipeline::from_config(&config)?;
            let summary = pipeline.run(event_date).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        CliCommand::Schedule => {
            let schedule = DailySchedule::from_config(&config.schedule)?;
            let pipeline = Pipeline::from_config(&config)?;
            info!(
                "scheduler started; daily at {:02}:{:02} UTC, catch-up disabled",
                config.schedule.hour, config.schedule.minute
            );
            run_daily(&pipeline, schedule, async {
                if let Err(exc) = tokio::signal::ctrl_c().await {
                    warn!("signal handler failed: {exc}");
                    std::future::pending::<()>().await;
                }
            })
            .await;
        }
        CliCommand::Db(db) => match db.command {
            DbCommand::Init => init_report_table(&config).await?,
            DbCommand::Check => check_stores(&config).await?,
        },
    }

    Ok(())
}

async fn init_report_table(config: &AppConfig) -> Result<()> {
    let client = ClickHouseClient::new(config.destination.clone())?;
    client
        .ping()
        .await
        .context("destination clickhouse ping failed")?;
    let sink = ClickHouseReportSink::new(client, config.pipeline.report_table.clone())?;
    sink.ensure_table().await?;
    println!(
        "report table {}.{} ready",
        config.destination.database,
        sink.table()
    );
    Ok(())
}

async fn store_status(name: &str, cfg: &ClickHouseConfig) -> (bool, serde_json::Value) {
    let client = match ClickHouseClient::new(cfg.clone()) {
        Ok(client) => client,
        Err(exc) => {
            return (
                false,
                json!({ "store": name, "healthy": false, "error": exc.to_string() }),
            )
        }
    };

    let result = async {
        client.ping().await?;
        client.version().await
    }
    .await;

    match result {
        Ok(version) => (
            true,
            json!({
                "store": name,
                "url": cfg.url,
                "database": cfg.database,
                "healthy": true,
                "version": version,
            }),
        ),
        Err(exc) => (
            false,
            json!({
                "store": name,
                "url": cfg.url,
                "database": cfg.database,
                "healthy": false,
                "error": format!("{exc:#}"),
            }),
        ),
    }
}

async fn check_stores(config: &AppConfig) -> Result<()> {
    let (source_ok, source) = store_status("source", &config.source).await;
    let (destination_ok, destination) = store_status("destination", &config.destination).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!([source, destination]))?
    );

    if !(source_ok && destination_ok) {
        bail!("one or more stores are unreachable");
    }
    Ok(())
}
