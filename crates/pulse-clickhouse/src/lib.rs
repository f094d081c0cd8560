use anyhow::{anyhow, Context, Result};
use pulse_config::ClickHouseConfig;
pub use pulse_config::validate_identifier;
use reqwest::{
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    Client, Url,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Keeps `UInt64` counters as JSON numbers instead of quoted strings.
const READ_SETTINGS: &[(&str, &str)] = &[("output_format_json_quote_64bit_integers", "0")];

#[derive(Clone)]
pub struct ClickHouseClient {
    cfg: ClickHouseConfig,
    http: Client,
}

impl ClickHouseClient {
    pub fn new(cfg: ClickHouseConfig) -> Result<Self> {
        let timeout = Duration::from_secs_f64(cfg.timeout_seconds.max(1.0));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.cfg
    }

    fn base_url(&self) -> Result<Url> {
        Url::parse(&self.cfg.url).context("invalid ClickHouse URL")
    }

    /// Sends one statement over the HTTP interface. `settings` are passed as
    /// URL parameters, which is how ClickHouse accepts both query settings and
    /// `default_format`.
    pub async fn request_text(
        &self,
        query: &str,
        body: Option<Vec<u8>>,
        database: Option<&str>,
        settings: &[(&str, &str)],
    ) -> Result<String> {
        let mut url = self.base_url()?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("query", query);
            if let Some(database) = database {
                qp.append_pair("database", database);
            }
            for (name, value) in settings {
                qp.append_pair(name, value);
            }
        }

        // ClickHouse HTTP treats GET as readonly, so use POST for both reads and writes.
        let payload = body.unwrap_or_default();
        let payload_len = payload.len();

        let mut req = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            // Some ClickHouse builds require an explicit Content-Length on POST.
            .header(CONTENT_LENGTH, payload_len)
            .body(payload);

        if !self.cfg.username.is_empty() {
            req = req.basic_auth(self.cfg.username.clone(), Some(self.cfg.password.clone()));
        }

        let response = req.send().await.context("clickhouse request failed")?;
        let status = response.status();
        let text = response.text().await.with_context(|| {
            format!(
                "failed to read clickhouse response body (status {})",
                status
            )
        })?;

        if !status.is_success() {
            return Err(anyhow!("clickhouse returned {}: {}", status, text.trim()));
        }

        Ok(text)
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self
            .request_text("SELECT 1", None, Some("system"), &[])
            .await?;
        if response.trim() == "1" {
            Ok(())
        } else {
            Err(anyhow!("unexpected ping response: {}", response.trim()))
        }
    }

    pub async fn version(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Row {
            version: String,
        }

        let rows: Vec<Row> = self
            .query_json_each_row("SELECT version() AS version", Some("system"))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| row.version)
            .ok_or_else(|| anyhow!("missing version in payload"))
    }

    pub async fn query_json_each_row<T: DeserializeOwned>(
        &self,
        query: &str,
        database: Option<&str>,
    ) -> Result<Vec<T>> {
        let database = database.or(Some(&self.cfg.database));
        let mut settings = READ_SETTINGS.to_vec();
        settings.push(("default_format", "JSONEachRow"));
        let raw = self.request_text(query, None, database, &settings).await?;
        parse_json_each_row(&raw)
    }

    pub async fn execute(&self, statement: &str, settings: &[(&str, &str)]) -> Result<()> {
        self.request_text(statement, None, Some(&self.cfg.database), settings)
            .await
            .with_context(|| format!("failed statement: {}", truncate_for_error(statement)))?;
        Ok(())
    }

    /// Inserts rows into `table` of the configured database as one
    /// `JSONEachRow` request, so a failed call leaves no rows behind.
    pub async fn insert_json_rows<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut payload = Vec::<u8>::new();
        for row in rows {
            let line = serde_json::to_vec(row).context("failed to encode JSON row")?;
            payload.extend_from_slice(&line);
            payload.push(b'\n');
        }

        let query = format!(
            "INSERT INTO {}.{} FORMAT JSONEachRow",
            escape_identifier(&self.cfg.database),
            escape_identifier(table)
        );
        self.request_text(&query, Some(payload), None, &[])
            .await
            .with_context(|| format!("failed to insert {} rows into {table}", rows.len()))?;
        Ok(())
    }
}

pub fn parse_json_each_row<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    let mut rows = Vec::new();

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str::<T>(line)
            .with_context(|| format!("failed to parse JSONEachRow line: {}", line))?;
        rows.push(row);
    }

    Ok(rows)
}

fn truncate_for_error(statement: &str) -> String {
    const LIMIT: usize = 240;
    let compact = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.len() <= LIMIT {
        compact
    } else {
        let mut end = LIMIT;
        while !compact.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &compact[..end])
    }
}

/// Substitutes `{database}` and `{table}` placeholders in a bundled SQL
/// template after validating both names.
pub fn materialize_sql(template: &str, database: &str, table: &str) -> Result<String> {
    validate_identifier(database)?;
    validate_identifier(table)?;

    Ok(template
        .replace("{database}", database)
        .replace("{table}", table))
}

pub fn escape_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

pub fn escape_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
