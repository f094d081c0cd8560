use crate::model::{FeedRecord, MessageRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use pulse_clickhouse::{escape_identifier, escape_literal, validate_identifier, ClickHouseClient};
use pulse_config::DemographicPolicy;
use tracing::debug;

/// Read side of the job: one call per extract task, both scoped to a single
/// day.
#[async_trait]
pub trait ActionSource: Send + Sync {
    async fn fetch_feed(&self, event_date: NaiveDate) -> Result<Vec<FeedRecord>>;

    async fn fetch_messages(&self, event_date: NaiveDate) -> Result<Vec<MessageRecord>>;
}

pub struct ClickHouseActionSource {
    client: ClickHouseClient,
    schema: String,
    policy: DemographicPolicy,
}

impl ClickHouseActionSource {
    pub fn new(
        client: ClickHouseClient,
        schema: impl Into<String>,
        policy: DemographicPolicy,
    ) -> Result<Self> {
        let schema = schema.into();
        validate_identifier(&schema).context("invalid source schema")?;
        Ok(Self {
            client,
            schema,
            policy,
        })
    }
}

#[async_trait]
impl ActionSource for ClickHouseActionSource {
    async fn fetch_feed(&self, event_date: NaiveDate) -> Result<Vec<FeedRecord>> {
        let query = feed_actions_sql(&self.schema, event_date);
        debug!(%event_date, "querying feed actions");
        self.client
            .query_json_each_row(&query, None)
            .await
            .context("feed actions query failed")
    }

    async fn fetch_messages(&self, event_date: NaiveDate) -> Result<Vec<MessageRecord>> {
        let query = message_actions_sql(&self.schema, event_date, self.policy);
        debug!(%event_date, policy = ?self.policy, "querying message actions");
        self.client
            .query_json_each_row(&query, None)
            .await
            .context("message actions query failed")
    }
}

fn date_literal(event_date: NaiveDate) -> String {
    format!(
        "toDate({})",
        escape_literal(&event_date.format("%Y-%m-%d").to_string())
    )
}

fn table(schema: &str, name: &str) -> String {
    format!("{}.{}", escape_identifier(schema), escape_identifier(name))
}

/// Views and likes per user and demographic combination for one day.
pub fn feed_actions_sql(schema: &str, event_date: NaiveDate) -> String {
    format!(
        "SELECT toDate(time) AS event_date, \
                user_id, \
                gender, \
                age, \
                os, \
                countIf(action = 'view') AS views, \
                countIf(action = 'like') AS likes \
         FROM {feed} \
         WHERE toDate(time) = {day} \
         GROUP BY event_date, user_id, gender, age, os",
        feed = table(schema, "feed_actions"),
        day = date_literal(event_date),
    )
}

/// Picks one demographic value from the feed profile (`fp`) and the message
/// profile (`mp`). Either side may be NULL because the joins run with
/// `join_use_nulls = 1`.
fn reconcile(policy: DemographicPolicy, column: &str) -> String {
    let feed = format!("fp.{column}");
    let message = format!("mp.{column}");
    match policy {
        DemographicPolicy::Greatest => {
            format!("greatest(coalesce({feed}, {message}), coalesce({message}, {feed}))")
        }
        DemographicPolicy::PreferFeed => format!("coalesce({feed}, {message})"),
        DemographicPolicy::PreferMessages => format!("coalesce({message}, {feed})"),
    }
}

/// Per-user message counters for one day: messages sent and received, and
/// the number of distinct counterparties in each direction. The user universe
/// is everyone who sent or received a message that day. Demographics are
/// looked up in the full feed and message history of those users, so a user
/// who only received messages still gets a profile; `policy` reconciles the
/// two sources.
pub fn message_actions_sql(schema: &str, event_date: NaiveDate, policy: DemographicPolicy) -> String {
    let day = date_literal(event_date);
    let feed = table(schema, "feed_actions");
    let messages = table(schema, "message_actions");

    format!(
        "WITH day_messages AS ( \
            SELECT user_id, receiver_id, gender, age, os \
            FROM {messages} \
            WHERE toDate(time) = {day} \
         ), \
         sent AS ( \
            SELECT user_id AS sender_id, \
                   count() AS messages_sent, \
                   uniqExact(receiver_id) AS users_sent \
            FROM day_messages \
            GROUP BY user_id \
         ), \
         received AS ( \
            SELECT receiver_id, \
                   count() AS messages_received, \
                   uniqExact(user_id) AS users_received \
            FROM day_messages \
            GROUP BY receiver_id \
         ), \
         participants AS ( \
            SELECT user_id FROM day_messages \
            UNION DISTINCT \
            SELECT receiver_id AS user_id FROM day_messages \
         ), \
         feed_profile AS ( \
            SELECT user_id AS profile_id, max(gender) AS p_gender, max(age) AS p_age, max(os) AS p_os \
            FROM {feed} \
            WHERE user_id IN (SELECT user_id FROM participants) \
            GROUP BY user_id \
         ), \
         message_profile AS ( \
            SELECT user_id AS profile_id, max(gender) AS p_gender, max(age) AS p_age, max(os) AS p_os \
            FROM {messages} \
            WHERE user_id IN (SELECT user_id FROM participants) \
            GROUP BY user_id \
         ) \
         SELECT {day} AS event_date, \
                p.user_id AS user_id, \
                {gender} AS gender, \
                {age} AS age, \
                {os} AS os, \
                toUInt64(ifNull(s.messages_sent, 0)) AS messages_sent, \
                toUInt64(ifNull(r.messages_received, 0)) AS messages_received, \
                toUInt64(ifNull(r.users_received, 0)) AS users_received, \
                toUInt64(ifNull(s.users_sent, 0)) AS users_sent \
         FROM participants AS p \
         LEFT JOIN feed_profile AS fp ON p.user_id = fp.profile_id \
         LEFT JOIN message_profile AS mp ON p.user_id = mp.profile_id \
         LEFT JOIN sent AS s ON p.user_id = s.sender_id \
         LEFT JOIN received AS r ON p.user_id = r.receiver_id \
         SETTINGS join_use_nulls = 1",
        gender = reconcile(policy, "p_gender"),
        age = reconcile(policy, "p_age"),
        os = reconcile(policy, "p_os"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 19).unwrap()
    }

    #[test]
    fn feed_query_is_scoped_to_one_day() {
        let sql = feed_actions_sql("simulator_20250120", day());
        assert!(sql.contains("FROM `simulator_20250120`.`feed_actions`"));
        assert!(sql.contains("WHERE toDate(time) = toDate('2025-02-19')"));
        assert!(sql.contains("countIf(action = 'view') AS views"));
        assert!(sql.contains("GROUP BY event_date, user_id, gender, age, os"));
        assert!(!sql.contains("yesterday()"));
    }

    #[test]
    fn message_query_covers_all_counters_and_participants() {
        let sql = message_actions_sql("simulator_20250120", day(), DemographicPolicy::Greatest);
        for needle in [
            "FROM `simulator_20250120`.`message_actions`",
            "FROM `simulator_20250120`.`feed_actions`",
            "uniqExact(receiver_id) AS users_sent",
            "uniqExact(user_id) AS users_received",
            "UNION DISTINCT",
            "SETTINGS join_use_nulls = 1",
            "toDate('2025-02-19') AS event_date",
        ] {
            assert!(sql.contains(needle), "missing {needle:?} in {sql}");
        }
    }

    #[test]
    fn profiles_come_from_all_history_of_participants() {
        let sql = message_actions_sql("s", day(), DemographicPolicy::Greatest);
        let start = sql.find("feed_profile AS").expect("feed profile cte");
        let end = sql[start..].find(" SELECT toDate(").expect("final select") + start;
        let profiles = &sql[start..end];

        assert!(!profiles.contains("toDate(time)"), "profiles limited by date: {profiles}");
        assert!(!profiles.contains("FROM day_messages"), "{profiles}");
        assert!(profiles.contains("FROM `s`.`feed_actions`"));
        assert!(profiles.contains("FROM `s`.`message_actions`"));
        assert_eq!(
            profiles
                .matches("WHERE user_id IN (SELECT user_id FROM participants)")
                .count(),
            2
        );
    }

    #[test]
    fn demographic_policy_controls_tie_break() {
        let greatest = message_actions_sql("s", day(), DemographicPolicy::Greatest);
        assert!(greatest.contains(
            "greatest(coalesce(fp.p_os, mp.p_os), coalesce(mp.p_os, fp.p_os)) AS os"
        ));

        let feed_first = message_actions_sql("s", day(), DemographicPolicy::PreferFeed);
        assert!(feed_first.contains("coalesce(fp.p_gender, mp.p_gender) AS gender"));

        let messages_first = message_actions_sql("s", day(), DemographicPolicy::PreferMessages);
        assert!(messages_first.contains("coalesce(mp.p_age, fp.p_age) AS age"));
    }

    #[test]
    fn source_rejects_unsafe_schema_names() {
        let client = ClickHouseClient::new(pulse_config::ClickHouseConfig::default())
            .expect("client");
        assert!(ClickHouseActionSource::new(client, "a; DROP", DemographicPolicy::Greatest).is_err());
    }
}
