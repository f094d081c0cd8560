use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::AddAssign;

/// One user's feed activity for one day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedRecord {
    pub event_date: NaiveDate,
    pub user_id: u64,
    #[serde(deserialize_with = "demographic_value")]
    pub gender: String,
    #[serde(deserialize_with = "demographic_value")]
    pub age: String,
    #[serde(deserialize_with = "demographic_value")]
    pub os: String,
    pub views: u64,
    pub likes: u64,
}

/// One user's messaging activity for one day, with reconciled demographics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRecord {
    pub event_date: NaiveDate,
    pub user_id: u64,
    #[serde(deserialize_with = "demographic_value")]
    pub gender: String,
    #[serde(deserialize_with = "demographic_value")]
    pub age: String,
    #[serde(deserialize_with = "demographic_value")]
    pub os: String,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub users_received: u64,
    pub users_sent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub event_date: NaiveDate,
    pub user_id: u64,
    pub gender: String,
    pub age: String,
    pub os: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, user {}, gender={}, age={}, os={})",
            self.event_date, self.user_id, self.gender, self.age, self.os
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionMetrics {
    pub views: u64,
    pub likes: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub users_received: u64,
    pub users_sent: u64,
}

impl ActionMetrics {
    pub fn named(&self) -> [(&'static str, u64); 6] {
        [
            ("views", self.views),
            ("likes", self.likes),
            ("messages_sent", self.messages_sent),
            ("messages_received", self.messages_received),
            ("users_received", self.users_received),
            ("users_sent", self.users_sent),
        ]
    }
}

impl AddAssign for ActionMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.views += rhs.views;
        self.likes += rhs.likes;
        self.messages_sent += rhs.messages_sent;
        self.messages_received += rhs.messages_received;
        self.users_received += rhs.users_received;
        self.users_sent += rhs.users_sent;
    }
}

impl FeedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            event_date: self.event_date,
            user_id: self.user_id,
            gender: self.gender.clone(),
            age: self.age.clone(),
            os: self.os.clone(),
        }
    }

    pub fn metrics(&self) -> ActionMetrics {
        ActionMetrics {
            views: self.views,
            likes: self.likes,
            ..ActionMetrics::default()
        }
    }
}

impl MessageRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            event_date: self.event_date,
            user_id: self.user_id,
            gender: self.gender.clone(),
            age: self.age.clone(),
            os: self.os.clone(),
        }
    }

    pub fn metrics(&self) -> ActionMetrics {
        ActionMetrics {
            messages_sent: self.messages_sent,
            messages_received: self.messages_received,
            users_received: self.users_received,
            users_sent: self.users_sent,
            ..ActionMetrics::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecord {
    pub key: RecordKey,
    pub metrics: ActionMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Gender,
    Age,
    Os,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Gender, Dimension::Age, Dimension::Os];

    pub fn label(self) -> &'static str {
        match self {
            Dimension::Gender => "gender",
            Dimension::Age => "age",
            Dimension::Os => "os",
        }
    }

    /// Name the slice task for this dimension runs under.
    pub fn slice_task(self) -> &'static str {
        match self {
            Dimension::Gender => "slice_gender",
            Dimension::Age => "slice_age",
            Dimension::Os => "slice_os",
        }
    }

    pub fn value_of(self, key: &RecordKey) -> &str {
        match self {
            Dimension::Gender => &key.gender,
            Dimension::Age => &key.age,
            Dimension::Os => &key.os,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRow {
    pub event_date: NaiveDate,
    pub dimension: Dimension,
    pub dimension_value: String,
    pub metrics: ActionMetrics,
}

/// A row of the report table. Field order is the table's column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub event_date: NaiveDate,
    pub dimension: Dimension,
    pub dimension_value: String,
    pub views: u64,
    pub likes: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub users_received: u64,
    pub users_sent: u64,
}

impl From<SliceRow> for ReportRow {
    fn from(row: SliceRow) -> Self {
        Self {
            event_date: row.event_date,
            dimension: row.dimension,
            dimension_value: row.dimension_value,
            views: row.metrics.views,
            likes: row.metrics.likes,
            messages_received: row.metrics.messages_received,
            messages_sent: row.metrics.messages_sent,
            users_received: row.metrics.users_received,
            users_sent: row.metrics.users_sent,
        }
    }
}

/// Demographic columns are numeric (`gender`, `age`) or text (`os`) in the
/// source tables; all of them become strings so they can share the report's
/// `dimension_value` column. A missing value decodes as the empty string.
fn demographic_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported demographic value: {other}"
        ))),
    }
}
