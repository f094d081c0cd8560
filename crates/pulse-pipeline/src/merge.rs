use crate::error::{PipelineError, PipelineResult};
use crate::model::{ActionMetrics, FeedRecord, MergedRecord, MessageRecord, RecordKey};
use std::collections::BTreeMap;

#[derive(Default)]
struct Slot {
    metrics: ActionMetrics,
    from_feed: bool,
    from_messages: bool,
}

/// Full outer join of the two extracts on `(event_date, user_id, gender, age,
/// os)`. Metrics missing on one side stay zero. Output is sorted by key.
pub fn merge_actions(
    feed: &[FeedRecord],
    messages: &[MessageRecord],
) -> PipelineResult<Vec<MergedRecord>> {
    let mut slots = BTreeMap::<RecordKey, Slot>::new();

    for row in feed {
        let key = row.key();
        let slot = slots.entry(key.clone()).or_default();
        if slot.from_feed {
            return Err(PipelineError::DuplicateKey { side: "feed", key });
        }
        slot.from_feed = true;
        slot.metrics += row.metrics();
    }

    for row in messages {
        let key = row.key();
        let slot = slots.entry(key.clone()).or_default();
        if slot.from_messages {
            return Err(PipelineError::DuplicateKey {
                side: "message",
                key,
            });
        }
        slot.from_messages = true;
        slot.metrics += row.metrics();
    }

    Ok(slots
        .into_iter()
        .map(|(key, slot)| MergedRecord {
            key,
            metrics: slot.metrics,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 19).unwrap()
    }

    fn feed(user_id: u64, gender: &str, views: u64, likes: u64) -> FeedRecord {
        FeedRecord {
            event_date: day(),
            user_id,
            gender: gender.to_string(),
            age: "25".to_string(),
            os: "iOS".to_string(),
            views,
            likes,
        }
    }

    fn message(user_id: u64, gender: &str, sent: u64, received: u64) -> MessageRecord {
        MessageRecord {
            event_date: day(),
            user_id,
            gender: gender.to_string(),
            age: "25".to_string(),
            os: "iOS".to_string(),
            messages_sent: sent,
            messages_received: received,
            users_received: 0,
            users_sent: 0,
        }
    }

    #[test]
    fn matching_keys_combine_into_one_row() {
        let merged = merge_actions(&[feed(1, "1", 5, 2)], &[message(1, "1", 3, 1)])
            .expect("merge succeeds");

        assert_eq!(merged.len(), 1);
        let row = &merged[0];
        assert_eq!(row.key.user_id, 1);
        assert_eq!(
            row.metrics,
            ActionMetrics {
                views: 5,
                likes: 2,
                messages_sent: 3,
                messages_received: 1,
                users_received: 0,
                users_sent: 0,
            }
        );
    }

    #[test]
    fn one_sided_keys_are_zero_filled() {
        let merged = merge_actions(&[feed(1, "1", 5, 2)], &[message(2, "0", 4, 0)])
            .expect("merge succeeds");

        assert_eq!(merged.len(), 2);
        let feed_only = merged.iter().find(|r| r.key.user_id == 1).unwrap();
        assert_eq!(feed_only.metrics.messages_sent, 0);
        assert_eq!(feed_only.metrics.users_sent, 0);

        let message_only = merged.iter().find(|r| r.key.user_id == 2).unwrap();
        assert_eq!(message_only.metrics.views, 0);
        assert_eq!(message_only.metrics.likes, 0);
        assert_eq!(message_only.metrics.messages_sent, 4);
    }

    #[test]
    fn row_count_equals_distinct_keys_in_union() {
        let feed_rows = vec![feed(1, "1", 1, 0), feed(2, "0", 2, 1), feed(3, "1", 0, 1)];
        // user 2 disagrees on gender between the two sides, so it stays two keys
        let message_rows = vec![message(2, "1", 1, 1), message(3, "1", 2, 2), message(4, "0", 0, 3)];

        let merged = merge_actions(&feed_rows, &message_rows).expect("merge succeeds");

        let distinct: HashSet<RecordKey> = feed_rows
            .iter()
            .map(FeedRecord::key)
            .chain(message_rows.iter().map(MessageRecord::key))
            .collect();
        assert_eq!(merged.len(), distinct.len());
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn duplicate_key_within_one_side_is_rejected() {
        let err = merge_actions(&[feed(1, "1", 1, 0), feed(1, "1", 2, 0)], &[])
            .expect_err("duplicates must fail");
        assert!(matches!(err, PipelineError::DuplicateKey { side: "feed", .. }));

        let err = merge_actions(&[], &[message(9, "0", 1, 0), message(9, "0", 1, 0)])
            .expect_err("duplicates must fail");
        assert!(err.to_string().contains("duplicate message row"), "{err}");
    }

    #[test]
    fn empty_inputs_merge_to_nothing() {
        assert!(merge_actions(&[], &[]).expect("merge").is_empty());
    }
}
