use crate::error::{PipelineError, PipelineResult};
use crate::model::{ActionMetrics, Dimension, MergedRecord, SliceRow};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Sums every metric of the merged rows per `(event_date, value of
/// dimension)`. The user id and the other two demographics are dropped.
pub fn slice_by(merged: &[MergedRecord], dimension: Dimension) -> Vec<SliceRow> {
    let mut groups = BTreeMap::<(NaiveDate, &str), ActionMetrics>::new();

    for row in merged {
        let value = dimension.value_of(&row.key);
        *groups.entry((row.key.event_date, value)).or_default() += row.metrics;
    }

    groups
        .into_iter()
        .map(|((event_date, value), metrics)| SliceRow {
            event_date,
            dimension,
            dimension_value: value.to_string(),
            metrics,
        })
        .collect()
}

/// Checks that each dimension's slice rows add up to the merged totals, per
/// date and per metric.
pub fn verify_totals(merged: &[MergedRecord], slices: &[SliceRow]) -> PipelineResult<()> {
    let mut expected = BTreeMap::<NaiveDate, ActionMetrics>::new();
    for row in merged {
        *expected.entry(row.key.event_date).or_default() += row.metrics;
    }

    let mut actual = BTreeMap::<(Dimension, NaiveDate), ActionMetrics>::new();
    for row in slices {
        *actual.entry((row.dimension, row.event_date)).or_default() += row.metrics;
    }

    let dates: BTreeSet<NaiveDate> = expected
        .keys()
        .copied()
        .chain(actual.keys().map(|(_, date)| *date))
        .collect();

    for dimension in Dimension::ALL {
        for &event_date in &dates {
            let merged_totals = expected.get(&event_date).copied().unwrap_or_default();
            let sliced_totals = actual
                .get(&(dimension, event_date))
                .copied()
                .unwrap_or_default();

            for ((metric, merged), (_, sliced)) in merged_totals
                .named()
                .into_iter()
                .zip(sliced_totals.named())
            {
                if merged != sliced {
                    return Err(PipelineError::TotalsMismatch {
                        event_date,
                        dimension,
                        metric,
                        merged,
                        sliced,
                    });
                }
            }
        }
    }

    Ok(())
}
