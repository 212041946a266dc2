use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};

use crate::aggregation::totals::Totals;
use crate::types::{AggregateRow, BucketKey, Granularity};

/// First day of the bucket `date` falls into.
pub fn bucket_start(date: NaiveDate, granularity: Granularity) -> NaiveDate {
    match granularity {
        Granularity::Daily => date,
        Granularity::Weekly => date
            .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
            .unwrap_or(date),
        Granularity::Monthly => date.with_day(1).unwrap_or(date),
    }
}

/// Sum daily rows into wider buckets and recompute ratios from the sums.
/// The result is ordered by date, then campaign, platform and region.
pub fn roll_up(rows: Vec<AggregateRow>, granularity: Granularity) -> Vec<AggregateRow> {
    if granularity == Granularity::Daily {
        let mut rows = rows;
        sort_by_date(&mut rows);
        return rows;
    }

    let mut buckets: BTreeMap<(NaiveDate, BucketKey), (Totals, chrono::DateTime<chrono::Utc>)> =
        BTreeMap::new();
    for row in &rows {
        let start = bucket_start(row.date, granularity);
        let bucket = BucketKey {
            date: start,
            ..row.bucket()
        };
        let entry = buckets
            .entry((start, bucket))
            .or_insert_with(|| (Totals::default(), row.updated_at));
        entry.0.add_row(row);
        entry.1 = entry.1.max(row.updated_at);
    }

    buckets
        .into_iter()
        .map(|((_, bucket), (totals, updated_at))| totals.into_row(bucket, updated_at))
        .collect()
}

fn sort_by_date(rows: &mut [AggregateRow]) {
    rows.sort_by(|a, b| {
        (a.date, a.campaign_id, a.platform, &a.region).cmp(&(
            b.date,
            b.campaign_id,
            b.platform,
            &b.region,
        ))
    });
}
