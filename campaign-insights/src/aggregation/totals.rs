use chrono::{DateTime, Utc};

use crate::types::{AggregateRow, BucketKey, Event};

/// Summed raw metrics for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub impressions: i64,
    pub clicks: i64,
    pub conversions: i64,
    pub spend: f64,
    pub revenue: f64,
}

impl Totals {
    pub fn add_event(&mut self, event: &Event) {
        self.impressions = self.impressions.saturating_add(event.impressions);
        self.clicks = self.clicks.saturating_add(event.clicks);
        self.conversions = self.conversions.saturating_add(event.conversions);
        self.spend += event.spend;
        self.revenue += event.revenue;
    }

    pub fn add_row(&mut self, row: &AggregateRow) {
        self.impressions = self.impressions.saturating_add(row.impressions);
        self.clicks = self.clicks.saturating_add(row.clicks);
        self.conversions = self.conversions.saturating_add(row.conversions);
        self.spend += row.spend;
        self.revenue += row.revenue;
    }

    pub fn into_row(self, bucket: BucketKey, updated_at: DateTime<Utc>) -> AggregateRow {
        let ratios = Ratios::from_totals(&self);
        AggregateRow {
            campaign_id: bucket.campaign_id,
            date: bucket.date,
            platform: bucket.platform,
            region: bucket.region,
            impressions: self.impressions,
            clicks: self.clicks,
            conversions: self.conversions,
            spend: self.spend,
            revenue: self.revenue,
            ctr: ratios.ctr,
            cpc: ratios.cpc,
            cpa: ratios.cpa,
            roas: ratios.roas,
            conversion_rate: ratios.conversion_rate,
            updated_at,
        }
    }
}

/// Derived ratios. Each is zero when its denominator is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ratios {
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub roas: f64,
    pub conversion_rate: f64,
}

impl Ratios {
    pub fn from_totals(totals: &Totals) -> Self {
        let impressions = totals.impressions as f64;
        let clicks = totals.clicks as f64;
        let conversions = totals.conversions as f64;

        Self {
            ctr: ratio(clicks, impressions),
            cpc: ratio(totals.spend, clicks),
            cpa: ratio(totals.spend, conversions),
            roas: ratio(totals.revenue, totals.spend),
            conversion_rate: ratio(conversions, clicks),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
