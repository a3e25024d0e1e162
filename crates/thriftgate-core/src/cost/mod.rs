//! Cost ledger and reporting
//!
//! Every request that leaves the gateway appends one [`CostRecord`], cache
//! hits included. Hits cost nothing but still count toward traffic, which
//! is what makes the cache hit rate in a [`CostReport`] meaningful.
//!
//! The in-memory [`CostTracker`] is the source of truth for budget checks;
//! durable persistence lives in [`CostStore`].

mod store;

pub use store::{CostStore, CREATE_COST_RECORDS_TABLE_SQL};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::CostSettings;

/// Alert when daily spend reaches this fraction of the limit
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;

/// One settled request in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Unique identifier
    pub id: String,
    /// When the request settled
    pub recorded_at: DateTime<Utc>,
    /// Model that served (or originally produced) the response
    pub model_name: String,
    /// Provider of that model
    pub provider: String,
    /// Input tokens consumed (0 for cache hits)
    pub tokens_in: u32,
    /// Output tokens generated (0 for cache hits)
    pub tokens_out: u32,
    /// Amount charged in USD (0.0 for cache hits)
    pub cost_usd: f64,
    /// Whether the response came from cache
    pub cached: bool,
    /// End-to-end latency in milliseconds
    pub latency_ms: u64,
}

impl CostRecord {
    /// Record a dispatched request
    pub fn new(
        model_name: impl Into<String>,
        provider: impl Into<String>,
        tokens_in: u32,
        tokens_out: u32,
        cost_usd: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            model_name: model_name.into(),
            provider: provider.into(),
            tokens_in,
            tokens_out,
            cost_usd,
            cached: false,
            latency_ms: 0,
        }
    }

    /// Record a request served from cache
    pub fn cached_hit(
        model_name: impl Into<String>,
        provider: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recorded_at: Utc::now(),
            model_name: model_name.into(),
            provider: provider.into(),
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            cached: true,
            latency_ms,
        }
    }

    /// Set the measured latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Half-open reporting window: `start` inclusive, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// One calendar day, midnight to midnight UTC
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        Self {
            start,
            end: start + chrono::Duration::days(1),
        }
    }

    /// The current UTC day
    pub fn today() -> Self {
        Self::day(Utc::now().date_naive())
    }

    /// Trailing window ending now
    pub fn last_days(days: u32) -> Self {
        let end = Utc::now();
        Self {
            start: end - chrono::Duration::days(days as i64),
            end,
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Whole days covered, never less than 1
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days().max(1)
    }
}

/// Per-model slice of a report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelBreakdown {
    /// Provider of the model
    pub provider: String,
    /// Requests attributed to the model, cache hits included
    pub request_count: u64,
    /// Input tokens dispatched
    pub tokens_in: u64,
    /// Output tokens generated
    pub tokens_out: u64,
    /// Spend attributed to the model
    pub cost_usd: f64,
}

impl ModelBreakdown {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            request_count: 0,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
        }
    }

    /// Fold one record into this slice
    pub fn add(&mut self, record: &CostRecord) {
        self.request_count += 1;
        self.tokens_in += record.tokens_in as u64;
        self.tokens_out += record.tokens_out as u64;
        if !record.cached {
            self.cost_usd += record.cost_usd;
        }
    }
}

/// Aggregated spend over a period
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    /// Window the report covers
    pub period: Period,
    /// Total billed spend (cache hits contribute nothing)
    pub total_cost_usd: f64,
    /// Total spend divided by days in the period
    pub avg_daily_cost_usd: f64,
    /// Fraction of requests served from cache
    pub cache_hit_rate: f64,
    /// All requests in the period
    pub request_count: u64,
    /// Requests served from cache
    pub cached_count: u64,
    /// Per-model slices keyed by model name
    pub by_model: HashMap<String, ModelBreakdown>,
}

/// Append-only in-memory ledger with budget checks
#[derive(Debug)]
pub struct CostTracker {
    records: Arc<RwLock<Vec<CostRecord>>>,
    daily_limit_usd: f64,
    alert_threshold: f64,
}

impl Clone for CostTracker {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            daily_limit_usd: self.daily_limit_usd,
            alert_threshold: self.alert_threshold,
        }
    }
}

impl CostTracker {
    /// Create a tracker with a daily budget in USD
    pub fn new(daily_limit_usd: f64) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            daily_limit_usd,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
        }
    }

    /// Set the alert threshold as a fraction of the daily limit
    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn from_settings(settings: &CostSettings) -> Self {
        Self::new(settings.daily_limit_usd).with_alert_threshold(settings.alert_threshold)
    }

    /// Append a record to the ledger.
    ///
    /// Emits a warning the first time today's spend crosses the alert
    /// threshold.
    pub fn record(&self, record: CostRecord) {
        let billable = if record.cached { 0.0 } else { record.cost_usd };
        if let Ok(mut records) = self.records.write() {
            records.push(record);
        }

        if billable > 0.0 {
            let total = self.today_total();
            let threshold = self.daily_limit_usd * self.alert_threshold;
            if total >= threshold && total - billable < threshold {
                warn!(
                    total_usd = total,
                    limit_usd = self.daily_limit_usd,
                    "Daily spend crossed alert threshold"
                );
            }
        }
    }

    /// Aggregate all records whose timestamp falls in the period
    pub fn report(&self, period: Period) -> CostReport {
        let records: Vec<CostRecord> = self
            .records
            .read()
            .ok()
            .map(|records| {
                records
                    .iter()
                    .filter(|record| period.contains(record.recorded_at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut report = CostReport {
            period,
            total_cost_usd: 0.0,
            avg_daily_cost_usd: 0.0,
            cache_hit_rate: 0.0,
            request_count: 0,
            cached_count: 0,
            by_model: HashMap::new(),
        };

        for record in &records {
            report.request_count += 1;
            if record.cached {
                report.cached_count += 1;
            } else {
                report.total_cost_usd += record.cost_usd;
            }
            report
                .by_model
                .entry(record.model_name.clone())
                .or_insert_with(|| ModelBreakdown::new(record.provider.clone()))
                .add(record);
        }

        report.avg_daily_cost_usd = report.total_cost_usd / period.num_days() as f64;
        if report.request_count > 0 {
            report.cache_hit_rate = report.cached_count as f64 / report.request_count as f64;
        }
        report
    }

    /// Billed spend so far today (UTC)
    pub fn today_total(&self) -> f64 {
        let today = Utc::now().date_naive();
        self.records
            .read()
            .ok()
            .map(|records| {
                records
                    .iter()
                    .filter(|record| !record.cached && record.recorded_at.date_naive() == today)
                    .map(|record| record.cost_usd)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Budget left today, floored at zero
    pub fn remaining_budget(&self) -> f64 {
        (self.daily_limit_usd - self.today_total()).max(0.0)
    }

    pub fn is_approaching_limit(&self) -> bool {
        self.today_total() >= self.daily_limit_usd * self.alert_threshold
    }

    pub fn is_over_limit(&self) -> bool {
        self.today_total() >= self.daily_limit_usd
    }

    pub fn daily_limit(&self) -> f64 {
        self.daily_limit_usd
    }

    /// Snapshot of the full ledger
    pub fn records(&self) -> Vec<CostRecord> {
        self.records
            .read()
            .ok()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record, mainly for tests
    pub fn clear(&self) {
        if let Ok(mut records) = self.records.write() {
            records.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatched(model: &str, cost_usd: f64) -> CostRecord {
        CostRecord::new(model, "openai", 100, 50, cost_usd)
    }

    #[test]
    fn test_record_and_len() {
        let tracker = CostTracker::new(10.0);
        assert!(tracker.is_empty());

        tracker.record(dispatched("openai/gpt-4o-mini", 0.01));
        tracker.record(CostRecord::cached_hit("openai/gpt-4o-mini", "openai", 3));

        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_cached_hits_are_free() {
        let tracker = CostTracker::new(10.0);
        tracker.record(CostRecord::cached_hit("openai/gpt-4o", "openai", 2));
        tracker.record(CostRecord::cached_hit("openai/gpt-4o", "openai", 2));

        assert_eq!(tracker.today_total(), 0.0);
        assert_eq!(tracker.remaining_budget(), 10.0);
    }

    #[test]
    fn test_today_total_and_budget() {
        let tracker = CostTracker::new(1.0);
        tracker.record(dispatched("openai/gpt-4o", 0.25));
        tracker.record(dispatched("openai/gpt-4o", 0.35));

        assert!((tracker.today_total() - 0.6).abs() < 0.001);
        assert!((tracker.remaining_budget() - 0.4).abs() < 0.001);
        assert!(!tracker.is_over_limit());

        tracker.record(dispatched("openai/gpt-4o", 0.5));
        assert!(tracker.is_over_limit());
        assert_eq!(tracker.remaining_budget(), 0.0);
    }

    #[test]
    fn test_approaching_limit_threshold() {
        let tracker = CostTracker::new(1.0).with_alert_threshold(0.8);
        tracker.record(dispatched("openai/gpt-4o", 0.5));
        assert!(!tracker.is_approaching_limit());

        tracker.record(dispatched("openai/gpt-4o", 0.3));
        assert!(tracker.is_approaching_limit());
        assert!(!tracker.is_over_limit());
    }

    #[test]
    fn test_report_aggregates() {
        let tracker = CostTracker::new(10.0);
        tracker.record(dispatched("openai/gpt-4o-mini", 0.01));
        tracker.record(dispatched("openai/gpt-4o", 0.02));
        tracker.record(CostRecord::cached_hit("openai/gpt-4o-mini", "openai", 2));

        let report = tracker.report(Period::today());
        assert!((report.total_cost_usd - 0.03).abs() < 0.001);
        assert_eq!(report.request_count, 3);
        assert_eq!(report.cached_count, 1);
        assert!((report.cache_hit_rate - 1.0 / 3.0).abs() < 0.001);

        let mini = &report.by_model["openai/gpt-4o-mini"];
        assert_eq!(mini.request_count, 2);
        assert!((mini.cost_usd - 0.01).abs() < 0.001);
        assert_eq!(mini.tokens_in, 100);

        let full = &report.by_model["openai/gpt-4o"];
        assert_eq!(full.request_count, 1);
        assert!((full.cost_usd - 0.02).abs() < 0.001);
    }

    #[test]
    fn test_report_respects_period() {
        let tracker = CostTracker::new(10.0);
        let mut old = dispatched("openai/gpt-4o", 5.0);
        old.recorded_at = Utc::now() - chrono::Duration::days(3);
        tracker.record(old);
        tracker.record(dispatched("openai/gpt-4o", 0.1));

        let today = tracker.report(Period::today());
        assert!((today.total_cost_usd - 0.1).abs() < 0.001);
        assert_eq!(today.request_count, 1);

        let week = tracker.report(Period::last_days(7));
        assert!((week.total_cost_usd - 5.1).abs() < 0.001);
        assert_eq!(week.request_count, 2);
    }

    #[test]
    fn test_report_avg_daily() {
        let tracker = CostTracker::new(10.0);
        tracker.record(dispatched("openai/gpt-4o", 0.7));

        let report = tracker.report(Period::last_days(7));
        assert!((report.avg_daily_cost_usd - 0.1).abs() < 0.001);
    }

    #[test]
    fn test_empty_report() {
        let tracker = CostTracker::new(10.0);
        let report = tracker.report(Period::today());
        assert_eq!(report.total_cost_usd, 0.0);
        assert_eq!(report.cache_hit_rate, 0.0);
        assert!(report.by_model.is_empty());
    }

    #[test]
    fn test_period_contains_is_half_open() {
        let period = Period::day(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert!(period.contains(period.start));
        assert!(!period.contains(period.end));
        assert!(period.contains(period.end - chrono::Duration::nanoseconds(1)));
    }

    #[test]
    fn test_period_num_days_floor() {
        let now = Utc::now();
        let instant = Period::between(now, now);
        assert_eq!(instant.num_days(), 1);

        let week = Period::last_days(7);
        assert_eq!(week.num_days(), 7);
    }

    #[test]
    fn test_clear() {
        let tracker = CostTracker::new(10.0);
        tracker.record(dispatched("openai/gpt-4o", 0.1));
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.today_total(), 0.0);
    }
}
