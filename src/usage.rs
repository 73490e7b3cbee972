//! Usage aggregation and quota evaluation.
//!
//! Every completed provider call is recorded into two buckets per identity:
//! a daily bucket keyed by calendar date (UTC) and a monthly bucket keyed by
//! year-month. Buckets are created on first write and only ever grow.
//!
//! Persistence sits behind [`UsageStore`]; [`InMemoryUsageStore`] is the
//! bundled implementation. Monthly plan limits come from a [`PlanLookup`].
//! Neither a store nor a lookup is atomic across concurrent duplicate events
//! for the same logical request; small over- or under-counts are tolerated.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::pricing::round_cost;

/// Time period a bucket covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
}

impl Period {
    pub fn day_of(ts: DateTime<Utc>) -> Self {
        Period::Day(ts.date_naive())
    }

    pub fn month_of(ts: DateTime<Utc>) -> Self {
        Period::Month {
            year: ts.year(),
            month: ts.month(),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Day(date) => write!(f, "daily:{}", date.format("%Y-%m-%d")),
            Period::Month { year, month } => write!(f, "monthly:{year:04}-{month:02}"),
        }
    }
}

/// Address of a usage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub identity: String,
    pub period: Period,
}

impl BucketKey {
    pub fn new(identity: impl Into<String>, period: Period) -> Self {
        Self {
            identity: identity.into(),
            period,
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usage:{}:{}", self.identity, self.period)
    }
}

/// Counters for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub request_count: u64,
    pub tokens: u64,
    pub cost: f64,
}

/// Durable storage for usage buckets.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Create the bucket with `count = 1` or add one request, `tokens` and
    /// `cost` to it. Returns the updated record.
    async fn increment(&self, key: &BucketKey, tokens: u64, cost: f64) -> Result<UsageRecord>;

    /// Read a bucket.
    async fn get(&self, key: &BucketKey) -> Result<Option<UsageRecord>>;
}

/// Process-local usage store.
#[derive(Default)]
pub struct InMemoryUsageStore {
    buckets: DashMap<BucketKey, UsageRecord>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn increment(&self, key: &BucketKey, tokens: u64, cost: f64) -> Result<UsageRecord> {
        let record = self
            .buckets
            .entry(key.clone())
            .and_modify(|r| {
                r.request_count += 1;
                r.tokens += tokens;
                r.cost = round_cost(r.cost + cost);
            })
            .or_insert_with(|| UsageRecord {
                request_count: 1,
                tokens,
                cost: round_cost(cost),
            });
        Ok(record.value().clone())
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<UsageRecord>> {
        Ok(self.buckets.get(key).map(|r| r.value().clone()))
    }
}

/// Monthly token allowance for an identity.
#[async_trait]
pub trait PlanLookup: Send + Sync {
    async fn monthly_token_limit(&self, identity: &str) -> Result<u64>;
}

/// Plan limits from configuration.
///
/// ```rust
/// # use mimir::PlansConfig;
/// let plans: PlansConfig = toml::from_str("default_monthly_tokens = 5000").unwrap();
/// assert_eq!(plans.default_monthly_tokens, 5000);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PlansConfig {
    /// Limit for identities without an override. Default: 100,000.
    #[serde(default = "default_monthly_tokens")]
    pub default_monthly_tokens: u64,
    /// Per-identity limits.
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

fn default_monthly_tokens() -> u64 {
    100_000
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            default_monthly_tokens: default_monthly_tokens(),
            overrides: HashMap::new(),
        }
    }
}

/// [`PlanLookup`] backed by a [`PlansConfig`].
pub struct StaticPlanLookup {
    config: PlansConfig,
}

impl StaticPlanLookup {
    pub fn new(config: PlansConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PlanLookup for StaticPlanLookup {
    async fn monthly_token_limit(&self, identity: &str) -> Result<u64> {
        Ok(self
            .config
            .overrides
            .get(identity)
            .copied()
            .unwrap_or(self.config.default_monthly_tokens))
    }
}

/// Monthly token quota status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub exceeded: bool,
}

impl Quota {
    pub fn evaluate(used: u64, limit: u64) -> Self {
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
            exceeded: used >= limit,
        }
    }
}

/// Records usage events and evaluates quotas.
#[derive(Clone)]
pub struct UsageAggregator {
    store: Arc<dyn UsageStore>,
}

impl UsageAggregator {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Aggregator over a fresh [`InMemoryUsageStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryUsageStore::new()))
    }

    /// Record one completed call into the daily and monthly buckets.
    pub async fn record(
        &self,
        identity: &str,
        tokens: u64,
        cost: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let daily = BucketKey::new(identity, Period::day_of(timestamp));
        let monthly = BucketKey::new(identity, Period::month_of(timestamp));

        let day = self.store.increment(&daily, tokens, cost).await?;
        let month = self.store.increment(&monthly, tokens, cost).await?;
        debug!(
            identity,
            tokens,
            cost,
            daily_tokens = day.tokens,
            monthly_tokens = month.tokens,
            "usage recorded"
        );
        Ok(())
    }

    /// Compare this month's token total against `plan_limit`.
    pub async fn quota(&self, identity: &str, plan_limit: u64, now: DateTime<Utc>) -> Result<Quota> {
        let key = BucketKey::new(identity, Period::month_of(now));
        let used = self.store.get(&key).await?.map(|r| r.tokens).unwrap_or(0);
        Ok(Quota::evaluate(used, plan_limit))
    }

    /// Daily bucket for an identity.
    pub async fn daily(&self, identity: &str, date: NaiveDate) -> Result<Option<UsageRecord>> {
        self.store
            .get(&BucketKey::new(identity, Period::Day(date)))
            .await
    }

    /// Monthly bucket for an identity.
    pub async fn monthly(
        &self,
        identity: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<UsageRecord>> {
        self.store
            .get(&BucketKey::new(identity, Period::Month { year, month }))
            .await
    }
}
