//! Content cache eviction
//!
//! Fingerprints never expire on their own, so the disk cache grows with every
//! distinct stylesheet and support matrix it has seen. An eviction pass
//! starts once the total entry size exceeds `max_size` and removes entries
//! until the cache is back at `target_ratio` of it.
//!
//! - `lru`: least recently read entries go first. Reads refresh the entry's
//!   access time explicitly, see [`DiskStore`](super::DiskStore).
//! - `ttl`: only entries older than `default_ttl` may go, oldest first. The
//!   cache may stay over its limit when nothing has expired.
//!
//! ```toml
//! [cache]
//! max_size = "1GB"
//! eviction_policy = "lru"
//! default_ttl = "30d"
//! ```

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use super::store::StoredObject;

const SIZE_UNITS: &[(&str, u64)] = &[
    ("TB", 1 << 40),
    ("GB", 1 << 30),
    ("MB", 1 << 20),
    ("KB", 1 << 10),
    ("B", 1),
];

const DURATION_UNITS: &[(&str, u64)] = &[("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)];

#[derive(Debug, Clone, PartialEq)]
pub struct EvictionConfig {
    pub max_size_bytes: u64,
    pub policy: EvictionPolicyType,
    /// Entry lifetime for the `ttl` policy, in seconds
    pub default_ttl_secs: u64,
    /// Fraction of `max_size_bytes` a pass evicts down to
    pub target_ratio: f64,
    /// Upper bound on deletions in one pass
    pub max_evictions_per_run: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 1 << 30,
            policy: EvictionPolicyType::Lru,
            default_ttl_secs: 30 * 86_400,
            target_ratio: 0.9,
            max_evictions_per_run: 1000,
        }
    }
}

/// Splits `value` into a number and one of `units` (case-insensitive). A
/// bare number uses multiplier 1.
fn parse_quantity(value: &str, units: &[(&str, u64)], what: &str) -> Result<u64> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();

    let (digits, multiplier) = units
        .iter()
        .find_map(|(suffix, multiplier)| {
            lower
                .strip_suffix(&suffix.to_ascii_lowercase())
                .map(|digits| (digits, *multiplier))
        })
        .unwrap_or((lower.as_str(), 1));

    let count: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}: {:?}", what, trimmed))?;

    count
        .checked_mul(multiplier)
        .with_context(|| format!("{} out of range: {:?}", what, trimmed))
}

impl EvictionConfig {
    /// Parses sizes such as `"512KB"`, `"100mb"`, `"1GB"` or `"2048"`.
    pub fn parse_size(value: &str) -> Result<u64> {
        parse_quantity(value, SIZE_UNITS, "size")
    }

    /// Parses durations such as `"30d"`, `"12h"`, `"90m"` or `"45"` into seconds.
    pub fn parse_ttl(value: &str) -> Result<u64> {
        parse_quantity(value, DURATION_UNITS, "TTL")
    }

    /// Builds a config from the `[cache]` section's string values.
    pub fn from_cache_config(max_size: &str, policy: &str, default_ttl: &str) -> Result<Self> {
        Ok(Self {
            max_size_bytes: Self::parse_size(max_size)?,
            policy: policy.parse()?,
            default_ttl_secs: Self::parse_ttl(default_ttl)?,
            ..Self::default()
        })
    }

    pub fn target_size_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.target_ratio) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicyType {
    Lru,
    Ttl,
}

impl EvictionPolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Ttl => "ttl",
        }
    }

    fn may_evict(&self, object: &StoredObject, ttl_secs: u64, now: i64) -> bool {
        match self {
            Self::Lru => true,
            Self::Ttl => now.saturating_sub(object.created_at) > ttl_secs as i64,
        }
    }

    /// Timestamp deciding eviction order, smallest first.
    fn age_marker(&self, object: &StoredObject) -> i64 {
        match self {
            Self::Lru => object.accessed_at,
            Self::Ttl => object.created_at,
        }
    }
}

impl FromStr for EvictionPolicyType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        [Self::Lru, Self::Ttl]
            .into_iter()
            .find(|policy| policy.as_str().eq_ignore_ascii_case(value.trim()))
            .with_context(|| format!("Unknown eviction policy {:?} (expected lru or ttl)", value))
    }
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Keys removed, in eviction order
    pub evicted: Vec<String>,
    pub bytes_evicted: u64,
    pub bytes_before: u64,
}

/// Picks which cache entries a pass removes.
pub struct EvictionManager {
    config: EvictionConfig,
}

impl EvictionManager {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    pub fn needs_eviction(&self, total_bytes: u64) -> bool {
        total_bytes > self.config.max_size_bytes
    }

    /// Bytes a pass must free to get from `total_bytes` down to the target.
    pub fn bytes_to_evict(&self, total_bytes: u64) -> u64 {
        total_bytes.saturating_sub(self.config.target_size_bytes())
    }

    /// Entries to delete, in deletion order. Empty while the cache is
    /// within its limit.
    pub fn select_candidates(&self, objects: Vec<StoredObject>) -> Vec<StoredObject> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        self.select_candidates_at(objects, now)
    }

    fn select_candidates_at(&self, objects: Vec<StoredObject>, now: i64) -> Vec<StoredObject> {
        let total_bytes: u64 = objects.iter().map(|o| o.size).sum();
        if !self.needs_eviction(total_bytes) {
            debug!(
                total_bytes,
                max_size_bytes = self.config.max_size_bytes,
                "content cache within limit"
            );
            return Vec::new();
        }

        let policy = self.config.policy;
        let mut eligible: Vec<StoredObject> = objects
            .into_iter()
            .filter(|o| policy.may_evict(o, self.config.default_ttl_secs, now))
            .collect();
        // Key as tie-breaker keeps passes deterministic
        eligible.sort_by(|a, b| {
            policy
                .age_marker(a)
                .cmp(&policy.age_marker(b))
                .then_with(|| a.key.cmp(&b.key))
        });

        let mut remaining = self.bytes_to_evict(total_bytes);
        let selected: Vec<StoredObject> = eligible
            .into_iter()
            .take(self.config.max_evictions_per_run)
            .take_while(|o| {
                let take = remaining > 0;
                remaining = remaining.saturating_sub(o.size);
                take
            })
            .collect();

        info!(
            policy = policy.as_str(),
            total_bytes,
            max_size_bytes = self.config.max_size_bytes,
            selected = selected.len(),
            "content cache over limit"
        );

        selected
    }
}
