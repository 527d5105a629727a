//! Typed configuration surface (spec §6). Values only — no env/file
//! parsing lives in this crate (SPEC_FULL.md §12); an embedder's config
//! layer is expected to populate a `ProjectionConfig` from whatever
//! key-value tree format it uses.

use std::{collections::BTreeMap, time::Duration};

/// `restartBackoff.*`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RestartBackoffConfig {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub random_factor: f64,
    /// `-1` unbounded, `0` disabled.
    pub max_restarts: i64,
}

impl Default for RestartBackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            random_factor: 0.2,
            max_restarts: crate::backoff::UNBOUNDED_RESTARTS,
        }
    }
}

/// `recoveryStrategy.*`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RecoveryStrategyConfig {
    Fail,
    Skip,
    RetryAndFail { retries: u32, retry_delay: Duration },
    RetryAndSkip { retries: u32, retry_delay: Duration },
}

impl Default for RecoveryStrategyConfig {
    fn default() -> Self {
        RecoveryStrategyConfig::Fail
    }
}

impl RecoveryStrategyConfig {
    /// `AtMostOnce` only permits `fail`/`skip` — retries would re-run a
    /// handler whose single permitted attempt already happened before the
    /// offset was committed (spec §4.5, §9 "AtMostOnce invariant").
    pub fn compatible_with_at_most_once(&self) -> bool {
        matches!(self, RecoveryStrategyConfig::Fail | RecoveryStrategyConfig::Skip)
    }
}

/// `atLeastOnce.*`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AtLeastOnceConfig {
    pub save_offset_after_envelopes: u32,
    pub save_offset_after_duration: Duration,
}

impl Default for AtLeastOnceConfig {
    fn default() -> Self {
        Self {
            save_offset_after_envelopes: 1,
            save_offset_after_duration: Duration::from_millis(500),
        }
    }
}

/// `grouped.*`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupedConfig {
    pub group_after_envelopes: u32,
    pub group_after_duration: Duration,
}

impl Default for GroupedConfig {
    fn default() -> Self {
        Self {
            group_after_envelopes: 20,
            group_after_duration: Duration::from_millis(500),
        }
    }
}

/// `management.*`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ManagementConfig {
    pub operation_timeout: Duration,
    pub ask_timeout: Duration,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(10),
            ask_timeout: Duration::from_secs(3),
        }
    }
}

/// `offsetStore.*`.
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetStoreConfig {
    pub timestamp_offset_table: String,
    pub time_window: Duration,
    pub keep_number_of_entries: usize,
    pub evict_interval: Duration,
    pub offset_batch_size: usize,
    pub offset_slice_read_parallelism: usize,
}

impl Default for OffsetStoreConfig {
    fn default() -> Self {
        Self {
            timestamp_offset_table: "timestamp_offset".to_string(),
            time_window: Duration::from_secs(10 * 60),
            keep_number_of_entries: 10_000,
            evict_interval: Duration::from_secs(10),
            offset_batch_size: 20,
            offset_slice_read_parallelism: 1,
        }
    }
}

/// `timeToLive.*`: a default plus per-projection-name overrides, where a
/// trailing `*` in a configured name matches any name sharing that
/// prefix. Longest matching prefix wins, consistent with how a more
/// specific override should take priority over a broader one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeToLiveConfig {
    pub projection_defaults: Option<Duration>,
    overrides: BTreeMap<String, Duration>,
}

impl TimeToLiveConfig {
    pub fn new(projection_defaults: Option<Duration>) -> Self {
        Self {
            projection_defaults,
            overrides: BTreeMap::new(),
        }
    }

    /// `name` may end in `*` to match any projection name sharing that
    /// prefix.
    pub fn with_override(mut self, name: impl Into<String>, ttl: Duration) -> Self {
        self.overrides.insert(name.into(), ttl);
        self
    }

    pub fn ttl_for(&self, projection_name: &str) -> Option<Duration> {
        let mut best: Option<(&str, Duration)> = None;
        for (pattern, ttl) in &self.overrides {
            let matches = if let Some(prefix) = pattern.strip_suffix('*') {
                projection_name.starts_with(prefix)
            } else {
                pattern == projection_name
            };
            if matches {
                let is_better = match best {
                    None => true,
                    Some((best_pattern, _)) => pattern.len() > best_pattern.len(),
                };
                if is_better {
                    best = Some((pattern.as_str(), *ttl));
                }
            }
        }
        best.map(|(_, ttl)| ttl).or(self.projection_defaults)
    }
}

/// Root configuration tree for one projection (spec §6).
#[derive(Clone, Debug, Default)]
pub struct ProjectionConfig {
    pub restart_backoff: RestartBackoffConfig,
    pub recovery_strategy: RecoveryStrategyConfig,
    pub at_least_once: AtLeastOnceConfig,
    pub grouped: GroupedConfig,
    pub management: ManagementConfig,
    pub offset_store: OffsetStoreConfig,
    pub time_to_live: TimeToLiveConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = ProjectionConfig::default();
        assert_eq!(c.offset_store.offset_batch_size, 20);
        assert_eq!(c.offset_store.keep_number_of_entries, 10_000);
        assert_eq!(c.offset_store.evict_interval, Duration::from_secs(10));
        assert_eq!(c.grouped.group_after_envelopes, 20);
        assert_eq!(c.grouped.group_after_duration, Duration::from_millis(500));
        assert_eq!(c.management.ask_timeout, Duration::from_secs(3));
        assert_eq!(c.management.operation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn ttl_prefix_override_picks_longest_match() {
        let ttl = TimeToLiveConfig::new(Some(Duration::from_secs(1)))
            .with_override("orders-*", Duration::from_secs(10))
            .with_override("orders-eu-*", Duration::from_secs(20))
            .with_override("billing", Duration::from_secs(30));

        assert_eq!(ttl.ttl_for("orders-eu-1"), Some(Duration::from_secs(20)));
        assert_eq!(ttl.ttl_for("orders-us-1"), Some(Duration::from_secs(10)));
        assert_eq!(ttl.ttl_for("billing"), Some(Duration::from_secs(30)));
        assert_eq!(ttl.ttl_for("unrelated"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn recovery_strategy_at_most_once_compatibility() {
        assert!(RecoveryStrategyConfig::Fail.compatible_with_at_most_once());
        assert!(RecoveryStrategyConfig::Skip.compatible_with_at_most_once());
        assert!(!RecoveryStrategyConfig::RetryAndFail {
            retries: 3,
            retry_delay: Duration::from_millis(100)
        }
        .compatible_with_at_most_once());
    }
}
