// Three-tier adaptive throttle engine with penalty mode.
//
// Tiers: global (per client IP), user (per authenticated subject), auth
// (per IP+path on the credential endpoints). Each tier keeps an atomic
// window counter in the KV store:
//
//   count <= threshold            -> Allowed
//   threshold < count <= max      -> Throttled, quadratic progressive delay
//   count > max                   -> Blocked, penalty window opens
//
// While a penalty is active, one attempt per elapsed minute is released.
// Exhausting the released attempts after the first minute resets the
// penalty clock; a hit inside the first minute never does (the original
// clock keeps running).
//
// All penalty math uses server wall-clock seconds; nodes are assumed to be
// NTP-synchronized.

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

use crate::app_config::{ThrottleSettings, ThrottleTierSettings};
use crate::cache::{CacheError, SharedKvStore};

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Which tier a check runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleTier {
    Global,
    User,
    Auth,
}

impl ThrottleTier {
    fn prefix(&self) -> &'static str {
        match self {
            ThrottleTier::Global => "throttle:global",
            ThrottleTier::User => "throttle:user",
            ThrottleTier::Auth => "throttle:auth",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleTier::Global => "global",
            ThrottleTier::User => "user",
            ThrottleTier::Auth => "auth",
        }
    }
}

/// Details carried by a Blocked decision, rendered into the 429 body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub remaining_attempts: i64,
    pub next_attempt_in_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalty_remaining_seconds: Option<u64>,
    pub in_penalty: bool,
}

#[derive(Debug, Clone)]
pub enum ThrottleDecision {
    Allowed {
        /// Released attempts left in the current penalty minute, if the
        /// request passed through penalty mode
        remaining_released: Option<i64>,
    },
    Throttled {
        delay_ms: u64,
        limit: u32,
        remaining: u32,
    },
    Blocked(BlockInfo),
}

/// Deterministic quadratic ramp between the threshold and the hard limit
pub fn progressive_delay_ms(count: u32, tier: &ThrottleTierSettings) -> u64 {
    let threshold = tier.throttle_threshold;
    let max = tier.max_requests_per_minute;

    let ratio = if max > threshold {
        (count.saturating_sub(threshold)) as f64 / (max - threshold) as f64
    } else {
        1.0
    };
    let ratio = ratio.clamp(0.0, 1.0);

    ((tier.max_delay_ms as f64 * ratio * ratio).round() as u64).min(tier.max_delay_ms)
}

pub struct ThrottleService {
    store: SharedKvStore,
    settings: ThrottleSettings,
}

impl ThrottleService {
    pub fn new(store: SharedKvStore, settings: ThrottleSettings) -> Self {
        Self { store, settings }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn tier_settings(&self, tier: ThrottleTier) -> &ThrottleTierSettings {
        match tier {
            ThrottleTier::Global => &self.settings.global,
            ThrottleTier::User => &self.settings.user,
            ThrottleTier::Auth => &self.settings.auth,
        }
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Evaluate one tier for the given identity (IP, user id, or ip:path).
    /// A disabled engine is a no-op that admits everything.
    pub async fn check(
        &self,
        tier: ThrottleTier,
        identity: &str,
    ) -> Result<ThrottleDecision, ThrottleError> {
        if !self.settings.enabled {
            return Ok(ThrottleDecision::Allowed {
                remaining_released: None,
            });
        }

        let config = self.tier_settings(tier).clone();
        let key = format!("{}:{}", tier.prefix(), identity);
        let now = Self::now_secs();

        if let Some(penalty_start) = self.read_penalty_start(&key).await? {
            return self.check_in_penalty(&key, &config, now, penalty_start).await;
        }

        let count = self
            .store
            .increment(&key, Some(Duration::from_secs(config.window_seconds)))
            .await? as u32;

        if count <= config.throttle_threshold {
            return Ok(ThrottleDecision::Allowed {
                remaining_released: None,
            });
        }

        if count <= config.max_requests_per_minute {
            let delay_ms = progressive_delay_ms(count, &config);
            debug!(tier = tier.as_str(), identity, count, delay_ms, "throttling request");
            return Ok(ThrottleDecision::Throttled {
                delay_ms,
                limit: config.max_requests_per_minute,
                remaining: config.max_requests_per_minute.saturating_sub(count),
            });
        }

        // Over the hard limit: open a penalty window
        self.store
            .set(
                &format!("{}:penalty", key),
                now.to_string(),
                Some(Duration::from_secs(config.penalty_seconds)),
            )
            .await?;

        debug!(tier = tier.as_str(), identity, count, "blocking request, penalty started");

        Ok(ThrottleDecision::Blocked(BlockInfo {
            remaining_attempts: 0,
            next_attempt_in_seconds: 60,
            penalty_remaining_seconds: Some(config.penalty_seconds),
            in_penalty: true,
        }))
    }

    async fn read_penalty_start(&self, key: &str) -> Result<Option<i64>, ThrottleError> {
        let raw = self.store.get(&format!("{}:penalty", key)).await?;
        Ok(raw.and_then(|v| v.parse::<i64>().ok()))
    }

    /// Penalty mode: `elapsed_minutes` attempts have been released since the
    /// penalty began; `penalty_used` counts how many were consumed.
    async fn check_in_penalty(
        &self,
        key: &str,
        config: &ThrottleTierSettings,
        now: i64,
        penalty_start: i64,
    ) -> Result<ThrottleDecision, ThrottleError> {
        let penalty_key = format!("{}:penalty", key);
        let used_key = format!("{}:penalty_used", key);

        let elapsed = (now - penalty_start).max(0);
        let elapsed_minutes = elapsed / 60;

        let used: i64 = self
            .store
            .get(&used_key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if used >= elapsed_minutes {
            if elapsed_minutes > 0 {
                // Released attempts were consumed; restart the penalty clock
                self.store
                    .set(
                        &penalty_key,
                        now.to_string(),
                        Some(Duration::from_secs(config.penalty_seconds)),
                    )
                    .await?;
                self.store.remove(&used_key).await?;

                return Ok(ThrottleDecision::Blocked(BlockInfo {
                    remaining_attempts: 0,
                    next_attempt_in_seconds: 60,
                    penalty_remaining_seconds: Some(config.penalty_seconds),
                    in_penalty: true,
                }));
            }

            // First-minute hit: block without touching the original clock
            return Ok(ThrottleDecision::Blocked(BlockInfo {
                remaining_attempts: 0,
                next_attempt_in_seconds: (60 - (elapsed % 60)) as u64,
                penalty_remaining_seconds: Some(
                    config.penalty_seconds.saturating_sub(elapsed as u64),
                ),
                in_penalty: true,
            }));
        }

        // Consume one released attempt
        let new_used = self
            .store
            .increment(&used_key, Some(Duration::from_secs(config.penalty_seconds)))
            .await?;

        Ok(ThrottleDecision::Allowed {
            remaining_released: Some(elapsed_minutes - new_used),
        })
    }
}
