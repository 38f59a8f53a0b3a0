// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rate Limiter
//!
//! Sliding minute/hour/day windows plus a token bucket for burst smoothing,
//! tracked independently per caller identifier.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Admission control in front of provider calls and the HTTP API

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::credential::loggable_identifier;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry hint when the bucket, rather than a window, is exhausted
const BUCKET_RETRY_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
    pub burst_size: u32,
}

impl RateLimitConfig {
    /// 60/min, 600/hour, 10,000/day, burst 100
    pub const fn standard() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 600,
            requests_per_day: 10_000,
            burst_size: 100,
        }
    }

    /// 5/min, 50/hour, 500/day, burst 10
    pub const fn strict() -> Self {
        Self {
            requests_per_minute: 5,
            requests_per_hour: 50,
            requests_per_day: 500,
            burst_size: 10,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Which limit rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Burst,
    Minute,
    Hour,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64, limit: LimitKind },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Denied { retry_after_secs, .. } => Some(*retry_after_secs),
        }
    }
}

/// Per-identifier counters. Only mutated through [`RateLimiter::admit`].
#[derive(Debug)]
struct RateLimitWindow {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
    day: VecDeque<Instant>,
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl RateLimitWindow {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            minute: VecDeque::new(),
            hour: VecDeque::new(),
            day: VecDeque::new(),
            tokens: f64::from(capacity),
            last_refill: now,
            last_seen: now,
        }
    }

    fn prune(&mut self, now: Instant) {
        prune_older_than(&mut self.minute, now, MINUTE);
        prune_older_than(&mut self.hour, now, HOUR);
        prune_older_than(&mut self.day, now, DAY);
    }

    fn refill(&mut self, now: Instant, config: &RateLimitConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let rate = f64::from(config.requests_per_minute) / 60.0;
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(config.burst_size));
        self.last_refill = now;
    }

    fn check(&mut self, now: Instant, config: &RateLimitConfig) -> Admission {
        self.last_seen = now;
        self.prune(now);
        self.refill(now, config);

        if self.tokens < 1.0 {
            return Admission::Denied {
                retry_after_secs: BUCKET_RETRY_SECS,
                limit: LimitKind::Burst,
            };
        }

        let windows = [
            (&self.minute, config.requests_per_minute, MINUTE, LimitKind::Minute),
            (&self.hour, config.requests_per_hour, HOUR, LimitKind::Hour),
            (&self.day, config.requests_per_day, DAY, LimitKind::Day),
        ];
        for (hits, limit, span, kind) in windows {
            if hits.len() >= limit as usize {
                return Admission::Denied {
                    retry_after_secs: retry_after(hits, now, span),
                    limit: kind,
                };
            }
        }

        self.minute.push_back(now);
        self.hour.push_back(now);
        self.day.push_back(now);
        self.tokens -= 1.0;
        Admission::Allowed
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

fn prune_older_than(hits: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= span {
            hits.pop_front();
        } else {
            break;
        }
    }
}

/// Whole seconds until the oldest hit leaves the window, at least 1
fn retry_after(hits: &VecDeque<Instant>, now: Instant, span: Duration) -> u64 {
    let Some(oldest) = hits.front() else {
        return 1;
    };
    let remaining = span.saturating_sub(now.saturating_duration_since(*oldest));
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

/// Admission control keyed by caller identifier.
///
/// Each check runs under the map's entry lock for that identifier, so
/// concurrent checks for one caller never lose an increment, and checks
/// for different callers only contend when they hash to the same shard.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateLimitWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether `identifier` may proceed. Never fails.
    pub fn admit(&self, identifier: &str) -> Admission {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| RateLimitWindow::new(self.config.burst_size, now));

        let admission = window.check(now, &self.config);
        drop(window);

        if let Admission::Denied { retry_after_secs, limit } = admission {
            debug!(
                identifier = %loggable_identifier(identifier),
                limit = ?limit,
                retry_after_secs,
                "Rate limit exceeded"
            );
            metrics::counter!("concord_rate_limit_denied_total").increment(1);
        }
        admission
    }

    /// Number of identifiers currently tracked
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Drop identifiers with no activity inside the day window
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.idle_for(now) < DAY);
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.windows.len(), "Evicted idle rate-limit windows");
        }
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) every `period` until `shutdown` fires
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Starting rate-limit sweeper");
            let mut tick = interval(period.max(Duration::from_secs(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.evict_idle();
                    }
                    _ = shutdown.cancelled() => {
                        info!("Shutdown signal received, stopping rate-limit sweeper");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::standard())
    }
}
