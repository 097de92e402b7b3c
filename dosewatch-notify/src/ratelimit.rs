//! Per-key sliding-window rate limiter with a cooldown penalty.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Limiter policy: `max_events` per `window`, and once the window is
/// exceeded the key is blocked for `cooldown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    /// Events allowed inside one window.
    pub max_events: u32,
    /// Sliding window length.
    pub window: Duration,
    /// Block duration once the window is exceeded.
    pub cooldown: Duration,
}

impl CooldownPolicy {
    /// Policy for user-facing notifications: one per minute, five-minute
    /// cooldown once exceeded.
    pub fn notifications() -> Self {
        Self {
            max_events: 1,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Outcome of an [`CooldownLimiter::acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event may proceed; it has been counted.
    Allowed,
    /// The key is over its budget.
    Limited {
        /// How long until the key unblocks.
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the event may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

#[derive(Debug, Default)]
struct Entry {
    events: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

/// Sliding-window log limiter, one entry per key. Mutation is serialized
/// per key by the map shard lock; each service instance owns its limiter.
#[derive(Debug)]
pub struct CooldownLimiter {
    policy: CooldownPolicy,
    entries: DashMap<String, Entry>,
}

impl CooldownLimiter {
    /// Create a limiter with the given policy.
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            entries: DashMap::new(),
        }
    }

    /// Try to consume one event for `key`.
    pub fn acquire(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_default();

        if let Some(blocked_until) = entry.blocked_until {
            if now < blocked_until {
                return Decision::Limited {
                    retry_after: blocked_until - now,
                };
            }
            entry.blocked_until = None;
            entry.events.clear();
        }

        while let Some(oldest) = entry.events.front() {
            if now.duration_since(*oldest) >= self.policy.window {
                entry.events.pop_front();
            } else {
                break;
            }
        }

        if entry.events.len() as u32 >= self.policy.max_events {
            let blocked_until = now + self.policy.cooldown;
            entry.blocked_until = Some(blocked_until);
            debug!(key, cooldown = ?self.policy.cooldown, "rate limit exceeded, cooling down");
            return Decision::Limited {
                retry_after: self.policy.cooldown,
            };
        }

        entry.events.push_back(now);
        Decision::Allowed
    }

    /// Forget a key's history.
    pub fn reset(&self, key: &str) {
        self.entries.remove(key);
    }

    /// The limiter's policy.
    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }
}
