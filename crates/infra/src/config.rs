//! Deployment configuration loaded from `STOCKFORGE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use stockforge_inventory::StockPolicy;

use crate::retry::RetryPolicy;

pub const ENV_ALLOW_NEGATIVE_STOCK: &str = "STOCKFORGE_ALLOW_NEGATIVE_STOCK";
pub const ENV_LOCK_TIMEOUT_MS: &str = "STOCKFORGE_LOCK_TIMEOUT_MS";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "STOCKFORGE_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "STOCKFORGE_RETRY_BASE_DELAY_MS";
pub const ENV_RESERVATION_TTL_MS: &str = "STOCKFORGE_RESERVATION_TTL_MS";
pub const ENV_BIND_ADDR: &str = "STOCKFORGE_BIND_ADDR";

#[derive(Debug, Clone, PartialEq)]
pub struct StockForgeConfig {
    pub stock_policy: StockPolicy,
    /// Upper bound on waiting for an item row lock or an order lock.
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    pub reservation_ttl: Duration,
    pub bind_addr: String,
}

impl Default for StockForgeConfig {
    fn default() -> Self {
        Self {
            stock_policy: StockPolicy::default(),
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            reservation_ttl: Duration::from_millis(5000),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl StockForgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let allow_negative = parse_or(&lookup, ENV_ALLOW_NEGATIVE_STOCK, defaults.stock_policy.allow_negative);
        let lock_timeout_ms = parse_or(&lookup, ENV_LOCK_TIMEOUT_MS, defaults.lock_timeout.as_millis() as u64);
        let max_attempts = parse_or(&lookup, ENV_RETRY_MAX_ATTEMPTS, defaults.retry.max_attempts).max(1);
        let base_delay_ms = parse_or(
            &lookup,
            ENV_RETRY_BASE_DELAY_MS,
            defaults.retry.base_delay.as_millis() as u64,
        );
        let ttl_ms = parse_or(&lookup, ENV_RESERVATION_TTL_MS, defaults.reservation_ttl.as_millis() as u64);
        let bind_addr = lookup(ENV_BIND_ADDR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.bind_addr);

        let base_delay = Duration::from_millis(base_delay_ms);
        Self {
            stock_policy: StockPolicy { allow_negative },
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            retry: RetryPolicy::exponential(max_attempts, base_delay, base_delay.saturating_mul(16)),
            reservation_ttl: Duration::from_millis(ttl_ms),
            bind_addr,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, default = ?default, "unparseable config value; using default");
                default
            }
        },
    }
}
