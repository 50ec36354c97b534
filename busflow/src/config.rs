//! Runtime configuration for the callback store, the message store and the
//! worker pool.

use crate::errors::BusflowError;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Callback correlation settings.
    #[serde(default)]
    pub callbacks: CallbackConfig,
    /// Persistent store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl BusConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback configuration.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CallbackConfig) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Sets the store configuration.
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, BusflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from defaults overridden by `BUSFLOW_*`
    /// environment variables.
    pub fn from_env() -> Result<Self, BusflowError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from defaults overridden by the given lookup.
    ///
    /// Recognized names: `BUSFLOW_CALLBACK_TIMEOUT_MS`,
    /// `BUSFLOW_SWEEP_INTERVAL_MS`, `BUSFLOW_MAX_RETRIES`,
    /// `BUSFLOW_LOCK_BATCH_SIZE`, `BUSFLOW_CORE_WORKERS`,
    /// `BUSFLOW_MAX_WORKERS`, `BUSFLOW_QUEUE_CAPACITY`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BusflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "BUSFLOW_CALLBACK_TIMEOUT_MS")? {
            config.callbacks.default_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "BUSFLOW_SWEEP_INTERVAL_MS")? {
            config.callbacks.sweep_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "BUSFLOW_MAX_RETRIES")? {
            config.store.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "BUSFLOW_LOCK_BATCH_SIZE")? {
            config.store.lock_batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "BUSFLOW_CORE_WORKERS")? {
            config.pool.core_workers = v;
        }
        if let Some(v) = parse_var(&lookup, "BUSFLOW_MAX_WORKERS")? {
            config.pool.max_workers = v;
        }
        if let Some(v) = parse_var(&lookup, "BUSFLOW_QUEUE_CAPACITY")? {
            config.pool.queue_capacity = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), BusflowError> {
        self.pool.validate()?;
        if self.store.lock_batch_size == 0 {
            return Err(BusflowError::Config(
                "store.lock_batch_size must be at least 1".to_string(),
            ));
        }
        if self.callbacks.sweep_interval_ms == 0 {
            return Err(BusflowError::Config(
                "callbacks.sweep_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>, BusflowError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BusflowError::Config(format!("{name}: cannot parse '{raw}'"))),
    }
}

/// Settings for the callback correlation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Timeout applied when a mediator does not set its own.
    #[serde(default = "default_callback_timeout")]
    pub default_timeout_ms: u64,
    /// How often the sweeper checks for expired callbacks.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

fn default_callback_timeout() -> u64 {
    120_000
}

fn default_sweep_interval() -> u64 {
    15_000
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_callback_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl CallbackConfig {
    /// Sets the default timeout.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub fn with_sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = ms;
        self
    }

    /// Default timeout as a Duration.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// When a failed stored message becomes lockable again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "backoff", rename_all = "snake_case")]
pub enum RetryMode {
    /// Requeued messages are lockable at once.
    #[default]
    Immediate,
    /// Requeued messages wait `delay_for(attempts - 1)`.
    Backoff(RetryConfig),
}

impl RetryMode {
    /// Delay before a message that has failed `attempts` times is retried.
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Backoff(config) => config.delay_for(attempts.saturating_sub(1)),
        }
    }
}

/// Settings for the persistent message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Failures tolerated before a message is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Requeue timing.
    #[serde(default)]
    pub retry_mode: RetryMode,
    /// Retry policy for transient I/O failures at the store boundary.
    #[serde(default)]
    pub io_retry: RetryConfig,
    /// Messages locked per poll.
    #[serde(default = "default_lock_batch_size")]
    pub lock_batch_size: usize,
    /// Delay between polls of the background processor.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_lock_batch_size() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    1_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_mode: RetryMode::default(),
            io_retry: RetryConfig::default(),
            lock_batch_size: default_lock_batch_size(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl StoreConfig {
    /// Sets the retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the requeue timing.
    #[must_use]
    pub fn with_retry_mode(mut self, mode: RetryMode) -> Self {
        self.retry_mode = mode;
        self
    }

    /// Sets the I/O retry policy.
    #[must_use]
    pub fn with_io_retry(mut self, retry: RetryConfig) -> Self {
        self.io_retry = retry;
        self
    }

    /// Sets the lock batch size.
    #[must_use]
    pub fn with_lock_batch_size(mut self, n: usize) -> Self {
        self.lock_batch_size = n;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What `submit` does when the queue is full and every worker is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Wait until queue capacity frees.
    #[default]
    Block,
    /// Fail with a `PoolRejection`.
    Reject,
    /// Run the item on the submitting task.
    CallerRuns,
}

/// Settings for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Workers kept alive while idle.
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,
    /// Upper bound on workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Bounded queue size.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Idle time after which workers above the core count retire.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_ms: u64,
    /// Saturation policy.
    #[serde(default)]
    pub saturation: SaturationPolicy,
    /// Whether shutdown runs queued items or discards them.
    #[serde(default = "default_drain")]
    pub drain_on_shutdown: bool,
}

fn default_core_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    40
}

fn default_queue_capacity() -> usize {
    256
}

fn default_keep_alive() -> u64 {
    5_000
}

fn default_drain() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            keep_alive_ms: default_keep_alive(),
            saturation: SaturationPolicy::default(),
            drain_on_shutdown: default_drain(),
        }
    }
}

impl PoolConfig {
    /// Sets core and maximum worker counts.
    #[must_use]
    pub fn with_workers(mut self, core: usize, max: usize) -> Self {
        self.core_workers = core;
        self.max_workers = max;
        self
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the keep-alive.
    #[must_use]
    pub fn with_keep_alive_ms(mut self, ms: u64) -> Self {
        self.keep_alive_ms = ms;
        self
    }

    /// Sets the saturation policy.
    #[must_use]
    pub fn with_saturation(mut self, policy: SaturationPolicy) -> Self {
        self.saturation = policy;
        self
    }

    /// Sets the drain-on-shutdown flag.
    #[must_use]
    pub fn with_drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Keep-alive as a Duration.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Checks worker and capacity bounds.
    pub fn validate(&self) -> Result<(), BusflowError> {
        if self.max_workers == 0 {
            return Err(BusflowError::Config("pool.max_workers must be at least 1".into()));
        }
        if self.core_workers > self.max_workers {
            return Err(BusflowError::Config(format!(
                "pool.core_workers ({}) exceeds pool.max_workers ({})",
                self.core_workers, self.max_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(BusflowError::Config("pool.queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.callbacks.default_timeout_ms, 120_000);
        assert_eq!(config.callbacks.sweep_interval_ms, 15_000);
        assert_eq!(config.store.max_retries, 3);
        assert_eq!(config.store.retry_mode, RetryMode::Immediate);
        assert_eq!(config.pool.core_workers, 1);
        assert_eq!(config.pool.max_workers, 40);
        assert_eq!(config.pool.saturation, SaturationPolicy::Block);
        assert!(config.pool.drain_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = BusConfig::from_json_str(
            r#"{
                "pool": {"core_workers": 2, "max_workers": 4, "saturation": "reject"},
                "store": {"max_retries": 5, "retry_mode": {"mode": "backoff", "backoff": {"base_delay_ms": 10}}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.pool.core_workers, 2);
        assert_eq!(config.pool.queue_capacity, 256);
        assert_eq!(config.pool.saturation, SaturationPolicy::Reject);
        assert_eq!(config.store.max_retries, 5);
        match &config.store.retry_mode {
            RetryMode::Backoff(retry) => assert_eq!(retry.base_delay_ms, 10),
            RetryMode::Immediate => panic!("expected backoff mode"),
        }
    }

    #[test]
    fn test_validate_rejects_core_above_max() {
        let err = BusConfig::from_json_str(r#"{"pool": {"core_workers": 8, "max_workers": 2}}"#)
            .unwrap_err();
        assert!(matches!(err, BusflowError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = BusConfig::new().with_pool(PoolConfig::default().with_queue_capacity(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> =
            [("BUSFLOW_MAX_WORKERS", "8"), ("BUSFLOW_MAX_RETRIES", " 1 ")].into();
        let config = BusConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();

        assert_eq!(config.pool.max_workers, 8);
        assert_eq!(config.store.max_retries, 1);
        assert_eq!(config.pool.core_workers, 1);
    }

    #[test]
    fn test_from_lookup_bad_number() {
        let err = BusConfig::from_lookup(|k| (k == "BUSFLOW_CORE_WORKERS").then(|| "many".into()))
            .unwrap_err();
        assert!(err.to_string().contains("BUSFLOW_CORE_WORKERS"));
    }

    #[test]
    fn test_retry_mode_delay() {
        assert_eq!(RetryMode::Immediate.delay_after(3), Duration::ZERO);
        let mode = RetryMode::Backoff(
            RetryConfig::new()
                .with_base_delay_ms(10)
                .with_jitter(crate::retry::JitterStrategy::None),
        );
        assert_eq!(mode.delay_after(1), Duration::from_millis(10));
        assert_eq!(mode.delay_after(3), Duration::from_millis(40));
    }
}
