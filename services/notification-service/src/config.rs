//! Configuration management for the notification worker.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Present-but-unparseable values are errors rather than silent defaults.

use order_pipeline_core::broker::AckMode;
use order_pipeline_runtime::config::{ConfigError, EnvVars};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Notification worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Queue (topic) carrying order events
    pub queue: String,
    /// Consumer group shared by worker instances
    pub consumer_group: String,
    /// Connection attempts before giving up
    pub connect_attempts: usize,
    /// Pause between connection attempts
    pub connect_delay: Duration,
    /// Acknowledgment policy
    pub ack_mode: AckMode,
    /// Bound on one notification
    pub notify_timeout: Duration,
    /// Deliveries of one order before it is dead-lettered
    pub max_deliveries: usize,
    /// Pause before the first requeue; doubles per failure
    pub requeue_backoff: Duration,
    /// Ceiling for the requeue pause
    pub max_requeue_backoff: Duration,
    /// Dead letters kept before the oldest is dropped
    pub dead_letter_capacity: usize,
    /// Host the health listener binds to
    pub host: IpAddr,
    /// Health listener port
    pub port: u16,
    /// Prometheus listener port; no exporter when unset
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup` (variable name to value).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but cannot be parsed, or a
    /// count that must be positive is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = EnvVars::new(&lookup);

        Ok(Self {
            brokers: vars.string("BROKER_BROKERS", "localhost:9092"),
            queue: vars.string("ORDER_EVENTS_QUEUE", "order_events"),
            consumer_group: vars.string("NOTIFICATION_CONSUMER_GROUP", "notification-service"),
            connect_attempts: vars.positive("BROKER_CONNECT_ATTEMPTS", 30)?,
            connect_delay: vars.millis("BROKER_CONNECT_DELAY_MS", 1000)?,
            ack_mode: vars.parse("NOTIFICATION_ACK_MODE", AckMode::Manual)?,
            notify_timeout: vars.millis("NOTIFICATION_TIMEOUT_MS", 10_000)?,
            max_deliveries: vars.positive("NOTIFICATION_MAX_DELIVERIES", 5)?,
            requeue_backoff: vars.millis("NOTIFICATION_REQUEUE_BACKOFF_MS", 200)?,
            max_requeue_backoff: vars.millis("NOTIFICATION_MAX_REQUEUE_BACKOFF_MS", 5_000)?,
            dead_letter_capacity: vars.positive("DEAD_LETTER_CAPACITY", 1_000)?,
            host: vars.parse("HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: vars.parse("NOTIFICATION_PORT", 8083)?,
            metrics_port: vars.optional("METRICS_PORT")?,
        })
    }

    /// Address of the health listener.
    #[must_use]
    pub const fn health_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Address of the Prometheus listener, if enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_port.map(|port| SocketAddr::new(self.host, port))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_match_the_deployment() {
        let config = load(&[]).unwrap();

        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.queue, "order_events");
        assert_eq!(config.consumer_group, "notification-service");
        assert_eq!(config.connect_attempts, 30);
        assert_eq!(config.connect_delay, Duration::from_secs(1));
        assert_eq!(config.ack_mode, AckMode::Manual);
        assert_eq!(config.notify_timeout, Duration::from_secs(10));
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.requeue_backoff, Duration::from_millis(200));
        assert_eq!(config.max_requeue_backoff, Duration::from_secs(5));
        assert_eq!(config.dead_letter_capacity, 1_000);
        assert_eq!(config.health_addr(), "0.0.0.0:8083".parse().unwrap());
        assert_eq!(config.metrics_addr(), None);
    }

    #[test]
    fn ack_mode_is_case_insensitive() {
        let config = load(&[("NOTIFICATION_ACK_MODE", "AUTO")]).unwrap();
        assert_eq!(config.ack_mode, AckMode::Auto);
    }

    #[test]
    fn unknown_ack_mode_is_an_error() {
        let err = load(&[("NOTIFICATION_ACK_MODE", "sometimes")]).unwrap_err();
        assert_eq!(err.var, "NOTIFICATION_ACK_MODE");
        assert!(err.reason.contains("auto or manual"));
    }

    #[test]
    fn zero_connect_attempts_is_rejected() {
        let err = load(&[("BROKER_CONNECT_ATTEMPTS", "0")]).unwrap_err();
        assert_eq!(err.var, "BROKER_CONNECT_ATTEMPTS");
    }

    #[test]
    fn zero_max_deliveries_is_rejected() {
        let err = load(&[("NOTIFICATION_MAX_DELIVERIES", "0")]).unwrap_err();
        assert_eq!(err.var, "NOTIFICATION_MAX_DELIVERIES");
    }
}
