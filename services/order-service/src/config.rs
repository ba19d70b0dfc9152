//! Configuration management for the order service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Present-but-unparseable values are errors rather than silent defaults.

use order_pipeline_runtime::config::{ConfigError, EnvVars};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Order service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,
    /// Catalog (book service) client
    pub catalog: CatalogConfig,
    /// Broker and publisher
    pub broker: BrokerConfig,
    /// Republish backlog
    pub republish: RepublishConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: IpAddr,
    /// Port to bind to
    pub port: u16,
    /// Prometheus listener port; no exporter when unset
    pub metrics_port: Option<u16>,
}

/// Catalog client configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Catalog service root; `/books` is appended
    pub service_url: String,
    /// Per-lookup timeout
    pub timeout: Duration,
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Queue (topic) for order events
    pub queue: String,
    /// Bound on one publish
    pub publish_timeout: Duration,
}

/// Republisher configuration
#[derive(Debug, Clone)]
pub struct RepublishConfig {
    /// Pause between drain passes
    pub interval: Duration,
    /// Backlog bound (at least 1); the oldest event is dropped beyond it
    pub capacity: usize,
    /// Attempts per event before it is abandoned
    pub max_attempts: usize,
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
    /// capacity or attempt budget is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = EnvVars::new(&lookup);

        Ok(Self {
            server: ServerConfig {
                host: vars.parse("HOST", IpAddr::from([0, 0, 0, 0]))?,
                port: vars.parse("PORT", 8081)?,
                metrics_port: vars.optional("METRICS_PORT")?,
            },
            catalog: CatalogConfig {
                service_url: vars.string("BOOK_SERVICE_URL", "http://book-service:8082"),
                timeout: vars.millis("CATALOG_TIMEOUT_MS", 5000)?,
            },
            broker: BrokerConfig {
                brokers: vars.string("BROKER_BROKERS", "localhost:9092"),
                queue: vars.string("ORDER_EVENTS_QUEUE", "order_events"),
                publish_timeout: vars.millis("PUBLISH_TIMEOUT_MS", 5000)?,
            },
            republish: RepublishConfig {
                interval: vars.millis("REPUBLISH_INTERVAL_MS", 2000)?,
                capacity: vars.positive("REPUBLISH_CAPACITY", 10_000)?,
                max_attempts: vars.positive("REPUBLISH_MAX_ATTEMPTS", 20)?,
            },
        })
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Address of the Prometheus listener, if enabled.
    #[must_use]
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.server
            .metrics_port
            .map(|port| SocketAddr::new(self.server.host, port))
    }

    /// Base URL the catalog client resolves product ids against.
    #[must_use]
    pub fn catalog_base_url(&self) -> String {
        format!("{}/books", self.catalog.service_url.trim_end_matches('/'))
    }
}
