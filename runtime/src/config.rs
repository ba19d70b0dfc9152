//! Environment-variable parsing shared by the service binaries.
//!
//! Unset and blank variables fall back to their defaults. A variable that is
//! set but cannot be parsed is a [`ConfigError`], never a silent default.
//!
//! ```rust
//! use order_pipeline_runtime::config::{ConfigError, EnvVars};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), ConfigError> {
//! let lookup = |var: &str| (var == "PORT").then(|| "9000".to_string());
//! let vars = EnvVars::new(&lookup);
//!
//! assert_eq!(vars.parse("PORT", 8081_u16)?, 9000);
//! assert_eq!(vars.millis("TIMEOUT_MS", 250)?, Duration::from_millis(250));
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A variable was set to something unusable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value '{value}' for {var}: {reason}")]
pub struct ConfigError {
    /// Variable name
    pub var: &'static str,
    /// Value as found
    pub value: String,
    /// Why it was rejected
    pub reason: String,
}

/// Typed reads over a variable lookup (`std::env::var` in production, a map
/// in tests).
pub struct EnvVars<'a, F>(&'a F);

impl<'a, F> EnvVars<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Wrap `lookup`.
    pub const fn new(lookup: &'a F) -> Self {
        Self(lookup)
    }

    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|value| !value.trim().is_empty())
    }

    /// The raw value, or `default`.
    pub fn string(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    /// The parsed value, or `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the value does not parse as `T`.
    pub fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(var)
            .map(|value| {
                value.trim().parse().map_err(|e: T::Err| ConfigError {
                    var,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// The parsed value, or `default`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the value does not parse as `T`.
    pub fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    /// A count that must be at least one (capacities, attempt budgets).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the value does not parse or is zero.
    pub fn positive(&self, var: &'static str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse(var, default)?;
        if value == 0 {
            return Err(ConfigError {
                var,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }

    /// A duration given in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the value is not a whole number.
    pub fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(var, default).map(Duration::from_millis)
    }
}
