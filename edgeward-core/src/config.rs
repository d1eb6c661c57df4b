//! Configuration value types shared across crates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Retry policy for upstream calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Upper bound for any single delay, including upstream retry hints.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts".to_string(),
                value: self.max_attempts.to_string(),
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "backoff_multiplier".to_string(),
                value: self.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be >= 1.0".to_string(),
            });
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::InvalidValue {
                field: "initial_backoff".to_string(),
                value: format!("{:?}", self.initial_backoff),
                reason: "initial_backoff must not exceed max_backoff".to_string(),
            });
        }
        Ok(())
    }
}

/// TTLs assigned per cache class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlTable {
    #[serde(with = "duration_ms")]
    pub list: Duration,
    #[serde(with = "duration_ms")]
    pub detail: Duration,
    #[serde(with = "duration_ms")]
    pub reference: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(60),
            detail: Duration::from_secs(300),
            reference: Duration::from_secs(3600),
        }
    }
}

impl TtlTable {
    /// TTL for a class, or `None` when the class is not cached.
    pub fn ttl_for(&self, class: crate::TtlClass) -> Option<Duration> {
        match class {
            crate::TtlClass::List => Some(self.list),
            crate::TtlClass::Detail => Some(self.detail),
            crate::TtlClass::Reference => Some(self.reference),
            crate::TtlClass::None => None,
        }
    }
}

/// Serde helper storing durations as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TtlClass;

    #[test]
    fn test_retry_config_default_is_valid() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::no_retry().validate().is_ok());
    }

    #[test]
    fn test_retry_config_rejects_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "max_attempts"
        ));
    }

    #[test]
    fn test_retry_config_rejects_nan_multiplier() {
        let config = RetryConfig {
            backoff_multiplier: f64::NAN,
            ..RetryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_table_lookup() {
        let table = TtlTable::default();
        assert_eq!(table.ttl_for(TtlClass::List), Some(Duration::from_secs(60)));
        assert_eq!(table.ttl_for(TtlClass::Reference), Some(Duration::from_secs(3600)));
        assert_eq!(table.ttl_for(TtlClass::None), None);
    }

    #[test]
    fn test_retry_config_serde_uses_millis() {
        let json = serde_json::to_value(RetryConfig::default()).unwrap();
        assert_eq!(json["initial_backoff"], 200);
        assert_eq!(json["max_backoff"], 5000);
    }
}
