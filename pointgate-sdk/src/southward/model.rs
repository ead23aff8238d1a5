use super::types::HealthStatus;
use crate::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverHealth {
    pub status: HealthStatus,
    pub last_activity: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub success_rate: f64,
    pub average_response_time: Duration,
    pub details: Option<HashMap<String, serde_json::Value>>,
}

/// Driver metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

impl DriverMetrics {
    /// Ratio of successful requests, 1.0 when nothing has been issued yet.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}

/// Per-device I/O deadlines and reconnect schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionPolicy {
    #[serde(default = "ConnectionPolicy::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "ConnectionPolicy::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "ConnectionPolicy::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default)]
    pub backoff: RetryPolicy,
}

impl ConnectionPolicy {
    fn default_connect_timeout_ms() -> u64 {
        5000
    }
    fn default_read_timeout_ms() -> u64 {
        3000
    }
    fn default_write_timeout_ms() -> u64 {
        3000
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    #[inline]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            connect_timeout_ms: ConnectionPolicy::default_connect_timeout_ms(),
            read_timeout_ms: ConnectionPolicy::default_read_timeout_ms(),
            write_timeout_ms: ConnectionPolicy::default_write_timeout_ms(),
            backoff: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_apply_to_missing_keys() {
        let policy: ConnectionPolicy =
            serde_json::from_value(serde_json::json!({ "read_timeout_ms": 250 })).unwrap();
        assert_eq!(policy.read_timeout(), Duration::from_millis(250));
        assert_eq!(policy.write_timeout(), Duration::from_millis(3000));
        assert_eq!(policy.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(policy.backoff, RetryPolicy::default());
    }

    #[test]
    fn success_rate_without_traffic_is_one() {
        assert_eq!(DriverMetrics::default().success_rate(), 1.0);
        let m = DriverMetrics {
            total_requests: 4,
            successful_requests: 3,
            failed_requests: 1,
            average_response_time: Duration::ZERO,
        };
        assert_eq!(m.success_rate(), 0.75);
    }
}
