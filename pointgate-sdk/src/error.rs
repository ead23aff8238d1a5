use crate::{AccessMode, DataType};
use std::time::Duration;
use thiserror::Error;

/// Driver specific errors
///
/// Every variant carries enough context (point name, address range or request label)
/// for the host platform to log an actionable diagnostic without further lookups.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Unknown point or field name.
    #[error("point '{name}' not found")]
    NotFound { name: String },

    /// Operation is excluded by the point's access mode.
    #[error("point '{point}' does not permit {operation} (access mode {access:?})")]
    Permission {
        point: String,
        access: AccessMode,
        operation: &'static str,
    },

    /// Value cannot be represented by the point's data type.
    #[error("value for point '{point}' out of range for {data_type:?}: {reason}")]
    Range {
        point: String,
        data_type: DataType,
        reason: String,
    },

    /// Two fields claim overlapping register ranges.
    #[error("point '{point}' overlaps '{other}' in registers {start}..={end}")]
    Conflict {
        point: String,
        other: String,
        start: u16,
        end: u16,
    },

    /// No response within the configured deadline.
    #[error("{context}: no response within {timeout:?}")]
    Timeout { context: String, timeout: Duration },

    /// The device answered with a Modbus exception response.
    #[error("{context}: device exception {code:#04x} for function {function:#04x}")]
    Device {
        context: String,
        function: u8,
        code: u8,
    },

    /// Malformed or unexpected frame.
    #[error("{context}: protocol error: {reason}")]
    Protocol { context: String, reason: String },

    /// Transport unreachable or dropped.
    #[error("{context}: connection error: {reason}")]
    Connection { context: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DriverError {
    /// Whether this error means the transport itself is gone.
    ///
    /// Batch operations stop at the first connection-level error and surface it
    /// for the whole call; everything else is reported per point.
    #[inline]
    pub fn is_connection_level(&self) -> bool {
        matches!(self, DriverError::Connection { .. })
    }

    /// Short machine-readable kind label used in logs and health details.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::NotFound { .. } => "not_found",
            DriverError::Permission { .. } => "permission",
            DriverError::Range { .. } => "range",
            DriverError::Conflict { .. } => "conflict",
            DriverError::Timeout { .. } => "timeout",
            DriverError::Device { .. } => "device",
            DriverError::Protocol { .. } => "protocol",
            DriverError::Connection { .. } => "connection",
            DriverError::Configuration(_) => "configuration",
        }
    }

    /// Replace the request context of a transport-level error, e.g. to name the point
    /// that was being read when a coalesced batch failed.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let context = context.into();
        match self {
            DriverError::Timeout { timeout, .. } => DriverError::Timeout { context, timeout },
            DriverError::Device { function, code, .. } => DriverError::Device {
                context,
                function,
                code,
            },
            DriverError::Protocol { reason, .. } => DriverError::Protocol { context, reason },
            DriverError::Connection { reason, .. } => DriverError::Connection { context, reason },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_fatal_for_batches() {
        let conn = DriverError::Connection {
            context: "read".into(),
            reason: "refused".into(),
        };
        let timeout = DriverError::Timeout {
            context: "read".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(conn.is_connection_level());
        assert!(!timeout.is_connection_level());
        assert!(!DriverError::NotFound { name: "x".into() }.is_connection_level());
    }

    #[test]
    fn with_context_keeps_cause() {
        let err = DriverError::Device {
            context: "batch 0..=3".into(),
            function: 0x03,
            code: 0x02,
        }
        .with_context("point 'Temp' @ 7");
        assert_eq!(
            err,
            DriverError::Device {
                context: "point 'Temp' @ 7".into(),
                function: 0x03,
                code: 0x02,
            }
        );
        assert!(err.to_string().contains("0x02"));
    }
}
