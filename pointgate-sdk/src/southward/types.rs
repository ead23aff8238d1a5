use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;

/// Numeric types a register-backed point can carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum DataType {
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,
    Float32 = 9,
    Float64 = 10,
}

impl DataType {
    /// Number of 16-bit register words occupied by this type.
    #[inline]
    pub const fn register_width(&self) -> u16 {
        match self {
            DataType::Int16 | DataType::UInt16 => 1,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 2,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 4,
        }
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum AccessMode {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
}

impl AccessMode {
    #[inline]
    pub fn is_readable(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Health status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Device connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SouthwardConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Failed with a human-readable reason string
    Failed(String),
}

impl fmt::Display for SouthwardConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connecting => f.write_str("Connecting"),
            Self::Connected => f.write_str("Connected"),
            Self::Reconnecting => f.write_str("Reconnecting"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

impl Serialize for SouthwardConnectionState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Failed(_) => "Failed",
        };
        serializer.serialize_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_register_layout() {
        assert_eq!(DataType::UInt16.register_width(), 1);
        assert_eq!(DataType::Int32.register_width(), 2);
        assert_eq!(DataType::Float32.register_width(), 2);
        assert_eq!(DataType::UInt64.register_width(), 4);
        assert_eq!(DataType::Float64.register_width(), 4);
    }

    #[test]
    fn access_mode_predicates() {
        assert!(AccessMode::Read.is_readable());
        assert!(!AccessMode::Read.is_writable());
        assert!(AccessMode::Write.is_writable());
        assert!(!AccessMode::Write.is_readable());
        assert!(AccessMode::ReadWrite.is_readable() && AccessMode::ReadWrite.is_writable());
    }
}
