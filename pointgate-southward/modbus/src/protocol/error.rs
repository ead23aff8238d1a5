use super::frame::pdu::ExceptionCode;
use pointgate_sdk::DriverError;
use std::{io, result::Result as StdResult, time::Duration};
use thiserror::Error as ThisError;

/// Modbus protocol result type.
///
/// Codec and session return this type so the driver can distinguish transport,
/// framing and device-level failures before mapping them onto [`DriverError`].
pub type Result<T> = StdResult<T, Error>;

/// Modbus protocol error type.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Underlying I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Could not establish the transport.
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Peer closed the stream while a response was pending.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Request timed out at the session layer.
    #[error("request timeout after {0:?}")]
    RequestTimeout(Duration),

    /// Frame-level validation failed (header, length or byte count).
    #[error("invalid frame: {context}")]
    InvalidFrame { context: &'static str },

    /// RTU checksum mismatch.
    #[error("CRC mismatch: computed {computed:#06x}, received {received:#06x}")]
    Crc { computed: u16, received: u16 },

    /// Response does not answer the request that was sent.
    #[error("protocol violation: {context}")]
    ProtocolViolation { context: &'static str },

    /// Function code this driver does not speak.
    #[error("unsupported function code {0:#04x}")]
    UnsupportedFunction(u8),

    /// Request cannot be expressed on the wire (e.g. quantity out of range).
    #[error("encode error: {context}")]
    Encode { context: &'static str },

    /// Device answered with an exception response.
    #[error("device exception {code} for function {function:#04x}")]
    Exception { function: u8, code: ExceptionCode },
}

impl Error {
    /// Map onto the driver error taxonomy, attaching `context` (request label, point name).
    pub fn into_driver_error(self, context: impl Into<String>) -> DriverError {
        let context = context.into();
        match self {
            Error::Io(e) => DriverError::Connection {
                context,
                reason: e.to_string(),
            },
            e @ (Error::Connect { .. } | Error::ConnectionClosed) => DriverError::Connection {
                context,
                reason: e.to_string(),
            },
            Error::RequestTimeout(timeout) => DriverError::Timeout { context, timeout },
            Error::Exception { function, code } => DriverError::Device {
                context,
                function,
                code: code.into(),
            },
            e @ (Error::InvalidFrame { .. }
            | Error::Crc { .. }
            | Error::ProtocolViolation { .. }
            | Error::UnsupportedFunction(_)
            | Error::Encode { .. }) => DriverError::Protocol {
                context,
                reason: e.to_string(),
            },
        }
    }

    /// Whether the stream must be discarded before the next request.
    #[inline]
    pub fn poisons_stream(&self) -> bool {
        !matches!(self, Error::Exception { .. } | Error::Encode { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_onto_driver_taxonomy() {
        let e = Error::Exception {
            function: 0x03,
            code: ExceptionCode::IllegalDataAddress,
        }
        .into_driver_error("read");
        assert_eq!(
            e,
            DriverError::Device {
                context: "read".into(),
                function: 0x03,
                code: 0x02
            }
        );

        let e = Error::RequestTimeout(Duration::from_millis(50)).into_driver_error("read");
        assert!(matches!(e, DriverError::Timeout { .. }));

        let e = Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).into_driver_error("read");
        assert!(e.is_connection_level());

        let e = Error::Crc {
            computed: 1,
            received: 2,
        }
        .into_driver_error("read");
        assert!(matches!(e, DriverError::Protocol { .. }));
    }

    #[test]
    fn exceptions_keep_the_stream() {
        assert!(!Error::Exception {
            function: 3,
            code: ExceptionCode::IllegalFunction
        }
        .poisons_stream());
        assert!(Error::RequestTimeout(Duration::from_secs(1)).poisons_stream());
        assert!(Error::InvalidFrame { context: "x" }.poisons_stream());
    }
}
