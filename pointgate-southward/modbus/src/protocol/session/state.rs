use crate::types::ModbusConnection;
use pointgate_sdk::ConnectionPolicy;

/// Per-request state of the master session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// No request in flight
    Idle,
    /// Request written, waiting for the matching response
    RequestSent,
    /// Matching normal response received
    ResponseReceived,
    /// Deadline passed without a matching response
    Timeout,
    /// Device answered with an exception
    ExceptionResponse,
    /// Transport or framing failure before a usable response
    Failed,
}

/// Modbus master session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where to connect and which framing to speak
    pub connection: ModbusConnection,
    /// Deadlines and reconnect schedule
    pub policy: ConnectionPolicy,
    /// TCP_NODELAY option. Defaults to true for low-latency small PDUs
    pub tcp_nodelay: bool,
}

impl SessionConfig {
    pub fn new(connection: ModbusConnection, policy: ConnectionPolicy) -> Self {
        Self {
            connection,
            policy,
            tcp_nodelay: true,
        }
    }
}
