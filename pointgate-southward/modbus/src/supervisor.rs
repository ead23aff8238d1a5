use crate::{
    protocol::{
        error::{Error, Result},
        session::SessionConfig,
    },
    types::ModbusConnection,
};
use backoff::{backoff::Backoff, ExponentialBackoff};
use pointgate_sdk::{build_exponential_backoff, SouthwardConnectionState};
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::watch,
    time::{sleep, timeout},
};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

/// Byte stream a session can run over: TCP socket or serial port.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadWrite>;

/// Open the transport once, bounded by the connect timeout.
pub async fn connect_once(config: &SessionConfig) -> Result<BoxedStream> {
    let endpoint = config.connection.endpoint();
    let connect_error = |reason: String| Error::Connect {
        endpoint: endpoint.clone(),
        reason,
    };
    match &config.connection {
        ModbusConnection::Tcp { host, port, .. } => {
            let connect_timeout = config.policy.connect_timeout();
            let stream = match timeout(connect_timeout, TcpStream::connect((host.as_str(), *port)))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(connect_error(e.to_string())),
                Err(_) => {
                    return Err(connect_error(format!(
                        "timed out after {connect_timeout:?}"
                    )))
                }
            };
            if config.tcp_nodelay {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }
            }
            Ok(Box::new(stream))
        }
        ModbusConnection::Serial { path, settings } => {
            let stream = tokio_serial::new(path, settings.baud_rate)
                .data_bits(settings.data_bits.into())
                .stop_bits(settings.stop_bits.into())
                .parity(settings.parity.into())
                .timeout(config.policy.read_timeout())
                .open_native_async()
                .map_err(|e| connect_error(format!("failed to open serial port: {e}")))?;
            Ok(Box::new(stream))
        }
    }
}

/// Connect with exponential backoff between attempts.
///
/// Publishes `Connecting`/`Reconnecting`, then `Connected` or `Failed` once retries are
/// exhausted. Cancellation aborts the wait between attempts.
pub async fn connect_with_backoff(
    config: &SessionConfig,
    state_tx: &watch::Sender<SouthwardConnectionState>,
    cancel: &CancellationToken,
    reconnect: bool,
) -> Result<BoxedStream> {
    state_tx.send_replace(if reconnect {
        SouthwardConnectionState::Reconnecting
    } else {
        SouthwardConnectionState::Connecting
    });

    let policy = &config.policy.backoff;
    let mut bo: ExponentialBackoff = build_exponential_backoff(policy);
    let mut attempt: u32 = 0;
    loop {
        match connect_once(config).await {
            Ok(stream) => {
                tracing::info!(endpoint = %config.connection.endpoint(), attempt, "Modbus transport connected");
                state_tx.send_replace(SouthwardConnectionState::Connected);
                return Ok(stream);
            }
            Err(e) => {
                let delay = match bo.next_backoff() {
                    Some(delay) if policy.allows_retry(attempt) => delay,
                    _ => {
                        tracing::warn!(attempt, error = %e, "Modbus connect failed, giving up");
                        state_tx.send_replace(SouthwardConnectionState::Failed(e.to_string()));
                        return Err(e);
                    }
                };
                attempt = attempt.saturating_add(1);
                tracing::warn!(attempt = attempt, delay_ms = delay.as_millis() as u64, error = %e, "Modbus connect retry");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        state_tx.send_replace(SouthwardConnectionState::Disconnected);
                        return Err(e);
                    }
                    _ = sleep(delay) => {}
                }
            }
        }
    }
}

/// Grace period for flushing a stream before it is dropped.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);
