mod state;

pub use state::{RequestState, SessionConfig};

use super::{
    codec::ClientCodec,
    error::{Error, Result},
    frame::{
        pdu::{Request, Response},
        Header, RequestAdu,
    },
};
use crate::{
    supervisor::{self, BoxedStream, CLOSE_GRACE},
    types::Framing,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use pointgate_sdk::{DriverMetrics, SouthwardConnectionState};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex as StdMutex,
    },
    time::{Duration, Instant},
};
use tokio::sync::{watch, Mutex};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::instrument;

type Transport = Framed<BoxedStream, ClientCodec>;

struct SessionInner {
    transport: Option<Transport>,
    /// Whether a transport was ever established; selects Reconnecting over Connecting
    connected_before: bool,
    next_transaction_id: u16,
}

impl SessionInner {
    #[inline]
    fn next_transaction_id(&mut self) -> u16 {
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        self.next_transaction_id
    }
}

/// Modbus master session over one transport.
///
/// Requests are strictly sequential: the transport lock is held from send until the
/// matching response (or the deadline), so at most one request is ever in flight.
/// The transport is opened lazily and dropped on any timeout, I/O or framing failure so
/// the next request starts on a clean stream.
pub struct Session {
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SouthwardConnectionState>,
    cancel: StdMutex<CancellationToken>,
    request_state: StdMutex<RequestState>,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    avg_response_ms: AtomicU64,
    last_activity: StdMutex<Option<DateTime<Utc>>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SouthwardConnectionState::Disconnected);
        Self {
            config,
            inner: Mutex::new(SessionInner {
                transport: None,
                connected_before: false,
                next_transaction_id: 0,
            }),
            request_state: StdMutex::new(RequestState::Idle),
            state_tx,
            cancel: StdMutex::new(CancellationToken::new()),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            avg_response_ms: AtomicU64::new(0),
            last_activity: StdMutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[inline]
    pub fn framing(&self) -> Framing {
        self.config.connection.framing()
    }

    pub fn subscribe(&self) -> watch::Receiver<SouthwardConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn connection_state(&self) -> SouthwardConnectionState {
        self.state_tx.borrow().clone()
    }

    /// State of the current (or last) request.
    pub fn request_state(&self) -> RequestState {
        *self.request_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_request_state(&self, state: RequestState) {
        let mut guard = self.request_state.lock().unwrap_or_else(|e| e.into_inner());
        let prev = std::mem::replace(&mut *guard, state);
        tracing::debug!(from = ?prev, to = ?state, "Request state");
    }

    /// Open the transport now instead of on the first request.
    pub async fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_transport(&mut inner).await
    }

    /// Close the transport and abort any pending reconnect wait.
    pub async fn disconnect(&self) {
        let token = {
            let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        token.cancel();
        let mut inner = self.inner.lock().await;
        if let Some(mut transport) = inner.transport.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
            tracing::info!(endpoint = %self.config.connection.endpoint(), "Modbus transport closed");
        }
        self.state_tx.send_replace(SouthwardConnectionState::Disconnected);
    }

    /// Send `request` to `unit_id` and wait up to `deadline` for the matching response.
    ///
    /// Exception responses surface as [`Error::Exception`] and keep the transport open.
    #[instrument(level = "debug", skip_all, fields(unit_id = unit_id, request = %request.describe()))]
    pub async fn call(&self, unit_id: u8, request: Request, deadline: Duration) -> Result<Response> {
        let started = Instant::now();
        let mut inner = self.inner.lock().await;
        let result = self.exchange(&mut inner, unit_id, &request, deadline).await;
        self.set_request_state(RequestState::Idle);
        drop(inner);
        self.record(started.elapsed(), result.is_ok());
        result
    }

    async fn ensure_transport(&self, inner: &mut SessionInner) -> Result<()> {
        if inner.transport.is_some() {
            return Ok(());
        }
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let stream = supervisor::connect_with_backoff(
            &self.config,
            &self.state_tx,
            &cancel,
            inner.connected_before,
        )
        .await?;
        inner.transport = Some(Framed::new(stream, ClientCodec::new(self.framing())));
        inner.connected_before = true;
        Ok(())
    }

    fn drop_transport(&self, inner: &mut SessionInner, reason: &Error) {
        if inner.transport.take().is_some() {
            tracing::debug!(error = %reason, "Dropping Modbus transport");
            self.state_tx.send_replace(SouthwardConnectionState::Reconnecting);
        }
    }

    async fn exchange(
        &self,
        inner: &mut SessionInner,
        unit_id: u8,
        request: &Request,
        deadline: Duration,
    ) -> Result<Response> {
        self.ensure_transport(inner).await?;
        let framing = self.framing();
        let transaction_id = if framing.is_rtu() {
            0
        } else {
            inner.next_transaction_id()
        };
        let adu = RequestAdu {
            header: Header {
                transaction_id,
                unit_id,
            },
            pdu: request.clone(),
        };

        let Some(transport) = inner.transport.as_mut() else {
            return Err(Error::ConnectionClosed);
        };
        self.set_request_state(RequestState::RequestSent);
        let outcome = tokio::time::timeout(
            deadline,
            round_trip(transport, adu, framing, transaction_id, unit_id),
        )
        .await;

        let result = match outcome {
            Err(_) => {
                self.set_request_state(RequestState::Timeout);
                Err(Error::RequestTimeout(deadline))
            }
            Ok(Err(e)) => {
                self.set_request_state(RequestState::Failed);
                Err(e)
            }
            Ok(Ok(response)) if !response.answers(request) => {
                self.set_request_state(RequestState::Failed);
                Err(Error::ProtocolViolation {
                    context: "response does not match request",
                })
            }
            Ok(Ok(Response::Exception { function, code })) => {
                self.set_request_state(RequestState::ExceptionResponse);
                Err(Error::Exception { function, code })
            }
            Ok(Ok(response)) => {
                self.set_request_state(RequestState::ResponseReceived);
                Ok(response)
            }
        };

        if let Err(e) = &result {
            if e.poisons_stream() {
                self.drop_transport(inner, e);
            }
        }
        result
    }

    fn record(&self, elapsed: Duration, ok: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let ms = elapsed.as_millis() as u64;
        let prev = self.avg_response_ms.load(Ordering::Relaxed);
        let next = if prev == 0 { ms } else { (prev * 9 + ms) / 10 };
        self.avg_response_ms.store(next, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Some(Utc::now());
        }
    }

    pub fn metrics(&self) -> DriverMetrics {
        DriverMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_response_time: Duration::from_millis(
                self.avg_response_ms.load(Ordering::Relaxed),
            ),
        }
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity.lock().ok().and_then(|g| *g)
    }
}

/// Write one request and read frames until the matching response arrives.
async fn round_trip(
    transport: &mut Transport,
    adu: RequestAdu,
    framing: Framing,
    transaction_id: u16,
    unit_id: u8,
) -> Result<Response> {
    transport.send(adu).await?;
    loop {
        let response = match transport.next().await {
            Some(frame) => frame?,
            None => return Err(Error::ConnectionClosed),
        };
        if !framing.is_rtu() && response.header.transaction_id != transaction_id {
            tracing::debug!(
                expected = transaction_id,
                got = response.header.transaction_id,
                "Discarding response with stale transaction id"
            );
            continue;
        }
        if response.header.unit_id != unit_id {
            if framing.is_rtu() {
                tracing::debug!(
                    expected = unit_id,
                    got = response.header.unit_id,
                    "Discarding frame from another slave"
                );
                continue;
            }
            return Err(Error::ProtocolViolation {
                context: "unit id does not match request",
            });
        }
        return Ok(response.pdu);
    }
}
