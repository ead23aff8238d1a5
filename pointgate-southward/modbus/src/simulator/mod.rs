//! In-process Modbus slave used to exercise the driver without hardware.

mod bank;

pub use bank::SlaveBank;

use crate::{
    protocol::{
        codec::ServerCodec,
        frame::{
            pdu::{ExceptionCode, Response},
            IncomingRequest, ResponseAdu,
        },
    },
    table::RegisterTable,
    types::{Framing, RegisterArea},
};
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use pointgate_sdk::{DriverResult, PointValue};
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::{JoinHandle, JoinSet},
};
use tokio_util::{
    codec::{Encoder, Framed},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

/// Misbehavior injected into every response while set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFault {
    /// Read requests but never answer
    Silent,
    /// Answer after the given delay
    Delay(Duration),
    /// Answer with a frame the master cannot parse
    MalformedFrame,
}

#[derive(Default)]
struct Shared {
    banks: RwLock<HashMap<u8, SlaveBank>>,
    fault: RwLock<Option<SimulatedFault>>,
    requests: AtomicU64,
}

impl Shared {
    fn fault(&self) -> Option<SimulatedFault> {
        *self.fault.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, incoming: &IncomingRequest) -> Response {
        let request = match &incoming.request {
            Ok(request) => request,
            Err(code) => {
                return Response::Exception {
                    function: incoming.function,
                    code: *code,
                }
            }
        };
        let unit_id = incoming.header.unit_id;
        let undefined_slave = Response::Exception {
            function: incoming.function,
            code: ExceptionCode::GatewayTargetDeviceFailedToRespond,
        };
        let mut banks = self.banks.write().unwrap_or_else(PoisonError::into_inner);
        match banks.get_mut(&unit_id) {
            Some(bank) => bank.handle(request),
            None => undefined_slave,
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Simulated Modbus slave serving one or more unit ids over TCP.
///
/// Register banks can be seeded and inspected before and while the server runs.
pub struct ModbusSimulator {
    bind_addr: SocketAddr,
    framing: Framing,
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl ModbusSimulator {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            framing: Framing::Tcp,
            shared: Arc::new(Shared::default()),
            running: None,
        }
    }

    /// Serve RTU frames over the socket instead of MBAP.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = match framing {
            Framing::Tcp => Framing::Tcp,
            Framing::RtuOverTcp | Framing::Rtu => Framing::RtuOverTcp,
        };
        self
    }

    /// Define every register covered by `table` for `slave_id`, zero-seeded.
    pub fn define_slave(&self, slave_id: u8, table: &RegisterTable) -> DriverResult<()> {
        let mut banks = self.banks_mut();
        let bank = banks.entry(slave_id).or_default();
        for field in table.fields() {
            let address = table.resolve_address(field)?;
            bank.define(field.register_area(), address, field.width());
        }
        Ok(())
    }

    pub fn define_registers(&self, slave_id: u8, area: RegisterArea, start: u16, count: u16) {
        self.banks_mut()
            .entry(slave_id)
            .or_default()
            .define(area, start, count);
    }

    pub fn set_values(&self, slave_id: u8, area: RegisterArea, address: u16, values: &[u16]) {
        self.banks_mut()
            .entry(slave_id)
            .or_default()
            .set(area, address, values);
    }

    /// Encode `value` with the field's layout and store it.
    pub fn set_field_value(
        &self,
        slave_id: u8,
        table: &RegisterTable,
        name: &str,
        value: PointValue,
    ) -> DriverResult<()> {
        let field = table.field_by_name(name)?;
        let address = table.resolve_address(field)?;
        let words = field.encode(&value)?;
        self.set_values(slave_id, field.register_area(), address, &words);
        Ok(())
    }

    /// Current register values, `None` if the slave or any register is undefined.
    pub fn values(
        &self,
        slave_id: u8,
        area: RegisterArea,
        address: u16,
        count: u16,
    ) -> Option<Vec<u16>> {
        self.shared
            .banks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&slave_id)
            .and_then(|bank| bank.get(area, address, count))
    }

    pub fn remove_registers(&self, slave_id: u8, area: RegisterArea, start: u16, count: u16) {
        if let Some(bank) = self.banks_mut().get_mut(&slave_id) {
            bank.remove(area, start, count);
        }
    }

    pub fn set_fault(&self, fault: Option<SimulatedFault>) {
        *self
            .shared
            .fault
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// Number of well-framed requests received so far.
    pub fn request_count(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn banks_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u8, SlaveBank>> {
        self.shared
            .banks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind and start serving. Returns the bound address; port 0 picks a free port.
    ///
    /// Calling `start` on a running simulator returns the existing address.
    pub async fn start(&mut self) -> io::Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            self.framing,
            cancel.clone(),
        ));
        info!(%local_addr, framing = ?self.framing, "Modbus simulator listening");
        self.running = Some(Running {
            local_addr,
            cancel,
            handle,
        });
        Ok(local_addr)
    }

    /// Stop accepting, close every connection and wait for the tasks to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Modbus simulator task ended abnormally");
        }
        info!(local_addr = %running.local_addr, "Modbus simulator stopped");
    }
}

impl Drop for ModbusSimulator {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    framing: Framing,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Simulator accepted connection");
                    connections.spawn(serve_connection(
                        stream,
                        Arc::clone(&shared),
                        framing,
                        cancel.child_token(),
                    ));
                }
                Err(e) => warn!(error = %e, "Simulator accept failed"),
            },
            // reap finished connections so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    framing: Framing,
    cancel: CancellationToken,
) {
    let mut framed = Framed::new(stream, ServerCodec::new(framing));
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = framed.next() => next,
        };
        let incoming = match next {
            Some(Ok(incoming)) => incoming,
            Some(Err(e)) => {
                debug!(error = %e, "Simulator dropping connection on bad frame");
                break;
            }
            None => break,
        };
        shared.requests.fetch_add(1, Ordering::Relaxed);

        let response = ResponseAdu {
            header: incoming.header,
            pdu: shared.respond(&incoming),
        };
        match shared.fault() {
            Some(SimulatedFault::Silent) => continue,
            Some(SimulatedFault::Delay(delay)) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Some(SimulatedFault::MalformedFrame) => {
                let garbage = malformed(framing, response);
                if framed.get_mut().write_all(&garbage).await.is_err() {
                    break;
                }
                continue;
            }
            None => {}
        }
        if let Err(e) = framed.send(response).await {
            debug!(error = %e, "Simulator failed to send response");
            break;
        }
    }
}

/// A correctly sized frame with a corrupted header (MBAP) or checksum (RTU).
fn malformed(framing: Framing, response: ResponseAdu) -> BytesMut {
    let mut buf = BytesMut::new();
    if ServerCodec::new(framing).encode(response, &mut buf).is_err() {
        return buf;
    }
    if framing.is_rtu() {
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
    } else {
        buf[2] = 0xFF;
        buf[3] = 0xFF;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_frames_are_corrupted() {
        let adu = ResponseAdu {
            header: crate::protocol::frame::Header {
                transaction_id: 1,
                unit_id: 1,
            },
            pdu: Response::WriteSingleRegister {
                address: 0,
                value: 0,
            },
        };
        let tcp = malformed(Framing::Tcp, adu.clone());
        assert_eq!(&tcp[2..4], [0xFF, 0xFF]);
        let rtu = malformed(Framing::RtuOverTcp, adu);
        assert_eq!(rtu.len(), 8);
    }

    #[test]
    fn undefined_slave_gets_gateway_exception() {
        let shared = Shared::default();
        let incoming = IncomingRequest {
            header: crate::protocol::frame::Header {
                transaction_id: 1,
                unit_id: 9,
            },
            function: 0x03,
            request: Ok(crate::protocol::frame::pdu::Request::ReadHoldingRegisters {
                address: 0,
                quantity: 1,
            }),
        };
        assert_eq!(
            shared.respond(&incoming),
            Response::Exception {
                function: 0x03,
                code: ExceptionCode::GatewayTargetDeviceFailedToRespond
            }
        );
    }

    #[test]
    fn field_values_are_stored_with_field_layout() {
        use crate::field::Field;
        use pointgate_sdk::DataType;

        let table = RegisterTable::builder(1)
            .field(
                Field::new("le", 4, DataType::UInt32)
                    .with_byte_order(crate::types::Endianness::LittleEndian),
            )
            .build()
            .unwrap();
        let sim = ModbusSimulator::new("127.0.0.1:0".parse().unwrap());
        sim.define_slave(1, &table).unwrap();
        assert_eq!(sim.values(1, RegisterArea::Holding, 4, 2), Some(vec![0, 0]));
        sim.set_field_value(1, &table, "le", PointValue::UInt32(0x1122_3344))
            .unwrap();
        assert_eq!(
            sim.values(1, RegisterArea::Holding, 4, 2),
            Some(vec![0x4433, 0x2211])
        );
        assert!(matches!(
            sim.set_field_value(1, &table, "nope", PointValue::UInt16(0)),
            Err(pointgate_sdk::DriverError::NotFound { .. })
        ));
    }
}
