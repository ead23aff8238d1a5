use crate::{
    protocol::{
        frame::pdu::{Request, Response},
        session::Session,
    },
    types::RegisterArea,
};
use async_trait::async_trait;
use pointgate_sdk::{DriverError, DriverResult};

/// Register-level transport used by [`crate::client::ModbusClient`].
///
/// Errors carry the driver taxonomy; the context names the request, callers re-label it
/// with the point they were serving.
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    async fn read_registers(
        &self,
        slave_id: u8,
        area: RegisterArea,
        address: u16,
        quantity: u16,
    ) -> DriverResult<Vec<u16>>;

    async fn write_single_register(&self, slave_id: u8, address: u16, value: u16)
        -> DriverResult<()>;

    async fn write_multiple_registers(
        &self,
        slave_id: u8,
        address: u16,
        values: &[u16],
    ) -> DriverResult<()>;

    /// Whether adjacent fields may be coalesced into one range read.
    fn supports_batching(&self) -> bool {
        true
    }
}

impl Session {
    async fn call_mapped(&self, slave_id: u8, request: Request) -> DriverResult<Response> {
        let deadline = if request.is_write() {
            self.config().policy.write_timeout()
        } else {
            self.config().policy.read_timeout()
        };
        let label = format!(
            "slave {slave_id} {} on {}",
            request.describe(),
            self.config().connection.endpoint()
        );
        self.call(slave_id, request, deadline)
            .await
            .map_err(|e| e.into_driver_error(label))
    }
}

#[async_trait]
impl RegisterTransport for Session {
    async fn read_registers(
        &self,
        slave_id: u8,
        area: RegisterArea,
        address: u16,
        quantity: u16,
    ) -> DriverResult<Vec<u16>> {
        let request = match area {
            RegisterArea::Holding => Request::ReadHoldingRegisters { address, quantity },
            RegisterArea::Input => Request::ReadInputRegisters { address, quantity },
        };
        match self.call_mapped(slave_id, request).await? {
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                Ok(words)
            }
            other => Err(unexpected(slave_id, &other)),
        }
    }

    async fn write_single_register(
        &self,
        slave_id: u8,
        address: u16,
        value: u16,
    ) -> DriverResult<()> {
        match self
            .call_mapped(slave_id, Request::WriteSingleRegister { address, value })
            .await?
        {
            Response::WriteSingleRegister { .. } => Ok(()),
            other => Err(unexpected(slave_id, &other)),
        }
    }

    async fn write_multiple_registers(
        &self,
        slave_id: u8,
        address: u16,
        values: &[u16],
    ) -> DriverResult<()> {
        let request = Request::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        match self.call_mapped(slave_id, request).await? {
            Response::WriteMultipleRegisters { .. } => Ok(()),
            other => Err(unexpected(slave_id, &other)),
        }
    }
}

#[cold]
fn unexpected(slave_id: u8, response: &Response) -> DriverError {
    DriverError::Protocol {
        context: format!("slave {slave_id}"),
        reason: format!(
            "unexpected response function {:#04x}",
            response.function_byte()
        ),
    }
}
