use crate::{
    protocol::error::{Error, Result},
    types::{ModbusFunctionCode, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS},
};
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
    Other(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::ServerDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetDeviceFailedToRespond,
            other => ExceptionCode::Other(other),
        }
    }
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::ServerDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetDeviceFailedToRespond => 0x0B,
            ExceptionCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::Other(code) => write!(f, "{code:#04x}"),
            known => write!(f, "{known:?} ({:#04x})", u8::from(*known)),
        }
    }
}

/// Request PDU (function code plus data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    #[inline]
    pub fn function_code(&self) -> ModbusFunctionCode {
        match self {
            Request::ReadHoldingRegisters { .. } => ModbusFunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => ModbusFunctionCode::ReadInputRegisters,
            Request::WriteSingleRegister { .. } => ModbusFunctionCode::WriteSingleRegister,
            Request::WriteMultipleRegisters { .. } => ModbusFunctionCode::WriteMultipleRegisters,
        }
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::WriteSingleRegister { .. } | Request::WriteMultipleRegisters { .. }
        )
    }

    /// Short label for logs and error contexts, e.g. `fc=0x03 addr=10 qty=4`.
    pub fn describe(&self) -> String {
        let fc = u8::from(self.function_code());
        match self {
            Request::ReadHoldingRegisters { address, quantity }
            | Request::ReadInputRegisters { address, quantity } => {
                format!("fc={fc:#04x} addr={address} qty={quantity}")
            }
            Request::WriteSingleRegister { address, .. } => {
                format!("fc={fc:#04x} addr={address} qty=1")
            }
            Request::WriteMultipleRegisters { address, values } => {
                format!("fc={fc:#04x} addr={address} qty={}", values.len())
            }
        }
    }

    /// Append the PDU bytes to `dst`, rejecting quantities the protocol cannot carry.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u8(self.function_code().into());
        match self {
            Request::ReadHoldingRegisters { address, quantity }
            | Request::ReadInputRegisters { address, quantity } => {
                if *quantity == 0 || *quantity > MAX_READ_REGISTERS {
                    return Err(Error::Encode {
                        context: "read quantity out of range",
                    });
                }
                dst.put_u16(*address);
                dst.put_u16(*quantity);
            }
            Request::WriteSingleRegister { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(*value);
            }
            Request::WriteMultipleRegisters { address, values } => {
                if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
                    return Err(Error::Encode {
                        context: "write quantity out of range",
                    });
                }
                dst.put_u16(*address);
                dst.put_u16(values.len() as u16);
                dst.put_u8((values.len() * 2) as u8);
                for v in values {
                    dst.put_u16(*v);
                }
            }
        }
        Ok(())
    }

    /// Parse a request PDU (server side).
    ///
    /// An unknown function code yields [`Error::UnsupportedFunction`]; any other failure means
    /// the request data is malformed.
    pub fn decode(pdu: &[u8]) -> Result<Self> {
        let (&fc, data) = pdu.split_first().ok_or(Error::InvalidFrame {
            context: "empty PDU",
        })?;
        let function = ModbusFunctionCode::try_from(fc).map_err(Error::UnsupportedFunction)?;
        let word = |i: usize| -> Result<u16> {
            data.get(i..i + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or(Error::InvalidFrame {
                    context: "request PDU truncated",
                })
        };
        match function {
            ModbusFunctionCode::ReadHoldingRegisters | ModbusFunctionCode::ReadInputRegisters => {
                expect_len(data, 4)?;
                let (address, quantity) = (word(0)?, word(2)?);
                if quantity == 0 || quantity > MAX_READ_REGISTERS {
                    return Err(Error::InvalidFrame {
                        context: "read quantity out of range",
                    });
                }
                Ok(if function == ModbusFunctionCode::ReadHoldingRegisters {
                    Request::ReadHoldingRegisters { address, quantity }
                } else {
                    Request::ReadInputRegisters { address, quantity }
                })
            }
            ModbusFunctionCode::WriteSingleRegister => {
                expect_len(data, 4)?;
                Ok(Request::WriteSingleRegister {
                    address: word(0)?,
                    value: word(2)?,
                })
            }
            ModbusFunctionCode::WriteMultipleRegisters => {
                let (address, quantity) = (word(0)?, word(2)?);
                let byte_count = *data.get(4).ok_or(Error::InvalidFrame {
                    context: "request PDU truncated",
                })? as usize;
                if quantity == 0
                    || quantity > MAX_WRITE_REGISTERS
                    || byte_count != quantity as usize * 2
                {
                    return Err(Error::InvalidFrame {
                        context: "write quantity out of range",
                    });
                }
                expect_len(data, 5 + byte_count)?;
                let values = data[5..]
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();
                Ok(Request::WriteMultipleRegisters { address, values })
            }
        }
    }
}

/// Response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception { function: u8, code: ExceptionCode },
}

impl Response {
    /// Function code byte as it appears on the wire.
    #[inline]
    pub fn function_byte(&self) -> u8 {
        match self {
            Response::ReadHoldingRegisters(_) => ModbusFunctionCode::ReadHoldingRegisters.into(),
            Response::ReadInputRegisters(_) => ModbusFunctionCode::ReadInputRegisters.into(),
            Response::WriteSingleRegister { .. } => ModbusFunctionCode::WriteSingleRegister.into(),
            Response::WriteMultipleRegisters { .. } => {
                ModbusFunctionCode::WriteMultipleRegisters.into()
            }
            Response::Exception { function, .. } => function | EXCEPTION_FLAG,
        }
    }

    /// Whether this response answers `request` (same function, quantity and echo).
    pub fn answers(&self, request: &Request) -> bool {
        match (request, self) {
            (
                Request::ReadHoldingRegisters { quantity, .. },
                Response::ReadHoldingRegisters(words),
            )
            | (Request::ReadInputRegisters { quantity, .. }, Response::ReadInputRegisters(words)) => {
                words.len() == *quantity as usize
            }
            (
                Request::WriteSingleRegister { address, value },
                Response::WriteSingleRegister {
                    address: a,
                    value: v,
                },
            ) => address == a && value == v,
            (
                Request::WriteMultipleRegisters { address, values },
                Response::WriteMultipleRegisters {
                    address: a,
                    quantity,
                },
            ) => address == a && values.len() == *quantity as usize,
            (_, Response::Exception { function, .. }) => {
                *function == u8::from(request.function_code())
            }
            _ => false,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.function_byte());
        match self {
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                dst.put_u8((words.len() * 2) as u8);
                for w in words {
                    dst.put_u16(*w);
                }
            }
            Response::WriteSingleRegister { address, value } => {
                dst.put_u16(*address);
                dst.put_u16(*value);
            }
            Response::WriteMultipleRegisters { address, quantity } => {
                dst.put_u16(*address);
                dst.put_u16(*quantity);
            }
            Response::Exception { code, .. } => dst.put_u8((*code).into()),
        }
    }

    /// Parse a response PDU (client side).
    pub fn decode(pdu: &[u8]) -> Result<Self> {
        let (&fc, data) = pdu.split_first().ok_or(Error::InvalidFrame {
            context: "empty PDU",
        })?;
        if fc & EXCEPTION_FLAG != 0 {
            expect_len(data, 1)?;
            return Ok(Response::Exception {
                function: fc & !EXCEPTION_FLAG,
                code: ExceptionCode::from(data[0]),
            });
        }
        let function = ModbusFunctionCode::try_from(fc).map_err(Error::UnsupportedFunction)?;
        match function {
            ModbusFunctionCode::ReadHoldingRegisters | ModbusFunctionCode::ReadInputRegisters => {
                let (&byte_count, payload) = data.split_first().ok_or(Error::InvalidFrame {
                    context: "response PDU truncated",
                })?;
                if byte_count % 2 != 0 || payload.len() != byte_count as usize {
                    return Err(Error::InvalidFrame {
                        context: "byte count does not match payload",
                    });
                }
                let words = payload
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();
                Ok(if function == ModbusFunctionCode::ReadHoldingRegisters {
                    Response::ReadHoldingRegisters(words)
                } else {
                    Response::ReadInputRegisters(words)
                })
            }
            ModbusFunctionCode::WriteSingleRegister => {
                expect_len(data, 4)?;
                Ok(Response::WriteSingleRegister {
                    address: u16::from_be_bytes([data[0], data[1]]),
                    value: u16::from_be_bytes([data[2], data[3]]),
                })
            }
            ModbusFunctionCode::WriteMultipleRegisters => {
                expect_len(data, 4)?;
                Ok(Response::WriteMultipleRegisters {
                    address: u16::from_be_bytes([data[0], data[1]]),
                    quantity: u16::from_be_bytes([data[2], data[3]]),
                })
            }
        }
    }
}

#[inline]
fn expect_len(data: &[u8], len: usize) -> Result<()> {
    if data.len() == len {
        Ok(())
    } else {
        Err(Error::InvalidFrame {
            context: "unexpected PDU length",
        })
    }
}
