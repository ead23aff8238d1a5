use crate::{
    protocol::frame::pdu::{ExceptionCode, Request, Response},
    types::RegisterArea,
};
use std::collections::HashMap;

/// Register storage of one simulated slave.
///
/// Only defined addresses are addressable; a request touching any undefined register
/// fails as a whole with `IllegalDataAddress`.
#[derive(Debug, Clone, Default)]
pub struct SlaveBank {
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
}

impl SlaveBank {
    #[inline]
    fn area(&self, area: RegisterArea) -> &HashMap<u16, u16> {
        match area {
            RegisterArea::Holding => &self.holding,
            RegisterArea::Input => &self.input,
        }
    }

    #[inline]
    fn area_mut(&mut self, area: RegisterArea) -> &mut HashMap<u16, u16> {
        match area {
            RegisterArea::Holding => &mut self.holding,
            RegisterArea::Input => &mut self.input,
        }
    }

    /// Define `count` registers from `start`, zero-seeded. Existing values are kept.
    pub fn define(&mut self, area: RegisterArea, start: u16, count: u16) {
        let regs = self.area_mut(area);
        for addr in span(start, count) {
            regs.entry(addr).or_insert(0);
        }
    }

    /// Take registers offline; later requests touching them fail.
    pub fn remove(&mut self, area: RegisterArea, start: u16, count: u16) {
        let regs = self.area_mut(area);
        for addr in span(start, count) {
            regs.remove(&addr);
        }
    }

    /// Store `values` from `start`, defining the registers if needed.
    pub fn set(&mut self, area: RegisterArea, start: u16, values: &[u16]) {
        let regs = self.area_mut(area);
        for (addr, v) in (start..=u16::MAX).zip(values) {
            regs.insert(addr, *v);
        }
    }

    /// Current values, `None` if any register in the range is undefined.
    pub fn get(&self, area: RegisterArea, start: u16, count: u16) -> Option<Vec<u16>> {
        let regs = self.area(area);
        if u32::from(start) + u32::from(count) > 0x1_0000 {
            return None;
        }
        span(start, count).map(|a| regs.get(&a).copied()).collect()
    }

    fn write(&mut self, start: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let count = u16::try_from(values.len()).map_err(|_| ExceptionCode::IllegalDataValue)?;
        // validate the whole range first so a failed write leaves no partial update
        if self.get(RegisterArea::Holding, start, count).is_none() {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        self.set(RegisterArea::Holding, start, values);
        Ok(())
    }

    /// Execute a request against this bank.
    pub fn handle(&mut self, request: &Request) -> Response {
        let function = u8::from(request.function_code());
        let exception = |code| Response::Exception { function, code };
        match request {
            Request::ReadHoldingRegisters { address, quantity } => {
                match self.get(RegisterArea::Holding, *address, *quantity) {
                    Some(words) => Response::ReadHoldingRegisters(words),
                    None => exception(ExceptionCode::IllegalDataAddress),
                }
            }
            Request::ReadInputRegisters { address, quantity } => {
                match self.get(RegisterArea::Input, *address, *quantity) {
                    Some(words) => Response::ReadInputRegisters(words),
                    None => exception(ExceptionCode::IllegalDataAddress),
                }
            }
            Request::WriteSingleRegister { address, value } => {
                match self.write(*address, &[*value]) {
                    Ok(()) => Response::WriteSingleRegister {
                        address: *address,
                        value: *value,
                    },
                    Err(code) => exception(code),
                }
            }
            Request::WriteMultipleRegisters { address, values } => {
                match self.write(*address, values) {
                    Ok(()) => Response::WriteMultipleRegisters {
                        address: *address,
                        quantity: values.len() as u16,
                    },
                    Err(code) => exception(code),
                }
            }
        }
    }
}

/// Addresses `start..start + count`, clipped at the top of the address space.
#[inline]
fn span(start: u16, count: u16) -> impl Iterator<Item = u16> {
    (start..=u16::MAX).take(count as usize)
}
