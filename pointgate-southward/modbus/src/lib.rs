//! Modbus TCP/RTU point driver for pointgate.
//!
//! Named points are mapped onto holding and input registers through [`RegisterTable`]s,
//! read and written by a [`ModbusClient`] per slave unit and exposed to the host platform
//! through [`ModbusDriver`]. [`ModbusSimulator`] answers the same protocol in-process.

mod codec;
pub mod client;
pub mod driver;
pub mod factory;
pub mod field;
mod planner;
pub mod protocol;
pub mod simulator;
mod supervisor;
pub mod table;
pub mod transport;
pub mod types;

pub use client::ModbusClient;
pub use driver::ModbusDriver;
pub use factory::{ModbusDriverFactory, RegisterCode};
pub use field::{Field, Transform};
pub use planner::ModbusPlannerConfig;
pub use simulator::{ModbusSimulator, SimulatedFault};
pub use table::{RegisterTable, RegisterTableBuilder};
pub use transport::RegisterTransport;
pub use types::{
    Addressing, Endianness, Framing, ModbusDriverConfig, RegisterArea, RegistryPoint,
    SerialSettings,
};
