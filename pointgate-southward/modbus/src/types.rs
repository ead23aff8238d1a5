use crate::field::Field;
use pointgate_sdk::{ConnectionPolicy, DriverError, DriverResult};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Default Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Protocol limit for registers per read request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Protocol limit for registers per write-multiple request.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Modbus driver configuration as supplied by the host platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModbusDriverConfig {
    /// `host[:port]` for TCP, or the serial device path when `serial` is set
    pub device_address: String,
    /// TCP port; wins over a port embedded in `device_address`
    #[serde(default)]
    pub port: Option<u16>,
    /// Default unit id for registry points
    #[serde(default = "ModbusDriverConfig::default_slave_id")]
    pub slave_id: u8,
    /// Byte order for register codes without an endianness tag
    #[serde(default)]
    pub byte_order: Endianness,
    #[serde(default)]
    pub addressing: Addressing,
    /// Table base for offset addressing
    #[serde(default)]
    pub base_address: u16,
    /// ADU framing used on a socket
    #[serde(default)]
    pub framing: Framing,
    /// Serial line settings; selects RTU over a serial port
    #[serde(default)]
    pub serial: Option<SerialSettings>,
    /// Maximum address gap for batch merging
    #[serde(default)]
    pub max_gap: u16,
    /// Maximum registers per read request
    #[serde(default = "ModbusDriverConfig::default_max_batch")]
    pub max_batch: u16,
    #[serde(default)]
    pub connection_policy: ConnectionPolicy,
}

impl ModbusDriverConfig {
    fn default_slave_id() -> u8 {
        1
    }

    fn default_max_batch() -> u16 {
        MAX_READ_REGISTERS
    }

    /// Minimal TCP configuration with defaults for everything else.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            device_address: host.into(),
            port: Some(port),
            slave_id: Self::default_slave_id(),
            byte_order: Endianness::default(),
            addressing: Addressing::default(),
            base_address: 0,
            framing: Framing::default(),
            serial: None,
            max_gap: 0,
            max_batch: Self::default_max_batch(),
            connection_policy: ConnectionPolicy::default(),
        }
    }

    /// Resolve the transport endpoint.
    ///
    /// Port precedence: explicit `port`, then a port embedded in `device_address`, then 502.
    pub fn connection(&self) -> DriverResult<ModbusConnection> {
        let address = self.device_address.trim();
        if address.is_empty() {
            return Err(DriverError::Configuration(
                "device_address is required".to_string(),
            ));
        }
        if let Some(settings) = self.serial {
            return Ok(ModbusConnection::Serial {
                path: address.to_string(),
                settings,
            });
        }
        let (host, embedded_port) = split_host_port(address)?;
        Ok(ModbusConnection::Tcp {
            host,
            port: self.port.or(embedded_port).unwrap_or(DEFAULT_TCP_PORT),
            framing: self.framing,
        })
    }

    /// Read batch size clamped to what a single request can carry.
    #[inline]
    pub fn effective_max_batch(&self) -> u16 {
        self.max_batch.clamp(1, MAX_READ_REGISTERS)
    }
}

fn split_host_port(address: &str) -> DriverResult<(String, Option<u16>)> {
    // Bracketed IPv6 literal, optionally followed by a port
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            DriverError::Configuration(format!("invalid device_address '{address}'"))
        })?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(parse_port(address, p)?),
            None => None,
        };
        return Ok((host.to_string(), port));
    }
    match address.rsplit_once(':') {
        // A bare IPv6 literal has more than one colon and no port
        Some((host, port)) if !host.contains(':') => {
            Ok((host.to_string(), Some(parse_port(address, port)?)))
        }
        _ => Ok((address.to_string(), None)),
    }
}

fn parse_port(address: &str, port: &str) -> DriverResult<u16> {
    port.trim().parse::<u16>().map_err(|e| {
        DriverError::Configuration(format!("invalid port in device_address '{address}': {e}"))
    })
}

/// Resolved transport endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusConnection {
    Tcp {
        host: String,
        port: u16,
        framing: Framing,
    },
    Serial {
        path: String,
        settings: SerialSettings,
    },
}

impl ModbusConnection {
    /// Framing used on the wire for this endpoint.
    #[inline]
    pub fn framing(&self) -> Framing {
        match self {
            ModbusConnection::Tcp { framing, .. } => *framing,
            ModbusConnection::Serial { .. } => Framing::Rtu,
        }
    }

    /// Human readable endpoint used in logs and error contexts.
    pub fn endpoint(&self) -> String {
        match self {
            ModbusConnection::Tcp { host, port, .. } => format!("{host}:{port}"),
            ModbusConnection::Serial { path, .. } => path.clone(),
        }
    }
}

/// Application data unit framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// MBAP header, no checksum
    #[default]
    Tcp,
    /// RTU frames carried over a TCP socket
    RtuOverTcp,
    /// RTU frames on a serial line
    #[serde(skip)]
    Rtu,
}

impl Framing {
    #[inline]
    pub fn is_rtu(&self) -> bool {
        matches!(self, Framing::Rtu | Framing::RtuOverTcp)
    }
}

/// Whether a declared address is relative to the table base or literal on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Addressing {
    #[default]
    Offset,
    Absolute,
}

/// Byte order (endianness)
///
/// Applies both to the bytes inside a register and to the order of registers
/// within a multi-register value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    #[serde(rename = "big", alias = "big_endian", alias = ">")]
    BigEndian,
    #[serde(rename = "little", alias = "little_endian", alias = "<")]
    LittleEndian,
}

/// Register bank a field lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterArea {
    Holding,
    Input,
}

impl RegisterArea {
    /// Function code used to read this area.
    #[inline]
    pub fn read_function(&self) -> ModbusFunctionCode {
        match self {
            RegisterArea::Holding => ModbusFunctionCode::ReadHoldingRegisters,
            RegisterArea::Input => ModbusFunctionCode::ReadInputRegisters,
        }
    }
}

/// Serial line settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SerialSettings {
    #[serde(default = "SerialSettings::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "SerialSettings::default_data_bits")]
    pub data_bits: DataBits,
    #[serde(default = "SerialSettings::default_stop_bits")]
    pub stop_bits: StopBits,
    #[serde(default = "SerialSettings::default_parity")]
    pub parity: Parity,
}

impl SerialSettings {
    fn default_baud_rate() -> u32 {
        9600
    }
    fn default_data_bits() -> DataBits {
        DataBits::Eight
    }
    fn default_stop_bits() -> StopBits {
        StopBits::One
    }
    fn default_parity() -> Parity {
        Parity::None
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: Self::default_baud_rate(),
            data_bits: Self::default_data_bits(),
            stop_bits: Self::default_stop_bits(),
            parity: Self::default_parity(),
        }
    }
}

/// Serial data bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum DataBits {
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(data_bits: DataBits) -> Self {
        match data_bits {
            DataBits::Five => tokio_serial::DataBits::Five,
            DataBits::Six => tokio_serial::DataBits::Six,
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i16)]
pub enum StopBits {
    One = 1,
    Two = 2,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

/// Serial parity settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Register function codes spoken by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusFunctionCode {
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl From<ModbusFunctionCode> for u8 {
    fn from(function_code: ModbusFunctionCode) -> Self {
        function_code as u8
    }
}

impl TryFrom<u8> for ModbusFunctionCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x03 => Ok(ModbusFunctionCode::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunctionCode::ReadInputRegisters),
            0x06 => Ok(ModbusFunctionCode::WriteSingleRegister),
            0x10 => Ok(ModbusFunctionCode::WriteMultipleRegisters),
            other => Err(other),
        }
    }
}

/// One record of the platform's point registry
///
/// Accepts both snake_case keys and the platform's column titles
/// (`"Volttron Point Name"`, `"Modbus Register"`, `"Point Address"`, ...), with
/// `writable` and `point_address` given either natively or as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryPoint {
    #[serde(alias = "Volttron Point Name", alias = "Point Name")]
    pub point_name: String,
    #[serde(default, alias = "Units")]
    pub units: String,
    /// Type and byte-order code, e.g. `>H`, `<q`, `>f`
    #[serde(alias = "Modbus Register")]
    pub modbus_register: String,
    #[serde(default, alias = "Writable", deserialize_with = "de_flag")]
    pub writable: bool,
    #[serde(alias = "Point Address", deserialize_with = "de_address")]
    pub point_address: u16,
    /// Unit id override, defaults to the driver's `slave_id`
    #[serde(default, alias = "Slave ID")]
    pub slave_id: Option<u8>,
    /// Register bank override, defaults from access mode
    #[serde(default)]
    pub register_area: Option<RegisterArea>,
    /// Linear scale applied on read and inverted on write
    #[serde(default, alias = "Multiplier")]
    pub multiplier: Option<f64>,
    #[serde(default = "RegistryPoint::default_precision")]
    pub precision: u8,
    #[serde(default, alias = "Notes")]
    pub description: Option<String>,
}

impl RegistryPoint {
    fn default_precision() -> u8 {
        2
    }
}

fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(u64),
        Text(String),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Number(n) => Ok(n != 0),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean '{other}'"))),
        },
    }
}

fn de_address<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Address {
        Number(u16),
        Text(String),
    }
    match Address::deserialize(deserializer)? {
        Address::Number(n) => Ok(n),
        Address::Text(s) => s
            .trim()
            .parse()
            .map_err(|e| de::Error::custom(format!("invalid register address '{s}': {e}"))),
    }
}

/// Internal batch request for merged reads
#[derive(Debug, Clone)]
pub struct ReadBatch<'a> {
    pub area: RegisterArea,
    pub start_addr: u16,
    pub quantity: u16,
    /// Fields covered by this batch with their resolved wire addresses
    pub fields: Vec<(u16, &'a Field)>,
}
