use super::{
    driver::ModbusDriver,
    field::{Field, Transform},
    table::RegisterTable,
    types::{Endianness, ModbusDriverConfig, RegistryPoint},
};
use pointgate_sdk::{AccessMode, DataType, DriverError, DriverResult};
use std::{collections::BTreeMap, str::FromStr};
use tracing::info;

/// Parsed `modbus_register` code such as `>H`, `<q` or `float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterCode {
    pub data_type: DataType,
    /// `None` when the code carries no endianness tag
    pub byte_order: Option<Endianness>,
}

impl FromStr for RegisterCode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let (byte_order, body) = match code.chars().next() {
            Some('>') | Some('!') => (Some(Endianness::BigEndian), &code[1..]),
            Some('<') => (Some(Endianness::LittleEndian), &code[1..]),
            _ => (None, code),
        };
        let data_type = match body {
            "h" => DataType::Int16,
            "H" => DataType::UInt16,
            "i" | "l" => DataType::Int32,
            "I" | "L" => DataType::UInt32,
            "q" => DataType::Int64,
            "Q" => DataType::UInt64,
            "f" => DataType::Float32,
            "d" => DataType::Float64,
            long => match long.to_ascii_lowercase().as_str() {
                "int16" => DataType::Int16,
                "uint16" => DataType::UInt16,
                "int32" => DataType::Int32,
                "uint32" => DataType::UInt32,
                "int64" => DataType::Int64,
                "uint64" => DataType::UInt64,
                "float" => DataType::Float32,
                "double" => DataType::Float64,
                _ => {
                    return Err(DriverError::Configuration(format!(
                        "unsupported modbus register code '{s}'"
                    )))
                }
            },
        };
        Ok(Self {
            data_type,
            byte_order,
        })
    }
}

/// Builds [`ModbusDriver`]s from the platform's driver config and point registry.
#[derive(Debug, Clone, Default)]
pub struct ModbusDriverFactory;

impl ModbusDriverFactory {
    pub fn create(
        config: &ModbusDriverConfig,
        registry: Vec<RegistryPoint>,
    ) -> DriverResult<ModbusDriver> {
        let tables = Self::build_tables(config, &registry)?;
        info!(
            endpoint = %config.connection()?.endpoint(),
            points = registry.len(),
            slaves = tables.len(),
            "Creating Modbus driver"
        );
        ModbusDriver::new(config, tables)
    }

    /// Deserialize both documents, then [`Self::create`].
    pub fn from_json(
        driver_config: &serde_json::Value,
        registry_config: &serde_json::Value,
    ) -> DriverResult<ModbusDriver> {
        let config: ModbusDriverConfig = serde_json::from_value(driver_config.clone())
            .map_err(|e| {
                DriverError::Configuration(format!("Failed to deserialize ModbusDriverConfig: {e}"))
            })?;
        let registry: Vec<RegistryPoint> = serde_json::from_value(registry_config.clone())
            .map_err(|e| {
                DriverError::Configuration(format!("Failed to deserialize point registry: {e}"))
            })?;
        Self::create(&config, registry)
    }

    /// One table per slave id, in ascending slave order.
    pub fn build_tables(
        config: &ModbusDriverConfig,
        registry: &[RegistryPoint],
    ) -> DriverResult<Vec<RegisterTable>> {
        let mut per_slave: BTreeMap<u8, Vec<Field>> = BTreeMap::new();
        for point in registry {
            let field = Self::field_from_point(config, point)?;
            per_slave
                .entry(point.slave_id.unwrap_or(config.slave_id))
                .or_default()
                .push(field);
        }
        per_slave
            .into_iter()
            .map(|(slave_id, fields)| {
                RegisterTable::builder(slave_id)
                    .addressing(config.addressing)
                    .base_address(config.base_address)
                    .fields(fields)
                    .build()
            })
            .collect()
    }

    fn field_from_point(config: &ModbusDriverConfig, point: &RegistryPoint) -> DriverResult<Field> {
        let code: RegisterCode = point.modbus_register.parse().map_err(|e| {
            DriverError::Configuration(format!("point '{}': {e}", point.point_name))
        })?;
        let access_mode = if point.writable {
            AccessMode::ReadWrite
        } else {
            AccessMode::Read
        };
        let mut field = Field::new(point.point_name.trim(), point.point_address, code.data_type)
            .with_units(point.units.as_str())
            .with_precision(point.precision)
            .with_access_mode(access_mode)
            .with_byte_order(code.byte_order.unwrap_or(config.byte_order));
        if let Some(m) = point.multiplier {
            if m == 0.0 || !m.is_finite() {
                return Err(DriverError::Configuration(format!(
                    "point '{}': multiplier must be finite and non-zero, got {m}",
                    point.point_name
                )));
            }
            field = field.with_transform(Transform::Scale(m));
        }
        if let Some(area) = point.register_area {
            field = field.with_area(area);
        }
        if let Some(description) = &point.description {
            field = field.with_description(description.as_str());
        }
        Ok(field)
    }
}
