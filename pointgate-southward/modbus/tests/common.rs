#![allow(dead_code)]

use pointgate_driver_modbus::{
    Framing, ModbusDriver, ModbusDriverConfig, ModbusDriverFactory, ModbusSimulator,
    RegisterTable, RegistryPoint,
};
use pointgate_sdk::{ConnectionPolicy, PointValue, RetryPolicy};
use serde_json::json;
use std::{net::SocketAddr, sync::Once};
use tracing::Level;

pub const SLAVE_ID: u8 = 1;

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// The platform's point registry for the reference test device, with its column titles.
pub fn registry_json() -> serde_json::Value {
    let point = |name: &str, register: &str, address: u16| {
        json!({
            "Volttron Point Name": name,
            "Units": "PPM",
            "Modbus Register": register,
            "Writable": "TRUE",
            "Point Address": address.to_string(),
        })
    };
    json!([
        point("BigUShort", ">H", 0),
        point("BigUInt", ">I", 1),
        point("BigULong", ">Q", 3),
        point("BigShort", ">h", 7),
        point("BigInt", ">i", 8),
        point("BigFloat", ">f", 10),
        point("BigLong", ">q", 12),
        point("LittleUShort", "<H", 100),
        point("LittleUInt", "<I", 101),
        point("LittleULong", "<Q", 103),
        point("LittleShort", "<h", 107),
        point("LittleInt", "<i", 108),
        point("LittleFloat", "<f", 110),
        point("LittleLong", "<q", 112),
    ])
}

pub fn registry() -> Vec<RegistryPoint> {
    serde_json::from_value(registry_json()).expect("registry fixture")
}

/// Boundary values written to every registry point.
pub fn expected_values() -> Vec<(&'static str, PointValue)> {
    vec![
        ("BigUShort", PointValue::UInt16(u16::MAX)),
        ("BigUInt", PointValue::UInt32(u32::MAX)),
        ("BigULong", PointValue::UInt64(u64::MAX)),
        ("BigShort", PointValue::Int16(i16::MIN)),
        ("BigInt", PointValue::Int32(i32::MIN)),
        ("BigFloat", PointValue::Float32(-1234.0)),
        ("BigLong", PointValue::Int64(i64::MIN)),
        ("LittleUShort", PointValue::UInt16(0)),
        ("LittleUInt", PointValue::UInt32(0)),
        ("LittleULong", PointValue::UInt64(0)),
        ("LittleShort", PointValue::Int16(i16::MAX)),
        ("LittleInt", PointValue::Int32(i32::MAX)),
        ("LittleFloat", PointValue::Float32(1.0)),
        ("LittleLong", PointValue::Int64(i64::MAX)),
    ]
}

/// Short deadlines so fault scenarios finish quickly.
pub fn fast_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        connect_timeout_ms: 500,
        read_timeout_ms: 300,
        write_timeout_ms: 300,
        backoff: RetryPolicy {
            initial_interval_ms: 20,
            max_interval_ms: 100,
            ..RetryPolicy::with_max_attempts(2)
        },
    }
}

pub fn driver_config(addr: SocketAddr, framing: Framing) -> ModbusDriverConfig {
    let mut config = ModbusDriverConfig::tcp(addr.ip().to_string(), addr.port());
    config.slave_id = SLAVE_ID;
    config.framing = framing;
    config.connection_policy = fast_policy();
    config
}

/// A running simulator seeded with a registry and a driver pointed at it.
pub struct TestDevice {
    pub simulator: ModbusSimulator,
    pub driver: ModbusDriver,
    pub tables: Vec<RegisterTable>,
    pub config: ModbusDriverConfig,
}

impl TestDevice {
    pub fn table(&self, slave_id: u8) -> &RegisterTable {
        self.tables
            .iter()
            .find(|t| t.slave_id() == slave_id)
            .expect("table for slave")
    }
}

pub async fn start_device(framing: Framing, registry: Vec<RegistryPoint>) -> TestDevice {
    init_tracing();
    let mut simulator =
        ModbusSimulator::new("127.0.0.1:0".parse().unwrap()).with_framing(framing);
    let addr = simulator.start().await.expect("simulator start");

    let config = driver_config(addr, framing);
    let tables = ModbusDriverFactory::build_tables(&config, &registry).expect("tables");
    for table in &tables {
        simulator
            .define_slave(table.slave_id(), table)
            .expect("define slave");
    }
    let driver = ModbusDriver::new(&config, tables.clone()).expect("driver");
    TestDevice {
        simulator,
        driver,
        tables,
        config,
    }
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("free port listener")
}
