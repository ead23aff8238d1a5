use crate::{
    client::ModbusClient,
    field::Field,
    planner::ModbusPlannerConfig,
    protocol::session::{Session, SessionConfig},
    table::RegisterTable,
    transport::RegisterTransport,
    types::ModbusDriverConfig,
};
use async_trait::async_trait;
use pointgate_sdk::{
    DriverError, DriverHealth, DriverResult, HealthStatus, PointDriver, PointValue, ScrapeResult,
    SouthwardConnectionState,
};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;
use tracing::{error, info, instrument};

/// Success ratio below which a connected device reports `Degraded`.
const DEGRADED_SUCCESS_RATE: f64 = 0.9;

/// Modbus point driver for one physical device.
///
/// Holds one [`ModbusClient`] per slave id. All clients share a single [`Session`], so
/// every request to the device is serialized on one transport.
pub struct ModbusDriver {
    session: Arc<Session>,
    clients: Vec<ModbusClient>,
    /// point name -> client index
    index: HashMap<String, usize>,
}

impl ModbusDriver {
    /// Build a driver talking to the endpoint described by `config`.
    pub fn new(config: &ModbusDriverConfig, tables: Vec<RegisterTable>) -> DriverResult<Self> {
        let session = Session::new(SessionConfig::new(
            config.connection()?,
            config.connection_policy.clone(),
        ));
        let planner = ModbusPlannerConfig {
            max_gap: config.max_gap,
            max_batch: config.effective_max_batch(),
        };
        Self::with_session(Arc::new(session), tables, planner)
    }

    /// Build a driver over an existing session.
    pub fn with_session(
        session: Arc<Session>,
        tables: Vec<RegisterTable>,
        planner: ModbusPlannerConfig,
    ) -> DriverResult<Self> {
        let transport: Arc<dyn RegisterTransport> = session.clone();
        let mut index = HashMap::new();
        let mut clients = Vec::with_capacity(tables.len());
        for table in tables {
            if clients
                .iter()
                .any(|c: &ModbusClient| c.slave_id() == table.slave_id())
            {
                return Err(DriverError::Configuration(format!(
                    "more than one register table for slave {}",
                    table.slave_id()
                )));
            }
            for field in table.fields() {
                if index.insert(field.name.clone(), clients.len()).is_some() {
                    return Err(DriverError::Configuration(format!(
                        "duplicate point name '{}'",
                        field.name
                    )));
                }
            }
            clients.push(ModbusClient::new(table, Arc::clone(&transport)).with_planner(planner));
        }
        Ok(Self {
            session,
            clients,
            index,
        })
    }

    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn point_names(&self) -> impl Iterator<Item = &str> {
        self.clients
            .iter()
            .flat_map(|c| c.table().fields().iter().map(|f| f.name.as_str()))
    }

    fn locate(&self, point_name: &str) -> DriverResult<(&ModbusClient, &Field)> {
        let client = self
            .index
            .get(point_name)
            .map(|&i| &self.clients[i])
            .ok_or_else(|| DriverError::NotFound {
                name: point_name.to_string(),
            })?;
        Ok((client, client.field_by_name(point_name)?))
    }
}

#[async_trait]
impl PointDriver for ModbusDriver {
    #[instrument(level = "debug", skip_all)]
    async fn start(&self) -> DriverResult<()> {
        let endpoint = self.session.config().connection.endpoint();
        self.session
            .connect()
            .await
            .map_err(|e| e.into_driver_error(format!("connect to {endpoint}")))?;
        info!(%endpoint, points = self.index.len(), "Modbus driver started");
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    async fn stop(&self) -> DriverResult<()> {
        self.session.disconnect().await;
        info!(endpoint = %self.session.config().connection.endpoint(), "Modbus driver stopped");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(point = %point_name))]
    async fn get_point(&self, point_name: &str) -> DriverResult<PointValue> {
        let (client, field) = self.locate(point_name)?;
        client.read(field).await
    }

    #[instrument(level = "debug", skip_all, fields(point = %point_name, value = %value))]
    async fn set_point(&self, point_name: &str, value: PointValue) -> DriverResult<PointValue> {
        let (client, field) = self.locate(point_name)?;
        client.write(field, &value).await?;
        if field.access_mode.is_readable() {
            // report what the device committed, which may be clamped
            client.read(field).await
        } else {
            field.decode(&field.encode(&value)?)
        }
    }

    #[instrument(level = "debug", skip_all)]
    async fn scrape_all(&self) -> DriverResult<ScrapeResult> {
        let mut out = ScrapeResult::with_capacity(self.index.len());
        for client in &self.clients {
            match client.read_all().await {
                Ok(readings) => out.extend(readings),
                Err(e) => {
                    error!(slave_id = client.slave_id(), error = %e, "Scrape aborted");
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    #[instrument(level = "debug", skip_all)]
    async fn health_check(&self) -> DriverResult<DriverHealth> {
        let metrics = self.session.metrics();
        let state = self.session.connection_state();
        let success_rate = metrics.success_rate();
        let status = match &state {
            SouthwardConnectionState::Connected if success_rate >= DEGRADED_SUCCESS_RATE => {
                HealthStatus::Healthy
            }
            SouthwardConnectionState::Connected
            | SouthwardConnectionState::Connecting
            | SouthwardConnectionState::Reconnecting => HealthStatus::Degraded,
            SouthwardConnectionState::Failed(_) => HealthStatus::Unhealthy,
            SouthwardConnectionState::Disconnected => HealthStatus::Unknown,
        };
        let details = HashMap::from([
            (
                "endpoint".to_string(),
                json!(self.session.config().connection.endpoint()),
            ),
            ("connection_state".to_string(), json!(state.to_string())),
            (
                "request_state".to_string(),
                json!(format!("{:?}", self.session.request_state())),
            ),
            ("points".to_string(), json!(self.index.len())),
            (
                "slaves".to_string(),
                json!(self.clients.iter().map(|c| c.slave_id()).collect::<Vec<_>>()),
            ),
        ]);
        Ok(DriverHealth {
            status,
            last_activity: self.session.last_activity(),
            error_count: metrics.failed_requests,
            success_rate,
            average_response_time: metrics.average_response_time,
            details: Some(details),
        })
    }

    fn subscribe_connection_state(&self) -> watch::Receiver<SouthwardConnectionState> {
        self.session.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointgate_sdk::DataType;

    fn table(slave_id: u8, names: &[&str]) -> RegisterTable {
        RegisterTable::builder(slave_id)
            .fields(
                names
                    .iter()
                    .enumerate()
                    .map(|(i, n)| Field::new(*n, i as u16, DataType::UInt16)),
            )
            .build()
            .unwrap()
    }

    fn config() -> ModbusDriverConfig {
        ModbusDriverConfig::tcp("127.0.0.1", 1502)
    }

    #[test]
    fn point_names_are_unique_across_slaves() {
        let err = ModbusDriver::new(&config(), vec![table(1, &["a"]), table(2, &["a"])])
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn one_table_per_slave() {
        let err = ModbusDriver::new(&config(), vec![table(1, &["a"]), table(1, &["b"])])
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[tokio::test]
    async fn unknown_point_is_not_found() {
        let driver = ModbusDriver::new(&config(), vec![table(1, &["a", "b"])]).unwrap();
        assert_eq!(driver.point_names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(
            driver.get_point("zz").await.unwrap_err(),
            DriverError::NotFound { name: "zz".into() }
        );
        assert!(matches!(
            driver.set_point("zz", PointValue::UInt16(1)).await,
            Err(DriverError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn health_before_any_traffic() {
        let driver = ModbusDriver::new(&config(), vec![table(1, &["a"])]).unwrap();
        let health = driver.health_check().await.unwrap();
        assert_eq!(health.status, HealthStatus::Unknown);
        assert_eq!(health.error_count, 0);
        assert_eq!(health.success_rate, 1.0);
        assert_eq!(health.details.unwrap()["points"], json!(1));
    }
}
