use crate::{
    field::Field,
    planner::{ModbusPlanner, ModbusPlannerConfig},
    table::RegisterTable,
    transport::RegisterTransport,
    types::ReadBatch,
};
use pointgate_sdk::{DriverError, DriverResult, PointValue, ScrapeResult};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Register client for one slave unit.
///
/// Owns the field table and issues reads and writes through a shared transport. All
/// errors returned from here name the point, the resolved address and the slave id.
#[derive(Clone)]
pub struct ModbusClient {
    table: Arc<RegisterTable>,
    transport: Arc<dyn RegisterTransport>,
    planner: ModbusPlannerConfig,
}

impl ModbusClient {
    pub fn new(table: RegisterTable, transport: Arc<dyn RegisterTransport>) -> Self {
        Self {
            table: Arc::new(table),
            transport,
            planner: ModbusPlannerConfig::default(),
        }
    }

    pub fn with_planner(mut self, planner: ModbusPlannerConfig) -> Self {
        self.planner = planner;
        self
    }

    #[inline]
    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    #[inline]
    pub fn slave_id(&self) -> u8 {
        self.table.slave_id()
    }

    pub fn field_by_name(&self, name: &str) -> DriverResult<&Field> {
        self.table.field_by_name(name)
    }

    fn point_context(&self, field: &Field, address: u16) -> String {
        format!(
            "point '{}' at address {} (slave {})",
            field.name,
            address,
            self.slave_id()
        )
    }

    /// Read and decode one field.
    #[instrument(level = "debug", skip_all, fields(point = %field.name, slave_id = self.slave_id()))]
    pub async fn read(&self, field: &Field) -> DriverResult<PointValue> {
        field.validate_read()?;
        let address = self.table.resolve_address(field)?;
        let words = self
            .transport
            .read_registers(self.slave_id(), field.register_area(), address, field.width())
            .await
            .map_err(|e| e.with_context(self.point_context(field, address)))?;
        field.decode(&words)
    }

    /// Encode and write one field.
    ///
    /// Access mode is checked before anything touches the transport. Single-register
    /// fields use function 06, wider ones function 16.
    #[instrument(level = "debug", skip_all, fields(point = %field.name, slave_id = self.slave_id()))]
    pub async fn write(&self, field: &Field, value: &PointValue) -> DriverResult<()> {
        field.validate_write()?;
        let words = field.encode(value)?;
        let address = self.table.resolve_address(field)?;
        debug!(address, words = ?words, "Writing registers");
        let res = match words.as_slice() {
            [word] => {
                self.transport
                    .write_single_register(self.slave_id(), address, *word)
                    .await
            }
            _ => {
                self.transport
                    .write_multiple_registers(self.slave_id(), address, &words)
                    .await
            }
        };
        res.map_err(|e| e.with_context(self.point_context(field, address)))
    }

    /// Read every field, one entry per declared field.
    ///
    /// Per-field failures land in the map. Only a connection-level failure aborts the
    /// whole call.
    #[instrument(level = "debug", skip_all, fields(slave_id = self.slave_id()))]
    pub async fn read_all(&self) -> DriverResult<ScrapeResult> {
        let mut out = ScrapeResult::with_capacity(self.table.len());
        let mut readable: Vec<(u16, &Field)> = Vec::with_capacity(self.table.len());

        for field in self.table.fields() {
            if let Err(e) = field.validate_read() {
                out.insert(field.name.clone(), Err(e));
                continue;
            }
            match self.table.resolve_address(field) {
                Ok(address) => readable.push((address, field)),
                Err(e) => {
                    out.insert(field.name.clone(), Err(e));
                }
            }
        }

        let batches = if self.transport.supports_batching() {
            ModbusPlanner::plan_read_batches(self.planner, &readable)
        } else {
            ModbusPlanner::plan_single_reads(&readable)
        };

        for batch in batches {
            self.read_batch(&batch, &mut out).await?;
        }
        Ok(out)
    }

    async fn read_batch(&self, batch: &ReadBatch<'_>, out: &mut ScrapeResult) -> DriverResult<()> {
        let res = self
            .transport
            .read_registers(self.slave_id(), batch.area, batch.start_addr, batch.quantity)
            .await;

        let err = match res {
            Ok(words) => {
                for &(address, field) in &batch.fields {
                    let offset = (address - batch.start_addr) as usize;
                    let width = field.width() as usize;
                    let value = match words.get(offset..offset + width) {
                        Some(slice) => field.decode(slice),
                        None => Err(DriverError::Protocol {
                            context: self.point_context(field, address),
                            reason: format!(
                                "batch response holds {} words, field needs {}..{}",
                                words.len(),
                                offset,
                                offset + width
                            ),
                        }),
                    };
                    out.insert(field.name.clone(), value);
                }
                return Ok(());
            }
            Err(e) => e,
        };

        if err.is_connection_level() {
            tracing::error!(
                slave_id = self.slave_id(),
                address = batch.start_addr,
                quantity = batch.quantity,
                error = %err,
                "Connection lost during scrape"
            );
            return Err(err);
        }

        if batch.fields.len() == 1 || matches!(err, DriverError::Timeout { .. }) {
            for &(address, field) in &batch.fields {
                warn!(point = %field.name, address, error = %err, "Point read failed");
                out.insert(
                    field.name.clone(),
                    Err(err.clone().with_context(self.point_context(field, address))),
                );
            }
            return Ok(());
        }

        // One bad register poisons a whole range read; retry field by field so each
        // point gets its own outcome.
        debug!(
            address = batch.start_addr,
            quantity = batch.quantity,
            error = %err,
            "Batch read failed, falling back to single reads"
        );
        for &(_, field) in &batch.fields {
            match self.read(field).await {
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => {
                    warn!(point = %field.name, error = %e, "Point read failed");
                    out.insert(field.name.clone(), Err(e));
                }
                Ok(v) => {
                    out.insert(field.name.clone(), Ok(v));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegisterArea;
    use async_trait::async_trait;
    use pointgate_sdk::{AccessMode, DataType};
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    /// In-memory transport that counts calls and can fail selected addresses.
    #[derive(Default)]
    struct MockTransport {
        registers: Mutex<HashMap<(RegisterArea, u16), u16>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
        bad_address: Option<u16>,
        timeout: bool,
        disconnected: bool,
        single_reads: bool,
    }

    impl MockTransport {
        fn fail(&self, area: RegisterArea, address: u16, quantity: u16) -> DriverResult<()> {
            if self.disconnected {
                return Err(DriverError::Connection {
                    context: "mock".into(),
                    reason: "closed".into(),
                });
            }
            if self.timeout {
                return Err(DriverError::Timeout {
                    context: "mock".into(),
                    timeout: Duration::from_millis(10),
                });
            }
            if let Some(bad) = self.bad_address {
                if (address..address + quantity).contains(&bad) {
                    return Err(DriverError::Device {
                        context: format!("{area:?}"),
                        function: area.read_function().into(),
                        code: 0x02,
                    });
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RegisterTransport for MockTransport {
        fn supports_batching(&self) -> bool {
            !self.single_reads
        }

        async fn read_registers(
            &self,
            _slave_id: u8,
            area: RegisterArea,
            address: u16,
            quantity: u16,
        ) -> DriverResult<Vec<u16>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.fail(area, address, quantity)?;
            let regs = self.registers.lock().unwrap();
            Ok((address..address + quantity)
                .map(|a| regs.get(&(area, a)).copied().unwrap_or(0))
                .collect())
        }

        async fn write_single_register(
            &self,
            slave_id: u8,
            address: u16,
            value: u16,
        ) -> DriverResult<()> {
            self.write_multiple_registers(slave_id, address, &[value]).await
        }

        async fn write_multiple_registers(
            &self,
            _slave_id: u8,
            address: u16,
            values: &[u16],
        ) -> DriverResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut regs = self.registers.lock().unwrap();
            for (i, v) in values.iter().enumerate() {
                regs.insert((RegisterArea::Holding, address + i as u16), *v);
            }
            Ok(())
        }
    }

    fn table() -> RegisterTable {
        RegisterTable::builder(1)
            .field(Field::new("a", 0, DataType::UInt16))
            .field(Field::new("b", 1, DataType::Int32))
            .field(Field::new("c", 3, DataType::Float32))
            .field(Field::new("ro", 0, DataType::UInt16).with_access_mode(AccessMode::Read))
            .field(Field::new("wo", 20, DataType::UInt16).with_access_mode(AccessMode::Write))
            .build()
            .unwrap()
    }

    fn client(mock: MockTransport) -> (ModbusClient, Arc<MockTransport>) {
        let mock = Arc::new(mock);
        (ModbusClient::new(table(), mock.clone()), mock)
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let (client, _) = client(MockTransport::default());
        let b = client.field_by_name("b").unwrap().clone();
        client.write(&b, &PointValue::Int32(-70_000)).await.unwrap();
        assert_eq!(client.read(&b).await.unwrap(), PointValue::Int32(-70_000));
    }

    #[tokio::test]
    async fn read_only_write_never_reaches_transport() {
        let (client, mock) = client(MockTransport::default());
        let ro = client.field_by_name("ro").unwrap().clone();
        let err = client.write(&ro, &PointValue::UInt16(1)).await.unwrap_err();
        assert!(matches!(err, DriverError::Permission { .. }));
        assert_eq!(mock.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn out_of_range_write_never_reaches_transport() {
        let (client, mock) = client(MockTransport::default());
        let a = client.field_by_name("a").unwrap().clone();
        let err = client.write(&a, &PointValue::Int32(-1)).await.unwrap_err();
        assert!(matches!(err, DriverError::Range { .. }));
        assert_eq!(mock.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_all_batches_and_reports_write_only_fields() {
        let (client, mock) = client(MockTransport::default());
        let all = client.read_all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(matches!(all["wo"], Err(DriverError::Permission { .. })));
        assert_eq!(all["c"], Ok(PointValue::Float32(0.0)));
        // holding 0..5 in one request, input 0 in another
        assert_eq!(mock.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn read_all_without_batching_reads_each_field() {
        let (client, mock) = client(MockTransport {
            single_reads: true,
            ..Default::default()
        });
        let b = client.field_by_name("b").unwrap().clone();
        client.write(&b, &PointValue::Int32(-70_000)).await.unwrap();

        let all = client.read_all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all["a"], Ok(PointValue::UInt16(0)));
        assert_eq!(all["b"], Ok(PointValue::Int32(-70_000)));
        assert_eq!(all["c"], Ok(PointValue::Float32(0.0)));
        assert_eq!(all["ro"], Ok(PointValue::UInt16(0)));
        assert!(matches!(all["wo"], Err(DriverError::Permission { .. })));
        // a, b, c and ro; wo is never read
        assert_eq!(mock.reads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn device_error_falls_back_to_single_reads() {
        let (client, mock) = client(MockTransport {
            bad_address: Some(2),
            ..Default::default()
        });
        let all = client.read_all().await.unwrap();
        assert_eq!(all["a"], Ok(PointValue::UInt16(0)));
        assert!(matches!(all["b"], Err(DriverError::Device { code: 0x02, .. })));
        assert_eq!(all["c"], Ok(PointValue::Float32(0.0)));
        // batch + three single reads + input batch
        assert_eq!(mock.reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn timeout_is_reported_per_point() {
        let (client, _) = client(MockTransport {
            timeout: true,
            ..Default::default()
        });
        let all = client.read_all().await.unwrap();
        for name in ["a", "b", "c", "ro"] {
            match &all[name] {
                Err(DriverError::Timeout { context, .. }) => assert!(context.contains(name)),
                other => panic!("{name}: unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn connection_error_aborts_read_all() {
        let (client, _) = client(MockTransport {
            disconnected: true,
            ..Default::default()
        });
        let err = client.read_all().await.unwrap_err();
        assert!(err.is_connection_level());
    }

    #[tokio::test]
    async fn errors_name_the_point() {
        let (client, _) = client(MockTransport {
            bad_address: Some(0),
            ..Default::default()
        });
        let a = client.field_by_name("a").unwrap().clone();
        match client.read(&a).await.unwrap_err() {
            DriverError::Device { context, .. } => {
                assert_eq!(context, "point 'a' at address 0 (slave 1)")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
