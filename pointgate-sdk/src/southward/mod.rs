pub mod model;
pub mod types;

use crate::{DriverResult, PointValue};
use async_trait::async_trait;
use model::DriverHealth;
use std::collections::HashMap;
use tokio::sync::watch;
use types::SouthwardConnectionState;

/// Outcome of reading one point during a scrape.
pub type PointReading = DriverResult<PointValue>;

/// Result of a full scrape, keyed by point name.
///
/// Every configured point has an entry; points that could not be read carry their error.
pub type ScrapeResult = HashMap<String, PointReading>;

/// The contract a southward driver exposes to the host platform.
///
/// Implementations serialize access to their transport internally, so the platform may
/// call any operation concurrently.
#[async_trait]
pub trait PointDriver: Send + Sync {
    /// Open the transport eagerly. Operations also connect lazily, so calling this is optional.
    async fn start(&self) -> DriverResult<()>;

    /// Release the transport. Later operations reconnect on demand.
    async fn stop(&self) -> DriverResult<()>;

    /// Read a single point.
    async fn get_point(&self, point_name: &str) -> DriverResult<PointValue>;

    /// Write a point and return the value the device reports afterwards.
    async fn set_point(&self, point_name: &str, value: PointValue) -> DriverResult<PointValue>;

    /// Read every point.
    ///
    /// Per-point failures are reported inside the map; a lost connection fails the whole call.
    async fn scrape_all(&self) -> DriverResult<ScrapeResult>;

    async fn health_check(&self) -> DriverResult<DriverHealth>;

    fn subscribe_connection_state(&self) -> watch::Receiver<SouthwardConnectionState>;
}
