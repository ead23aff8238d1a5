mod error;
mod retry;
mod southward;
mod value;

pub type DriverResult<T> = Result<T, DriverError>;

pub use error::DriverError;
pub use retry::{build_exponential_backoff, RetryPolicy};
pub use southward::{
    model::{ConnectionPolicy, DriverHealth, DriverMetrics},
    types::{AccessMode, DataType, HealthStatus, SouthwardConnectionState},
    PointDriver, PointReading, ScrapeResult,
};
pub use value::{PointValue, ValueCastError};
