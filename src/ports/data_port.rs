//! Market data access port.

use crate::domain::error::NexoraError;
use crate::domain::ohlcv::Bar;

pub trait DataPort {
    /// All bars for `asset`, in the order the source stores them. Ordering
    /// and duplicate checks are left to the engine.
    fn fetch_bars(&self, asset: &str) -> Result<Vec<Bar>, NexoraError>;

    fn list_assets(&self) -> Result<Vec<String>, NexoraError>;
}
