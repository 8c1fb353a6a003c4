//! Regime classification port.

use chrono::NaiveDateTime;

use crate::domain::strategy::Regime;

/// Read-only lookup of the externally classified regime. Shared by every
/// worker, so implementations must be `Sync`.
pub trait RegimePort: Send + Sync {
    fn regime_at(&self, asset: &str, timestamp: NaiveDateTime) -> Option<Regime>;
}
