//! Per-asset position state and executed fills.

use chrono::NaiveDateTime;

/// Signed holding in one asset. Positive quantity is long, negative is short.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub asset: String,
    pub quantity: f64,
    /// Volume-weighted entry price of the open quantity. Zero when flat.
    pub avg_entry_price: f64,
    pub realized_pnl: f64,
    /// Close the position was last marked at.
    pub last_price: f64,
}

impl PositionState {
    pub fn flat(asset: &str) -> Self {
        PositionState {
            asset: asset.to_string(),
            quantity: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            last_price: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    /// Signed value at `price`: shorts contribute negatively to equity.
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    /// Absolute value at `price`, used for gross exposure.
    pub fn exposure(&self, price: f64) -> f64 {
        self.quantity.abs() * price
    }

    /// P&L of the open quantity against its average entry.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.avg_entry_price)
    }

    /// Applies a signed quantity change at `price` and returns the P&L it
    /// realizes. Adding to a position averages the entry price; trading
    /// against it realizes P&L on the closed part and, if the fill crosses
    /// zero, opens the remainder at `price`.
    pub fn apply_fill(&mut self, delta: f64, price: f64) -> f64 {
        if delta == 0.0 {
            return 0.0;
        }

        let same_direction = self.quantity == 0.0 || self.quantity.signum() == delta.signum();
        if same_direction {
            let open = self.quantity.abs();
            let added = delta.abs();
            self.avg_entry_price = (self.avg_entry_price * open + price * added) / (open + added);
            self.quantity += delta;
            return 0.0;
        }

        let closed = delta.abs().min(self.quantity.abs());
        let realized = closed * (price - self.avg_entry_price) * self.quantity.signum();
        let crosses = delta.abs() > self.quantity.abs();
        self.quantity += delta;
        self.realized_pnl += realized;

        if crosses {
            self.avg_entry_price = price;
        } else if self.quantity.abs() < QUANTITY_EPSILON {
            self.quantity = 0.0;
            self.avg_entry_price = 0.0;
        }
        realized
    }
}

/// Quantities smaller than this are treated as flat.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// One executed leg of a trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub timestamp: NaiveDateTime,
    pub asset: String,
    /// Signed: positive buys, negative sells.
    pub quantity: f64,
    /// Execution price after slippage.
    pub price: f64,
    pub commission: f64,
    pub realized_pnl: f64,
}

impl Fill {
    pub fn side(&self) -> &'static str {
        if self.quantity >= 0.0 { "buy" } else { "sell" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> PositionState {
        let mut pos = PositionState::flat("BTC");
        pos.apply_fill(10.0, 100.0);
        pos
    }

    #[test]
    fn flat_position() {
        let pos = PositionState::flat("BTC");
        assert!(pos.is_flat());
        assert_eq!(pos.market_value(50.0), 0.0);
    }

    #[test]
    fn market_value_is_signed_exposure_is_not() {
        let mut pos = PositionState::flat("ETH");
        pos.apply_fill(-4.0, 25.0);
        assert!(pos.quantity < 0.0);
        assert!((pos.market_value(30.0) - (-120.0)).abs() < f64::EPSILON);
        assert!((pos.exposure(30.0) - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn scale_in_averages_entry_price() {
        let mut pos = long_position();
        let realized = pos.apply_fill(10.0, 110.0);
        assert_eq!(realized, 0.0);
        assert!((pos.quantity - 20.0).abs() < f64::EPSILON);
        assert!((pos.avg_entry_price - 105.0).abs() < 1e-12);
    }

    #[test]
    fn partial_close_realizes_pnl_and_keeps_entry() {
        let mut pos = long_position();
        let realized = pos.apply_fill(-4.0, 120.0);
        assert!((realized - 80.0).abs() < 1e-12);
        assert!((pos.quantity - 6.0).abs() < f64::EPSILON);
        assert!((pos.avg_entry_price - 100.0).abs() < f64::EPSILON);
        assert!((pos.realized_pnl - 80.0).abs() < 1e-12);
    }

    #[test]
    fn full_close_resets_entry() {
        let mut pos = long_position();
        let realized = pos.apply_fill(-10.0, 90.0);
        assert!((realized - (-100.0)).abs() < 1e-12);
        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, 0.0);
    }

    #[test]
    fn crossing_zero_flips_and_reprices() {
        let mut pos = long_position();
        let realized = pos.apply_fill(-15.0, 110.0);
        assert!((realized - 100.0).abs() < 1e-12);
        assert!((pos.quantity - (-5.0)).abs() < f64::EPSILON);
        assert!((pos.avg_entry_price - 110.0).abs() < f64::EPSILON);
    }

    #[test]
    fn short_cover_realizes_gain_when_price_falls() {
        let mut pos = PositionState::flat("ETH");
        pos.apply_fill(-10.0, 50.0);
        let realized = pos.apply_fill(10.0, 40.0);
        assert!((realized - 100.0).abs() < 1e-12);
        assert!(pos.is_flat());
    }

    #[test]
    fn unrealized_pnl_tracks_entry() {
        let pos = long_position();
        assert!((pos.unrealized_pnl(95.0) - (-50.0)).abs() < 1e-12);
    }

    #[test]
    fn fill_side_follows_sign() {
        let fill = Fill {
            timestamp: chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            asset: "BTC".into(),
            quantity: -2.0,
            price: 30.0,
            commission: 1.0,
            realized_pnl: 0.0,
        };
        assert_eq!(fill.side(), "sell");
    }
}
