//! Fill pricing: slippage and commissions.

/// Transaction cost model applied to every executed leg.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommissionModel {
    /// Flat fee per executed leg.
    pub per_trade: f64,
    /// Percentage of traded notional.
    pub pct: f64,
    /// Adverse price move applied to every fill, in percent.
    pub slippage_pct: f64,
}

impl CommissionModel {
    pub fn free() -> Self {
        Self::default()
    }

    /// flat fee + notional * pct / 100
    pub fn commission(&self, notional: f64) -> f64 {
        self.per_trade + notional.abs() * self.pct / 100.0
    }

    /// Buys execute above the market, sells below it.
    pub fn fill_price(&self, market_price: f64, delta: f64) -> f64 {
        if delta >= 0.0 {
            market_price * (1.0 + self.slippage_pct / 100.0)
        } else {
            market_price * (1.0 - self.slippage_pct / 100.0)
        }
    }

    /// Total cost of trading `delta` units at `market_price`: commission plus
    /// the value lost to slippage. Zero for a zero delta.
    pub fn estimated_cost(&self, market_price: f64, delta: f64) -> f64 {
        if delta == 0.0 {
            return 0.0;
        }
        let slipped = (self.fill_price(market_price, delta) - market_price).abs() * delta.abs();
        slipped + self.commission(delta.abs() * self.fill_price(market_price, delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CommissionModel {
        CommissionModel {
            per_trade: 10.0,
            pct: 0.1,
            slippage_pct: 0.5,
        }
    }

    #[test]
    fn commission_flat_plus_pct() {
        let c = model().commission(10_000.0);
        assert!((c - 20.0).abs() < 1e-9);
    }

    #[test]
    fn commission_uses_absolute_notional() {
        assert!((model().commission(-10_000.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn free_model_costs_nothing() {
        let m = CommissionModel::free();
        assert_eq!(m.commission(5_000.0), 0.0);
        assert_eq!(m.fill_price(100.0, 3.0), 100.0);
        assert_eq!(m.estimated_cost(100.0, 3.0), 0.0);
    }

    #[test]
    fn slippage_is_adverse_on_both_sides() {
        let m = model();
        assert!((m.fill_price(100.0, 1.0) - 100.5).abs() < 1e-9);
        assert!((m.fill_price(100.0, -1.0) - 99.5).abs() < 1e-9);
    }

    #[test]
    fn estimated_cost_combines_slippage_and_commission() {
        let m = model();
        // 10 units: slippage 10 * 0.5 = 5, notional 1005, commission 10 + 1.005
        let cost = m.estimated_cost(100.0, 10.0);
        assert!((cost - 16.005).abs() < 1e-9);
    }

    #[test]
    fn zero_delta_is_free() {
        assert_eq!(model().estimated_cost(100.0, 0.0), 0.0);
    }
}
