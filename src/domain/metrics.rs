//! Summary statistics for a finished run.

use std::cmp::Ordering;

use super::report::RunResult;

/// Annualization and risk-free settings for the ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsConfig {
    /// Bars per year.
    pub annualization_factor: f64,
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            annualization_factor: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

/// Ratios are NaN when they are undefined (fewer than two returns or zero
/// dispersion), never silently zero.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    /// Largest peak-to-trough decline as a positive fraction of the peak.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub volatility: f64,
    /// Share of bars with a positive return.
    pub win_rate: f64,
    /// Bars on which at least one fill executed.
    pub trade_count: usize,
    pub total_commission: f64,
    pub final_equity: f64,
    pub bars: usize,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            total_return: 0.0,
            annualized_return: 0.0,
            max_drawdown: 0.0,
            sharpe_ratio: f64::NAN,
            sortino_ratio: f64::NAN,
            volatility: f64::NAN,
            win_rate: 0.0,
            trade_count: 0,
            total_commission: 0.0,
            final_equity: 0.0,
            bars: 0,
        }
    }
}

// NaN compares equal to NaN so finished runs can be compared field by field.
impl PartialEq for Metrics {
    fn eq(&self, other: &Self) -> bool {
        let same = |a: f64, b: f64| a.total_cmp(&b) == Ordering::Equal;
        same(self.total_return, other.total_return)
            && same(self.annualized_return, other.annualized_return)
            && same(self.max_drawdown, other.max_drawdown)
            && same(self.sharpe_ratio, other.sharpe_ratio)
            && same(self.sortino_ratio, other.sortino_ratio)
            && same(self.volatility, other.volatility)
            && same(self.win_rate, other.win_rate)
            && self.trade_count == other.trade_count
            && same(self.total_commission, other.total_commission)
            && same(self.final_equity, other.final_equity)
            && self.bars == other.bars
    }
}

impl Metrics {
    /// Computes every metric from the run's per-bar records. The equity
    /// series starts at the initial capital so the first bar has a return.
    pub fn summarize(run: &RunResult, config: &MetricsConfig) -> Self {
        let initial = run.initial_capital;
        let mut curve = Vec::with_capacity(run.records.len() + 1);
        curve.push(initial);
        curve.extend(run.records.iter().map(|r| r.equity));

        let final_equity = curve.last().copied().unwrap_or(initial);
        let total_return = if initial > 0.0 {
            final_equity / initial - 1.0
        } else {
            0.0
        };

        let bars = run.records.len();
        let annualized_return = annualize(total_return, bars, config.annualization_factor);
        let returns = simple_returns(&curve);
        let (sharpe_ratio, sortino_ratio, volatility) = compute_risk_adjusted(&returns, config);
        let win_rate = if returns.is_empty() {
            0.0
        } else {
            returns.iter().filter(|&&r| r > 0.0).count() as f64 / returns.len() as f64
        };

        Metrics {
            total_return,
            annualized_return,
            max_drawdown: max_drawdown(&curve),
            sharpe_ratio,
            sortino_ratio,
            volatility,
            win_rate,
            trade_count: run.records.iter().filter(|r| r.fills > 0).count(),
            total_commission: run.fills.iter().map(|f| f.commission).sum(),
            final_equity,
            bars,
        }
    }
}

fn annualize(total_return: f64, bars: usize, factor: f64) -> f64 {
    if bars == 0 || factor <= 0.0 || !total_return.is_finite() {
        return 0.0;
    }
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(factor / bars as f64) - 1.0
}

fn simple_returns(curve: &[f64]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// Largest decline from a running peak. Never decreases as the curve grows.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &equity in curve {
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd
}

/// (sharpe, sortino, volatility), annualized with population deviations.
fn compute_risk_adjusted(returns: &[f64], config: &MetricsConfig) -> (f64, f64, f64) {
    if returns.len() < 2 {
        return (f64::NAN, f64::NAN, f64::NAN);
    }

    let af = config.annualization_factor;
    let per_bar_rf = config.risk_free_rate / af;
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let excess = mean - per_bar_rf;

    let (sharpe, volatility) = if stddev > 0.0 {
        (excess / stddev * af.sqrt(), stddev * af.sqrt())
    } else {
        (f64::NAN, 0.0)
    };

    let downside = returns
        .iter()
        .filter(|&&r| r < per_bar_rf)
        .map(|&r| (r - per_bar_rf).powi(2))
        .sum::<f64>()
        / n;
    let sortino = if downside > 0.0 {
        excess / downside.sqrt() * af.sqrt()
    } else {
        f64::NAN
    };

    (sharpe, sortino, volatility)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::report::tests::run_with_equity;
    use approx::assert_relative_eq;

    #[test]
    fn empty_run() {
        let run = run_with_equity(10_000.0, &[]);
        let m = Metrics::summarize(&run, &MetricsConfig::default());
        assert_eq!(m.total_return, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert!(m.sharpe_ratio.is_nan());
        assert_eq!(m.bars, 0);
        assert_eq!(m.final_equity, 10_000.0);
    }

    #[test]
    fn total_return_from_initial_capital() {
        let run = run_with_equity(10_000.0, &[10_100.0, 10_500.0, 11_000.0]);
        let m = Metrics::summarize(&run, &MetricsConfig::default());
        assert_relative_eq!(m.total_return, 0.1, epsilon = 1e-12);
        assert_relative_eq!(m.final_equity, 11_000.0);
        assert_eq!(m.bars, 3);
    }

    #[test]
    fn max_drawdown_is_positive_fraction_of_peak() {
        let run = run_with_equity(100.0, &[120.0, 90.0, 110.0, 60.0, 130.0]);
        let m = Metrics::summarize(&run, &MetricsConfig::default());
        assert_relative_eq!(m.max_drawdown, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn constant_equity_has_undefined_sharpe() {
        let run = run_with_equity(100.0, &[100.0, 100.0, 100.0]);
        let m = Metrics::summarize(&run, &MetricsConfig::default());
        assert!(m.sharpe_ratio.is_nan());
        assert_eq!(m.volatility, 0.0);
        assert_eq!(m.win_rate, 0.0);
    }

    #[test]
    fn sharpe_uses_population_deviation() {
        // returns: +10%, -10%, +10%, -10% -> mean 0
        let run = run_with_equity(100.0, &[110.0, 99.0, 108.9, 98.01]);
        let config = MetricsConfig {
            annualization_factor: 4.0,
            risk_free_rate: 0.0,
        };
        let m = Metrics::summarize(&run, &config);
        assert_relative_eq!(m.sharpe_ratio, 0.0, epsilon = 1e-9);
        assert_relative_eq!(m.volatility, 0.1 * 2.0, epsilon = 1e-9);
        assert_relative_eq!(m.win_rate, 0.5);
    }

    #[test]
    fn sharpe_sign_follows_mean_return() {
        let run = run_with_equity(100.0, &[101.0, 103.0, 104.0, 107.0]);
        let m = Metrics::summarize(&run, &MetricsConfig::default());
        assert!(m.sharpe_ratio > 0.0);
        assert!(m.sortino_ratio.is_nan());
        assert_relative_eq!(m.win_rate, 1.0);
    }

    #[test]
    fn annualized_return_compounds() {
        // 10% over half a year of bars
        let mut equity = vec![10_000.0; 125];
        equity.push(11_000.0);
        let run = run_with_equity(10_000.0, &equity);
        let config = MetricsConfig {
            annualization_factor: 252.0,
            risk_free_rate: 0.0,
        };
        let m = Metrics::summarize(&run, &config);
        assert_relative_eq!(m.annualized_return, 1.1_f64.powf(2.0) - 1.0, epsilon = 1e-9);
    }

    #[test]
    fn wiped_out_account_annualizes_to_minus_one() {
        assert_eq!(annualize(-1.0, 10, 252.0), -1.0);
    }

    #[test]
    fn nan_metrics_compare_equal() {
        let a = Metrics::default();
        let b = Metrics::default();
        assert_eq!(a, b);
    }
}
