//! Pairs trading on the OLS spread between a primary and a hedge asset.
//!
//! The spread is `primary - beta * hedge`, with beta fitted over the lookback
//! window. A long spread signal buys the primary and sells `beta` hedge units
//! per primary unit.

use crate::domain::error::ComputationError;
use crate::domain::indicators::{correlation, ols_beta, zscore};
use crate::domain::params::{ParameterGrid, ParameterSet};
use crate::domain::signal::Signal;

use super::MarketView;

pub fn defaults() -> ParameterSet {
    ParameterSet::new()
        .with("lookback", 100.0)
        .with("entry_z", 2.0)
        .with("exit_z", 0.5)
        .with("min_correlation", 0.0)
}

pub fn grid() -> ParameterGrid {
    ParameterGrid::new(defaults())
        .axis("lookback", &[60.0, 100.0, 150.0])
        .axis("entry_z", &[1.5, 2.0, 2.5])
        .axis("exit_z", &[0.3, 0.5, 0.7])
}

pub fn signal(view: &MarketView<'_>, params: &ParameterSet) -> Result<Signal, ComputationError> {
    let hedge = view.pair.ok_or_else(|| ComputationError::DegenerateWindow {
        indicator: "SPREAD",
        reason: "no hedge window supplied".into(),
    })?;
    let lookback = params.window("lookback", 100);
    let entry_z = params.get_or("entry_z", 2.0);
    let exit_z = params.get_or("exit_z", 0.5);
    let min_corr = params.get_or("min_correlation", 0.0);

    if view.bars.len() < lookback || hedge.len() < lookback {
        return Ok(Signal::flat());
    }

    let y = view.closes(lookback);
    let x = view.pair_closes(lookback);

    if min_corr > 0.0 && correlation(&x, &y, lookback)? < min_corr {
        return Ok(Signal::flat());
    }

    let beta = ols_beta(&x, &y, lookback)?;
    let spread: Vec<f64> = y.iter().zip(&x).map(|(yi, xi)| yi - beta * xi).collect();
    let z = zscore(&spread, lookback)?;

    let signal = if z < -entry_z {
        Signal::long()
    } else if z > entry_z {
        Signal::short()
    } else if z.abs() < exit_z {
        Signal::flat()
    } else {
        Signal::hold()
    };
    Ok(signal.with_hedge_ratio(beta))
}
