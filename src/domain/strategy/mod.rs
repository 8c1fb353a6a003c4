//! Strategy variants and the market view they read.
//!
//! The set of strategies is closed: every variant is listed in [`Strategy`]
//! and dispatched with a `match`. Adding a strategy means adding a variant and
//! a module exposing `defaults`, `grid` and `signal`.

pub mod mean_reversion;
pub mod stat_arb;
pub mod trend;

use std::fmt;
use std::str::FromStr;

use crate::domain::error::{ComputationError, ConfigError};
use crate::domain::ohlcv::Bar;
use crate::domain::params::{ParameterGrid, ParameterSet};
use crate::domain::signal::Signal;

/// Externally classified market state. Opaque to the engine; strategies may
/// use it to gate their signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regime {
    Trend,
    MeanRevert,
    Volatile,
    Other(String),
}

impl FromStr for Regime {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_uppercase().as_str() {
            "TREND" => Regime::Trend,
            "MEAN_REVERT" => Regime::MeanRevert,
            "VOLATILE" => Regime::Volatile,
            other => Regime::Other(other.to_string()),
        })
    }
}

/// Everything a strategy may see at one bar: the bars up to and including the
/// current one, the aligned hedge-leg window for paired strategies and the
/// current regime label.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    pub bars: &'a [Bar],
    pub pair: Option<&'a [Bar]>,
    pub regime: Option<&'a Regime>,
}

impl<'a> MarketView<'a> {
    pub fn single(bars: &'a [Bar]) -> Self {
        MarketView {
            bars,
            pair: None,
            regime: None,
        }
    }

    pub fn paired(bars: &'a [Bar], pair: &'a [Bar]) -> Self {
        MarketView {
            bars,
            pair: Some(pair),
            regime: None,
        }
    }

    pub fn with_regime(mut self, regime: Option<&'a Regime>) -> Self {
        self.regime = regime;
        self
    }

    /// Closes of the last `n` bars, oldest first.
    pub fn closes(&self, n: usize) -> Vec<f64> {
        trailing_closes(self.bars, n)
    }

    /// Closes of the last `n` hedge-leg bars. Empty for single-asset views.
    pub fn pair_closes(&self, n: usize) -> Vec<f64> {
        self.pair.map_or_else(Vec::new, |bars| trailing_closes(bars, n))
    }
}

fn trailing_closes(bars: &[Bar], n: usize) -> Vec<f64> {
    bars[bars.len().saturating_sub(n)..]
        .iter()
        .map(|b| b.close)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
    TrendFollowing,
    MeanReversion,
    StatisticalArbitrage,
    /// Never trades. Baseline for cost attribution and engine checks.
    Flat,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::TrendFollowing,
        Strategy::MeanReversion,
        Strategy::StatisticalArbitrage,
        Strategy::Flat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::TrendFollowing => "trend",
            Strategy::MeanReversion => "mean_reversion",
            Strategy::StatisticalArbitrage => "stat_arb",
            Strategy::Flat => "flat",
        }
    }

    /// Paired strategies receive a hedge-leg window and run on `A/B` assets.
    pub fn requires_pair(&self) -> bool {
        matches!(self, Strategy::StatisticalArbitrage)
    }

    pub fn preferred_regime(&self) -> Option<Regime> {
        match self {
            Strategy::TrendFollowing => Some(Regime::Trend),
            Strategy::MeanReversion => Some(Regime::MeanRevert),
            Strategy::StatisticalArbitrage => Some(Regime::Volatile),
            Strategy::Flat => None,
        }
    }

    pub fn default_params(&self) -> ParameterSet {
        match self {
            Strategy::TrendFollowing => trend::defaults(),
            Strategy::MeanReversion => mean_reversion::defaults(),
            Strategy::StatisticalArbitrage => stat_arb::defaults(),
            Strategy::Flat => ParameterSet::new(),
        }
    }

    /// The sweep grid for this strategy. Restartable and order independent.
    pub fn parameter_grid(&self) -> ParameterGrid {
        match self {
            Strategy::TrendFollowing => trend::grid(),
            Strategy::MeanReversion => mean_reversion::grid(),
            Strategy::StatisticalArbitrage => stat_arb::grid(),
            Strategy::Flat => ParameterGrid::new(ParameterSet::new()),
        }
    }

    /// Pure function of the visible window and the parameters.
    pub fn generate_signal(
        &self,
        view: &MarketView<'_>,
        params: &ParameterSet,
    ) -> Result<Signal, ComputationError> {
        if params.flag("regime_gate") {
            if let (Some(current), Some(preferred)) = (view.regime, self.preferred_regime()) {
                if *current != preferred {
                    return Ok(Signal::flat());
                }
            }
        }

        match self {
            Strategy::TrendFollowing => trend::signal(view, params),
            Strategy::MeanReversion => mean_reversion::signal(view, params),
            Strategy::StatisticalArbitrage => stat_arb::signal(view, params),
            Strategy::Flat => Ok(Signal::flat()),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trend" | "trend_following" | "trendfollowing" => Ok(Strategy::TrendFollowing),
            "mean_reversion" | "meanreversion" => Ok(Strategy::MeanReversion),
            "stat_arb" | "statistical_arbitrage" | "statarbitrage" => {
                Ok(Strategy::StatisticalArbitrage)
            }
            "flat" => Ok(Strategy::Flat),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ohlcv::Bar;
    use chrono::{Duration, NaiveDate};

    pub fn bars_from_closes(asset: &str, closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                asset: asset.to_string(),
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }
}
