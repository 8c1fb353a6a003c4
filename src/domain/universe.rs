//! Asset specs and the market data shared by every run of a batch.
//!
//! An asset spec is either a single asset (`BTC`) or an ordered pair
//! (`BTC/ETH`, primary first) for paired strategies. Bars are loaded once per
//! asset before any run starts and shared read-only between workers.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::error::{ConfigError, DataError};
use crate::domain::ohlcv::Bar;
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetSpec {
    Single(String),
    Pair { primary: String, hedge: String },
}

impl AssetSpec {
    pub fn primary(&self) -> &str {
        match self {
            AssetSpec::Single(asset) => asset,
            AssetSpec::Pair { primary, .. } => primary,
        }
    }

    pub fn hedge(&self) -> Option<&str> {
        match self {
            AssetSpec::Single(_) => None,
            AssetSpec::Pair { hedge, .. } => Some(hedge),
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, AssetSpec::Pair { .. })
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary()).chain(self.hedge())
    }
}

impl fmt::Display for AssetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSpec::Single(asset) => f.write_str(asset),
            AssetSpec::Pair { primary, hedge } => write!(f, "{primary}/{hedge}"),
        }
    }
}

impl FromStr for AssetSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAsset(s.to_string());
        let parts: Vec<String> = s.split('/').map(|p| p.trim().to_uppercase()).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        match parts.as_slice() {
            [single] => Ok(AssetSpec::Single(single.clone())),
            [primary, hedge] if primary != hedge => Ok(AssetSpec::Pair {
                primary: primary.clone(),
                hedge: hedge.clone(),
            }),
            _ => Err(invalid()),
        }
    }
}

/// Parses a comma-separated list of asset specs. Duplicates and empty
/// entries are rejected.
pub fn parse_assets(input: &str) -> Result<Vec<AssetSpec>, ConfigError> {
    let mut specs = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let spec: AssetSpec = token.parse()?;
        if !seen.insert(spec.clone()) {
            return Err(ConfigError::InvalidAsset(format!("duplicate asset {spec}")));
        }
        specs.push(spec);
    }

    Ok(specs)
}

/// Bars for every asset a batch touches, loaded once.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    series: BTreeMap<String, Arc<[Bar]>>,
    errors: BTreeMap<String, String>,
}

impl MarketData {
    /// Fetches every distinct asset named by `specs`. A fetch failure is
    /// remembered per asset and surfaces as a failed run for each job on it.
    pub fn load(data_port: &dyn DataPort, specs: &[AssetSpec]) -> Self {
        let assets: BTreeSet<&str> = specs.iter().flat_map(|s| s.assets()).collect();
        let mut data = MarketData::default();
        for asset in assets {
            match data_port.fetch_bars(asset) {
                Ok(bars) => {
                    debug!(asset, bars = bars.len(), "loaded bars");
                    data.insert(asset, bars);
                }
                Err(e) => {
                    warn!(asset, error = %e, "could not load bars");
                    data.errors.insert(asset.to_string(), e.to_string());
                }
            }
        }
        data
    }

    pub fn insert(&mut self, asset: &str, bars: Vec<Bar>) {
        self.errors.remove(asset);
        self.series.insert(asset.to_string(), Arc::from(bars));
    }

    pub fn bars(&self, asset: &str) -> Result<Arc<[Bar]>, DataError> {
        if let Some(bars) = self.series.get(asset) {
            return Ok(Arc::clone(bars));
        }
        Err(DataError::MissingAsset {
            asset: asset.to_string(),
            reason: self
                .errors
                .get(asset)
                .cloned()
                .unwrap_or_else(|| "not loaded".to_string()),
        })
    }
}
