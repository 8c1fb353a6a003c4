//! Strategy parameter sets and restartable sweep grids.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Named numeric parameters for one strategy run. Keys are kept sorted so the
/// display form is stable and usable as part of a run key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).unwrap_or(default)
    }

    /// Window lengths are stored as floats; anything below one rounds up to one.
    pub fn window(&self, key: &str, default: usize) -> usize {
        match self.get(key) {
            Some(v) if v.is_finite() && v >= 1.0 => v.round() as usize,
            Some(_) => 1,
            None => default,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v != 0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                write!(f, ";")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Cartesian product of parameter axes, optionally filtered.
///
/// `iter()` can be called any number of times and always yields the same
/// sequence in the same order, independent of how the results are consumed.
#[derive(Debug, Clone)]
pub struct ParameterGrid {
    base: ParameterSet,
    axes: Vec<(String, Vec<f64>)>,
    filter: Option<fn(&ParameterSet) -> bool>,
}

impl ParameterGrid {
    /// A grid with no axes yields exactly `base`.
    pub fn new(base: ParameterSet) -> Self {
        Self {
            base,
            axes: Vec::new(),
            filter: None,
        }
    }

    pub fn axis(mut self, key: &str, values: &[f64]) -> Self {
        self.axes.push((key.to_string(), values.to_vec()));
        self
    }

    pub fn filter(mut self, keep: fn(&ParameterSet) -> bool) -> Self {
        self.filter = Some(keep);
        self
    }

    pub fn iter(&self) -> GridIter<&ParameterGrid> {
        GridIter::start(self)
    }

    /// Number of parameter sets after filtering.
    pub fn size(&self) -> usize {
        self.iter().count()
    }
}

impl IntoIterator for ParameterGrid {
    type Item = ParameterSet;
    type IntoIter = GridIter<ParameterGrid>;

    fn into_iter(self) -> Self::IntoIter {
        GridIter::start(self)
    }
}

/// Lazy walk over a grid, borrowed or owned.
pub struct GridIter<G> {
    grid: G,
    odometer: Vec<usize>,
    exhausted: bool,
}

impl<G: Borrow<ParameterGrid>> GridIter<G> {
    fn start(grid: G) -> Self {
        let g = grid.borrow();
        let exhausted = g.axes.iter().any(|(_, values)| values.is_empty());
        let odometer = vec![0; g.axes.len()];
        GridIter {
            grid,
            odometer,
            exhausted,
        }
    }

    fn current(&self) -> ParameterSet {
        let grid = self.grid.borrow();
        let mut params = grid.base.clone();
        for ((key, values), &idx) in grid.axes.iter().zip(&self.odometer) {
            params.set(key, values[idx]);
        }
        params
    }

    fn advance(&mut self) {
        let grid = self.grid.borrow();
        for pos in (0..self.odometer.len()).rev() {
            self.odometer[pos] += 1;
            if self.odometer[pos] < grid.axes[pos].1.len() {
                return;
            }
            self.odometer[pos] = 0;
        }
        self.exhausted = true;
    }
}

impl<G: Borrow<ParameterGrid>> Iterator for GridIter<G> {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<ParameterSet> {
        while !self.exhausted {
            let params = self.current();
            self.advance();
            if self.grid.borrow().filter.is_none_or(|keep| keep(&params)) {
                return Some(params);
            }
        }
        None
    }
}
