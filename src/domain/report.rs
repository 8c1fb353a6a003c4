//! Run results and the batch report they are merged into.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::metrics::{Metrics, MetricsConfig};
use super::position::Fill;
use super::signal::Action;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifies a run within a batch: strategy, asset spec and parameters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    pub strategy: String,
    pub asset: String,
    pub params: String,
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}@{}", self.strategy, self.asset)
        } else {
            write!(f, "{}@{}[{}]", self.strategy, self.asset, self.params)
        }
    }
}

/// Lifecycle of a single run.
///
/// ```text
/// Pending -> Running -> Completed
///               |  \-> Failed
///               v
///            Halted -> Completed | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunStatus {
    Pending,
    Running,
    Halted,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Halted => "halted",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Halted)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Halted, RunStatus::Completed)
                | (RunStatus::Halted, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the risk check did on a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiskFlag {
    #[default]
    None,
    Scaled,
    Rejected,
    Halted,
}

impl RiskFlag {
    pub fn label(&self) -> &'static str {
        match self {
            RiskFlag::None => "",
            RiskFlag::Scaled => "scaled",
            RiskFlag::Rejected => "rejected",
            RiskFlag::Halted => "halted",
        }
    }
}

/// Position in one asset at the close of a bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub asset: String,
    pub quantity: f64,
    pub close: f64,
    pub unrealized_pnl: f64,
}

/// State of a run after one bar has been processed.
#[derive(Debug, Clone, PartialEq)]
pub struct BarRecord {
    pub timestamp: NaiveDateTime,
    pub close: f64,
    /// `None` when the strategy could not compute a signal for this bar.
    pub signal: Option<Action>,
    /// Primary asset first, hedge asset second for paired runs.
    pub holdings: Vec<Holding>,
    pub cash: f64,
    pub equity: f64,
    pub drawdown: f64,
    pub gross_exposure: f64,
    pub risk: RiskFlag,
    /// Fills executed on this bar.
    pub fills: usize,
}

impl BarRecord {
    pub fn position(&self) -> f64 {
        self.holdings.first().map_or(0.0, |h| h.quantity)
    }

    pub fn hedge_position(&self) -> Option<f64> {
        self.holdings.get(1).map(|h| h.quantity)
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.holdings.iter().map(|h| h.unrealized_pnl).sum()
    }

    /// equity == cash + sum(quantity * close), within `tolerance`.
    pub fn equity_consistent(&self, tolerance: f64) -> bool {
        let marked: f64 = self.holdings.iter().map(|h| h.quantity * h.close).sum();
        (self.equity - (self.cash + marked)).abs() <= tolerance * self.equity.abs().max(1.0)
    }
}

/// The frozen output of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub key: RunKey,
    pub status: RunStatus,
    /// Bar at which the drawdown limit was hit, if it was.
    pub halted_at: Option<NaiveDateTime>,
    pub error: Option<String>,
    pub initial_capital: f64,
    pub records: Vec<BarRecord>,
    pub fills: Vec<Fill>,
    pub metrics: Metrics,
}

impl RunResult {
    /// A run that failed before its first bar.
    pub fn failed(key: RunKey, initial_capital: f64, error: impl Into<String>) -> Self {
        RunResult {
            key,
            status: RunStatus::Failed,
            halted_at: None,
            error: Some(error.into()),
            initial_capital,
            records: Vec::new(),
            fills: Vec::new(),
            metrics: Metrics {
                final_equity: initial_capital,
                ..Metrics::default()
            },
        }
    }

    /// Computes the summary metrics from the records.
    pub fn finalize(mut self, config: &MetricsConfig) -> Self {
        self.metrics = Metrics::summarize(&self, config);
        self
    }

    pub fn final_equity(&self) -> f64 {
        self.records
            .last()
            .map_or(self.initial_capital, |r| r.equity)
    }

    pub fn is_consistent(&self, tolerance: f64) -> bool {
        self.records.iter().all(|r| r.equity_consistent(tolerance))
    }

    fn completeness(&self) -> (usize, u8) {
        let status = match self.status {
            RunStatus::Completed => 3,
            RunStatus::Halted => 2,
            RunStatus::Failed => 1,
            RunStatus::Pending | RunStatus::Running => 0,
        };
        (self.records.len(), status)
    }
}

/// Picks one of two results reported under the same key. The choice depends
/// only on the two values, never on which came first.
fn prefer(a: RunResult, b: RunResult) -> RunResult {
    let order = a
        .completeness()
        .cmp(&b.completeness())
        .then_with(|| a.final_equity().total_cmp(&b.final_equity()))
        .then_with(|| format!("{a:?}").cmp(&format!("{b:?}")));
    match order {
        Ordering::Less => b,
        Ordering::Equal | Ordering::Greater => a,
    }
}

/// Every run of a batch keyed by [`RunKey`]. Merging is commutative and
/// associative, so the report does not depend on completion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Report {
    runs: BTreeMap<RunKey, RunResult>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, result: RunResult) {
        let key = result.key.clone();
        let merged = match self.runs.remove(&key) {
            Some(existing) => prefer(existing, result),
            None => result,
        };
        self.runs.insert(key, merged);
    }

    pub fn merge(mut self, other: Report) -> Report {
        for result in other.runs.into_values() {
            self.insert(result);
        }
        self
    }

    pub fn get(&self, key: &RunKey) -> Option<&RunResult> {
        self.runs.get(key)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Runs in key order.
    pub fn iter(&self) -> impl Iterator<Item = &RunResult> {
        self.runs.values()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunResult> {
        self.iter().filter(|r| r.status == RunStatus::Failed)
    }

    pub fn any_failed(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn count_by_status(&self, status: RunStatus) -> usize {
        self.iter().filter(|r| r.status == status).count()
    }

    /// Every record of every run satisfies the equity invariant.
    pub fn is_consistent(&self, tolerance: f64) -> bool {
        self.iter().all(|r| r.is_consistent(tolerance))
    }

    /// Mean metrics per strategy over runs that did not fail.
    pub fn summary_by_strategy(&self) -> Vec<StrategySummary> {
        let mut grouped: BTreeMap<&str, Vec<&RunResult>> = BTreeMap::new();
        for run in self.iter() {
            grouped.entry(run.key.strategy.as_str()).or_default().push(run);
        }

        grouped
            .into_iter()
            .map(|(strategy, runs)| {
                let ok: Vec<&Metrics> = runs
                    .iter()
                    .filter(|r| r.status != RunStatus::Failed)
                    .map(|r| &r.metrics)
                    .collect();
                StrategySummary {
                    strategy: strategy.to_string(),
                    runs: runs.len(),
                    failed: runs.len() - ok.len(),
                    mean_total_return: mean(ok.iter().map(|m| m.total_return)),
                    mean_sharpe_ratio: mean(ok.iter().map(|m| m.sharpe_ratio)),
                    mean_max_drawdown: mean(ok.iter().map(|m| m.max_drawdown)),
                    mean_win_rate: mean(ok.iter().map(|m| m.win_rate)),
                }
            })
            .collect()
    }

    /// One row per bar per run.
    pub fn bar_rows(&self) -> Vec<BarRow> {
        self.iter()
            .flat_map(|run| {
                run.records.iter().map(move |rec| BarRow {
                    strategy: run.key.strategy.clone(),
                    asset: run.key.asset.clone(),
                    params: run.key.params.clone(),
                    timestamp: rec.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    close: rec.close,
                    signal: rec.signal.map_or("", |a| a.label()),
                    position: rec.position(),
                    hedge_position: rec.hedge_position(),
                    unrealized_pnl: rec.unrealized_pnl(),
                    cash: rec.cash,
                    equity: rec.equity,
                    drawdown: rec.drawdown,
                    gross_exposure: rec.gross_exposure,
                    risk: rec.risk.label(),
                })
            })
            .collect()
    }

    /// One row per run.
    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        self.iter()
            .map(|run| {
                let m = &run.metrics;
                SummaryRow {
                    strategy: run.key.strategy.clone(),
                    asset: run.key.asset.clone(),
                    params: run.key.params.clone(),
                    status: run.status.label(),
                    halted_at: run
                        .halted_at
                        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string()),
                    error: run.error.clone(),
                    bars: m.bars,
                    trade_count: m.trade_count,
                    total_return: m.total_return,
                    annualized_return: m.annualized_return,
                    max_drawdown: m.max_drawdown,
                    sharpe_ratio: m.sharpe_ratio,
                    sortino_ratio: m.sortino_ratio,
                    volatility: m.volatility,
                    win_rate: m.win_rate,
                    total_commission: m.total_commission,
                    final_equity: m.final_equity,
                }
            })
            .collect()
    }

    /// One row per executed fill.
    pub fn fill_rows(&self) -> Vec<FillRow> {
        self.iter()
            .flat_map(|run| {
                run.fills.iter().map(move |fill| FillRow {
                    strategy: run.key.strategy.clone(),
                    asset: run.key.asset.clone(),
                    params: run.key.params.clone(),
                    timestamp: fill.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    fill_asset: fill.asset.clone(),
                    side: fill.side(),
                    quantity: fill.quantity,
                    price: fill.price,
                    commission: fill.commission,
                    realized_pnl: fill.realized_pnl,
                })
            })
            .collect()
    }
}

impl FromIterator<RunResult> for Report {
    fn from_iter<I: IntoIterator<Item = RunResult>>(iter: I) -> Self {
        let mut report = Report::new();
        report.extend(iter);
        report
    }
}

impl Extend<RunResult> for Report {
    fn extend<I: IntoIterator<Item = RunResult>>(&mut self, iter: I) {
        for result in iter {
            self.insert(result);
        }
    }
}

/// Mean of the finite values, NaN if there are none.
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategySummary {
    pub strategy: String,
    pub runs: usize,
    pub failed: usize,
    pub mean_total_return: f64,
    pub mean_sharpe_ratio: f64,
    pub mean_max_drawdown: f64,
    pub mean_win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarRow {
    pub strategy: String,
    pub asset: String,
    pub params: String,
    pub timestamp: String,
    pub close: f64,
    pub signal: &'static str,
    pub position: f64,
    pub hedge_position: Option<f64>,
    pub unrealized_pnl: f64,
    pub cash: f64,
    pub equity: f64,
    pub drawdown: f64,
    pub gross_exposure: f64,
    pub risk: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub strategy: String,
    pub asset: String,
    pub params: String,
    pub status: &'static str,
    pub halted_at: Option<String>,
    pub error: Option<String>,
    pub bars: usize,
    pub trade_count: usize,
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub volatility: f64,
    pub win_rate: f64,
    pub total_commission: f64,
    pub final_equity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FillRow {
    pub strategy: String,
    pub asset: String,
    pub params: String,
    pub timestamp: String,
    pub fill_asset: String,
    pub side: &'static str,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub realized_pnl: f64,
}
