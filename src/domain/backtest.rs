//! Single-run simulation.
//!
//! A run walks one asset spec bar by bar: validate the bar, mark the
//! portfolio, ask the strategy for a signal over the visible window, size it,
//! pass it through the risk check and apply whatever was approved. Runs share
//! nothing mutable, so any number of them can step in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::config_validation::EngineConfig;
use super::error::DataError;
use super::ohlcv::{Bar, validate_step};
use super::params::ParameterSet;
use super::portfolio::Portfolio;
use super::report::{BarRecord, Holding, RiskFlag, RunKey, RunResult, RunStatus};
use super::risk::{self, Decision, TradeProposal};
use super::signal::Signal;
use super::strategy::{MarketView, Strategy};
use super::universe::{AssetSpec, MarketData};
use crate::ports::regime_port::RegimePort;

/// One unit of work: a strategy with fixed parameters on one asset spec.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: usize,
    pub strategy: Strategy,
    pub asset: AssetSpec,
    pub params: ParameterSet,
}

impl Job {
    pub fn key(&self) -> RunKey {
        RunKey {
            strategy: self.strategy.name().to_string(),
            asset: self.asset.to_string(),
            params: self.params.to_string(),
        }
    }
}

/// Cooperative cancellation, checked between bars. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels itself once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

struct Lifecycle<'a> {
    key: &'a RunKey,
    status: RunStatus,
}

impl Lifecycle<'_> {
    fn advance(&mut self, next: RunStatus) {
        if self.status.can_transition_to(next) {
            self.status = next;
        } else {
            warn!(run = %self.key, from = %self.status, to = %next, "ignored invalid status change");
        }
    }
}

/// The hedge leg of a paired run, indexed by timestamp. Bars are validated
/// as the primary leg reaches them.
struct HedgeLeg<'a> {
    asset: &'a str,
    bars: Arc<[Bar]>,
    index: HashMap<NaiveDateTime, usize>,
}

impl<'a> HedgeLeg<'a> {
    fn load(asset: &'a str, data: &MarketData) -> Result<Self, DataError> {
        let bars = data.bars(asset)?;
        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        let index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.timestamp, i))
            .collect();
        Ok(HedgeLeg { asset, bars, index })
    }

    /// The validated hedge bar aligned with `timestamp`.
    fn at(&self, timestamp: NaiveDateTime, max_gap_secs: Option<i64>) -> Result<&Bar, DataError> {
        let &i = self
            .index
            .get(&timestamp)
            .ok_or_else(|| DataError::MissingPairBar {
                asset: self.asset.to_string(),
                timestamp,
            })?;
        check_bar(&self.bars, i, max_gap_secs)?;
        Ok(&self.bars[i])
    }
}

fn check_bar(bars: &[Bar], index: usize, max_gap_secs: Option<i64>) -> Result<(), DataError> {
    bars[index].validate(index)?;
    if index > 0 {
        validate_step(&bars[index - 1], &bars[index], index, max_gap_secs)?;
    }
    Ok(())
}

/// Runs one job to the end of its data, a data error, or cancellation.
///
/// Never returns an error: a data problem fails this run only and the
/// partial result is kept. Bars whose signal cannot be computed are recorded
/// without a signal and no new trade.
pub fn run_job(
    job: &Job,
    data: &MarketData,
    regimes: Option<&dyn RegimePort>,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> RunResult {
    let key = job.key();
    let mut lifecycle = Lifecycle {
        key: &key,
        status: RunStatus::Pending,
    };
    lifecycle.advance(RunStatus::Running);

    let primary_asset = job.asset.primary();
    let setup = data.bars(primary_asset).and_then(|bars| {
        let hedge = job
            .asset
            .hedge()
            .map(|h| HedgeLeg::load(h, data))
            .transpose()?;
        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        Ok((bars, hedge))
    });
    let (primary, hedge) = match setup {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(run = %key, error = %e, "run failed before first bar");
            return RunResult::failed(key, config.initial_capital, e.to_string());
        }
    };

    info!(run = %key, bars = primary.len(), "run started");

    let mut portfolio = Portfolio::new(config.initial_capital, config.rules);
    let mut records = Vec::with_capacity(primary.len());
    let mut aligned_hedge: Vec<Bar> = Vec::new();
    let mut halted_at = None;
    let mut error = None;
    let mut cancelled = false;

    for (i, bar) in primary.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let hedge_bar = check_bar(&primary, i, config.max_gap_secs).and_then(|()| {
            hedge
                .as_ref()
                .map(|leg| leg.at(bar.timestamp, config.max_gap_secs).cloned())
                .transpose()
        });
        let hedge_bar = match hedge_bar {
            Ok(hb) => hb,
            Err(e) => {
                warn!(run = %key, bar = i, error = %e, "run failed on bad data");
                error = Some(e.to_string());
                lifecycle.advance(RunStatus::Failed);
                break;
            }
        };

        let mut closes = vec![(primary_asset, bar.close)];
        if let (Some(leg), Some(hb)) = (hedge.as_ref(), hedge_bar) {
            closes.push((leg.asset, hb.close));
            aligned_hedge.push(hb);
        }
        portfolio.mark_to_market(&closes);

        let regime = regimes.and_then(|r| r.regime_at(primary_asset, bar.timestamp));
        let view = MarketView {
            bars: &primary[..=i],
            pair: hedge.as_ref().map(|_| aligned_hedge.as_slice()),
            regime: regime.as_ref(),
        };
        let signal = match job.strategy.generate_signal(&view, &job.params) {
            Ok(signal) => Some(signal),
            Err(e) => {
                debug!(run = %key, bar = i, error = %e, "no signal for bar");
                None
            }
        };

        let hedge_asset = hedge.as_ref().map(|leg| leg.asset);
        let halted = lifecycle.status == RunStatus::Halted;
        let (flag, fills) = step(
            &mut portfolio,
            signal.as_ref(),
            primary_asset,
            hedge_asset,
            halted,
            config,
            bar.timestamp,
        );
        if flag == RiskFlag::Halted {
            warn!(
                run = %key,
                bar = i,
                drawdown = risk::drawdown(portfolio.peak_equity, portfolio.equity()),
                "drawdown limit reached, run halted"
            );
            lifecycle.advance(RunStatus::Halted);
            halted_at = Some(bar.timestamp);
        }

        records.push(record(bar, signal, &portfolio, &closes, flag, fills));
    }

    if cancelled {
        info!(run = %key, bars = records.len(), "run cancelled");
        if lifecycle.status == RunStatus::Running {
            lifecycle.advance(RunStatus::Halted);
        }
        error = Some("cancelled".to_string());
    } else if lifecycle.status != RunStatus::Failed {
        lifecycle.advance(RunStatus::Completed);
    }

    let status = lifecycle.status;
    let result = RunResult {
        key,
        status,
        halted_at,
        error,
        initial_capital: config.initial_capital,
        records,
        fills: portfolio.fills,
        metrics: Default::default(),
    }
    .finalize(&config.metrics);

    info!(
        run = %result.key,
        status = %result.status,
        bars = result.records.len(),
        total_return = result.metrics.total_return,
        "run finished"
    );
    result
}

/// Sizes, checks and applies one bar's signal. Returns the risk flag for the
/// bar and the number of fills executed.
fn step(
    portfolio: &mut Portfolio,
    signal: Option<&Signal>,
    primary: &str,
    hedge: Option<&str>,
    halted: bool,
    config: &EngineConfig,
    timestamp: NaiveDateTime,
) -> (RiskFlag, usize) {
    let proposal = signal.map_or_else(TradeProposal::empty, |s| portfolio.propose(s, primary, hedge));
    let decision = risk::evaluate(&proposal, &portfolio.risk_state(halted), &config.limits);

    match decision {
        Decision::Approve(_) => (RiskFlag::None, portfolio.apply(&decision, timestamp)),
        Decision::Scale { factor, .. } => {
            debug!(factor, "trade scaled to exposure limit");
            (RiskFlag::Scaled, portfolio.apply(&decision, timestamp))
        }
        Decision::Reject(reason) => {
            debug!(?reason, "trade rejected");
            (RiskFlag::Rejected, 0)
        }
        Decision::Halt { .. } => {
            let fills = if config.liquidate_on_halt {
                let flatten = portfolio.flatten_proposal();
                let approved =
                    risk::evaluate(&flatten, &portfolio.risk_state(true), &config.limits);
                portfolio.apply(&approved, timestamp)
            } else {
                0
            };
            (RiskFlag::Halted, fills)
        }
    }
}

fn record(
    bar: &Bar,
    signal: Option<Signal>,
    portfolio: &Portfolio,
    closes: &[(&str, f64)],
    risk: RiskFlag,
    fills: usize,
) -> BarRecord {
    let equity = portfolio.equity();
    BarRecord {
        timestamp: bar.timestamp,
        close: bar.close,
        signal: signal.map(|s| s.action),
        holdings: closes
            .iter()
            .map(|&(asset, close)| Holding {
                asset: asset.to_string(),
                quantity: portfolio.quantity(asset),
                close,
                unrealized_pnl: portfolio
                    .position(asset)
                    .map_or(0.0, |p| p.unrealized_pnl(close)),
            })
            .collect(),
        cash: portfolio.cash,
        equity,
        drawdown: risk::drawdown(portfolio.peak_equity, equity),
        gross_exposure: portfolio.gross_exposure(),
        risk,
        fills,
    }
}
