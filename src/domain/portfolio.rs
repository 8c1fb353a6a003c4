//! Cash, positions and equity for one run, and the allocator that turns
//! signals into sized trades.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::debug;

use super::execution::CommissionModel;
use super::position::{Fill, PositionState, QUANTITY_EPSILON};
use super::risk::{Decision, Leg, RiskState, TradeProposal, drawdown};
use super::signal::Signal;

/// Cash balances this close to zero are treated as zero.
const CASH_TOLERANCE: f64 = 1e-6;

/// How signals are sized and which trades the account can carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationRules {
    /// Fraction of equity held in the primary asset by a full-strength signal.
    pub position_size: f64,
    pub allow_shorting: bool,
    /// Without margin, buys are cut down so cash never goes negative.
    pub allow_margin: bool,
    pub costs: CommissionModel,
}

impl Default for AllocationRules {
    fn default() -> Self {
        AllocationRules {
            position_size: 1.0,
            allow_shorting: true,
            allow_margin: false,
            costs: CommissionModel::free(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, PositionState>,
    pub peak_equity: f64,
    pub fills: Vec<Fill>,
    pub total_commission: f64,
    rules: AllocationRules,
}

#[derive(Debug, Clone, Copy)]
struct PlannedFill {
    delta: f64,
    price: f64,
    commission: f64,
    cash_flow: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64, rules: AllocationRules) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            peak_equity: initial_capital,
            fills: Vec::new(),
            total_commission: 0.0,
            rules,
        }
    }

    pub fn position(&self, asset: &str) -> Option<&PositionState> {
        self.positions.get(asset)
    }

    pub fn quantity(&self, asset: &str) -> f64 {
        self.position(asset).map_or(0.0, |p| p.quantity)
    }

    pub fn last_price(&self, asset: &str) -> Option<f64> {
        self.position(asset).map(|p| p.last_price)
    }

    /// Marks every listed asset at its close and advances the equity peak.
    /// Runs on every bar, traded or not, so drawdown follows the market.
    pub fn mark_to_market(&mut self, closes: &[(&str, f64)]) -> f64 {
        for &(asset, close) in closes {
            self.positions
                .entry(asset.to_string())
                .or_insert_with(|| PositionState::flat(asset))
                .last_price = close;
        }
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        equity
    }

    /// cash + sum of signed position values at their last marks.
    pub fn equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.market_value(p.last_price))
                .sum::<f64>()
    }

    pub fn gross_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.exposure(p.last_price)).sum()
    }

    pub fn net_exposure(&self) -> f64 {
        self.positions
            .values()
            .map(|p| p.market_value(p.last_price))
            .sum()
    }

    pub fn risk_state(&self, halted: bool) -> RiskState {
        let equity = self.equity();
        RiskState {
            equity,
            peak_equity: self.peak_equity,
            drawdown: drawdown(self.peak_equity, equity),
            gross_exposure: self.gross_exposure(),
            net_exposure: self.net_exposure(),
            halted,
        }
    }

    /// Sizes a signal into a proposal for `primary` (and `hedge`, for paired
    /// runs). Both assets must already be marked.
    ///
    /// Position size is fixed when a position is opened: a signal pointing
    /// the same way as the current holding proposes nothing, so a held
    /// position is not resized on every bar as equity moves.
    pub fn propose(&self, signal: &Signal, primary: &str, hedge: Option<&str>) -> TradeProposal {
        let Some(weight) = signal.target_weight(self.rules.position_size) else {
            return TradeProposal::empty();
        };
        let weight = if self.rules.allow_shorting {
            weight
        } else {
            weight.max(0.0)
        };

        let Some(price) = self.last_price(primary).filter(|p| *p > 0.0) else {
            return TradeProposal::empty();
        };
        let equity = self.equity().max(0.0);
        let primary_target = weight * equity / price;

        let mut targets = vec![(primary, primary_target, price)];
        if let Some(hedge) = hedge {
            let Some(hedge_price) = self.last_price(hedge).filter(|p| *p > 0.0) else {
                return TradeProposal::empty();
            };
            let mut hedge_target = -signal.hedge_ratio.unwrap_or(0.0) * primary_target;
            if !self.rules.allow_shorting {
                hedge_target = hedge_target.max(0.0);
            }
            targets.push((hedge, hedge_target, hedge_price));
        }

        if targets
            .iter()
            .all(|&(asset, target, _)| same_side(self.quantity(asset), target))
        {
            return TradeProposal::empty();
        }

        let legs: Vec<Leg> = targets
            .into_iter()
            .map(|(asset, target, price)| {
                let current = self.quantity(asset);
                Leg {
                    asset: asset.to_string(),
                    current,
                    delta: target - current,
                    price,
                }
            })
            .filter(|leg| leg.delta.abs() > QUANTITY_EPSILON)
            .collect();
        let estimated_cost = legs
            .iter()
            .map(|leg| self.rules.costs.estimated_cost(leg.price, leg.delta))
            .sum();

        TradeProposal {
            legs,
            estimated_cost,
        }
    }

    /// Closes every open position.
    pub fn flatten_proposal(&self) -> TradeProposal {
        let legs: Vec<Leg> = self
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| Leg {
                asset: p.asset.clone(),
                current: p.quantity,
                delta: -p.quantity,
                price: p.last_price,
            })
            .collect();
        let estimated_cost = legs
            .iter()
            .map(|leg| self.rules.costs.estimated_cost(leg.price, leg.delta))
            .sum();
        TradeProposal {
            legs,
            estimated_cost,
        }
    }

    /// Executes whatever the decision approved. Returns the number of fills.
    pub fn apply(&mut self, decision: &Decision, timestamp: NaiveDateTime) -> usize {
        match decision.approved() {
            Some(proposal) => self.execute(proposal, timestamp),
            None => 0,
        }
    }

    /// Executes every leg of `proposal` or none of them. Without margin the
    /// whole proposal is shrunk, legs in proportion, until cash stays
    /// non-negative; if even fees cannot be paid nothing executes.
    pub fn execute(&mut self, proposal: &TradeProposal, timestamp: NaiveDateTime) -> usize {
        if proposal.is_empty() {
            return 0;
        }

        let mut plan = self.plan(proposal, 1.0);
        let cash_after = self.cash + plan.iter().map(|(_, f)| f.cash_flow).sum::<f64>();
        if !self.rules.allow_margin && cash_after < -CASH_TOLERANCE {
            match self.affordable_factor(proposal) {
                Some(factor) => {
                    debug!(factor, "scaling trade to available cash");
                    plan = self.plan(proposal, factor);
                }
                None => {
                    debug!(cash = self.cash, "insufficient cash for trade");
                    return 0;
                }
            }
        }

        let executed = plan.len();
        for (asset, planned) in plan {
            let position = self
                .positions
                .entry(asset.clone())
                .or_insert_with(|| PositionState::flat(&asset));
            let realized = position.apply_fill(planned.delta, planned.price);
            self.cash += planned.cash_flow;
            self.total_commission += planned.commission;
            self.fills.push(Fill {
                timestamp,
                asset,
                quantity: planned.delta,
                price: planned.price,
                commission: planned.commission,
                realized_pnl: realized,
            });
        }
        if self.cash < 0.0 && self.cash > -CASH_TOLERANCE {
            self.cash = 0.0;
        }
        executed
    }

    fn plan(&self, proposal: &TradeProposal, factor: f64) -> Vec<(String, PlannedFill)> {
        proposal
            .legs
            .iter()
            .filter(|leg| leg.delta != 0.0)
            .map(|leg| {
                let delta = leg.delta * factor;
                let price = self.rules.costs.fill_price(leg.price, delta);
                let commission = self.rules.costs.commission(delta.abs() * price);
                let planned = PlannedFill {
                    delta,
                    price,
                    commission,
                    cash_flow: -delta * price - commission,
                };
                (leg.asset.clone(), planned)
            })
            .collect()
    }

    /// Largest factor in (0, 1] at which the proposal leaves cash >= 0.
    /// Cash after the trade is linear in the factor: fixed fees plus a
    /// per-unit flow.
    fn affordable_factor(&self, proposal: &TradeProposal) -> Option<f64> {
        let full = self.plan(proposal, 1.0);
        let fixed = self.rules.costs.per_trade * full.len() as f64;
        let variable: f64 = full
            .iter()
            .map(|(_, f)| f.cash_flow + self.rules.costs.per_trade)
            .sum();
        let available = self.cash - fixed;
        if available <= 0.0 || variable >= 0.0 {
            return None;
        }
        let factor = (available / -variable).min(1.0) * (1.0 - 1e-12);
        (factor > 0.0).then_some(factor)
    }
}

fn same_side(current: f64, target: f64) -> bool {
    let current = if current.abs() < QUANTITY_EPSILON { 0.0 } else { current };
    let target = if target.abs() < QUANTITY_EPSILON { 0.0 } else { target };
    (current == 0.0 && target == 0.0) || (current * target > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::RejectReason;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn portfolio(rules: AllocationRules) -> Portfolio {
        let mut p = Portfolio::new(10_000.0, rules);
        p.mark_to_market(&[("BTC", 100.0)]);
        p
    }

    fn assert_equity_invariant(p: &Portfolio) {
        let marked: f64 = p
            .positions
            .values()
            .map(|pos| pos.quantity * pos.last_price)
            .sum();
        assert!((p.equity() - (p.cash + marked)).abs() < 1e-9);
    }

    #[test]
    fn new_portfolio_is_all_cash() {
        let p = Portfolio::new(10_000.0, AllocationRules::default());
        assert!((p.equity() - 10_000.0).abs() < f64::EPSILON);
        assert!((p.peak_equity - 10_000.0).abs() < f64::EPSILON);
        assert!(p.positions.is_empty());
    }

    #[test]
    fn long_signal_sizes_from_equity() {
        let rules = AllocationRules {
            position_size: 0.5,
            ..AllocationRules::default()
        };
        let p = portfolio(rules);
        let proposal = p.propose(&Signal::long(), "BTC", None);
        assert_eq!(proposal.legs.len(), 1);
        assert!((proposal.legs[0].delta - 50.0).abs() < 1e-9);
    }

    #[test]
    fn same_direction_signal_proposes_nothing() {
        let mut p = portfolio(AllocationRules::default());
        let proposal = p.propose(&Signal::long().with_strength(0.5), "BTC", None);
        p.execute(&proposal, ts());
        p.mark_to_market(&[("BTC", 120.0)]);
        assert!(p.propose(&Signal::long(), "BTC", None).is_empty());
    }

    #[test]
    fn hold_proposes_nothing() {
        let p = portfolio(AllocationRules::default());
        assert!(p.propose(&Signal::hold(), "BTC", None).is_empty());
    }

    #[test]
    fn shorting_disabled_clamps_to_flat() {
        let rules = AllocationRules {
            allow_shorting: false,
            ..AllocationRules::default()
        };
        let p = portfolio(rules);
        assert!(p.propose(&Signal::short(), "BTC", None).is_empty());
    }

    #[test]
    fn buy_then_mark_keeps_equity_invariant() {
        let mut p = portfolio(AllocationRules::default());
        let proposal = p.propose(&Signal::long().with_strength(0.5), "BTC", None);
        assert_eq!(p.execute(&proposal, ts()), 1);
        assert!((p.cash - 5_000.0).abs() < 1e-6);
        p.mark_to_market(&[("BTC", 110.0)]);
        assert!((p.equity() - 10_500.0).abs() < 1e-6);
        assert!((p.peak_equity - 10_500.0).abs() < 1e-6);
        assert_equity_invariant(&p);
    }

    #[test]
    fn short_sale_adds_cash_and_negative_value() {
        let mut p = portfolio(AllocationRules::default());
        let proposal = p.propose(&Signal::short().with_strength(0.5), "BTC", None);
        p.execute(&proposal, ts());
        assert!((p.cash - 15_000.0).abs() < 1e-6);
        assert!((p.quantity("BTC") - (-50.0)).abs() < 1e-9);
        p.mark_to_market(&[("BTC", 90.0)]);
        assert!((p.equity() - 10_500.0).abs() < 1e-6);
        assert_equity_invariant(&p);
    }

    #[test]
    fn commission_and_slippage_reduce_equity() {
        let rules = AllocationRules {
            position_size: 0.5,
            costs: CommissionModel {
                per_trade: 5.0,
                pct: 0.0,
                slippage_pct: 1.0,
            },
            ..AllocationRules::default()
        };
        let mut p = portfolio(rules);
        let proposal = p.propose(&Signal::long(), "BTC", None);
        p.execute(&proposal, ts());
        // 50 units at 101: slippage 50, fee 5
        assert!((p.equity() - (10_000.0 - 55.0)).abs() < 1e-6);
        assert!((p.total_commission - 5.0).abs() < f64::EPSILON);
        assert_eq!(p.fills.len(), 1);
        assert!((p.fills[0].price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn full_size_buy_is_cut_to_available_cash() {
        let rules = AllocationRules {
            costs: CommissionModel {
                per_trade: 10.0,
                pct: 0.0,
                slippage_pct: 0.0,
            },
            ..AllocationRules::default()
        };
        let mut p = portfolio(rules);
        let proposal = p.propose(&Signal::long(), "BTC", None);
        assert_eq!(p.execute(&proposal, ts()), 1);
        assert!(p.cash >= 0.0);
        assert!(p.cash < 1e-3);
        assert!(p.quantity("BTC") < 100.0);
        assert!((p.quantity("BTC") - 99.9).abs() < 1e-6);
    }

    #[test]
    fn margin_allows_negative_cash() {
        let rules = AllocationRules {
            position_size: 2.0,
            allow_margin: true,
            ..AllocationRules::default()
        };
        let mut p = portfolio(rules);
        let proposal = p.propose(&Signal::long(), "BTC", None);
        p.execute(&proposal, ts());
        assert!((p.cash - (-10_000.0)).abs() < 1e-6);
        assert_equity_invariant(&p);
    }

    #[test]
    fn rejected_decision_leaves_state_unchanged() {
        let mut p = portfolio(AllocationRules::default());
        let before = p.clone();
        assert_eq!(p.apply(&Decision::Reject(RejectReason::ExposureLimit), ts()), 0);
        assert_eq!(p, before);
    }

    #[test]
    fn flip_goes_through_zero_in_one_fill() {
        let mut p = portfolio(AllocationRules {
            position_size: 0.5,
            ..AllocationRules::default()
        });
        let long = p.propose(&Signal::long(), "BTC", None);
        p.execute(&long, ts());
        let short = p.propose(&Signal::short(), "BTC", None);
        assert_eq!(short.legs.len(), 1);
        assert!((short.legs[0].delta - (-100.0)).abs() < 1e-9);
        p.execute(&short, ts());
        assert!((p.quantity("BTC") - (-50.0)).abs() < 1e-9);
    }

    #[test]
    fn paired_signal_sells_beta_hedge_units() {
        let mut p = Portfolio::new(10_000.0, AllocationRules {
            position_size: 0.5,
            ..AllocationRules::default()
        });
        p.mark_to_market(&[("A", 100.0), ("B", 50.0)]);
        let proposal = p.propose(&Signal::long().with_hedge_ratio(1.5), "A", Some("B"));
        assert_eq!(proposal.legs.len(), 2);
        assert!((proposal.legs[0].delta - 50.0).abs() < 1e-9);
        assert!((proposal.legs[1].delta - (-75.0)).abs() < 1e-9);
    }

    #[test]
    fn flatten_closes_everything() {
        let mut p = Portfolio::new(10_000.0, AllocationRules {
            position_size: 0.5,
            ..AllocationRules::default()
        });
        p.mark_to_market(&[("A", 100.0), ("B", 50.0)]);
        let proposal = p.propose(&Signal::long().with_hedge_ratio(1.0), "A", Some("B"));
        p.execute(&proposal, ts());
        let flatten = p.flatten_proposal();
        assert!(flatten.is_risk_reducing());
        p.execute(&flatten, ts());
        assert!(p.positions.values().all(PositionState::is_flat));
        assert!((p.equity() - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn risk_state_reflects_drawdown_from_market_moves() {
        let mut p = portfolio(AllocationRules::default());
        let proposal = p.propose(&Signal::long().with_strength(0.5), "BTC", None);
        p.execute(&proposal, ts());
        p.mark_to_market(&[("BTC", 80.0)]);
        let state = p.risk_state(false);
        assert!((state.drawdown - 0.1).abs() < 1e-9);
        assert!((state.gross_exposure - 4_000.0).abs() < 1e-6);
        assert!((state.net_exposure - 4_000.0).abs() < 1e-6);
    }
}
