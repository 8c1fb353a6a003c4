//! Pre-trade risk checks.
//!
//! [`evaluate`] is a pure function of the proposed trade, the current
//! [`RiskState`] and the configured [`RiskLimits`]. The only state that
//! survives between calls is what the caller puts into `RiskState`; the
//! halted flag in particular is owned by the run that reports it.

/// Configured risk limits for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskLimits {
    /// Peak-to-current equity decline, in percent, at which the run halts.
    pub max_drawdown_pct: f64,
    /// Ceiling on gross position value as a multiple of equity.
    pub max_gross_exposure: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            max_drawdown_pct: 20.0,
            max_gross_exposure: 1.5,
        }
    }
}

impl RiskLimits {
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown_pct / 100.0
    }
}

/// Portfolio figures the risk check sees. Derived from the portfolio on
/// every bar, never mutated on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskState {
    pub equity: f64,
    pub peak_equity: f64,
    /// Fraction of peak equity lost, in `[0, 1]` while equity is positive.
    pub drawdown: f64,
    /// Sum of absolute position values.
    pub gross_exposure: f64,
    /// Sum of signed position values.
    pub net_exposure: f64,
    pub halted: bool,
}

impl RiskState {
    pub fn gross_ratio(&self) -> f64 {
        if self.equity > 0.0 {
            self.gross_exposure / self.equity
        } else {
            f64::INFINITY
        }
    }
}

/// Fraction of `peak` lost at `equity`.
pub fn drawdown(peak: f64, equity: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((peak - equity) / peak).max(0.0)
}

/// One asset's part of a proposed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub asset: String,
    /// Quantity held before the trade.
    pub current: f64,
    /// Signed quantity change.
    pub delta: f64,
    /// Market price used to value the leg.
    pub price: f64,
}

impl Leg {
    pub fn target(&self) -> f64 {
        self.current + self.delta
    }

    /// True when the leg shrinks the position without crossing zero.
    pub fn is_reducing(&self) -> bool {
        let target = self.target();
        target.abs() <= self.current.abs()
            && (target == 0.0 || target.signum() == self.current.signum())
    }
}

/// Position changes a strategy wants to make on one bar, before risk checks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TradeProposal {
    pub legs: Vec<Leg>,
    /// Expected commission and slippage for the whole proposal.
    pub estimated_cost: f64,
}

impl TradeProposal {
    pub fn empty() -> Self {
        Self::default()
    }

    /// No leg changes any quantity.
    pub fn is_empty(&self) -> bool {
        self.legs.iter().all(|leg| leg.delta == 0.0)
    }

    pub fn is_risk_reducing(&self) -> bool {
        self.legs.iter().all(Leg::is_reducing)
    }

    /// Every leg multiplied by `factor`, keeping the ratios between legs.
    pub fn scaled(&self, factor: f64) -> TradeProposal {
        TradeProposal {
            legs: self
                .legs
                .iter()
                .map(|leg| Leg {
                    delta: leg.delta * factor,
                    ..leg.clone()
                })
                .collect(),
            estimated_cost: self.estimated_cost * factor,
        }
    }

    fn gross_after(&self, state: &RiskState, factor: f64) -> f64 {
        self.legs.iter().fold(state.gross_exposure, |gross, leg| {
            gross - (leg.current * leg.price).abs()
                + ((leg.current + leg.delta * factor) * leg.price).abs()
        })
    }

    fn equity_after(&self, state: &RiskState, factor: f64) -> f64 {
        state.equity - self.estimated_cost * factor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The run is halted and the trade would add risk.
    AlreadyHalted,
    /// Gross exposure is already at the ceiling.
    ExposureLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve(TradeProposal),
    /// Approved at a reduced size. `factor` is in `(0, 1]`; it reaches 1 when
    /// the full trade lands exactly on the exposure ceiling.
    Scale { proposal: TradeProposal, factor: f64 },
    Reject(RejectReason),
    /// Drawdown limit reached. The run stops opening risk.
    Halt { drawdown: f64 },
}

impl Decision {
    /// The trade to execute, if any.
    pub fn approved(&self) -> Option<&TradeProposal> {
        match self {
            Decision::Approve(p) | Decision::Scale { proposal: p, .. } => Some(p),
            Decision::Reject(_) | Decision::Halt { .. } => None,
        }
    }
}

const SCALE_ITERATIONS: u32 = 64;
const MIN_SCALE: f64 = 1e-6;

/// Checks a proposed trade against the limits.
///
/// Order of checks:
/// 1. A halted run may only reduce risk.
/// 2. If post-trade drawdown reaches the limit, halt. This fires even for an
///    empty proposal so a halt lands on the bar where the limit is crossed.
/// 3. Risk-reducing trades are approved.
/// 4. A trade that raises gross exposure to or past the ceiling is scaled to
///    land on it, or rejected if there is no headroom.
pub fn evaluate(proposal: &TradeProposal, state: &RiskState, limits: &RiskLimits) -> Decision {
    if state.halted {
        return if proposal.is_risk_reducing() {
            Decision::Approve(proposal.clone())
        } else {
            Decision::Reject(RejectReason::AlreadyHalted)
        };
    }

    let post_equity = proposal.equity_after(state, 1.0);
    let post_drawdown = drawdown(state.peak_equity.max(post_equity), post_equity);
    if post_equity <= 0.0 || post_drawdown >= limits.max_drawdown() {
        return Decision::Halt {
            drawdown: post_drawdown,
        };
    }

    if proposal.is_empty() || proposal.is_risk_reducing() {
        return Decision::Approve(proposal.clone());
    }

    let ceiling = limits.max_gross_exposure;
    let post_gross = proposal.gross_after(state, 1.0);
    let increases = post_gross > state.gross_exposure;
    if !increases || post_gross < ceiling * post_equity {
        return Decision::Approve(proposal.clone());
    }

    if state.gross_exposure >= ceiling * state.equity {
        return Decision::Reject(RejectReason::ExposureLimit);
    }

    // Gross exposure is convex in the scale factor, so the admissible
    // factors form an interval starting at zero.
    let within = |f: f64| proposal.gross_after(state, f) <= ceiling * proposal.equity_after(state, f);
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..SCALE_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        if within(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    if lo < MIN_SCALE {
        return Decision::Reject(RejectReason::ExposureLimit);
    }
    Decision::Scale {
        proposal: proposal.scaled(lo),
        factor: lo,
    }
}
