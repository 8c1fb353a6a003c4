//! Per-bar trading signals.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Long,
    Short,
    Flat,
    /// Keep whatever position is currently held.
    Hold,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Long => "long",
            Action::Short => "short",
            Action::Flat => "flat",
            Action::Hold => "hold",
        }
    }
}

/// Output of a strategy for one bar. Produced fresh each bar, never stored
/// beyond the bar record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub action: Action,
    /// Sizing hint in (0, 1]; `None` means full strength.
    pub strength: Option<f64>,
    /// Hedge units per primary unit for paired strategies.
    pub hedge_ratio: Option<f64>,
}

impl Signal {
    pub fn new(action: Action) -> Self {
        Signal {
            action,
            strength: None,
            hedge_ratio: None,
        }
    }

    pub fn long() -> Self {
        Self::new(Action::Long)
    }

    pub fn short() -> Self {
        Self::new(Action::Short)
    }

    pub fn flat() -> Self {
        Self::new(Action::Flat)
    }

    pub fn hold() -> Self {
        Self::new(Action::Hold)
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_hedge_ratio(mut self, ratio: f64) -> Self {
        self.hedge_ratio = Some(ratio);
        self
    }

    /// Signed fraction of equity to hold in the primary asset, or `None` for
    /// `Hold`. `position_size` is the weight of a full-strength signal.
    pub fn target_weight(&self, position_size: f64) -> Option<f64> {
        let strength = self.strength.map_or(1.0, |s| s.clamp(0.0, 1.0));
        match self.action {
            Action::Long => Some(position_size * strength),
            Action::Short => Some(-position_size * strength),
            Action::Flat => Some(0.0),
            Action::Hold => None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.action.label()
    }
}
