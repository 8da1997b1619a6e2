//! The shared rule interface.

use chrono::{DateTime, Utc};

use vigil_types::{ActionEvent, ProtectionZone, RiskLevel, RuleResult};

/// Per-call inputs that are not part of the event itself.
#[derive(Debug, Clone)]
pub struct ClassifyContext<'a> {
    /// Protection zones configured for the event's project.
    pub zones: &'a [ProtectionZone],
    pub auto_stop_threshold: RiskLevel,
    /// Baseline actions per minute for the project.
    pub rate_limit: u32,
    /// Receipt time; the windowed rules measure against this, not the
    /// producer-supplied event timestamp.
    pub now: DateTime<Utc>,
}

impl<'a> ClassifyContext<'a> {
    pub fn new(zones: &'a [ProtectionZone], auto_stop_threshold: RiskLevel, rate_limit: u32) -> Self {
        Self {
            zones,
            auto_stop_threshold,
            rate_limit,
            now: Utc::now(),
        }
    }

    /// Pin the evaluation clock.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// One independent risk rule.
///
/// A rule either abstains (`None`) or votes with a level, an optional block
/// flag and a reason. Stateful rules keep their buffers on `self`.
pub trait RiskRule: Send {
    /// Stable rule name reported in `ruleResults`.
    fn name(&self) -> &'static str;

    fn evaluate(&mut self, event: &ActionEvent, ctx: &ClassifyContext<'_>) -> Option<RuleResult>;
}
