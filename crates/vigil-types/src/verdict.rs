use serde::{Deserialize, Serialize};

use crate::event::{ActionEvent, RiskLevel};
use crate::zone::ZoneLevel;

/// The outcome of one triggered risk rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    /// Stable rule name (e.g. `protection-zone`).
    pub rule: String,
    pub level: RiskLevel,
    /// Whether this rule alone demands the action be blocked.
    pub blocks: bool,
    /// Human-readable explanation.
    pub reason: String,
}

impl RuleResult {
    pub fn new(rule: impl Into<String>, level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            level,
            blocks: false,
            reason: reason.into(),
        }
    }

    pub fn blocking(mut self) -> Self {
        self.blocks = true;
        self
    }
}

/// The aggregate risk verdict for one action event.
///
/// Transient: it is never stored on its own, only folded into the enriched
/// event before it reaches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskVerdict {
    /// Maximum level across triggered rules, `NONE` if none triggered.
    pub risk_level: RiskLevel,
    /// True if any triggered rule blocks.
    pub should_block: bool,
    /// True if `risk_level` reached the project's auto-stop threshold.
    pub should_auto_stop: bool,
    /// Reasons from the rules at the maximum level, in rule order.
    pub reasons: Vec<String>,
    /// Every triggered rule, in evaluation order, for audit.
    pub rule_results: Vec<RuleResult>,
    /// Strictest protection zone the path fell under, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_zone_level: Option<ZoneLevel>,
}

impl RiskVerdict {
    /// A verdict with no triggered rules.
    pub fn none() -> Self {
        Self {
            risk_level: RiskLevel::None,
            should_block: false,
            should_auto_stop: false,
            reasons: Vec::new(),
            rule_results: Vec::new(),
            matched_zone_level: None,
        }
    }

    /// Whether operators should be alerted about this verdict.
    pub fn is_alert(&self) -> bool {
        self.should_block || self.risk_level >= RiskLevel::High
    }

    /// Fold the verdict into the event that produced it.
    pub fn enrich(&self, event: &mut ActionEvent) {
        event.risk_level = self.risk_level;
        event.risk_reasons = self.reasons.clone();
        event.protection_zone_level = self.matched_zone_level;
    }
}
