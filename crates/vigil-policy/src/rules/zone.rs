use vigil_types::{ActionEvent, RiskLevel, RuleResult, ZoneLevel};

use crate::pattern::strictest_zone;
use crate::rule::{ClassifyContext, RiskRule};

/// Scores events against the project's configured protection zones.
pub struct ProtectionZoneRule;

impl RiskRule for ProtectionZoneRule {
    fn name(&self) -> &'static str {
        "protection-zone"
    }

    fn evaluate(&mut self, event: &ActionEvent, ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let zone = strictest_zone(ctx.zones, &event.file_path)?;
        let suffix = zone
            .reason
            .as_deref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        match zone.level {
            ZoneLevel::DoNotTouch => Some(
                RuleResult::new(
                    self.name(),
                    RiskLevel::Critical,
                    format!(
                        "{} touches DO_NOT_TOUCH zone {}{suffix}",
                        event.file_path, zone.path_pattern
                    ),
                )
                .blocking(),
            ),
            ZoneLevel::SurgicalOnly if zone.allows(event.operation) => Some(RuleResult::new(
                self.name(),
                RiskLevel::Medium,
                format!(
                    "{} on {} inside SURGICAL_ONLY zone {}{suffix}",
                    event.operation, event.file_path, zone.path_pattern
                ),
            )),
            ZoneLevel::SurgicalOnly => Some(RuleResult::new(
                self.name(),
                RiskLevel::High,
                format!(
                    "{} is not allowed in SURGICAL_ONLY zone {}{suffix}",
                    event.operation, zone.path_pattern
                ),
            )),
            ZoneLevel::None => None,
        }
    }
}
