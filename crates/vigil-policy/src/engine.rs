//! The risk engine: ordered rule evaluation plus aggregation.

use tracing::debug;

use vigil_types::{ActionEvent, RiskConfig, RiskLevel, RiskVerdict, RuleResult};

use crate::pattern::strictest_zone;
use crate::rule::{ClassifyContext, RiskRule};
use crate::rules::default_rules;

/// Evaluates events against a fixed, ordered list of rules.
///
/// Owns the stateful cascade and rate-anomaly windows, so one engine must
/// serve exactly one project.
pub struct RiskEngine {
    rules: Vec<Box<dyn RiskRule>>,
}

impl RiskEngine {
    /// Engine with the built-in rule set.
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            rules: default_rules(config),
        }
    }

    /// Engine with a caller-supplied rule list, evaluated in the given order.
    pub fn with_rules(rules: Vec<Box<dyn RiskRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Score one event. Every rule sees every event, so stateful windows stay
    /// complete even when an earlier rule already voted CRITICAL.
    pub fn classify(&mut self, event: &ActionEvent, ctx: &ClassifyContext<'_>) -> RiskVerdict {
        let results: Vec<RuleResult> = self
            .rules
            .iter_mut()
            .filter_map(|rule| rule.evaluate(event, ctx))
            .collect();

        let mut verdict = aggregate(results, ctx.auto_stop_threshold);
        verdict.matched_zone_level =
            strictest_zone(ctx.zones, &event.file_path).map(|zone| zone.level);

        debug!(
            event_id = %event.id,
            project_id = %event.project_id,
            risk_level = %verdict.risk_level,
            rules = verdict.rule_results.len(),
            block = verdict.should_block,
            "classified action event"
        );
        verdict
    }
}

/// Fold rule votes into a verdict.
///
/// The level is the maximum vote (NONE without votes), blocking is the OR of
/// all votes, and reasons come from the votes at the maximum level in rule
/// order. Adding a vote can never lower the level.
pub fn aggregate(results: Vec<RuleResult>, auto_stop_threshold: RiskLevel) -> RiskVerdict {
    let risk_level = results
        .iter()
        .map(|r| r.level)
        .max()
        .unwrap_or(RiskLevel::None);
    let should_block = results.iter().any(|r| r.blocks);
    let reasons = results
        .iter()
        .filter(|r| r.level == risk_level)
        .map(|r| r.reason.clone())
        .collect();

    RiskVerdict {
        risk_level,
        should_block,
        should_auto_stop: risk_level >= auto_stop_threshold,
        reasons,
        rule_results: results,
        matched_zone_level: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vigil_types::{FileOperation, ProtectionZone, ZoneLevel};

    fn engine() -> RiskEngine {
        RiskEngine::new(&RiskConfig::default())
    }

    fn modify(path: &str) -> ActionEvent {
        ActionEvent::new("p", 1, FileOperation::FileModify, path).with_content_hash("h")
    }

    #[test]
    fn plain_source_edit_is_none() {
        let ctx = ClassifyContext::new(&[], RiskLevel::High, 120);
        let verdict = engine().classify(&modify("src/lib.rs"), &ctx);
        assert_eq!(verdict, RiskVerdict::none());
    }

    #[test]
    fn aggregation_is_monotonic() {
        let votes = vec![
            RuleResult::new("a", RiskLevel::Low, "low"),
            RuleResult::new("b", RiskLevel::High, "high"),
            RuleResult::new("c", RiskLevel::Medium, "medium"),
        ];
        let mut previous = RiskLevel::None;
        for n in 0..=votes.len() {
            let verdict = aggregate(votes[..n].to_vec(), RiskLevel::Critical);
            assert!(verdict.risk_level >= previous);
            previous = verdict.risk_level;
        }
        assert_eq!(previous, RiskLevel::High);
    }

    #[test]
    fn reasons_come_from_maximum_level() {
        let verdict = aggregate(
            vec![
                RuleResult::new("a", RiskLevel::High, "first high"),
                RuleResult::new("b", RiskLevel::Low, "low"),
                RuleResult::new("c", RiskLevel::High, "second high"),
            ],
            RiskLevel::High,
        );
        assert_eq!(verdict.reasons, vec!["first high", "second high"]);
        assert!(verdict.should_auto_stop);
        assert!(!verdict.should_block);
        assert_eq!(verdict.rule_results.len(), 3);
    }

    #[test]
    fn any_blocking_vote_blocks() {
        let verdict = aggregate(
            vec![
                RuleResult::new("a", RiskLevel::Low, "low").blocking(),
                RuleResult::new("b", RiskLevel::Medium, "medium"),
            ],
            RiskLevel::Critical,
        );
        assert!(verdict.should_block);
        assert!(!verdict.should_auto_stop);
        assert_eq!(verdict.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn do_not_touch_always_critical_and_blocking() {
        let zones = vec![ProtectionZone::new("p", "**", ZoneLevel::DoNotTouch, "t")];
        let ctx = ClassifyContext::new(&zones, RiskLevel::Critical, 120);
        let mut engine = engine();
        for event in [
            modify("src/lib.rs"),
            modify("tests/unit.test.ts"),
            ActionEvent::new("p", 2, FileOperation::DirDelete, "build"),
            modify("assets/logo.png"),
        ] {
            let verdict = engine.classify(&event, &ctx);
            assert_eq!(verdict.risk_level, RiskLevel::Critical, "{}", event.file_path);
            assert!(verdict.should_block);
            assert!(verdict.should_auto_stop);
            assert_eq!(verdict.matched_zone_level, Some(ZoneLevel::DoNotTouch));
        }
    }

    #[test]
    fn test_file_does_not_mask_security_file() {
        let ctx = ClassifyContext::new(&[], RiskLevel::Critical, 120);
        let verdict = engine().classify(&modify("tests/fixtures/secret_token.test.ts"), &ctx);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        let rules: Vec<&str> = verdict.rule_results.iter().map(|r| r.rule.as_str()).collect();
        assert!(rules.contains(&"test-file"));
        assert!(rules.contains(&"security-file"));
    }

    #[test]
    fn engines_keep_separate_windows() {
        let mut first = engine();
        let mut second = engine();
        let t0 = Utc::now();
        for i in 0..9 {
            let ctx = ClassifyContext::new(&[], RiskLevel::Critical, 120)
                .at(t0 + Duration::seconds(i));
            first.classify(&modify(&format!("dir{i}/a.rs")), &ctx);
        }
        let ctx = ClassifyContext::new(&[], RiskLevel::Critical, 120).at(t0 + Duration::seconds(10));
        let verdict = second.classify(&modify("dir9/a.rs"), &ctx);
        assert_eq!(verdict.risk_level, RiskLevel::None);
        let verdict = first.classify(&modify("dir9/a.rs"), &ctx);
        assert_eq!(verdict.risk_level, RiskLevel::Critical);
    }
}
