//! The built-in rule set, in evaluation order.

mod change;
mod files;
mod window;
mod zone;

pub use change::{DestructiveOperationRule, LargeChangeRule};
pub use files::{
    ApiContractRule, BinaryFileRule, ConfigFileRule, SchemaMigrationRule, SecurityFileRule,
    SelfProtectionRule, TestFileRule,
};
pub use window::{CascadeRule, RateAnomalyRule};
pub use zone::ProtectionZoneRule;

use vigil_types::RiskConfig;

use crate::rule::RiskRule;

/// Every built-in rule, in the fixed order they are evaluated.
pub fn default_rules(config: &RiskConfig) -> Vec<Box<dyn RiskRule>> {
    vec![
        Box::new(ProtectionZoneRule),
        Box::new(DestructiveOperationRule),
        Box::new(ConfigFileRule::new()),
        Box::new(SchemaMigrationRule::new()),
        Box::new(SecurityFileRule::new()),
        Box::new(LargeChangeRule::new(
            config.large_diff_lines,
            config.large_file_bytes,
        )),
        Box::new(CascadeRule::new(
            config.cascade_window_secs,
            [
                config.cascade_medium_dirs,
                config.cascade_high_dirs,
                config.cascade_critical_dirs,
            ],
        )),
        Box::new(ApiContractRule::new()),
        Box::new(TestFileRule::new()),
        Box::new(BinaryFileRule),
        Box::new(SelfProtectionRule::new(&config.protected_roots)),
        Box::new(RateAnomalyRule::new(
            config.rate_window_secs,
            config.rate_high_multiplier,
            config.rate_critical_multiplier,
        )),
    ]
}
