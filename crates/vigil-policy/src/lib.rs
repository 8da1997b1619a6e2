//! Risk classification engine for Vigil.
//!
//! Scores one [`ActionEvent`](vigil_types::ActionEvent) at a time against a
//! fixed, ordered list of rules and folds their votes into a
//! [`RiskVerdict`](vigil_types::RiskVerdict). Two rules keep short trailing
//! windows, so an engine instance belongs to exactly one project.

pub mod engine;
pub mod pattern;
pub mod rule;
pub mod rules;

pub use engine::{aggregate, RiskEngine};
pub use pattern::{strictest_zone, zone_matches};
pub use rule::{ClassifyContext, RiskRule};
