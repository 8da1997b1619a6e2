//! The two stateful rules. Each keeps a private trailing window, so a
//! rule instance must only ever see one project's events.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use vigil_types::{ActionEvent, RiskLevel, RuleResult};

use crate::rule::{ClassifyContext, RiskRule};

/// Many distinct directories touched within a short window.
pub struct CascadeRule {
    window: Duration,
    /// Distinct-directory counts for MEDIUM, HIGH, CRITICAL.
    tiers: [usize; 3],
    seen: VecDeque<(DateTime<Utc>, String)>,
}

impl CascadeRule {
    pub fn new(window_secs: u64, tiers: [usize; 3]) -> Self {
        Self {
            window: Duration::seconds(i64::try_from(window_secs).unwrap_or(i64::MAX / 1000)),
            tiers,
            seen: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.seen.retain(|(at, _)| *at >= cutoff);
    }

    /// Distinct directories currently inside the window.
    pub fn distinct_directories(&self) -> usize {
        self.seen
            .iter()
            .map(|(_, dir)| dir.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

impl RiskRule for CascadeRule {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn evaluate(&mut self, event: &ActionEvent, ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        self.prune(ctx.now);
        self.seen.push_back((ctx.now, event.directory()));

        let distinct = self.distinct_directories();
        let level = if distinct >= self.tiers[2] {
            RiskLevel::Critical
        } else if distinct >= self.tiers[1] {
            RiskLevel::High
        } else if distinct >= self.tiers[0] && distinct > 1 {
            RiskLevel::Medium
        } else {
            return None;
        };
        Some(RuleResult::new(
            self.name(),
            level,
            format!(
                "{distinct} distinct directories modified within {}s",
                self.window.num_seconds()
            ),
        ))
    }
}

/// Event rate far above the project's configured baseline.
pub struct RateAnomalyRule {
    window: Duration,
    high_multiplier: f64,
    critical_multiplier: f64,
    seen: VecDeque<DateTime<Utc>>,
}

impl RateAnomalyRule {
    pub fn new(window_secs: u64, high_multiplier: f64, critical_multiplier: f64) -> Self {
        Self {
            window: Duration::seconds(i64::try_from(window_secs.max(1)).unwrap_or(i64::MAX / 1000)),
            high_multiplier,
            critical_multiplier,
            seen: VecDeque::new(),
        }
    }

    /// Events expected in one window at `per_minute`, never below one.
    fn baseline(&self, per_minute: u32) -> f64 {
        let window_secs = self.window.num_seconds() as f64;
        (f64::from(per_minute) * window_secs / 60.0).max(1.0)
    }
}

impl RiskRule for RateAnomalyRule {
    fn name(&self) -> &'static str {
        "rate-anomaly"
    }

    fn evaluate(&mut self, _event: &ActionEvent, ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let cutoff = ctx.now - self.window;
        self.seen.retain(|at| *at >= cutoff);
        self.seen.push_back(ctx.now);

        if ctx.rate_limit == 0 {
            return None;
        }
        let baseline = self.baseline(ctx.rate_limit);
        let count = self.seen.len();
        let ratio = count as f64 / baseline;
        let level = if ratio >= self.critical_multiplier {
            RiskLevel::Critical
        } else if ratio >= self.high_multiplier {
            RiskLevel::High
        } else {
            return None;
        };
        Some(RuleResult::new(
            self.name(),
            level,
            format!(
                "{count} actions in {}s is {ratio:.1}x the baseline of {} per minute",
                self.window.num_seconds(),
                ctx.rate_limit
            ),
        ))
    }
}
