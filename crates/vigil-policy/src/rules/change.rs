use vigil_types::{ActionEvent, FileOperation, RiskLevel, RuleResult};

use crate::rule::{ClassifyContext, RiskRule};

/// Deletions are never routine.
pub struct DestructiveOperationRule;

impl RiskRule for DestructiveOperationRule {
    fn name(&self) -> &'static str {
        "destructive-operation"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let (level, what) = match event.operation {
            FileOperation::DirDelete => (RiskLevel::Critical, "directory deleted"),
            FileOperation::FileDelete => (RiskLevel::High, "file deleted"),
            _ => return None,
        };
        Some(RuleResult::new(
            self.name(),
            level,
            format!("{what}: {}", event.file_path),
        ))
    }
}

const TIER_LEVELS: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

/// Tiered thresholds on diff size and file size.
pub struct LargeChangeRule {
    diff_lines: [usize; 3],
    file_bytes: [u64; 3],
}

impl LargeChangeRule {
    pub fn new(diff_lines: [usize; 3], file_bytes: [u64; 3]) -> Self {
        Self {
            diff_lines,
            file_bytes,
        }
    }
}

/// Highest tier whose threshold `value` reaches.
fn tier<T: PartialOrd + Copy>(value: T, thresholds: &[T; 3]) -> Option<RiskLevel> {
    thresholds
        .iter()
        .zip(TIER_LEVELS)
        .filter(|(threshold, _)| value >= **threshold)
        .map(|(_, level)| level)
        .last()
}

impl RiskRule for LargeChangeRule {
    fn name(&self) -> &'static str {
        "large-change"
    }

    fn evaluate(&mut self, event: &ActionEvent, _ctx: &ClassifyContext<'_>) -> Option<RuleResult> {
        let by_lines = event
            .diff_line_count()
            .and_then(|lines| tier(lines, &self.diff_lines).map(|l| (l, format!("{lines}-line diff"))));
        let by_size = event
            .file_size
            .and_then(|bytes| tier(bytes, &self.file_bytes).map(|l| (l, format!("{bytes}-byte file"))));

        let (level, what) = match (by_lines, by_size) {
            (Some(a), Some(b)) => {
                if b.0 > a.0 {
                    b
                } else {
                    a
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        Some(RuleResult::new(
            self.name(),
            level,
            format!("large change to {}: {what}", event.file_path),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ClassifyContext<'static> {
        ClassifyContext::new(&[], RiskLevel::High, 120)
    }

    #[test]
    fn deletes_are_scored_by_kind() {
        let mut rule = DestructiveOperationRule;
        let dir = ActionEvent::new("p", 1, FileOperation::DirDelete, "src");
        assert_eq!(rule.evaluate(&dir, &ctx()).unwrap().level, RiskLevel::Critical);
        let file = ActionEvent::new("p", 2, FileOperation::FileDelete, "src/a.rs");
        assert_eq!(rule.evaluate(&file, &ctx()).unwrap().level, RiskLevel::High);
        let create = ActionEvent::new("p", 3, FileOperation::FileCreate, "src/b.rs");
        assert!(rule.evaluate(&create, &ctx()).is_none());
    }

    #[test]
    fn diff_tiers() {
        let mut rule = LargeChangeRule::new([200, 500, 1000], [100, 1000, 10_000]);
        let diff = |n: usize| {
            ActionEvent::new("p", 1, FileOperation::FileModify, "a.rs")
                .with_content_hash("h")
                .with_diff("+x\n".repeat(n))
        };
        assert!(rule.evaluate(&diff(199), &ctx()).is_none());
        assert_eq!(rule.evaluate(&diff(200), &ctx()).unwrap().level, RiskLevel::Low);
        assert_eq!(rule.evaluate(&diff(750), &ctx()).unwrap().level, RiskLevel::Medium);
        assert_eq!(rule.evaluate(&diff(1000), &ctx()).unwrap().level, RiskLevel::High);
    }

    #[test]
    fn larger_of_size_and_diff_wins() {
        let mut rule = LargeChangeRule::new([200, 500, 1000], [100, 1000, 10_000]);
        let event = ActionEvent::new("p", 1, FileOperation::FileModify, "a.bin")
            .with_content_hash("h")
            .with_diff("+x\n".repeat(250))
            .with_file_size(20_000);
        let r = rule.evaluate(&event, &ctx()).unwrap();
        assert_eq!(r.level, RiskLevel::High);
        assert!(r.reason.contains("20000-byte file"));
    }
}
