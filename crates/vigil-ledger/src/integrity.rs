//! Offline hash-chain audit of a project's events.

use serde::Serialize;
use uuid::Uuid;

use vigil_types::{ProjectId, VigilError};

use crate::chain::ChainLink;
use crate::store::LedgerStore;

/// One event whose declared parent hash disagrees with its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMismatch {
    /// Position of the event in the project's ledger order, from 0.
    pub index: usize,
    pub event_id: Uuid,
    pub sequence_number: u64,
    pub declared: String,
    /// `None` when the first event of a project declares a parent.
    pub expected: Option<String>,
}

/// The result of verifying a project's hash chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub project_id: ProjectId,
    /// Total number of events inspected.
    pub total_events: usize,
    /// Events that declared a parent hash at all.
    pub chained_events: usize,
    pub mismatches: Vec<ChainMismatch>,
    /// Whether every declared link is valid.
    pub valid: bool,
    /// Human-readable summary of the verification result.
    pub message: String,
}

impl LedgerStore {
    /// Walk a project's events in ledger order and report every event whose
    /// declared `parentEventHash` does not match its predecessor.
    ///
    /// Events without a declared parent are not links and never fail.
    pub fn verify_chain(&self, project: &ProjectId) -> Result<IntegrityReport, VigilError> {
        let events = self.project_events(project)?;
        let mut previous: Option<ChainLink> = None;
        let mut mismatches = Vec::new();
        let mut chained_events = 0;

        for (index, event) in events.iter().enumerate() {
            if let Some(declared) = &event.parent_event_hash {
                chained_events += 1;
                let expected = previous.as_ref().map(ChainLink::expected_parent_hash);
                if expected.as_deref() != Some(declared.as_str()) {
                    mismatches.push(ChainMismatch {
                        index,
                        event_id: event.id,
                        sequence_number: event.sequence_number,
                        declared: declared.clone(),
                        expected,
                    });
                }
            }
            previous = Some(ChainLink::from(event));
        }

        let valid = mismatches.is_empty();
        let message = if events.is_empty() {
            "ledger has no events for this project".to_string()
        } else if valid {
            format!(
                "{} events verified, {chained_events} chained links intact",
                events.len()
            )
        } else {
            format!(
                "{} of {chained_events} chained links broken (first at event {})",
                mismatches.len(),
                mismatches[0].index
            )
        };

        Ok(IntegrityReport {
            project_id: project.clone(),
            total_events: events.len(),
            chained_events,
            mismatches,
            valid,
            message,
        })
    }
}
