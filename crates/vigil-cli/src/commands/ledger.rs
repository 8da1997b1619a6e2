//! Offline inspection of the ledger: chain audit, state, and history.

use std::path::Path;

use anyhow::{Context, Result};

use vigil_control::ExecutionState;
use vigil_ledger::{ConnectionSession, IntegrityReport, LedgerStore};
use vigil_types::{ProjectId, StateTransition};

use crate::commands::{load_config, open_ledger};

/// Run `vigil verify --project ID`.
///
/// Exits with status 1 when any declared chain link is broken.
pub fn verify(config_path: Option<&Path>, project: &str, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let report = verify_store(&store, project)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

pub(crate) fn verify_store(store: &LedgerStore, project: &str) -> Result<IntegrityReport> {
    store
        .verify_chain(&ProjectId::new(project))
        .context("failed to verify hash chain")
}

fn print_report(report: &IntegrityReport) {
    println!("Chain Report for {}:", report.project_id);
    println!("  Total events:  {}", report.total_events);
    println!("  Chained links: {}", report.chained_events);
    println!(
        "  Valid:         {}",
        if report.valid { "YES" } else { "NO" }
    );
    for m in &report.mismatches {
        println!(
            "  Broken link:   event #{} ({}, seq {})",
            m.index, m.event_id, m.sequence_number
        );
    }
    println!("  Message:       {}", report.message);
}

/// Run `vigil state`: print one project's persisted state, or every project's.
pub fn state(config_path: Option<&Path>, project: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let states = load_states(&store, project)?;

    if states.is_empty() {
        println!("No execution state recorded.");
        return Ok(());
    }

    println!(
        "{:<24}  {:<9}  {:>7}  {:>9}  STOP REASON",
        "PROJECT", "STATE", "PENDING", "PROCESSED"
    );
    println!("{}", "-".repeat(80));
    for state in &states {
        let ctx = state.context();
        println!(
            "{:<24}  {:<9}  {:>7}  {:>9}  {}",
            state.project_id(),
            state.state(),
            ctx.pending_actions(),
            ctx.total_actions_processed(),
            ctx.stop_reason().unwrap_or("-")
        );
    }
    Ok(())
}

pub(crate) fn load_states(
    store: &LedgerStore,
    project: Option<&str>,
) -> Result<Vec<ExecutionState>> {
    let records = match project {
        Some(id) => store
            .load_state(&ProjectId::new(id))
            .context("failed to load execution state")?
            .into_iter()
            .collect(),
        None => store.list_states().context("failed to list execution states")?,
    };
    records
        .iter()
        .map(|r| ExecutionState::from_record(r).context("stored execution state is corrupt"))
        .collect()
}

/// Run `vigil history --project ID`: the state-transition log.
pub fn history(config_path: Option<&Path>, project: &str, last: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let transitions = store
        .list_transitions(&ProjectId::new(project), last)
        .context("failed to query transitions")?;

    if transitions.is_empty() {
        println!("No transitions recorded for {project}.");
        return Ok(());
    }
    print_transitions(&transitions);
    Ok(())
}

fn print_transitions(transitions: &[StateTransition]) {
    println!(
        "{:<20}  {:<9}  {:<9}  {:<22}  TRIGGERED BY",
        "TIMESTAMP", "FROM", "TO", "TRIGGER"
    );
    println!("{}", "-".repeat(90));
    for t in transitions {
        println!(
            "{:<20}  {:<9}  {:<9}  {:<22}  {}",
            t.timestamp.format("%Y-%m-%d %H:%M:%S"),
            t.from_state,
            t.to_state,
            t.trigger_event,
            t.triggered_by
        );
    }
}

/// Run `vigil events --project ID`: export the project's events as JSON
/// lines, each with its `ledgerPosition`.
pub fn events(config_path: Option<&Path>, project: &str, after: u64) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    for line in export_events(&store, project, after)? {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn export_events(store: &LedgerStore, project: &str, after: u64) -> Result<Vec<String>> {
    let events = store
        .events_after(&ProjectId::new(project), after)
        .context("failed to query events")?;
    events
        .iter()
        .map(|e| serde_json::to_string(e).context("failed to encode event"))
        .collect()
}

/// Run `vigil sessions --project ID`: recent connection sessions.
pub fn sessions(config_path: Option<&Path>, project: &str, last: usize) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let sessions = store
        .list_sessions(&ProjectId::new(project), last)
        .context("failed to query sessions")?;

    if sessions.is_empty() {
        println!("No sessions recorded for {project}.");
        return Ok(());
    }
    print_sessions(&sessions);
    Ok(())
}

fn print_sessions(sessions: &[ConnectionSession]) {
    println!(
        "{:<6}  {:<24}  {:<8}  {:<20}  {:<20}  REASON",
        "ID", "CLIENT", "ROLE", "CONNECTED", "DISCONNECTED"
    );
    println!("{}", "-".repeat(100));
    for s in sessions {
        let disconnected = s
            .disconnected_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "(open)".into());
        println!(
            "{:<6}  {:<24}  {:<8}  {:<20}  {:<20}  {}",
            s.session_id,
            s.client_id,
            s.client_type,
            s.connected_at.format("%Y-%m-%d %H:%M:%S"),
            disconnected,
            s.close_reason.as_deref().unwrap_or("-")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_ledger::ChainLink;
    use vigil_types::{ActionEvent, ExecutionStatus, FileOperation, RiskLevel};

    fn temp_store() -> (tempfile::TempDir, LedgerStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = LedgerStore::open(&dir.path().join("vigil.db")).expect("open ledger");
        (dir, store)
    }

    #[test]
    fn verify_store_flags_broken_link() {
        let (_dir, store) = temp_store();
        let first = ActionEvent::new("proj", 1, FileOperation::FileCreate, "a.rs")
            .with_content_hash("h1");
        let second = ActionEvent::new("proj", 2, FileOperation::FileModify, "a.rs")
            .with_content_hash("h2")
            .with_parent_hash(ChainLink::from(&first).expected_parent_hash());
        let third = ActionEvent::new("proj", 3, FileOperation::FileModify, "a.rs")
            .with_parent_hash("not-the-parent");
        for e in [&first, &second, &third] {
            store.append_event(e).unwrap();
        }

        let report = verify_store(&store, "proj").unwrap();
        assert!(!report.valid);
        assert_eq!(report.chained_events, 2);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].event_id, third.id);
    }

    #[test]
    fn export_events_resumes_after_position() {
        let (_dir, store) = temp_store();
        let mut positions = Vec::new();
        for seq in 1..=3 {
            let e = ActionEvent::new("proj", seq, FileOperation::FileModify, "a.rs")
                .with_content_hash(format!("h{seq}"));
            positions.push(store.append_event(&e).unwrap());
        }

        let lines = export_events(&store, "proj", positions[0]).unwrap();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["ledgerPosition"], positions[1]);
        assert_eq!(first["sequenceNumber"], 2);
        assert!(export_events(&store, "other", 0).unwrap().is_empty());
    }

    #[test]
    fn load_states_restores_context() {
        let (_dir, store) = temp_store();
        let state = ExecutionState::new(ProjectId::new("proj"), RiskLevel::High, 60);
        store.save_state(&state.to_record(Utc::now()).unwrap()).unwrap();

        let states = load_states(&store, Some("proj")).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state(), ExecutionStatus::Idle);
        assert_eq!(states[0].context().rate_limit(), 60);

        assert!(load_states(&store, Some("other")).unwrap().is_empty());
        assert_eq!(load_states(&store, None).unwrap().len(), 1);
    }
}
