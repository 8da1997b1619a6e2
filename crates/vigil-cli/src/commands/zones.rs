//! `vigil zones`: manage protection zones directly in the ledger.
//!
//! A running server loads zones when a project actor starts, so changes made
//! here reach a live project on its next restart. Use the HTTP API to change
//! zones of a project that is being served.

use std::path::Path;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use vigil_ledger::LedgerStore;
use vigil_types::{FileOperation, ProjectId, ProtectionZone, ZoneLevel};

use crate::commands::{load_config, open_ledger};

const CLI_ACTOR: &str = "cli";

pub fn list(config_path: Option<&Path>, project: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let zones = store
        .list_zones(&ProjectId::new(project))
        .context("failed to list zones")?;

    if zones.is_empty() {
        println!("No protection zones for {project}.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<13}  {:<6}  {:<30}  ALLOWED",
        "ZONE ID", "LEVEL", "SYSTEM", "PATTERN"
    );
    println!("{}", "-".repeat(110));
    for zone in &zones {
        let allowed = zone
            .allowed_operations
            .as_ref()
            .map(|ops| {
                ops.iter()
                    .map(|op| op.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<36}  {:<13}  {:<6}  {:<30}  {}",
            zone.id,
            zone.level,
            if zone.is_system { "yes" } else { "no" },
            zone.path_pattern,
            allowed
        );
    }
    Ok(())
}

pub fn add(
    config_path: Option<&Path>,
    project: &str,
    pattern: &str,
    level: &str,
    allow: &[String],
    reason: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let zone = add_to_store(&store, project, pattern, level, allow, reason)?;
    println!("Added zone {} ({} {})", zone.id, zone.level, zone.path_pattern);
    Ok(())
}

pub(crate) fn add_to_store(
    store: &LedgerStore,
    project: &str,
    pattern: &str,
    level: &str,
    allow: &[String],
    reason: Option<String>,
) -> Result<ProtectionZone> {
    let level: ZoneLevel = level.parse()?;
    let mut zone = ProtectionZone::new(project, pattern, level, CLI_ACTOR);
    if !allow.is_empty() {
        let ops = allow
            .iter()
            .map(|s| s.parse::<FileOperation>())
            .collect::<Result<Vec<_>, _>>()?;
        zone = zone.with_allowed_operations(ops);
    }
    if let Some(reason) = reason {
        zone = zone.with_reason(reason);
    }
    zone.validate()?;
    store.insert_zone(&zone).context("failed to store zone")?;
    Ok(zone)
}

pub fn remove(config_path: Option<&Path>, zone_id: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_ledger(&config)?;
    let id = Uuid::parse_str(zone_id).with_context(|| format!("invalid zone id '{zone_id}'"))?;
    remove_from_store(&store, &id)?;
    println!("Removed zone {id}");
    Ok(())
}

pub(crate) fn remove_from_store(store: &LedgerStore, id: &Uuid) -> Result<()> {
    let Some(zone) = store.get_zone(id).context("failed to look up zone")? else {
        bail!("no zone with id {id}");
    };
    if zone.is_system {
        bail!("zone {id} is a system zone and cannot be removed");
    }
    store.delete_zone(id).context("failed to delete zone")?;
    Ok(())
}
