//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use geoedit_core::verify_edits;
use geoedit_session::{EditSession, MemorySource, SessionConfig, SnapshotStore};

pub const CONFIG_FILE: &str = "geoedit.toml";

/// Restores the saved session with nothing loaded behind it: the base holds
/// only what the snapshot carried.
fn restored(root: &Path, config_path: &Path) -> anyhow::Result<Option<EditSession>> {
    let config = SessionConfig::load(config_path)?;
    let source = Arc::new(MemorySource::new(Vec::new()));
    let mut session = EditSession::new(root, config, source);
    let path = session.store().path();
    if !session
        .restore(true)
        .with_context(|| format!("restoring {}", path.display()))?
    {
        println!("No saved session at {}", path.display());
        return Ok(None);
    }
    tracing::debug!("Restored {}", path.display());
    Ok(Some(session))
}

pub fn inspect(root: &Path, config_path: &Path) -> anyhow::Result<()> {
    let Some(session) = restored(root, config_path)? else {
        return Ok(());
    };
    let history = session.history();

    println!("Store:   {}", session.store().path().display());
    println!("Entries: {} (cursor at {})", history.len(), history.cursor());
    for (index, entry) in history.entries().iter().enumerate() {
        let marker = if index == history.cursor() { '>' } else { ' ' };
        let annotation = entry.annotation.as_deref().unwrap_or("-");
        println!("  {marker} {index:>3}  {annotation}");
    }
    for (name, index) in history.checkpoints() {
        println!("Checkpoint {name:?} at {index}");
    }

    let difference = history.difference();
    println!(
        "Pending: {} created, {} modified, {} deleted",
        difference.created().len(),
        difference.modified().len(),
        difference.deleted().len()
    );
    Ok(())
}

pub fn diff(root: &Path, config_path: &Path, complete: bool) -> anyhow::Result<()> {
    let Some(session) = restored(root, config_path)? else {
        return Ok(());
    };
    let difference = session.history().difference();
    let output = if complete {
        serde_json::json!({
            "changes": difference.summary(),
            "related": difference.complete(session.graph()),
        })
    } else {
        serde_json::to_value(difference.summary())?
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn check(root: &Path, config_path: &Path) -> anyhow::Result<()> {
    let Some(session) = restored(root, config_path)? else {
        return Ok(());
    };
    let issues = verify_edits(session.graph());
    if issues.is_empty() {
        println!("OK: {} edited entities verified", session.graph().edit_count());
        return Ok(());
    }
    for issue in &issues {
        println!("  {issue}");
    }
    anyhow::bail!("{} integrity issue(s) found", issues.len())
}

pub fn clear(root: &Path, config_path: &Path) -> anyhow::Result<()> {
    let config = SessionConfig::load(config_path)?;
    let store = SnapshotStore::new(root, &config);
    tracing::info!("Clearing saved session: {}", store.dir().display());

    store.clear()?;

    tracing::info!("Saved session cleared");
    Ok(())
}
