//! Roundtable - multi-agent trading deliberation
//!
//! Runs a panel of LLM agents through phased rounds of discussion over a shared market
//! context, streams every turn as events and ends each session with one final decision.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use roundtable::agents::{SessionManager, Orchestrator, ProviderClient};
//! use roundtable::models::{RoundtableConfig, SessionInput, SessionEvent};
//! use roundtable::store::SessionArchive;
//! ```

pub use roundtable_agents as agents;
pub use roundtable_models as models;
pub use roundtable_store as store;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use roundtable_agents::SessionManager;
use roundtable_models::{RoundtableConfig, SessionInput};
use roundtable_store::{SessionArchive, SqliteArchive};

const REPLAY_CACHE_CAPACITY: u64 = 64;
const REPLAY_CACHE_TTL: Duration = Duration::from_secs(600);

/// Load and validate a configuration file. `.toml` files are read as TOML, anything
/// else as JSON.
pub fn load_config(path: &str) -> Result<RoundtableConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {path}"))?;
    let is_toml = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let config: RoundtableConfig = if is_toml {
        toml::from_str(&raw).with_context(|| format!("Failed to parse TOML config: {path}"))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse JSON config: {path}"))?
    };
    config
        .validate()
        .with_context(|| format!("Invalid config: {path}"))?;
    Ok(config)
}

/// Read the session input (topic, context, images, prior history) from JSON.
pub fn load_input(path: &str) -> Result<SessionInput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input: {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse session input: {path}"))
}

pub fn open_archive(path: &str) -> Result<Arc<SessionArchive>> {
    let sqlite = SqliteArchive::open(path)
        .with_context(|| format!("Failed to open archive: {path}"))?;
    Ok(Arc::new(SessionArchive::new(
        sqlite,
        REPLAY_CACHE_CAPACITY,
        REPLAY_CACHE_TTL,
    )))
}

/// Session manager, archiving to `archive_path` when given.
pub fn build_manager(archive_path: Option<&str>) -> Result<SessionManager> {
    let manager = SessionManager::new();
    Ok(match archive_path {
        Some(path) => manager.with_archive(open_archive(path)?),
        None => manager,
    })
}
