//! `sources list|enable|disable` (C12/C2): operates on the configuration
//! registry's persisted enable flags via the settings table, independent
//! of any running `serve` process.

use anyhow::{Context, Result};
use tracing::info;

use crate::persistence::{DieselPersistence, Persistence};

const SOURCES_CATEGORY: &str = "sources";

async fn connect(database_url: &str) -> Result<DieselPersistence> {
    DieselPersistence::connect(database_url, 2).context("connecting to database")
}

pub async fn handle_sources_list(database_url: &str) -> Result<()> {
    let persistence = connect(database_url).await?;
    let settings = persistence.get_settings_by_category(SOURCES_CATEGORY).await?;

    let defaults = super::default_registry();
    let defaults = defaults.get_category(SOURCES_CATEGORY).await;

    for (name, default_value) in &defaults {
        let enabled = settings
            .get(name)
            .and_then(|v| v.as_bool())
            .unwrap_or_else(|| default_value.as_bool().unwrap_or(false));
        println!("{name}\t{}", if enabled { "enabled" } else { "disabled" });
    }
    Ok(())
}

async fn set_enabled(database_url: &str, name: &str, enabled: bool) -> Result<()> {
    let persistence = connect(database_url).await?;
    persistence.set_setting(SOURCES_CATEGORY, name, serde_json::Value::Bool(enabled)).await?;
    info!(source = name, enabled, "persisted source enable flag");
    println!("{name}: {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub async fn handle_sources_enable(database_url: &str, name: &str) -> Result<()> {
    set_enabled(database_url, name, true).await
}

pub async fn handle_sources_disable(database_url: &str, name: &str) -> Result<()> {
    set_enabled(database_url, name, false).await
}
