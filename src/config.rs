//! Configuration registry (C8): resolves `(category, key)` lookups with
//! runtime-override > environment > built-in-default precedence, and
//! watches an optional TOML file for hot-reloadable overrides.
//!
//! Grounded in soar's `ingest_config.rs` TOML load/save pattern and
//! `stream_manager::spawn_config_watcher`'s debounced `notify` file
//! watcher, generalized from one stream list to an arbitrary
//! category/key override table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// A dynamically-typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    String(String),
    Object(serde_json::Value),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Parses a raw environment-variable string per §4.8's coercion
    /// rules: `"true"`/`"false"` become bool, numeric strings become
    /// number, `{`/`[`-leading strings that parse as JSON become an
    /// object, everything else stays a string.
    fn coerce(raw: &str) -> ConfigValue {
        match raw {
            "true" => return ConfigValue::Bool(true),
            "false" => return ConfigValue::Bool(false),
            _ => {}
        }
        if let Ok(n) = raw.parse::<f64>() {
            return ConfigValue::Number(n);
        }
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) {
                return ConfigValue::Object(v);
            }
        }
        ConfigValue::String(raw.to_string())
    }
}

/// On-disk override file shape: `[category] key = value` TOML tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub categories: HashMap<String, HashMap<String, toml::Value>>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {path:?}"))
    }
}

fn toml_to_config_value(v: &toml::Value) -> ConfigValue {
    match v {
        toml::Value::Boolean(b) => ConfigValue::Bool(*b),
        toml::Value::Integer(i) => ConfigValue::Number(*i as f64),
        toml::Value::Float(f) => ConfigValue::Number(*f),
        toml::Value::String(s) => ConfigValue::String(s.clone()),
        other => ConfigValue::Object(serde_json::to_value(other).unwrap_or(serde_json::Value::Null)),
    }
}

fn env_key(category: &str, key: &str) -> String {
    format!("{}_{}", category.to_uppercase(), key.to_uppercase())
}

/// Missing `(category, key)` entries reported by [`ConfigRegistry::validate_required`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingConfig {
    pub category: String,
    pub key: String,
}

pub struct ConfigRegistry {
    defaults: HashMap<(String, String), ConfigValue>,
    overrides: RwLock<HashMap<(String, String), ConfigValue>>,
}

impl ConfigRegistry {
    pub fn new(defaults: HashMap<(String, String), ConfigValue>) -> Self {
        Self { defaults, overrides: RwLock::new(HashMap::new()) }
    }

    pub fn with_defaults(pairs: impl IntoIterator<Item = (&'static str, &'static str, ConfigValue)>) -> Self {
        let defaults = pairs.into_iter().map(|(c, k, v)| ((c.to_string(), k.to_string()), v)).collect();
        Self::new(defaults)
    }

    /// Resolves a value with runtime-override > environment > default
    /// precedence.
    pub async fn get(&self, category: &str, key: &str) -> Option<ConfigValue> {
        let lookup_key = (category.to_string(), key.to_string());

        if let Some(v) = self.overrides.read().await.get(&lookup_key) {
            return Some(v.clone());
        }

        if let Ok(raw) = std::env::var(env_key(category, key)) {
            return Some(ConfigValue::coerce(&raw));
        }

        self.defaults.get(&lookup_key).cloned()
    }

    pub async fn set_override(&self, category: &str, key: &str, value: ConfigValue) {
        self.overrides.write().await.insert((category.to_string(), key.to_string()), value);
    }

    /// Replaces every override with the contents of a loaded config file.
    /// Defaults and environment variables are untouched; a key absent
    /// from the new file simply falls back to them again.
    pub async fn apply_file(&self, file: &ConfigFile) {
        let mut overrides = self.overrides.write().await;
        overrides.clear();
        for (category, entries) in &file.categories {
            for (key, value) in entries {
                overrides.insert((category.clone(), key.clone()), toml_to_config_value(value));
            }
        }
    }

    /// Returns the merged view (defaults overlaid by overrides; env vars
    /// are not enumerable so they are not reflected here) for one category.
    pub async fn get_category(&self, category: &str) -> HashMap<String, ConfigValue> {
        let mut merged: HashMap<String, ConfigValue> = self
            .defaults
            .iter()
            .filter(|((c, _), _)| c == category)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect();

        for ((c, k), v) in self.overrides.read().await.iter() {
            if c == category {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Checks that every `(category, key)` in `requirements` resolves to
    /// some value (override, env, or default); returns the list of any
    /// that don't.
    pub async fn validate_required(&self, requirements: &HashMap<String, Vec<String>>) -> Result<(), Vec<MissingConfig>> {
        let mut missing = Vec::new();
        for (category, keys) in requirements {
            for key in keys {
                if self.get(category, key).await.is_none() {
                    missing.push(MissingConfig { category: category.clone(), key: key.clone() });
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

/// Spawns a debounced file watcher that reloads `path` into `registry`'s
/// overrides whenever it changes, mirroring soar's
/// `spawn_config_watcher`.
pub fn spawn_config_watcher(path: PathBuf, registry: Arc<ConfigRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        use notify::{Event, EventKind, RecursiveMode, Watcher};

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let watch_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let config_path = path.clone();

        let mut watcher = match notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                    && event.paths.iter().any(|p| p.ends_with(config_path.file_name().unwrap_or_default()))
                {
                    let _ = tx.try_send(());
                }
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to create config file watcher");
                return;
            }
        };

        if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            error!(error = %e, path = ?watch_dir, "failed to watch config directory");
            return;
        }

        info!(path = ?path, "config file watcher started");

        loop {
            if rx.recv().await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            while rx.try_recv().is_ok() {}

            match ConfigFile::load(&path) {
                Ok(file) => {
                    registry.apply_file(&file).await;
                    info!(path = ?path, "config reloaded");
                }
                Err(e) => warn!(error = %e, path = ?path, "failed to reload config file"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConfigRegistry {
        ConfigRegistry::with_defaults([
            ("adapters", "poll_interval_ms", ConfigValue::Number(5000.0)),
            ("adapters", "enabled", ConfigValue::Bool(true)),
        ])
    }

    #[tokio::test]
    async fn default_is_returned_when_no_override_or_env() {
        let reg = registry();
        let v = reg.get("adapters", "poll_interval_ms").await.unwrap();
        assert_eq!(v.as_number(), Some(5000.0));
    }

    #[tokio::test]
    #[serial_test::serial(env)]
    async fn environment_variable_beats_default_but_loses_to_override() {
        let reg = registry();
        std::env::set_var("ADAPTERS_POLL_INTERVAL_MS", "2000");

        assert_eq!(reg.get("adapters", "poll_interval_ms").await.unwrap().as_number(), Some(2000.0));

        reg.set_override("adapters", "poll_interval_ms", ConfigValue::Number(1500.0)).await;
        assert_eq!(reg.get("adapters", "poll_interval_ms").await.unwrap().as_number(), Some(1500.0));

        std::env::remove_var("ADAPTERS_POLL_INTERVAL_MS");
    }

    #[tokio::test]
    async fn runtime_override_beats_default() {
        let reg = registry();
        reg.set_override("adapters", "poll_interval_ms", ConfigValue::Number(1000.0)).await;
        assert_eq!(reg.get("adapters", "poll_interval_ms").await.unwrap().as_number(), Some(1000.0));
    }

    #[test]
    fn coercion_recognizes_bool_number_and_json() {
        assert_eq!(ConfigValue::coerce("true"), ConfigValue::Bool(true));
        assert_eq!(ConfigValue::coerce("42"), ConfigValue::Number(42.0));
        assert!(matches!(ConfigValue::coerce(r#"{"a":1}"#), ConfigValue::Object(_)));
        assert_eq!(ConfigValue::coerce("hello"), ConfigValue::String("hello".to_string()));
    }

    #[tokio::test]
    async fn missing_required_key_is_reported() {
        let reg = registry();
        let mut req = HashMap::new();
        req.insert("adapters".to_string(), vec!["poll_interval_ms".to_string(), "api_key".to_string()]);

        let result = reg.validate_required(&req).await;
        let missing = result.unwrap_err();
        assert_eq!(missing, vec![MissingConfig { category: "adapters".to_string(), key: "api_key".to_string() }]);
    }

    #[tokio::test]
    async fn get_category_merges_defaults_and_overrides() {
        let reg = registry();
        reg.set_override("adapters", "poll_interval_ms", ConfigValue::Number(2500.0)).await;
        reg.set_override("adapters", "station_id", ConfigValue::String("KXYZ".to_string())).await;

        let merged = reg.get_category("adapters").await;
        assert_eq!(merged.get("poll_interval_ms").unwrap().as_number(), Some(2500.0));
        assert_eq!(merged.get("enabled").unwrap().as_bool(), Some(true));
        assert_eq!(merged.get("station_id").unwrap().as_str(), Some("KXYZ"));
    }

    #[tokio::test]
    async fn file_watcher_reloads_overrides_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.toml");
        std::fs::write(&path, "[adapters]\npoll_interval_ms = 1000\n").unwrap();

        let reg = Arc::new(registry());
        reg.apply_file(&ConfigFile::load(&path).unwrap()).await;
        assert_eq!(reg.get("adapters", "poll_interval_ms").await.unwrap().as_number(), Some(1000.0));

        let _watcher = spawn_config_watcher(path.clone(), reg.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        std::fs::write(&path, "[adapters]\npoll_interval_ms = 9000\n").unwrap();

        let mut reloaded = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if reg.get("adapters", "poll_interval_ms").await.unwrap().as_number() == Some(9000.0) {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "expected the watcher to pick up the rewritten file within the poll budget");
    }
}
