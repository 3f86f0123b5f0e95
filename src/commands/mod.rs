//! CLI subcommand handlers (C12), one module per subcommand, matching
//! soar's `commands/` layout.

pub mod config;
pub mod serve;
pub mod sources;

pub use config::handle_config_show;
pub use serve::handle_serve;
pub use sources::{handle_sources_disable, handle_sources_enable, handle_sources_list};

use crate::config::{ConfigRegistry, ConfigValue};

/// The built-in default `(category, key)` table for this process, shared
/// by `serve` (to build the live registry) and `config show` (to report
/// what would be resolved without actually starting the pipeline).
pub fn default_registry() -> ConfigRegistry {
    ConfigRegistry::with_defaults([
        ("adsb_http", "poll_interval_ms", ConfigValue::Number(5000.0)),
        ("adsb_http", "rate_limit_backoff_secs", ConfigValue::Number(15.0)),
        ("adsb_http", "default_lat", ConfigValue::Number(0.0)),
        ("adsb_http", "default_lon", ConfigValue::Number(0.0)),
        ("adsb_http", "default_dist_nm", ConfigValue::Number(250.0)),
        ("acars_ws", "max_attempts", ConfigValue::Number(5.0)),
        ("eam_watch", "poll_interval_ms", ConfigValue::Number(60_000.0)),
        ("hub", "broadcast_interval_ms", ConfigValue::Number(crate::broadcast_hub::DEFAULT_BROADCAST_INTERVAL_MS as f64)),
        ("hub", "batch_limit", ConfigValue::Number(crate::broadcast_hub::DEFAULT_BATCH_LIMIT as f64)),
        (
            "hub",
            "backpressure_threshold_bytes",
            ConfigValue::Number(crate::broadcast_hub::DEFAULT_BACKPRESSURE_THRESHOLD_BYTES as f64),
        ),
        ("eam", "window_secs", ConfigValue::Number(120.0)),
        ("eam", "promotion_threshold", ConfigValue::Number(50.0)),
        // The real header list is classified/operator-specific and is not
        // shipped as a baked-in default; operators populate it via the
        // hot-reloadable config file (spec.md §9 Open Questions).
        ("eam", "known_headers", ConfigValue::Object(serde_json::Value::Array(Vec::new()))),
        ("sources", "adsb_http", ConfigValue::Bool(true)),
        ("sources", "acars_ws", ConfigValue::Bool(true)),
        ("sources", "eam_watch", ConfigValue::Bool(true)),
    ])
}

pub const KNOWN_CATEGORIES: &[&str] = &["adsb_http", "acars_ws", "eam_watch", "hub", "eam", "sources"];
