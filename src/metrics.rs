//! Prometheus metrics (C13).
//!
//! Grounded in soar's `metrics.rs`: a `PrometheusBuilder`-installed global
//! recorder, a `/metrics` axum handler rendering the registered
//! `PrometheusHandle`, and `initialize_*_metrics()` functions that zero out
//! every gauge/counter up front so they appear in Prometheus before any
//! real event occurs. The CPU/heap profiling handlers in soar's version
//! depend on `pprof`, which this crate does not carry, and are dropped.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder. Must run once, before any
/// `metrics::*!` call, and before [`initialize_all`] so the zeroed series
/// are captured by the installed recorder rather than a default no-op one.
pub fn init_metrics_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new().install_recorder().expect("failed to install Prometheus recorder");
    METRICS_HANDLE.set(handle.clone()).ok();
    handle
}

/// Renders the current Prometheus exposition text, for the `/metrics`
/// handler in `web.rs`.
pub fn render() -> String {
    METRICS_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

/// Zero-initializes every counter/gauge named in §4.13 so dashboards and
/// alerts built against them don't wait for the first real event.
pub fn initialize_all(adapter_sources: &[&str]) {
    for source in adapter_sources {
        metrics::counter!("adapter_messages_total", "source" => source.to_string()).absolute(0);
        metrics::gauge!("adapter_connected", "source" => source.to_string()).set(0.0);
    }

    metrics::gauge!("tracker_aircraft_active", "kind" => "adsb").set(0.0);
    metrics::gauge!("tracker_aircraft_active", "kind" => "hfgcs").set(0.0);
    metrics::counter!("tracker_evictions_total", "kind" => "adsb").absolute(0);
    metrics::counter!("tracker_evictions_total", "kind" => "hfgcs").absolute(0);

    metrics::gauge!("eam_drafts_open").set(0.0);
    metrics::counter!("eam_promoted_total", "type" => "eam").absolute(0);
    metrics::counter!("eam_promoted_total", "type" => "sky_king").absolute(0);
    metrics::counter!("eam_repeats_total").absolute(0);
    metrics::counter!("eam_drafts_dropped_total").absolute(0);

    metrics::gauge!("hub_subscribers").set(0.0);
    metrics::gauge!("hub_queue_depth").set(0.0);
    metrics::counter!("hub_slow_subscriber_total").absolute(0);
    metrics::counter!("hub_dropped_messages_total").absolute(0);
}

/// Records one adapter error, tagged by source and error category
/// (matching [`crate::errors::HubError::category`]).
pub fn record_adapter_error(source: &str, kind: &str) {
    metrics::counter!("adapter_errors_total", "source" => source.to_string(), "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_all_does_not_panic_without_a_recorder() {
        // metrics::counter!/gauge! no-op against the default recorder when
        // none has been installed, so this should never panic even outside
        // a process that called init_metrics_recorder.
        initialize_all(&["adsb_http", "acars_ws"]);
        record_adapter_error("adsb_http", "transport");
    }
}
