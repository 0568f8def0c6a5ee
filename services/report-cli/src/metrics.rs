//! Prometheus metrics, exported as a node-exporter textfile
//!
//! The libraries emit through the `metrics` facade:
//!
//! - `credential_transitions_total` (counter): label `to`
//! - `credential_refresh_total` (counter): label `outcome`
//! - `report_requests_total` (counter): label `status`
//! - `report_upstream_errors_total` (counter): label `error_type`
//! - `rate_limiter_wait_seconds` (histogram)
//!
//! A CLI run is too short-lived to scrape, so the rendered exposition is
//! written to a file on exit for the textfile collector.

use std::path::Path;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Rate limiter waits range from zero to a full window.
const WAIT_BUCKETS: &[f64] = &[0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("rate_limiter_wait_seconds".to_string()),
        WAIT_BUCKETS,
    )
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Write the current exposition to `path`, replacing it atomically so the
/// collector never reads a partial file.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("prom.tmp.{}", std::process::id()));
    std::fs::write(&tmp, handle.render())?;
    std::fs::rename(&tmp, path)
}
