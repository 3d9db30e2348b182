//! Observability infrastructure for the trimmer
//!
//! Provides:
//! - Prometheus run metrics, written in text exposition format for a
//!   node-exporter textfile collector once the scan ends
//! - Structured logging of scan events with tracing

use crate::config::RunConfig;
use crate::models::InventoryUnit;
use anyhow::{Context, Result};
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RunMetricsInner> = OnceLock::new();

/// Label values for the resized dimension
pub mod dimensions {
    pub const MEMORY: &str = "memory";
    pub const DISK: &str = "disk";
}

struct RunMetricsInner {
    units_evaluated: IntCounter,
    victims: IntCounterVec,
    actions_failed: IntCounterVec,
    restarts: IntCounter,
    units_skipped: IntCounter,
    reclaimed_mb: IntGaugeVec,
    scan_duration_seconds: Gauge,
    last_run_timestamp: IntGauge,
}

impl RunMetricsInner {
    fn new() -> Self {
        Self {
            units_evaluated: register_int_counter!(
                "memndisk_trimmer_units_evaluated_total",
                "Number of web processes evaluated by the sizing policy"
            )
            .expect("Failed to register units_evaluated"),

            victims: register_int_counter_vec!(
                "memndisk_trimmer_victims_total",
                "Number of processes shrunk, per dimension",
                &["dimension"]
            )
            .expect("Failed to register victims"),

            actions_failed: register_int_counter_vec!(
                "memndisk_trimmer_actions_failed_total",
                "Number of failed scale or restart calls",
                &["action"]
            )
            .expect("Failed to register actions_failed"),

            restarts: register_int_counter!(
                "memndisk_trimmer_restarts_total",
                "Number of apps restarted to apply new sizing"
            )
            .expect("Failed to register restarts"),

            units_skipped: register_int_counter!(
                "memndisk_trimmer_units_skipped_total",
                "Number of apps skipped because telemetry was unavailable"
            )
            .expect("Failed to register units_skipped"),

            reclaimed_mb: register_int_gauge_vec!(
                "memndisk_trimmer_reclaimed_megabytes",
                "Estimated capacity reclaimed by the last run, per dimension",
                &["dimension"]
            )
            .expect("Failed to register reclaimed_mb"),

            scan_duration_seconds: register_gauge!(
                "memndisk_trimmer_scan_duration_seconds",
                "Wall-clock duration of the last scan"
            )
            .expect("Failed to register scan_duration_seconds"),

            last_run_timestamp: register_int_gauge!(
                "memndisk_trimmer_last_run_timestamp_seconds",
                "Unix time at which the last scan completed"
            )
            .expect("Failed to register last_run_timestamp"),
        }
    }
}

/// Run metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct RunMetrics {
    _private: (),
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RunMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RunMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_units_evaluated(&self) {
        self.inner().units_evaluated.inc();
    }

    pub fn inc_victims(&self, dimension: &str) {
        self.inner().victims.with_label_values(&[dimension]).inc();
    }

    pub fn inc_actions_failed(&self, action: &str) {
        self.inner().actions_failed.with_label_values(&[action]).inc();
    }

    pub fn inc_restarts(&self) {
        self.inner().restarts.inc();
    }

    pub fn inc_units_skipped(&self) {
        self.inner().units_skipped.inc();
    }

    pub fn set_reclaimed(&self, dimension: &str, megabytes: u64) {
        self.inner()
            .reclaimed_mb
            .with_label_values(&[dimension])
            .set(megabytes as i64);
    }

    pub fn set_scan_duration(&self, secs: f64) {
        self.inner().scan_duration_seconds.set(secs);
        self.inner()
            .last_run_timestamp
            .set(chrono::Utc::now().timestamp());
    }

    /// Render all registered metrics in text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&prometheus::gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }

    /// Atomically replace `path` with the current metrics
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, rendered)
            .with_context(|| format!("Failed to write metrics to {:?}", tmp))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move metrics into {:?}", path))?;
        Ok(())
    }
}

/// Structured logger for scan events
#[derive(Clone)]
pub struct StructuredLogger {
    dry_run: bool,
}

impl StructuredLogger {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Log the effective run options
    pub fn log_run_config(&self, api_address: &str, client_id: &str, config: &RunConfig) {
        info!(
            event = "run_config",
            api = %api_address,
            client_id = %client_id,
            mem_scrape_percentage = config.mem_scrape_percentage,
            disk_scrape_percentage = config.disk_scrape_percentage,
            mem_usage_threshold = config.mem_usage_threshold,
            disk_usage_threshold = config.disk_usage_threshold,
            last_updated_age_threshold = config.last_updated_age_threshold,
            java_minimum_mb = config.java_minimum_mb,
            excluded_orgs = ?config.excluded_orgs,
            excluded_spaces = ?config.excluded_spaces,
            dry_run = config.dry_run,
            restart_grace_secs = config.restart_grace.as_secs(),
            "Running with the following options"
        );
    }

    /// Log a unit selected for shrinking on one dimension
    pub fn log_victim(
        &self,
        unit: &InventoryUnit,
        dimension: &str,
        used_mb: u64,
        allocated_mb: u64,
        used_percent: u64,
        new_mb: u64,
    ) {
        info!(
            event = "unit_victim",
            dry_run = self.dry_run,
            org = %unit.org_name,
            space = %unit.space_name,
            app = %unit.app_name,
            process_guid = %unit.process_guid,
            buildpack = %unit.buildpack,
            dimension = %dimension,
            used_mb = used_mb,
            allocated_mb = allocated_mb,
            used_percent = used_percent,
            new_mb = new_mb,
            "Over-provisioned process selected for shrinking"
        );
    }

    /// Log a failed resize or restart call
    pub fn log_action_failed(&self, unit: &InventoryUnit, action: &str, error: &str) {
        warn!(
            event = "action_failed",
            org = %unit.org_name,
            space = %unit.space_name,
            app = %unit.app_name,
            process_guid = %unit.process_guid,
            action = %action,
            error = %error,
            "Platform call failed, continuing scan"
        );
    }

    /// Log an app skipped because its processes or stats were unavailable
    pub fn log_unit_skipped(&self, path: &str, reason: &str) {
        warn!(
            event = "unit_skipped",
            unit = %path,
            reason = %reason,
            "Skipping app"
        );
    }

    /// Log the closing totals of a scan
    pub fn log_scan_completed(
        &self,
        elapsed_secs: f64,
        memory_victims: u64,
        disk_victims: u64,
        memory_reclaimed_mb: u64,
        disk_reclaimed_mb: u64,
        failed_actions: u64,
    ) {
        info!(
            event = "scan_completed",
            dry_run = self.dry_run,
            elapsed_secs = elapsed_secs,
            memory_victims = memory_victims,
            disk_victims = disk_victims,
            memory_reclaimed_mb = memory_reclaimed_mb,
            disk_reclaimed_mb = disk_reclaimed_mb,
            failed_actions = failed_actions,
            "Scan completed"
        );
    }
}
