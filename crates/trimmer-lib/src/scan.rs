//! Scan orchestration
//!
//! Walks organizations → spaces → apps → web processes, runs each eligible
//! process through sampler, policy and sequencer, and folds the results
//! into [`RunTotals`]. Listing organizations, spaces or apps must succeed
//! for the run to continue; a missing process list or missing stats only
//! skip the affected app.

use crate::config::RunConfig;
use crate::error::{PlatformError, TrimError, TrimResult};
use crate::models::{
    App, InstanceSample, InventoryUnit, Organization, Resize, Space, UsageVerdict,
    WEB_PROCESS_TYPE,
};
use crate::observability::{dimensions, RunMetrics, StructuredLogger};
use crate::platform::PlatformApi;
use crate::policy::{SizingPolicy, UnitAllocation};
use crate::sampler::sample_usage;
use crate::sequencer::{ActionOutcome, ActionSequencer};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Destination for human-readable progress and report lines
pub trait ReportSink: Send {
    fn line(&mut self, line: &str);
}

/// Writes report lines to stdout
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn line(&mut self, line: &str) {
        println!("{}", line);
    }
}

impl ReportSink for Vec<String> {
    fn line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Counters accumulated over one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub units_evaluated: u64,
    pub memory_victims: u64,
    pub disk_victims: u64,
    pub memory_used_mb: u64,
    pub memory_allocated_mb: u64,
    pub disk_used_mb: u64,
    pub disk_allocated_mb: u64,
    /// Restarts the platform acknowledged
    pub restarts: u64,
    /// Scale or restart calls that failed
    pub failed_actions: u64,
    /// Apps skipped because processes or stats were unavailable
    pub apps_skipped: u64,
}

impl RunTotals {
    fn record_outcome(&mut self, outcome: &ActionOutcome) {
        self.failed_actions += outcome.failed_calls() as u64;
        if outcome.restarted {
            self.restarts += 1;
        }
    }
}

/// Closing report of a scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub totals: RunTotals,
    pub elapsed: Duration,
    pub memory_reclaimed_mb: u64,
    pub disk_reclaimed_mb: u64,
    pub dry_run: bool,
}

impl ScanReport {
    fn new(totals: RunTotals, elapsed: Duration, config: &RunConfig) -> Self {
        Self {
            memory_reclaimed_mb: config.reclaimed_memory_mb(totals.memory_allocated_mb),
            disk_reclaimed_mb: config.reclaimed_disk_mb(totals.disk_allocated_mb),
            totals,
            elapsed,
            dry_run: config.dry_run,
        }
    }

    /// One-line summary printed at the end of the run
    pub fn summary_line(&self) -> String {
        let t = &self.totals;
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let memory = format!(
            "memory: victims: {}, used/allocated/freed: {}/{}/{}",
            t.memory_victims, t.memory_used_mb, t.memory_allocated_mb, self.memory_reclaimed_mb
        );
        let disk = format!(
            "disk: victims: {}, used/allocated/freed: {}/{}/{}",
            t.disk_victims, t.disk_used_mb, t.disk_allocated_mb, self.disk_reclaimed_mb
        );
        let outcome = format!(
            "restarts: {}, failed actions: {}, skipped apps: {}",
            t.restarts, t.failed_actions, t.apps_skipped
        );
        format!(
            "execution time: {:.0} secs{}, {}  /  {}  /  {}",
            self.elapsed.as_secs_f64(),
            mode,
            memory,
            disk,
            outcome
        )
    }
}

fn inventory_error(scope: String) -> impl FnOnce(PlatformError) -> TrimError {
    move |source| TrimError::Inventory { scope, source }
}

fn telemetry_error(what: &'static str, unit: String) -> impl FnOnce(PlatformError) -> TrimError {
    move |source| TrimError::Telemetry { what, unit, source }
}

/// Walks the inventory and right-sizes eligible processes
pub struct Scanner {
    platform: Arc<dyn PlatformApi>,
    config: RunConfig,
    sequencer: ActionSequencer,
    logger: StructuredLogger,
    metrics: RunMetrics,
}

impl Scanner {
    pub fn new(platform: Arc<dyn PlatformApi>, config: RunConfig) -> Self {
        let sequencer =
            ActionSequencer::new(platform.clone(), config.dry_run, config.restart_grace);
        Self {
            platform,
            sequencer,
            logger: StructuredLogger::new(config.dry_run),
            metrics: RunMetrics::new(),
            config,
        }
    }

    /// Run one full scan, returning the report or the fatal inventory error
    pub async fn run(&self, sink: &mut dyn ReportSink) -> TrimResult<ScanReport> {
        let start = Instant::now();
        let mut totals = RunTotals::default();

        info!(dry_run = self.config.dry_run, "Starting scan");

        let orgs = self
            .platform
            .list_organizations()
            .await
            .map_err(inventory_error("organizations".to_string()))?;

        for org in &orgs {
            if self.config.org_excluded(&org.name) {
                debug!(org = %org.name, "Organization excluded");
                continue;
            }
            self.scan_org(org, &mut totals, sink).await?;
        }

        let report = ScanReport::new(totals, start.elapsed(), &self.config);
        self.finish(&report, sink);
        Ok(report)
    }

    async fn scan_org(
        &self,
        org: &Organization,
        totals: &mut RunTotals,
        sink: &mut dyn ReportSink,
    ) -> TrimResult<()> {
        let spaces = self
            .platform
            .list_spaces(&org.guid)
            .await
            .map_err(inventory_error(format!("spaces of organization {}", org.name)))?;

        for space in &spaces {
            if self.config.space_excluded(&space.name) {
                debug!(org = %org.name, space = %space.name, "Space excluded");
                continue;
            }
            self.scan_space(org, space, totals, sink).await?;
        }
        Ok(())
    }

    async fn scan_space(
        &self,
        org: &Organization,
        space: &Space,
        totals: &mut RunTotals,
        sink: &mut dyn ReportSink,
    ) -> TrimResult<()> {
        let apps = self.platform.list_apps(&space.guid).await.map_err(inventory_error(
            format!("apps of space {}/{}", org.name, space.name),
        ))?;

        for app in apps.iter().filter(|app| app.is_started() && !app.opted_out()) {
            if let Err(e) = self.scan_app(org, space, app, totals, sink).await {
                let path = format!("{}/{}/{}", org.name, space.name, app.name);
                self.logger.log_unit_skipped(&path, &e.to_string());
                self.metrics.inc_units_skipped();
                totals.apps_skipped += 1;
            }
        }
        Ok(())
    }

    async fn scan_app(
        &self,
        org: &Organization,
        space: &Space,
        app: &App,
        totals: &mut RunTotals,
        sink: &mut dyn ReportSink,
    ) -> TrimResult<()> {
        let path = format!("{}/{}/{}", org.name, space.name, app.name);
        let processes = self
            .platform
            .list_processes(&app.guid)
            .await
            .map_err(telemetry_error("processes", path.clone()))?;

        let web: Vec<_> = processes
            .iter()
            .filter(|p| p.process_type == WEB_PROCESS_TYPE)
            .collect();
        if web.is_empty() {
            return Ok(());
        }

        let buildpack = self.resolve_buildpack(org, space, app).await;

        for process in web {
            let samples = self
                .platform
                .process_stats(&process.guid)
                .await
                .map_err(telemetry_error("stats", path.clone()))?;

            let unit = InventoryUnit::new(org, space, app, process, buildpack.clone());
            self.evaluate(&unit, &samples, totals, sink).await;
        }
        Ok(())
    }

    /// Buildpack from the app lifecycle, else from its most recent droplet
    async fn resolve_buildpack(&self, org: &Organization, space: &Space, app: &App) -> String {
        if let Some(buildpack) = app.buildpacks.first() {
            return buildpack.clone();
        }
        match self.platform.latest_droplet_buildpack(&app.guid).await {
            Ok(buildpack) => buildpack.unwrap_or_default(),
            Err(e) => {
                warn!(
                    org = %org.name,
                    space = %space.name,
                    app = %app.name,
                    app_guid = %app.guid,
                    error = %e,
                    "Failed to look up droplet buildpack"
                );
                String::new()
            }
        }
    }

    async fn evaluate(
        &self,
        unit: &InventoryUnit,
        samples: &[InstanceSample],
        totals: &mut RunTotals,
        sink: &mut dyn ReportSink,
    ) {
        let now = Utc::now();
        let usage = sample_usage(samples);
        let allocation = UnitAllocation {
            memory_mb: unit.memory_in_mb,
            disk_mb: unit.disk_in_mb,
            updated_age_days: unit.updated_age_days(now),
            runtime_family: unit.runtime_family,
        };
        let decision = SizingPolicy::new(&self.config).decide(&usage, &allocation);

        totals.units_evaluated += 1;
        self.metrics.inc_units_evaluated();

        if !usage.is_actionable() {
            debug!(
                unit = %unit.path(),
                any_unhealthy = usage.any_unhealthy,
                healthy_instances = usage.healthy_instances,
                "Unit not healthy, leaving allocation untouched"
            );
            return;
        }

        if let (Resize::ShrinkTo(new_mb), Some(percent)) =
            (decision.memory, decision.memory_used_percent)
        {
            totals.memory_victims += 1;
            totals.memory_used_mb += usage.memory_mb;
            totals.memory_allocated_mb += unit.memory_in_mb;
            self.report_victim(unit, &usage, dimensions::MEMORY, percent, new_mb, now, sink);
        }

        if let (Resize::ShrinkTo(new_mb), Some(percent)) =
            (decision.disk, decision.disk_used_percent)
        {
            totals.disk_victims += 1;
            totals.disk_used_mb += usage.disk_mb;
            totals.disk_allocated_mb += unit.disk_in_mb;
            self.report_victim(unit, &usage, dimensions::DISK, percent, new_mb, now, sink);
        }

        let outcome = self.sequencer.apply(unit, &decision).await;
        totals.record_outcome(&outcome);

        if outcome.restarted {
            sink.line(&format!(
                "  ==>  {} MB mem, ==> {} MB disk - {}",
                outcome.memory_applied.unwrap_or(unit.memory_in_mb),
                outcome.disk_applied.unwrap_or(unit.disk_in_mb),
                unit.path()
            ));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report_victim(
        &self,
        unit: &InventoryUnit,
        usage: &UsageVerdict,
        dimension: &str,
        percent: u64,
        new_mb: u64,
        now: chrono::DateTime<Utc>,
        sink: &mut dyn ReportSink,
    ) {
        let (used, allocated, label) = if dimension == dimensions::MEMORY {
            (usage.memory_mb, unit.memory_in_mb, " mem")
        } else {
            (usage.disk_mb, unit.disk_in_mb, "disk")
        };

        self.logger
            .log_victim(unit, dimension, used, allocated, percent, new_mb);
        self.metrics.inc_victims(dimension);

        let ages = format!(
            "created/lastupdate age: {:3.0} / {:3.0}",
            unit.created_age_days(now),
            unit.updated_age_days(now)
        );
        sink.line(&format!(
            "{:>25} {} usage (used/alloc):{:4}/{:4} ({:2}%) {} - {} ==> {} MB",
            unit.buildpack,
            label,
            used,
            allocated,
            percent,
            ages,
            unit.path(),
            new_mb,
        ));
    }

    fn finish(&self, report: &ScanReport, sink: &mut dyn ReportSink) {
        let t = &report.totals;
        self.metrics
            .set_reclaimed(dimensions::MEMORY, report.memory_reclaimed_mb);
        self.metrics
            .set_reclaimed(dimensions::DISK, report.disk_reclaimed_mb);
        self.metrics.set_scan_duration(report.elapsed.as_secs_f64());
        self.logger.log_scan_completed(
            report.elapsed.as_secs_f64(),
            t.memory_victims,
            t.disk_victims,
            report.memory_reclaimed_mb,
            report.disk_reclaimed_mb,
            t.failed_actions,
        );
        sink.line(&report.summary_line());
    }
}
