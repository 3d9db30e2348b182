//! Action sequencing
//!
//! Applies a sizing decision to the platform: memory resize, then disk
//! resize, then restart. A failed call is logged and recorded; it never
//! prevents the remaining steps from running.

use crate::error::{PlatformError, TrimError};
use crate::models::{InventoryUnit, SizingDecision};
use crate::observability::{RunMetrics, StructuredLogger};
use crate::platform::PlatformApi;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Action names used in logs, errors and metric labels
pub mod actions {
    pub const SCALE_MEMORY: &str = "scale memory of";
    pub const SCALE_DISK: &str = "scale disk of";
    pub const RESTART: &str = "restart";
}

/// What the sequencer did for one unit
#[derive(Debug, Default)]
pub struct ActionOutcome {
    /// False in dry-run mode, where no mutating call is issued
    pub executed: bool,
    /// Memory allocation reported by the platform after a successful resize
    pub memory_applied: Option<u64>,
    /// Disk allocation reported by the platform after a successful resize
    pub disk_applied: Option<u64>,
    pub restarted: bool,
    pub failures: Vec<TrimError>,
}

impl ActionOutcome {
    pub fn failed_calls(&self) -> usize {
        self.failures.len()
    }
}

/// Issues scale and restart calls for decided units
pub struct ActionSequencer {
    platform: Arc<dyn PlatformApi>,
    dry_run: bool,
    restart_grace: Duration,
    logger: StructuredLogger,
    metrics: RunMetrics,
}

impl ActionSequencer {
    pub fn new(platform: Arc<dyn PlatformApi>, dry_run: bool, restart_grace: Duration) -> Self {
        Self {
            platform,
            dry_run,
            restart_grace,
            logger: StructuredLogger::new(dry_run),
            metrics: RunMetrics::new(),
        }
    }

    /// Apply a decision to one unit
    pub async fn apply(&self, unit: &InventoryUnit, decision: &SizingDecision) -> ActionOutcome {
        let mut outcome = ActionOutcome::default();

        if !decision.restart_required() {
            return outcome;
        }

        if self.dry_run {
            debug!(
                unit = %unit.path(),
                memory = ?decision.memory.target(),
                disk = ?decision.disk.target(),
                "Dry run, not applying decision"
            );
            return outcome;
        }
        outcome.executed = true;

        if let Some(memory) = decision.memory.target() {
            match self.platform.scale_memory(&unit.process_guid, memory).await {
                Ok(process) => outcome.memory_applied = Some(process.memory_in_mb),
                Err(e) => self.record_failure(&mut outcome, unit, actions::SCALE_MEMORY, e),
            }
        }

        if let Some(disk) = decision.disk.target() {
            match self.platform.scale_disk(&unit.process_guid, disk).await {
                Ok(process) => outcome.disk_applied = Some(process.disk_in_mb),
                Err(e) => self.record_failure(&mut outcome, unit, actions::SCALE_DISK, e),
            }
        }

        match self.platform.restart_app(&unit.app_guid).await {
            Ok(_) => {
                outcome.restarted = true;
                self.metrics.inc_restarts();
                info!(
                    unit = %unit.path(),
                    memory_mb = ?outcome.memory_applied,
                    disk_mb = ?outcome.disk_applied,
                    "App restarted with new sizing"
                );
                // Restart acknowledgements arrive before the platform settles
                if !self.restart_grace.is_zero() {
                    tokio::time::sleep(self.restart_grace).await;
                }
            }
            Err(e) => self.record_failure(&mut outcome, unit, actions::RESTART, e),
        }

        outcome
    }

    fn record_failure(
        &self,
        outcome: &mut ActionOutcome,
        unit: &InventoryUnit,
        action: &'static str,
        source: PlatformError,
    ) {
        let error = TrimError::Action {
            action,
            unit: unit.path(),
            source,
        };
        self.logger.log_action_failed(unit, action, &error.to_string());
        self.metrics.inc_actions_failed(action);
        outcome.failures.push(error);
    }
}
