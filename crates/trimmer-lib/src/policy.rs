//! Sizing policy
//!
//! Decides, per dimension, whether a unit is over-provisioned and what its
//! new allocation should be. Memory and disk are evaluated independently;
//! health dominates every usage signal.

use crate::config::RunConfig;
use crate::models::{Resize, RuntimeFamily, SizingDecision, UsageVerdict};

/// Facts about a unit the policy needs besides its usage
#[derive(Debug, Clone, Copy)]
pub struct UnitAllocation {
    pub memory_mb: u64,
    pub disk_mb: u64,
    /// Days since the unit was last updated
    pub updated_age_days: f64,
    pub runtime_family: RuntimeFamily,
}

/// Threshold policy bound to one run's configuration
pub struct SizingPolicy<'a> {
    config: &'a RunConfig,
}

impl<'a> SizingPolicy<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Decide both dimensions for one unit
    pub fn decide(&self, usage: &UsageVerdict, unit: &UnitAllocation) -> SizingDecision {
        if !usage.is_actionable() {
            return SizingDecision::no_action();
        }

        let memory_used_percent = used_percent(usage.memory_mb, unit.memory_mb);
        let disk_used_percent = used_percent(usage.disk_mb, unit.disk_mb);
        let old_enough = unit.updated_age_days > self.config.last_updated_age_threshold;

        let memory = match memory_used_percent {
            Some(percent)
                if old_enough
                    && percent < self.config.mem_usage_threshold
                    && self.above_memory_floor(unit) =>
            {
                Resize::ShrinkTo(self.shrunk_memory(unit))
            }
            _ => Resize::NoAction,
        };

        let disk = match disk_used_percent {
            Some(percent) if old_enough && percent < self.config.disk_usage_threshold => {
                Resize::ShrinkTo(shrink(unit.disk_mb, self.config.disk_scrape_percentage))
            }
            _ => Resize::NoAction,
        };

        SizingDecision {
            memory,
            disk,
            memory_used_percent,
            disk_used_percent,
        }
    }

    /// Units of a floored runtime already at or under the floor are left alone
    fn above_memory_floor(&self, unit: &UnitAllocation) -> bool {
        !unit.runtime_family.has_memory_floor() || unit.memory_mb > self.config.java_minimum_mb
    }

    fn shrunk_memory(&self, unit: &UnitAllocation) -> u64 {
        let new_memory = shrink(unit.memory_mb, self.config.mem_scrape_percentage);
        if unit.runtime_family.has_memory_floor() {
            new_memory.max(self.config.java_minimum_mb)
        } else {
            new_memory
        }
    }
}

/// Integer usage percentage, truncating. `None` when nothing is allocated.
pub fn used_percent(used_mb: u64, allocated_mb: u64) -> Option<u64> {
    if allocated_mb == 0 {
        return None;
    }
    Some(used_mb * 100 / allocated_mb)
}

fn shrink(allocated_mb: u64, scrape_percentage: u64) -> u64 {
    allocated_mb * (100 - scrape_percentage.min(100)) / 100
}
