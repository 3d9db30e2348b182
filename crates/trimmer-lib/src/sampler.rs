//! Usage sampling
//!
//! Reduces the per-instance telemetry of a unit to one representative
//! value per dimension. The maximum is used rather than the average so a
//! single hot instance keeps the whole unit from being shrunk.

use crate::models::{bytes_to_mb, InstanceSample, InstanceState, UsageVerdict};

/// Reduce instance samples to a usage verdict
pub fn sample_usage(samples: &[InstanceSample]) -> UsageVerdict {
    let mut highest_memory = 0u64;
    let mut highest_disk = 0u64;
    let mut verdict = UsageVerdict::default();

    for sample in samples {
        if sample.state != InstanceState::Running {
            verdict.any_unhealthy = true;
            continue;
        }
        verdict.healthy_instances += 1;
        highest_memory = highest_memory.max(sample.memory_bytes);
        highest_disk = highest_disk.max(sample.disk_bytes);
    }

    verdict.memory_mb = bytes_to_mb(highest_memory);
    verdict.disk_mb = bytes_to_mb(highest_disk);
    verdict
}
