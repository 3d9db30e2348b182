//! Core data models for the trimmer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label that opts an application out of trimming when set to "true"
pub const OPT_OUT_LABEL: &str = "NO_MEMNDISK_TRIM";

/// The only process type that gets resized
pub const WEB_PROCESS_TYPE: &str = "web";

/// Buildpack name fragment identifying the Java runtime family
const JAVA_BUILDPACK_MARKER: &str = "java_";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Organization as listed by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub guid: String,
    pub name: String,
}

/// Space as listed by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub guid: String,
    pub name: String,
}

/// Desired state of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppState {
    Started,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Application as listed by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub guid: String,
    pub name: String,
    pub state: AppState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Buildpacks declared in the app lifecycle, may be empty
    pub buildpacks: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl App {
    /// True when the opt-out label carries a truthy value
    pub fn opted_out(&self) -> bool {
        self.labels
            .get(OPT_OUT_LABEL)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.state == AppState::Started
    }
}

/// Process (a runnable unit of an app) with its current allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub guid: String,
    pub process_type: String,
    pub memory_in_mb: u64,
    pub disk_in_mb: u64,
}

/// Health state reported for a single instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Running,
    Crashed,
    Starting,
    Down,
    #[serde(other)]
    Unknown,
}

/// Observed usage of one running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSample {
    pub state: InstanceState,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

impl InstanceSample {
    pub fn running(memory_bytes: u64, disk_bytes: u64) -> Self {
        Self {
            state: InstanceState::Running,
            memory_bytes,
            disk_bytes,
        }
    }
}

/// Convert bytes to whole megabytes, truncating
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / BYTES_PER_MB
}

/// Language runtime a unit is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeFamily {
    /// Runtimes with a hard memory floor
    Java,
    Other,
    /// No buildpack could be resolved
    Unknown,
}

impl RuntimeFamily {
    pub fn from_buildpack(buildpack: &str) -> Self {
        if buildpack.is_empty() {
            RuntimeFamily::Unknown
        } else if buildpack.contains(JAVA_BUILDPACK_MARKER) {
            RuntimeFamily::Java
        } else {
            RuntimeFamily::Other
        }
    }

    pub fn has_memory_floor(&self) -> bool {
        matches!(self, RuntimeFamily::Java)
    }
}

/// One (organization, space, app, process) tuple under evaluation
#[derive(Debug, Clone, Serialize)]
pub struct InventoryUnit {
    pub org_guid: String,
    pub org_name: String,
    pub space_guid: String,
    pub space_name: String,
    pub app_guid: String,
    pub app_name: String,
    pub process_guid: String,
    pub process_type: String,
    pub memory_in_mb: u64,
    pub disk_in_mb: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub app_state: AppState,
    pub opted_out: bool,
    pub buildpack: String,
    pub runtime_family: RuntimeFamily,
}

impl InventoryUnit {
    pub fn new(
        org: &Organization,
        space: &Space,
        app: &App,
        process: &Process,
        buildpack: String,
    ) -> Self {
        Self {
            org_guid: org.guid.clone(),
            org_name: org.name.clone(),
            space_guid: space.guid.clone(),
            space_name: space.name.clone(),
            app_guid: app.guid.clone(),
            app_name: app.name.clone(),
            process_guid: process.guid.clone(),
            process_type: process.process_type.clone(),
            memory_in_mb: process.memory_in_mb,
            disk_in_mb: process.disk_in_mb,
            created_at: app.created_at,
            updated_at: app.updated_at,
            app_state: app.state,
            opted_out: app.opted_out(),
            runtime_family: RuntimeFamily::from_buildpack(&buildpack),
            buildpack,
        }
    }

    /// "org/space/app" path used in log and report lines
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.org_name, self.space_name, self.app_name)
    }

    /// Days since creation, fractional
    pub fn created_age_days(&self, now: DateTime<Utc>) -> f64 {
        age_days(self.created_at, now)
    }

    /// Days since the last update, fractional
    pub fn updated_age_days(&self, now: DateTime<Utc>) -> f64 {
        age_days(self.updated_at, now)
    }
}

fn age_days(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_seconds() as f64 / 86_400.0
}

/// Reduced telemetry of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UsageVerdict {
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub any_unhealthy: bool,
    pub healthy_instances: usize,
}

impl UsageVerdict {
    /// Usage numbers may only drive a decision when every instance is
    /// running and at least one was sampled
    pub fn is_actionable(&self) -> bool {
        !self.any_unhealthy && self.healthy_instances > 0
    }
}

/// Decision for a single dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resize {
    NoAction,
    ShrinkTo(u64),
}

impl Resize {
    pub fn target(&self) -> Option<u64> {
        match self {
            Resize::NoAction => None,
            Resize::ShrinkTo(mb) => Some(*mb),
        }
    }

    pub fn is_shrink(&self) -> bool {
        matches!(self, Resize::ShrinkTo(_))
    }
}

/// Outcome of the sizing policy for one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizingDecision {
    pub memory: Resize,
    pub disk: Resize,
    /// Usage percentages that led to the decision, when computable
    pub memory_used_percent: Option<u64>,
    pub disk_used_percent: Option<u64>,
}

impl SizingDecision {
    pub fn no_action() -> Self {
        Self {
            memory: Resize::NoAction,
            disk: Resize::NoAction,
            memory_used_percent: None,
            disk_used_percent: None,
        }
    }

    pub fn restart_required(&self) -> bool {
        self.memory.is_shrink() || self.disk.is_shrink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_with_labels(labels: &[(&str, &str)]) -> App {
        App {
            guid: "app-guid".to_string(),
            name: "web-1".to_string(),
            state: AppState::Started,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            buildpacks: vec![],
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_runtime_family_from_buildpack() {
        assert_eq!(
            RuntimeFamily::from_buildpack("java_buildpack_offline"),
            RuntimeFamily::Java
        );
        assert_eq!(
            RuntimeFamily::from_buildpack("nodejs_buildpack"),
            RuntimeFamily::Other
        );
        assert_eq!(RuntimeFamily::from_buildpack(""), RuntimeFamily::Unknown);
        assert!(!RuntimeFamily::Unknown.has_memory_floor());
    }

    #[test]
    fn test_opt_out_label() {
        assert!(app_with_labels(&[(OPT_OUT_LABEL, "true")]).opted_out());
        assert!(app_with_labels(&[(OPT_OUT_LABEL, "TRUE")]).opted_out());
        assert!(!app_with_labels(&[(OPT_OUT_LABEL, "false")]).opted_out());
        assert!(!app_with_labels(&[]).opted_out());
    }

    #[test]
    fn test_bytes_to_mb_truncates() {
        assert_eq!(bytes_to_mb(150 * 1024 * 1024 + 1023), 150);
        assert_eq!(bytes_to_mb(1024 * 1024 - 1), 0);
    }

    #[test]
    fn test_instance_state_deserializes_unknown() {
        let state: InstanceState = serde_json::from_str("\"STARTING\"").unwrap();
        assert_eq!(state, InstanceState::Starting);
        let state: InstanceState = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(state, InstanceState::Unknown);
    }

    #[test]
    fn test_restart_required() {
        let mut decision = SizingDecision::no_action();
        assert!(!decision.restart_required());
        decision.disk = Resize::ShrinkTo(100);
        assert!(decision.restart_required());
    }
}
