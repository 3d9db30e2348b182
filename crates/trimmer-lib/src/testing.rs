//! In-memory platform and fixtures for unit tests

use crate::error::{PlatformError, PlatformResult};
use crate::models::{App, AppState, InstanceSample, InventoryUnit, Organization, Process, Space};
use crate::platform::{async_trait, PlatformApi};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const MB: u64 = 1024 * 1024;

pub fn org(guid: &str, name: &str) -> Organization {
    Organization {
        guid: guid.to_string(),
        name: name.to_string(),
    }
}

pub fn space(guid: &str, name: &str) -> Space {
    Space {
        guid: guid.to_string(),
        name: name.to_string(),
    }
}

/// Started app last updated `updated_days_ago` days ago
pub fn app(guid: &str, name: &str, updated_days_ago: i64, buildpacks: &[&str]) -> App {
    let now = Utc::now();
    App {
        guid: guid.to_string(),
        name: name.to_string(),
        state: AppState::Started,
        created_at: now - ChronoDuration::days(updated_days_ago + 30),
        updated_at: now - ChronoDuration::days(updated_days_ago),
        buildpacks: buildpacks.iter().map(|b| b.to_string()).collect(),
        labels: HashMap::new(),
    }
}

pub fn web_process(guid: &str, memory_in_mb: u64, disk_in_mb: u64) -> Process {
    Process {
        guid: guid.to_string(),
        process_type: "web".to_string(),
        memory_in_mb,
        disk_in_mb,
    }
}

/// acme/prod/web-1 with a 1024 MB / 2048 MB web process
pub fn unit_fixture() -> InventoryUnit {
    InventoryUnit::new(
        &org("org-1", "acme"),
        &space("space-1", "prod"),
        &app("app-1", "web-1", 10, &["nodejs_buildpack"]),
        &web_process("p1", 1024, 2048),
        "nodejs_buildpack".to_string(),
    )
}

fn injected(op: &str) -> PlatformError {
    PlatformError::Api {
        status: 500,
        body: format!("injected failure in {}", op),
    }
}

/// Platform double with canned inventory and a call log
#[derive(Default)]
pub struct MockPlatform {
    orgs: Vec<Organization>,
    spaces: HashMap<String, Vec<Space>>,
    apps: HashMap<String, Vec<App>>,
    processes: HashMap<String, Vec<Process>>,
    stats: HashMap<String, Vec<InstanceSample>>,
    droplets: HashMap<String, String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
    mutating: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail an operation, either for every target ("op") or one ("op:guid")
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    pub fn with_org(mut self, org: Organization) -> Self {
        self.orgs.push(org);
        self
    }

    pub fn with_space(mut self, org_guid: &str, space: Space) -> Self {
        self.spaces.entry(org_guid.to_string()).or_default().push(space);
        self
    }

    pub fn with_app(mut self, space_guid: &str, app: App) -> Self {
        self.apps.entry(space_guid.to_string()).or_default().push(app);
        self
    }

    pub fn with_process(mut self, app_guid: &str, process: Process) -> Self {
        self.processes
            .entry(app_guid.to_string())
            .or_default()
            .push(process);
        self
    }

    pub fn with_stats(mut self, process_guid: &str, samples: Vec<InstanceSample>) -> Self {
        self.stats.insert(process_guid.to_string(), samples);
        self
    }

    pub fn with_droplet(mut self, app_guid: &str, buildpack: &str) -> Self {
        self.droplets
            .insert(app_guid.to_string(), buildpack.to_string());
        self
    }

    /// Every call made so far, as "op:args"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.calls()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn mutating_calls(&self) -> usize {
        self.mutating.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str, guid: &str, extra: Option<u64>) -> PlatformResult<()> {
        let entry = match extra {
            Some(v) => format!("{}:{}:{}", op, guid, v),
            None => format!("{}:{}", op, guid),
        };
        self.calls.lock().unwrap().push(entry);
        if self.failing.contains(op) || self.failing.contains(&format!("{}:{}", op, guid)) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn find_process(&self, guid: &str) -> Process {
        self.processes
            .values()
            .flatten()
            .find(|p| p.guid == guid)
            .cloned()
            .unwrap_or_else(|| web_process(guid, 0, 0))
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn list_organizations(&self) -> PlatformResult<Vec<Organization>> {
        self.record("list_organizations", "", None)?;
        Ok(self.orgs.clone())
    }

    async fn list_spaces(&self, org_guid: &str) -> PlatformResult<Vec<Space>> {
        self.record("list_spaces", org_guid, None)?;
        Ok(self.spaces.get(org_guid).cloned().unwrap_or_default())
    }

    async fn list_apps(&self, space_guid: &str) -> PlatformResult<Vec<App>> {
        self.record("list_apps", space_guid, None)?;
        Ok(self.apps.get(space_guid).cloned().unwrap_or_default())
    }

    async fn list_processes(&self, app_guid: &str) -> PlatformResult<Vec<Process>> {
        self.record("list_processes", app_guid, None)?;
        Ok(self.processes.get(app_guid).cloned().unwrap_or_default())
    }

    async fn process_stats(&self, process_guid: &str) -> PlatformResult<Vec<InstanceSample>> {
        self.record("process_stats", process_guid, None)?;
        Ok(self.stats.get(process_guid).cloned().unwrap_or_default())
    }

    async fn latest_droplet_buildpack(&self, app_guid: &str) -> PlatformResult<Option<String>> {
        self.record("latest_droplet_buildpack", app_guid, None)?;
        Ok(self.droplets.get(app_guid).cloned())
    }

    async fn scale_memory(&self, process_guid: &str, memory_in_mb: u64) -> PlatformResult<Process> {
        self.mutating.fetch_add(1, Ordering::SeqCst);
        self.record("scale_memory", process_guid, Some(memory_in_mb))?;
        Ok(Process {
            memory_in_mb,
            ..self.find_process(process_guid)
        })
    }

    async fn scale_disk(&self, process_guid: &str, disk_in_mb: u64) -> PlatformResult<Process> {
        self.mutating.fetch_add(1, Ordering::SeqCst);
        self.record("scale_disk", process_guid, Some(disk_in_mb))?;
        Ok(Process {
            disk_in_mb,
            ..self.find_process(process_guid)
        })
    }

    async fn restart_app(&self, app_guid: &str) -> PlatformResult<App> {
        self.mutating.fetch_add(1, Ordering::SeqCst);
        self.record("restart", app_guid, None)?;
        Ok(self
            .apps
            .values()
            .flatten()
            .find(|a| a.guid == app_guid)
            .cloned()
            .unwrap_or_else(|| app(app_guid, app_guid, 0, &[])))
    }
}
