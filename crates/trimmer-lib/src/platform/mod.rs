//! Platform control-plane access
//!
//! The scan only talks to the platform through [`PlatformApi`]. The
//! production implementation is [`CfClient`], a Cloud Foundry v3 REST
//! client authenticated by a token that [`SessionRefresher`] renews in the
//! background.

mod client;
mod session;

pub use client::CfClient;
pub use session::{
    refresh_delay, AccessToken, Authenticator, SessionHandle, SessionRefresher, EXPIRY_MARGIN,
    REFRESH_INTERVAL, RETRY_DELAY,
};

use crate::config::ApiSettings;
use crate::error::PlatformResult;
use crate::models::{App, InstanceSample, Organization, Process, Space};
use std::time::Duration;

pub use async_trait::async_trait;

/// Timeout applied to every platform request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Inventory, telemetry and mutation calls consumed by the scan
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// List all organizations
    async fn list_organizations(&self) -> PlatformResult<Vec<Organization>>;

    /// List the spaces of one organization
    async fn list_spaces(&self, org_guid: &str) -> PlatformResult<Vec<Space>>;

    /// List the apps of one space
    async fn list_apps(&self, space_guid: &str) -> PlatformResult<Vec<App>>;

    /// List the processes of one app
    async fn list_processes(&self, app_guid: &str) -> PlatformResult<Vec<Process>>;

    /// One sample per live instance of a process
    async fn process_stats(&self, process_guid: &str) -> PlatformResult<Vec<InstanceSample>>;

    /// First buildpack of the app's most recent droplet, if any
    async fn latest_droplet_buildpack(&self, app_guid: &str) -> PlatformResult<Option<String>>;

    /// Resize the memory allocation of a process
    async fn scale_memory(&self, process_guid: &str, memory_in_mb: u64) -> PlatformResult<Process>;

    /// Resize the disk allocation of a process
    async fn scale_disk(&self, process_guid: &str, disk_in_mb: u64) -> PlatformResult<Process>;

    /// Restart an app so new allocations take effect
    async fn restart_app(&self, app_guid: &str) -> PlatformResult<App>;
}

/// Authenticate and build a client plus the refresher keeping its session alive
pub async fn connect(settings: &ApiSettings) -> PlatformResult<(CfClient, SessionRefresher)> {
    let http = client::build_http_client(settings.skip_ssl_validation)?;
    let authenticator = Authenticator::new(http.clone(), settings)?;

    let token = authenticator.login().await?;
    let session = SessionHandle::new(token.value);
    tracing::info!(api = %settings.api_address, "Authenticated against platform API");

    let client = CfClient::with_http(http, &settings.api_address, session.clone())?;
    let refresher = SessionRefresher::new(authenticator, session, REFRESH_INTERVAL)
        .with_expiry(token.expires_in);
    Ok((client, refresher))
}
