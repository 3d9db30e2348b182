//! Cloud Foundry v3 REST client

use super::{async_trait, PlatformApi, SessionHandle, REQUEST_TIMEOUT};
use crate::error::{PlatformError, PlatformResult};
use crate::models::{App, AppState, InstanceSample, InstanceState, Organization, Process, Space};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

const PER_PAGE: &str = "5000";

/// Build the HTTP client shared by the API client and the authenticator
pub(crate) fn build_http_client(skip_ssl_validation: bool) -> PlatformResult<Client> {
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(skip_ssl_validation)
        .build()?;
    Ok(client)
}

// Wire types

#[derive(Debug, Deserialize)]
struct Page<T> {
    resources: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct NamedResource {
    guid: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AppResource {
    guid: String,
    name: String,
    state: AppState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    lifecycle: Lifecycle,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Lifecycle {
    #[serde(default)]
    data: LifecycleData,
}

#[derive(Debug, Default, Deserialize)]
struct LifecycleData {
    #[serde(default)]
    buildpacks: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    labels: HashMap<String, Option<String>>,
}

impl From<AppResource> for App {
    fn from(r: AppResource) -> Self {
        App {
            guid: r.guid,
            name: r.name,
            state: r.state,
            created_at: r.created_at,
            updated_at: r.updated_at,
            buildpacks: r.lifecycle.data.buildpacks,
            labels: r
                .metadata
                .labels
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProcessResource {
    guid: String,
    #[serde(rename = "type")]
    process_type: String,
    memory_in_mb: u64,
    disk_in_mb: u64,
}

impl From<ProcessResource> for Process {
    fn from(r: ProcessResource) -> Self {
        Process {
            guid: r.guid,
            process_type: r.process_type,
            memory_in_mb: r.memory_in_mb,
            disk_in_mb: r.disk_in_mb,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatsResource {
    state: InstanceState,
    #[serde(default)]
    usage: Option<StatsUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct StatsUsage {
    #[serde(default)]
    mem: u64,
    #[serde(default)]
    disk: u64,
}

#[derive(Debug, Deserialize)]
struct DropletResource {
    #[serde(default)]
    buildpacks: Option<Vec<DropletBuildpack>>,
}

#[derive(Debug, Deserialize)]
struct DropletBuildpack {
    name: String,
}

#[derive(Debug, Serialize)]
struct ScaleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_in_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_in_mb: Option<u64>,
}

/// Platform API client over Cloud Foundry v3
pub struct CfClient {
    http: Client,
    base_url: Url,
    session: SessionHandle,
}

impl CfClient {
    /// Create a new client with its own HTTP connection pool
    pub fn new(
        base_url: &str,
        session: SessionHandle,
        skip_ssl_validation: bool,
    ) -> PlatformResult<Self> {
        Self::with_http(build_http_client(skip_ssl_validation)?, base_url, session)
    }

    pub(crate) fn with_http(
        http: Client,
        base_url: &str,
        session: SessionHandle,
    ) -> PlatformResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Relative joins replace the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> PlatformResult<Url> {
        let mut url = self.base_url.join(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Send a request with the current session token and decode the body
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> PlatformResult<T> {
        let token = self.session.token().await;
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api { status, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch every page of a list endpoint
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> PlatformResult<Vec<T>> {
        let mut query = query.to_vec();
        query.push(("per_page", PER_PAGE));
        let mut next = Some(self.url(path, &query)?);
        let mut resources = Vec::new();

        while let Some(url) = next.take() {
            debug!(url = %url, "Listing resources");
            let page: Page<T> = self.send(self.http.get(url)).await?;
            resources.extend(page.resources);
            next = match page.pagination.and_then(|p| p.next) {
                Some(link) => Some(Url::parse(&link.href)?),
                None => None,
            };
        }

        Ok(resources)
    }

    async fn scale(&self, process_guid: &str, request: ScaleRequest) -> PlatformResult<Process> {
        let url = self.url(&format!("v3/processes/{}/actions/scale", process_guid), &[])?;
        let process: ProcessResource = self.send(self.http.post(url).json(&request)).await?;
        Ok(process.into())
    }
}

#[async_trait]
impl PlatformApi for CfClient {
    async fn list_organizations(&self) -> PlatformResult<Vec<Organization>> {
        let orgs: Vec<NamedResource> = self.list_all("v3/organizations", &[]).await?;
        Ok(orgs
            .into_iter()
            .map(|r| Organization {
                guid: r.guid,
                name: r.name,
            })
            .collect())
    }

    async fn list_spaces(&self, org_guid: &str) -> PlatformResult<Vec<Space>> {
        let spaces: Vec<NamedResource> = self
            .list_all("v3/spaces", &[("organization_guids", org_guid)])
            .await?;
        Ok(spaces
            .into_iter()
            .map(|r| Space {
                guid: r.guid,
                name: r.name,
            })
            .collect())
    }

    async fn list_apps(&self, space_guid: &str) -> PlatformResult<Vec<App>> {
        let apps: Vec<AppResource> = self
            .list_all("v3/apps", &[("space_guids", space_guid)])
            .await?;
        Ok(apps.into_iter().map(App::from).collect())
    }

    async fn list_processes(&self, app_guid: &str) -> PlatformResult<Vec<Process>> {
        let processes: Vec<ProcessResource> = self
            .list_all(&format!("v3/apps/{}/processes", app_guid), &[])
            .await?;
        Ok(processes.into_iter().map(Process::from).collect())
    }

    async fn process_stats(&self, process_guid: &str) -> PlatformResult<Vec<InstanceSample>> {
        let url = self.url(&format!("v3/processes/{}/stats", process_guid), &[])?;
        let page: Page<StatsResource> = self.send(self.http.get(url)).await?;
        Ok(page
            .resources
            .into_iter()
            .map(|stat| {
                let usage = stat.usage.unwrap_or_default();
                InstanceSample {
                    state: stat.state,
                    memory_bytes: usage.mem,
                    disk_bytes: usage.disk,
                }
            })
            .collect())
    }

    async fn latest_droplet_buildpack(&self, app_guid: &str) -> PlatformResult<Option<String>> {
        let url = self.url(
            "v3/droplets",
            &[
                ("app_guids", app_guid),
                ("order_by", "-created_at"),
                ("per_page", "1"),
            ],
        )?;
        let page: Page<DropletResource> = self.send(self.http.get(url)).await?;
        Ok(page
            .resources
            .into_iter()
            .next()
            .and_then(|d| d.buildpacks)
            .and_then(|bps| bps.into_iter().next())
            .map(|bp| bp.name))
    }

    async fn scale_memory(&self, process_guid: &str, memory_in_mb: u64) -> PlatformResult<Process> {
        self.scale(
            process_guid,
            ScaleRequest {
                memory_in_mb: Some(memory_in_mb),
                disk_in_mb: None,
            },
        )
        .await
    }

    async fn scale_disk(&self, process_guid: &str, disk_in_mb: u64) -> PlatformResult<Process> {
        self.scale(
            process_guid,
            ScaleRequest {
                memory_in_mb: None,
                disk_in_mb: Some(disk_in_mb),
            },
        )
        .await
    }

    async fn restart_app(&self, app_guid: &str) -> PlatformResult<App> {
        let url = self.url(&format!("v3/apps/{}/actions/restart", app_guid), &[])?;
        let app: AppResource = self.send(self.http.post(url)).await?;
        Ok(app.into())
    }
}
