//! Run configuration
//!
//! Settings arrive as raw strings (one per environment variable) and are
//! validated once into an immutable [`RunConfig`] plus the platform
//! connection settings. Every problem is collected so an operator sees the
//! complete list in a single attempt.

use crate::error::TrimError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SCRAPE_PERCENTAGE: u64 = 20;
pub const DEFAULT_USAGE_THRESHOLD: u64 = 20;
pub const DEFAULT_AGE_THRESHOLD_DAYS: f64 = 5.0;
pub const DEFAULT_JAVA_MINIMUM_MB: u64 = 768;
pub const DEFAULT_EXCLUDED_ORG: &str = "system";
pub const DEFAULT_RESTART_GRACE: Duration = Duration::from_secs(3);

/// Unvalidated settings, keyed by lowercased environment variable name
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettings {
    pub cf_api_addr: Option<String>,
    pub cf_username: Option<String>,
    pub cf_password: Option<String>,
    pub skip_ssl_validation: Option<String>,
    pub mem_scrape_percentage: Option<String>,
    pub disk_scrape_percentage: Option<String>,
    pub mem_usage_threshold_percentage: Option<String>,
    pub disk_usage_threshold_percentage: Option<String>,
    pub last_updated_age_threshold: Option<String>,
    pub java_minimum_mb: Option<String>,
    pub excluded_orgs: Option<String>,
    pub excluded_spaces: Option<String>,
    pub dry_run: Option<String>,
    pub restart_grace_secs: Option<String>,
    pub metrics_textfile: Option<String>,
}

/// Connection settings for the platform API
#[derive(Clone)]
pub struct ApiSettings {
    pub api_address: String,
    pub client_id: String,
    pub client_secret: String,
    pub skip_ssl_validation: bool,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("api_address", &self.api_address)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("skip_ssl_validation", &self.skip_ssl_validation)
            .finish()
    }
}

/// Thresholds and options for one scan
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Percentage taken off the memory allocation when shrinking
    pub mem_scrape_percentage: u64,
    /// Percentage taken off the disk allocation when shrinking
    pub disk_scrape_percentage: u64,
    /// Memory usage percentage below which a unit is over-provisioned
    pub mem_usage_threshold: u64,
    /// Disk usage percentage below which a unit is over-provisioned
    pub disk_usage_threshold: u64,
    /// Minimum days since last update before a unit is touched
    pub last_updated_age_threshold: f64,
    /// Memory floor for the Java runtime family
    pub java_minimum_mb: u64,
    pub excluded_orgs: BTreeSet<String>,
    pub excluded_spaces: BTreeSet<String>,
    pub dry_run: bool,
    /// Pause after a restart before the next unit is processed
    pub restart_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mem_scrape_percentage: DEFAULT_SCRAPE_PERCENTAGE,
            disk_scrape_percentage: DEFAULT_SCRAPE_PERCENTAGE,
            mem_usage_threshold: DEFAULT_USAGE_THRESHOLD,
            disk_usage_threshold: DEFAULT_USAGE_THRESHOLD,
            last_updated_age_threshold: DEFAULT_AGE_THRESHOLD_DAYS,
            java_minimum_mb: DEFAULT_JAVA_MINIMUM_MB,
            excluded_orgs: BTreeSet::from([DEFAULT_EXCLUDED_ORG.to_string()]),
            excluded_spaces: BTreeSet::new(),
            dry_run: false,
            restart_grace: DEFAULT_RESTART_GRACE,
        }
    }
}

impl RunConfig {
    pub fn org_excluded(&self, name: &str) -> bool {
        self.excluded_orgs.contains(name)
    }

    pub fn space_excluded(&self, name: &str) -> bool {
        self.excluded_spaces.contains(name)
    }

    /// Estimated memory freed by shrinking `allocated_mb`
    pub fn reclaimed_memory_mb(&self, allocated_mb: u64) -> u64 {
        allocated_mb * self.mem_scrape_percentage / 100
    }

    /// Estimated disk freed by shrinking `allocated_mb`
    pub fn reclaimed_disk_mb(&self, allocated_mb: u64) -> u64 {
        allocated_mb * self.disk_scrape_percentage / 100
    }
}

/// Fully validated settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub run: RunConfig,
    pub metrics_textfile: Option<PathBuf>,
}

impl RawSettings {
    /// Validate every setting, returning all problems at once
    pub fn validate(self) -> Result<Settings, TrimError> {
        let mut errors = Vec::new();
        let defaults = RunConfig::default();

        let api_address = required(self.cf_api_addr, "CF_API_ADDR", &mut errors);
        let client_id = required(self.cf_username, "CF_USERNAME", &mut errors);
        let client_secret = required(self.cf_password, "CF_PASSWORD", &mut errors);
        let skip_ssl_validation =
            parse_or(self.skip_ssl_validation, "SKIP_SSL_VALIDATION", false, &mut errors);

        let mem_scrape_percentage = percentage(
            self.mem_scrape_percentage,
            "MEM_SCRAPE_PERCENTAGE",
            defaults.mem_scrape_percentage,
            &mut errors,
        );
        let disk_scrape_percentage = percentage(
            self.disk_scrape_percentage,
            "DISK_SCRAPE_PERCENTAGE",
            defaults.disk_scrape_percentage,
            &mut errors,
        );
        let mem_usage_threshold = percentage(
            self.mem_usage_threshold_percentage,
            "MEM_USAGE_THRESHOLD_PERCENTAGE",
            defaults.mem_usage_threshold,
            &mut errors,
        );
        let disk_usage_threshold = percentage(
            self.disk_usage_threshold_percentage,
            "DISK_USAGE_THRESHOLD_PERCENTAGE",
            defaults.disk_usage_threshold,
            &mut errors,
        );

        let last_updated_age_threshold = parse_or(
            self.last_updated_age_threshold,
            "LAST_UPDATED_AGE_THRESHOLD",
            defaults.last_updated_age_threshold,
            &mut errors,
        );
        if last_updated_age_threshold.is_nan() || last_updated_age_threshold < 0.0 {
            errors.push(format!(
                "invalid value ({}) for LAST_UPDATED_AGE_THRESHOLD: must not be negative",
                last_updated_age_threshold
            ));
        }

        let java_minimum_mb = parse_or(
            self.java_minimum_mb,
            "JAVA_MINIMUM_MB",
            defaults.java_minimum_mb,
            &mut errors,
        );
        let dry_run = parse_or(self.dry_run, "DRY_RUN", false, &mut errors);
        let restart_grace_secs = parse_or(
            self.restart_grace_secs,
            "RESTART_GRACE_SECS",
            defaults.restart_grace.as_secs(),
            &mut errors,
        );

        let excluded_orgs = match non_empty(self.excluded_orgs) {
            Some(list) => split_list(&list),
            None => defaults.excluded_orgs,
        };
        let excluded_spaces = non_empty(self.excluded_spaces)
            .map(|list| split_list(&list))
            .unwrap_or_default();

        if !errors.is_empty() {
            return Err(TrimError::Configuration(errors));
        }

        Ok(Settings {
            api: ApiSettings {
                api_address: api_address.trim_end_matches('/').to_string(),
                client_id,
                client_secret,
                skip_ssl_validation,
            },
            run: RunConfig {
                mem_scrape_percentage,
                disk_scrape_percentage,
                mem_usage_threshold,
                disk_usage_threshold,
                last_updated_age_threshold,
                java_minimum_mb,
                excluded_orgs,
                excluded_spaces,
                dry_run,
                restart_grace: Duration::from_secs(restart_grace_secs),
            },
            metrics_textfile: non_empty(self.metrics_textfile).map(PathBuf::from),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, name: &str, errors: &mut Vec<String>) -> String {
    match non_empty(value) {
        Some(v) => v,
        None => {
            errors.push(format!("missing envvar : {}", name));
            String::new()
        }
    }
}

fn parse_or<T>(value: Option<String>, name: &str, default: T, errors: &mut Vec<String>) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = non_empty(value) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().parse::<T>() {
        Ok(v) => v,
        Err(e) => {
            errors.push(format!("invalid value ({}) for {}: {}", raw, name, e));
            default
        }
    }
}

fn percentage(value: Option<String>, name: &str, default: u64, errors: &mut Vec<String>) -> u64 {
    let raw = value.clone().unwrap_or_default();
    let parsed = parse_or(value, name, default, errors);
    if !(1..=100).contains(&parsed) {
        errors.push(format!(
            "invalid value ({}) for {}: must be between 1 and 100",
            raw, name
        ));
    }
    parsed
}

fn split_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
