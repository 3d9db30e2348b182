//! Trimmer configuration

use config::{Config, Environment, Map};
use trimmer_lib::{RawSettings, Settings, TrimError};

/// Load settings from the process environment
pub fn load() -> Result<Settings, TrimError> {
    load_from(None)
}

/// Load settings from `vars` instead of the process environment when given
fn load_from(vars: Option<Map<String, String>>) -> Result<Settings, TrimError> {
    let raw: RawSettings = Config::builder()
        .add_source(Environment::default().source(vars))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| TrimError::Configuration(vec![format!("failed to read environment: {}", e)]))?;

    raw.validate()
}
