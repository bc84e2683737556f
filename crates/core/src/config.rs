use serde::Deserialize;
use std::path::Path;

use crate::error::GrowthResult;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `GROWTH_FUNNELS__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    /// Skip events whose `event_id` was already ingested.
    #[serde(default = "default_dedupe_event_ids")]
    pub dedupe_event_ids: bool,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_json")]
    pub json: bool,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_dedupe_event_ids() -> bool {
    false
}
fn default_max_steps() -> usize {
    32
}
fn default_log_json() -> bool {
    false
}
fn default_log_filter() -> String {
    "growth_funnels=info,growth_reporting=info".to_string()
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            dedupe_event_ids: default_dedupe_event_ids(),
            max_steps: default_max_steps(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: default_log_json(),
            filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file, then environment
    /// variables (which take precedence).
    pub fn load(path: Option<&Path>) -> GrowthResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("GROWTH_FUNNELS")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}
