use crate::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub analysis: AnalysisDefaults,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    /// Upper bound for a single call; 0 disables it.
    #[serde(default)]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub connect_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisDefaults {
    pub distance: u32,
    pub hash_algorithm: HashAlgorithm,
    pub hash_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_ms: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Loads configuration from built-in defaults, then `path` (or
/// `config/default` if present), then `DEDUP__SECTION__KEY` variables.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder()
        .set_default("server.base_url", "http://localhost:3000")?
        .set_default("server.request_timeout_secs", 30)?
        .set_default("server.connect_timeout_secs", 10)?
        .set_default("analysis.distance", 10)?
        .set_default("analysis.hash_algorithm", "phash")?
        .set_default("analysis.hash_size", 16)?
        .set_default("poll.interval_ms", 1000)?;
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("DEDUP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
