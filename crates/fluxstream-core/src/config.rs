use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides `download_dir` (container deployments).
pub const DOWNLOAD_PATH_ENV: &str = "DOWNLOAD_PATH";

/// Backoff parameters for transient infrastructure faults (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Job queue polling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Longest a single consume call blocks before returning empty-handed.
    pub block_secs: u64,
    /// How often an idle consume call re-checks the queue.
    pub poll_interval_ms: u64,
    /// Lifetime of a running pipeline's lease; renewed at a third of this.
    /// `recover` refuses to run while another runner's lease is live.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

fn default_lease_secs() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            block_secs: 5,
            poll_interval_ms: 200,
            lease_secs: default_lease_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Lifetime of a cached stream descriptor.
    pub cache_ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

/// Global configuration loaded from `~/.config/fluxstream/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluxConfig {
    /// Number of download workers.
    pub workers: usize,
    /// Capacity of the bounded job channel (None = same as `workers`).
    #[serde(default)]
    pub channel_capacity: Option<usize>,
    /// Capacity of the bounded error channel (None = same as `workers`).
    #[serde(default)]
    pub error_channel_capacity: Option<usize>,
    /// Consumer identity used when pulling from the job queue.
    pub consumer_name: String,
    /// Bound on the first metadata wait after a transfer is started.
    pub metadata_timeout_secs: f64,
    /// Bound on each later reader/metadata lookup.
    pub lookup_timeout_secs: f64,
    /// Root directory for persisted artifacts. None = XDG data dir.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// SQLite file holding status records and the job queue. None = XDG state dir.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Append every worker failure to `dead_letter.jsonl` in the state dir.
    #[serde(default)]
    pub dead_letter: bool,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            channel_capacity: None,
            error_channel_capacity: None,
            consumer_name: "worker-0".to_string(),
            metadata_timeout_secs: 10.0,
            lookup_timeout_secs: 5.0,
            download_dir: None,
            database_path: None,
            dead_letter: false,
            queue: QueueConfig::default(),
            retry: None,
            resolver: ResolverConfig::default(),
        }
    }
}

impl FluxConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    pub fn job_channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(self.workers).max(1)
    }

    pub fn error_capacity(&self) -> usize {
        self.error_channel_capacity.unwrap_or(self.workers).max(1)
    }

    pub fn metadata_timeout(&self) -> Duration {
        secs_f64(self.metadata_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        secs_f64(self.lookup_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.queue.lease_secs.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolver.cache_ttl_secs)
    }

    /// Resolved artifact root: `DOWNLOAD_PATH`, then `download_dir`, then
    /// `~/.local/share/fluxstream/downloads`.
    pub fn resolved_download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(DOWNLOAD_PATH_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fluxstream")?;
        Ok(xdg_dirs.get_data_home().join("downloads"))
    }

    /// Resolved database file: `database_path`, else `~/.local/state/fluxstream/fluxstream.db`.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        Ok(state_dir()?.join("fluxstream.db"))
    }

    pub fn dead_letter_path(&self) -> Result<Option<PathBuf>> {
        if !self.dead_letter {
            return Ok(None);
        }
        Ok(Some(state_dir()?.join("dead_letter.jsonl")))
    }
}

/// Upper bound for configured timeouts.
const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Non-finite or non-positive values map to zero; huge ones to [`MAX_TIMEOUT`].
fn secs_f64(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_TIMEOUT)
            .min(MAX_TIMEOUT)
    } else {
        Duration::ZERO
    }
}

/// `~/.local/state/fluxstream` (logs, database, dead-letter log).
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fluxstream")?;
    Ok(xdg_dirs.get_state_home())
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fluxstream")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FluxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FluxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FluxConfig = toml::from_str(&data)?;
    Ok(cfg)
}
