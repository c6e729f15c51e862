use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for gridmr
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub blobstore: BlobStoreConfig,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            worker: WorkerConfig::default(),
            blobstore: BlobStoreConfig::default(),
            scheduling: SchedulingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        // Try to load from GRIDMR_CONFIG env var first
        if let Ok(config_path) = std::env::var("GRIDMR_CONFIG") {
            return Self::load(&config_path);
        }

        // Try default locations
        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/gridmr/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid scheduler port".to_string()));
        }

        if self.worker.capacity == 0 {
            return Err(Error::Config("Worker capacity must be > 0".to_string()));
        }

        if self.scheduling.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be > 0".to_string()));
        }

        if self.scheduling.straggler_threshold <= 1.0 {
            return Err(Error::Config(
                "straggler_threshold must be > 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.scheduling.min_baseline_ratio) {
            return Err(Error::Config(
                "min_baseline_ratio must lie in [0, 1]".to_string(),
            ));
        }

        if self.scheduling.heartbeat_timeout_ms >= self.scheduling.dead_timeout_ms {
            return Err(Error::Config(
                "heartbeat_timeout must be shorter than dead_timeout".to_string(),
            ));
        }

        Ok(())
    }
}

/// Scheduler HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_scheduler_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_scheduler_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_scheduler_port() -> u16 {
    8070
}

/// Worker process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_worker_port")]
    pub port: u16,

    /// Endpoint the scheduler should dispatch to; defaults to host:port
    #[serde(default)]
    pub advertise_endpoint: Option<String>,

    /// Scheduler base URL for registration, heartbeats and completions
    #[serde(default = "default_scheduler_url")]
    pub scheduler_url: String,

    /// Concurrent task slots offered by this worker
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Heartbeat period
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Inject a fixed delay before each task (straggler testing only)
    #[serde(default)]
    pub simulate_straggler: bool,

    /// Injected delay when simulate_straggler is set
    #[serde(default = "default_straggler_delay_ms")]
    pub straggler_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_worker_port(),
            advertise_endpoint: None,
            scheduler_url: default_scheduler_url(),
            capacity: default_capacity(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            simulate_straggler: false,
            straggler_delay_ms: default_straggler_delay_ms(),
        }
    }
}

impl WorkerConfig {
    /// Heartbeat period as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Straggler-simulation delay as a Duration
    pub fn straggler_delay(&self) -> Duration {
        Duration::from_millis(self.straggler_delay_ms)
    }
}

fn default_worker_port() -> u16 {
    8071
}

fn default_scheduler_url() -> String {
    "http://127.0.0.1:8070".to_string()
}

fn default_capacity() -> usize {
    1
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_straggler_delay_ms() -> u64 {
    10_000
}

/// Blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    /// Root directory of the shared store
    #[serde(default = "default_blobstore_root")]
    pub root: String,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            root: default_blobstore_root(),
        }
    }
}

fn default_blobstore_root() -> String {
    "/data".to_string()
}

/// Scheduling tuneables
///
/// Every knob of the scheduling core is named here so deployments can
/// enumerate and override them from one TOML table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Silent workers become Suspect after this long
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Silent workers become Dead after this long
    #[serde(default = "default_dead_timeout_ms")]
    pub dead_timeout_ms: u64,

    /// Liveness sweeper period
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Straggler monitor period
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Dispatch loop period
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// An attempt is a straggler once elapsed exceeds this multiple of the
    /// phase median
    #[serde(default = "default_straggler_threshold")]
    pub straggler_threshold: f64,

    /// Fraction of a phase that must be committed before the median is
    /// considered established
    #[serde(default = "default_min_baseline_ratio")]
    pub min_baseline_ratio: f64,

    /// Dispatches per task before the task (and its job) fail
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-attempt deadline as a multiple of the phase median
    #[serde(default = "default_task_deadline_factor")]
    pub task_deadline_factor: f64,

    /// A worker that ignores a cancellation this long is treated as Suspect
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Temporaries older than this are garbage collected
    #[serde(default = "default_tmp_gc_age_secs")]
    pub tmp_gc_age_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            dead_timeout_ms: default_dead_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            check_interval_ms: default_check_interval_ms(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            straggler_threshold: default_straggler_threshold(),
            min_baseline_ratio: default_min_baseline_ratio(),
            max_attempts: default_max_attempts(),
            task_deadline_factor: default_task_deadline_factor(),
            cancel_grace_ms: default_cancel_grace_ms(),
            tmp_gc_age_secs: default_tmp_gc_age_secs(),
        }
    }
}

impl SchedulingConfig {
    /// Sweeper period as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Straggler monitor period as a Duration
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Dispatch loop period as a Duration
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_dead_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_check_interval_ms() -> u64 {
    5_000
}

fn default_dispatch_interval_ms() -> u64 {
    200
}

fn default_straggler_threshold() -> f64 {
    1.5
}

fn default_min_baseline_ratio() -> f64 {
    0.25
}

fn default_max_attempts() -> u32 {
    3
}

fn default_task_deadline_factor() -> f64 {
    5.0
}

fn default_cancel_grace_ms() -> u64 {
    10_000
}

fn default_tmp_gc_age_secs() -> u64 {
    3_600
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
