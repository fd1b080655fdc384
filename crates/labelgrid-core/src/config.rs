//! labelgrid.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a runnable single-host configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub correlator: CorrelatorConfig,
    pub autoscale: AutoscaleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// How long a submission may wait for its result.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub input_bucket: String,
    pub output_bucket: String,
    pub task_queue: String,
    pub result_queue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep after a poll that found no task.
    pub idle_interval_ms: u64,
    /// Sleep after a retryable failure.
    pub retry_backoff_ms: u64,
    /// Lease length for a received task.
    pub visibility_timeout_secs: u64,
    /// Deliveries after which a task is answered with the error label.
    pub max_receive_count: u32,
    /// Reference images for the gallery classifier.
    pub gallery_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Results leased per poll.
    pub batch_size: usize,
    pub visibility_timeout_secs: u64,
    pub idle_interval_ms: u64,
    pub retry_backoff_ms: u64,
    /// Age after which an unclaimed result is discarded.
    pub orphan_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub max_instances: u32,
    pub interval_secs: u64,
    /// Simulated boot time of a locally provisioned instance.
    pub boot_delay_ms: u64,
    pub image: String,
    /// Tag identifying worker instances in the fleet.
    pub tag: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/labelgrid"),
            input_bucket: "labelgrid-in".to_string(),
            output_bucket: "labelgrid-out".to_string(),
            task_queue: "labelgrid-req".to_string(),
            result_queue: "labelgrid-resp".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 1000,
            retry_backoff_ms: 5000,
            visibility_timeout_secs: 15,
            max_receive_count: 5,
            gallery_dir: None,
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            visibility_timeout_secs: 5,
            idle_interval_ms: 200,
            retry_backoff_ms: 1000,
            orphan_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            max_instances: 15,
            interval_secs: 1,
            boot_delay_ms: 2000,
            image: "labelgrid-worker".to_string(),
            tag: "app-tier".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl WorkerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl CorrelatorConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AutoscaleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the embedded broker database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join("labelgrid.redb")
    }
}
