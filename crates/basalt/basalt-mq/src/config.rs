use serde::Deserialize;
use std::path::Path;

/// Settings for a process that provisions or attaches to a queue.
#[derive(Deserialize, Debug)]
pub struct QueueConfig {
    #[serde(default = "defaults::shm_path")]
    pub shm_path: String,
    #[serde(default = "defaults::capacity_bytes")]
    pub capacity_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("capacity {capacity} is not a positive multiple of the {quantum}-byte quantum")]
    Capacity { capacity: u64, quantum: u64 },
}

mod defaults {
    pub fn shm_path() -> String {
        "/tmp/basalt_mq_bus".into()
    }

    pub fn capacity_bytes() -> u64 {
        1 << 16 // 65536
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            shm_path: defaults::shm_path(),
            capacity_bytes: defaults::capacity_bytes(),
        }
    }
}

impl QueueConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: QueueConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    /// The configured capacity must hold a whole number of records.
    pub fn validate_for_quantum(&self, quantum: u64) -> Result<(), ConfigError> {
        if quantum == 0 || self.capacity_bytes == 0 || self.capacity_bytes % quantum != 0 {
            return Err(ConfigError::Capacity {
                capacity: self.capacity_bytes,
                quantum,
            });
        }
        Ok(())
    }
}
