//! # Host Configuration
//!
//! Configuration for the component host: worker pool sizing, the control
//! surface toggle and bind address, and liveness timing. Configuration is
//! explicit and validated; every field has a working default so the host can
//! be embedded with `HostConfig::default()` and no file at all.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use component_host::HostConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Explicit file
//! let config = HostConfig::from_yaml_file("host.yaml")?;
//!
//! // Or COMPONENT_HOST_CONFIG / defaults
//! let config = HostConfig::load()?;
//! println!("workers: {:?}", config.worker_threads);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Environment variable naming a YAML configuration file for [`HostConfig::load`].
pub const CONFIG_PATH_ENV: &str = "COMPONENT_HOST_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Worker pool size. `None` falls back to the machine's available
    /// parallelism.
    pub worker_threads: Option<usize>,

    /// Control surface (remote load/unload/list) settings.
    pub control: ControlConfig,

    /// Liveness monitoring timing.
    pub liveness: LivenessConfig,
}

/// Control surface configuration.
///
/// With `enabled: false` the host runs as a pure embedded library: no
/// listener is bound and all lifecycle operations go through the
/// [`Loader`](crate::loader::Loader) API directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,

    /// TCP bind address for the control listener. Port 0 picks an ephemeral
    /// port; the bound address is available from the running loader.
    pub bind_address: String,

    /// Namespace that relative names in remap requests resolve against.
    /// Must be absolute (leading `/`).
    pub namespace: String,
}

/// Liveness watchdog timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// A peer is judged unreachable once no heartbeat arrives for this long.
    pub heartbeat_timeout_ms: u64,

    /// How often the watchdog re-checks the last heartbeat.
    pub check_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            control: ControlConfig::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:7171".to_string(),
            namespace: "/".to_string(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 4000,
            check_interval_ms: 500,
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl HostConfig {
    /// Load configuration from the file named by `COMPONENT_HOST_CONFIG`,
    /// falling back to defaults when the variable is unset.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_yaml_file(path),
            Err(_) => {
                debug!("{CONFIG_PATH_ENV} not set, using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config: HostConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Validate field-level constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "worker_threads must be greater than 0".to_string(),
            ));
        }

        if self.control.enabled && self.control.bind_address.is_empty() {
            return Err(ConfigError::Invalid(
                "control.bind_address cannot be empty when the control surface is enabled"
                    .to_string(),
            ));
        }

        if !self.control.namespace.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "control.namespace must be absolute, got '{}'",
                self.control.namespace
            )));
        }

        if self.liveness.heartbeat_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "liveness.heartbeat_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.liveness.check_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "liveness.check_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
