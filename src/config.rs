//! Simulator configuration using Figment
//!
//! Configuration is layered, later sources winning:
//! 1. built-in defaults
//! 2. a TOML file (`config/eiger.toml` unless another path is given)
//! 3. environment variables prefixed with `EIGER_SIM_`, `__` separating
//!    nested keys (`EIGER_SIM_EIGER__PORT=8082`,
//!    `EIGER_SIM_EIGER__SETTINGS__NIMAGES=10`)
//!
//! # Example
//! ```no_run
//! use tickit_devices::config::SimConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimConfig::load()?;
//! config.validate()?;
//! let device = config.eiger.build_device()?;
//! # Ok(())
//! # }
//! ```

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use sim_core::{FieldStore, SimResult};
use sim_driver_eiger::EigerDevice;
use sim_server::EigerComponentConfig;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/eiger.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "EIGER_SIM_";

/// Top-level simulator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Eiger component settings
    #[serde(default)]
    pub eiger: EigerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Eiger network bindings and initial detector settings
///
/// The bindings sit directly in the `[eiger]` table next to `settings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EigerConfig {
    /// REST and stream bindings
    #[serde(flatten)]
    pub component: EigerComponentConfig,
    /// Detector config values written before the REST API comes up,
    /// keyed by field name (`nimages`, `trigger_mode`, ...)
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

// Default value functions
fn default_name() -> String {
    "Eiger Simulator".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl EigerConfig {
    /// Create a detector with the configured settings applied.
    ///
    /// Each value goes through the same checks as a REST `PUT`, so an
    /// unknown, read-only or out-of-range setting is an error.
    pub fn build_device(&self) -> SimResult<EigerDevice> {
        let mut device = EigerDevice::new();
        for (name, value) in &self.settings {
            let changed = device.settings_mut().put_json(name, value)?;
            tracing::debug!("Configured {} = {} (changed {:?})", name, value, changed);
        }
        Ok(device)
    }
}

impl SimConfig {
    /// Load from the default file and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(SimConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        // port 0 asks the OS for a free port and may repeat
        let bindings = &self.eiger.component;
        let ports = [
            ("port", bindings.port),
            ("stream_legacy_port", bindings.stream_legacy_port),
            ("stream_cbor_port", bindings.stream_cbor_port),
        ];
        let mut seen = HashMap::new();
        for (name, port) in ports.into_iter().filter(|(_, port)| *port != 0) {
            if let Some(other) = seen.insert(port, name) {
                return Err(format!(
                    "Port {} is used by both {} and {}",
                    port, other, name
                ));
            }
        }

        if bindings.stream_high_water_mark == 0 {
            return Err("stream_high_water_mark must be at least 1".to_string());
        }

        Ok(())
    }
}
