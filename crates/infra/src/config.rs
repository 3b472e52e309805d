//! Process and carrier configuration.
//!
//! `AppConfig` comes from the environment; `CarriersConfig` is a JSON file
//! describing how each courier is reached and how it numbers consignments:
//!
//! ```json
//! {
//!   "couriers": {
//!     "royal_mail": { "transport": { "kind": "log" } },
//!     "dpd": {
//!       "transport": { "kind": "file_drop", "dir": "/var/spool/dpd" },
//!       "allocator": { "kind": "prefixed", "prefix": 15, "width": 8 }
//!     }
//!   },
//!   "selection": {
//!     "weight_bands": [{ "max_grams": 2000, "courier": "royal_mail" }],
//!     "fallback": "dpd"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use consign_core::CourierId;
use consign_courier::{FlushMode, PrefixedAllocator};

use crate::selection::WeightBand;

pub const ENV_DATA_DIR: &str = "CONSIGN_DATA_DIR";
pub const ENV_CARRIERS: &str = "CONSIGN_CARRIERS";
pub const ENV_FLUSH_MODE: &str = "CONSIGN_FLUSH_MODE";

const DEFAULT_DATA_DIR: &str = "./consign-data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed carriers config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid carriers config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// `None` means the built-in carrier setup (log transports only).
    pub carriers_file: Option<PathBuf>,
    pub flush_mode: FlushMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            carriers_file: None,
            flush_mode: FlushMode::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        config.carriers_file = get(ENV_CARRIERS).map(PathBuf::from);

        if let Some(mode) = get(ENV_FLUSH_MODE) {
            match parse_flush_mode(&mode) {
                Some(m) => config.flush_mode = m,
                None => warn!(
                    value = %mode,
                    "{ENV_FLUSH_MODE} must be 'sequential' or 'concurrent'; using sequential"
                ),
            }
        }
        config
    }

    pub fn load_carriers(&self) -> Result<CarriersConfig, ConfigError> {
        match &self.carriers_file {
            Some(path) => CarriersConfig::from_path(path),
            None => {
                info!("{ENV_CARRIERS} not set; using built-in log carriers");
                Ok(CarriersConfig::default())
            }
        }
    }
}

fn parse_flush_mode(raw: &str) -> Option<FlushMode> {
    match raw.to_ascii_lowercase().as_str() {
        "sequential" => Some(FlushMode::Sequential),
        "concurrent" => Some(FlushMode::Concurrent),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSpec {
    Log,
    /// In-process recording transport; useful for tests and demos.
    Memory,
    FileDrop {
        dir: PathBuf,
    },
    Unavailable {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocatorSpec {
    Sequential {
        #[serde(default = "one")]
        start: u64,
        #[serde(default = "one")]
        step: u64,
    },
    Prefixed {
        prefix: u64,
        width: u32,
    },
}

fn one() -> u64 {
    1
}

impl Default for AllocatorSpec {
    fn default() -> Self {
        AllocatorSpec::Sequential { start: 1, step: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierSpec {
    pub transport: TransportSpec,
    #[serde(default)]
    pub allocator: AllocatorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub weight_bands: Vec<WeightBand>,
    pub fallback: CourierId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarriersConfig {
    pub couriers: BTreeMap<CourierId, CarrierSpec>,
    pub selection: SelectionConfig,
}

impl Default for CarriersConfig {
    /// Every courier logs its sends; small parcels go Royal Mail, mid-weight
    /// DPD, anything heavier Parcelforce.
    fn default() -> Self {
        let couriers = CourierId::ALL
            .iter()
            .map(|id| {
                (
                    *id,
                    CarrierSpec {
                        transport: TransportSpec::Log,
                        allocator: AllocatorSpec::default(),
                    },
                )
            })
            .collect();
        Self {
            couriers,
            selection: SelectionConfig {
                weight_bands: vec![
                    WeightBand::new(2_000, CourierId::RoyalMail),
                    WeightBand::new(30_000, CourierId::Dpd),
                ],
                fallback: CourierId::Parcelforce,
            },
        }
    }
}

impl CarriersConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        info!(path = %path.display(), couriers = config.couriers.len(), "loaded carriers config");
        Ok(config)
    }

    /// Selection may only route to configured couriers, and allocator
    /// parameters must describe a usable range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let routed = self
            .selection
            .weight_bands
            .iter()
            .map(|b| b.courier)
            .chain(std::iter::once(self.selection.fallback));
        for courier in routed {
            if !self.couriers.contains_key(&courier) {
                return Err(ConfigError::Invalid(format!(
                    "selection routes to {courier}, which has no carrier entry"
                )));
            }
        }

        for (courier, spec) in &self.couriers {
            match &spec.allocator {
                AllocatorSpec::Sequential { step: 0, .. } => {
                    return Err(ConfigError::Invalid(format!("{courier}: sequential step must be at least 1")));
                }
                AllocatorSpec::Prefixed { prefix, width } => {
                    PrefixedAllocator::new(*prefix, *width)
                        .map_err(|e| ConfigError::Invalid(format!("{courier}: {e}")))?;
                    if *width == 0 {
                        return Err(ConfigError::Invalid(format!("{courier}: prefixed width must be at least 1")));
                    }
                }
                AllocatorSpec::Sequential { .. } => {}
            }
        }
        Ok(())
    }

    pub fn spec(&self, courier: CourierId) -> Option<&CarrierSpec> {
        self.couriers.get(&courier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn env_defaults() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn env_overrides_and_bad_flush_mode_falls_back() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/srv/consign"),
            (ENV_CARRIERS, "/etc/consign/carriers.json"),
            (ENV_FLUSH_MODE, "Concurrent"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/srv/consign"));
        assert_eq!(config.carriers_file, Some(PathBuf::from("/etc/consign/carriers.json")));
        assert_eq!(config.flush_mode, FlushMode::Concurrent);

        let config = AppConfig::from_lookup(lookup(&[(ENV_FLUSH_MODE, "parallel")]));
        assert_eq!(config.flush_mode, FlushMode::Sequential);
    }

    #[test]
    fn parses_documented_shape() {
        let raw = r#"{
            "couriers": {
                "royal_mail": { "transport": { "kind": "log" } },
                "dpd": {
                    "transport": { "kind": "file_drop", "dir": "/var/spool/dpd" },
                    "allocator": { "kind": "prefixed", "prefix": 15, "width": 8 }
                },
                "ups": { "transport": { "kind": "unavailable" }, "allocator": { "kind": "sequential", "start": 500 } }
            },
            "selection": {
                "weight_bands": [{ "max_grams": 2000, "courier": "royal_mail" }],
                "fallback": "dpd"
            }
        }"#;
        let config = CarriersConfig::from_json_str(raw).unwrap();

        assert_eq!(config.spec(CourierId::RoyalMail).unwrap().allocator, AllocatorSpec::default());
        assert_eq!(
            config.spec(CourierId::Dpd).unwrap().transport,
            TransportSpec::FileDrop {
                dir: PathBuf::from("/var/spool/dpd")
            }
        );
        assert_eq!(
            config.spec(CourierId::Ups).unwrap().allocator,
            AllocatorSpec::Sequential { start: 500, step: 1 }
        );
        assert_eq!(config.selection.fallback, CourierId::Dpd);
    }

    #[test]
    fn selection_must_route_to_configured_couriers() {
        let raw = r#"{
            "couriers": { "dpd": { "transport": { "kind": "log" } } },
            "selection": { "fallback": "dhl" }
        }"#;
        assert!(matches!(CarriersConfig::from_json_str(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_step_is_invalid() {
        let raw = r#"{
            "couriers": { "dpd": { "transport": { "kind": "log" }, "allocator": { "kind": "sequential", "step": 0 } } },
            "selection": { "fallback": "dpd" }
        }"#;
        assert!(matches!(CarriersConfig::from_json_str(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_courier_key_is_a_parse_error() {
        let raw = r#"{
            "couriers": { "pigeon": { "transport": { "kind": "log" } } },
            "selection": { "fallback": "dpd" }
        }"#;
        assert!(matches!(CarriersConfig::from_json_str(raw), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn built_in_config_is_valid() {
        CarriersConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CarriersConfig::from_path(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
