//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rt_tables;

/// Paths and limits used by the engine.
///
/// Every field has a default; a config file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// iproute2 table registry.
    pub rt_tables_path: PathBuf,
    /// Directory the boot unit is written to.
    pub unit_dir: PathBuf,
    /// Directory persisted intents are written to.
    pub state_dir: PathBuf,
    /// Binary the boot unit runs.
    pub binary_path: PathBuf,
    /// Bound on each host query during resolution.
    #[serde(with = "secs")]
    pub query_timeout: Duration,
    /// Bound on each host call while applying.
    #[serde(with = "secs")]
    pub op_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rt_tables_path: PathBuf::from(rt_tables::DEFAULT_PATH),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            state_dir: PathBuf::from("/etc/routeboot"),
            binary_path: PathBuf::from("/usr/local/bin/routeboot"),
            query_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Load a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Durations as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
