//! File-based configuration loading for the demo binary and tests. The
//! core itself never parses text: `Runtime::bind` takes an already-typed
//! `PortConfig`, and this module is just one way to produce a batch of
//! them from a TOML file on disk.

use crate::error::{Kind, Result, ServeezError};
use crate::portcfg::PortConfig;
use crate::runtime::Runtime;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// One `(server instance, port)` pair as it appears in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub server: String,
    pub port: PortConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    pub max_sockets: Option<usize>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl RuntimeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig> {
        serdeconv::from_toml_file(path)
            .map_err(|e| ServeezError::Fatal(Kind::Configuration(e.to_string())))
    }

    /// Applies every entry to `rt`: sets `max_sockets` if given, then
    /// expands each port against `rt.interfaces` and binds it. A single
    /// bad entry aborts the whole batch rather than leaving the runtime
    /// half-configured.
    pub fn apply(&self, rt: &mut Runtime) -> Result<()> {
        if let Some(max) = self.max_sockets {
            rt.max_sockets = max;
        }
        for binding in &self.bindings {
            for expanded in binding.port.expand(&rt.interfaces) {
                rt.bind(binding.server.clone(), expanded)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_bindings() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.bindings.is_empty());
        assert!(cfg.max_sockets.is_none());
    }
}
