//! Global configuration model for the mole runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Registry endpoints used to pull images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEndpoints {
    /// Token endpoint issuing anonymous pull tokens.
    pub auth_url: String,
    /// `service` parameter sent to the token endpoint.
    pub service: String,
    /// Base URL of the registry's v2 API.
    pub registry_url: String,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            auth_url: constants::DEFAULT_AUTH_URL.into(),
            service: constants::DEFAULT_AUTH_SERVICE.into(),
            registry_url: constants::DEFAULT_REGISTRY_URL.into(),
        }
    }
}

/// Root configuration for the mole runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoleConfig {
    /// Base directory for mole state (layer cache).
    pub data_dir: PathBuf,
    /// Registry to pull from.
    pub registry: RegistryEndpoints,
}

impl MoleConfig {
    /// Builds a configuration rooted at an explicit data directory.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            registry: RegistryEndpoints::default(),
        }
    }

    /// Returns the layer cache root, `<data_dir>/layers`.
    #[must_use]
    pub fn layers_dir(&self) -> PathBuf {
        self.data_dir.join(constants::LAYERS_DIR)
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for MoleConfig {
    fn default() -> Self {
        Self::with_data_dir(constants::data_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_dir_is_under_data_dir() {
        let config = MoleConfig::with_data_dir("/tmp/mole-test");
        assert_eq!(config.layers_dir(), PathBuf::from("/tmp/mole-test/layers"));
    }

    #[test]
    fn default_registry_is_docker_hub() {
        let endpoints = RegistryEndpoints::default();
        assert_eq!(endpoints.registry_url, "https://registry-1.docker.io");
        assert_eq!(endpoints.service, "registry.docker.io");
    }

    #[test]
    fn config_serializes_roundtrip() {
        let config = MoleConfig::with_data_dir("/var/tmp/mole");
        let json = serde_json::to_string(&config).unwrap();
        let back: MoleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
