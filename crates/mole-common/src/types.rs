//! Domain primitive types used across the mole workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Content digest of a blob, e.g. `sha256:4f5e...`.
///
/// Used verbatim as the layer cache key and as the on-disk directory name.
/// Deserialization only accepts the `algorithm:encoded` form checked by
/// [`LayerDigest::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerDigest(String);

impl LayerDigest {
    /// Creates a digest from its string form without checking it.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    /// Parses a digest, rejecting anything but `algorithm:encoded`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem, see [`LayerDigest::validate`].
    pub fn parse(digest: impl Into<String>) -> std::result::Result<Self, String> {
        let digest = Self(digest.into());
        digest.validate()?;
        Ok(digest)
    }

    /// Checks that the digest is usable as a single path component.
    ///
    /// The algorithm is lowercase alphanumeric runs joined by `+ . _ -`;
    /// the encoded part is ASCII alphanumerics, `=`, `_` and `-`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let Some((algorithm, encoded)) = self.0.split_once(':') else {
            return Err(format!("digest {:?} has no algorithm prefix", self.0));
        };
        let algorithm_ok = algorithm
            .split(['+', '.', '_', '-'])
            .all(|part| {
                !part.is_empty()
                    && part
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            });
        if !algorithm_ok {
            return Err(format!("digest {:?} has an invalid algorithm", self.0));
        }
        let encoded_ok = !encoded.is_empty()
            && encoded
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'));
        if !encoded_ok {
            return Err(format!("digest {:?} has an invalid encoded part", self.0));
        }
        Ok(())
    }

    /// Returns the full digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the algorithm part (`sha256`), if the digest has one.
    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        self.0.split_once(':').map(|(algo, _)| algo)
    }

    /// Returns the encoded hash part, or the whole string when unprefixed.
    #[must_use]
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, hex)| hex)
    }

    /// Returns an abbreviated form for display (`sha256:` plus 12 chars).
    #[must_use]
    pub fn short(&self) -> String {
        let head: String = self.encoded().chars().take(12).collect();
        self.algorithm()
            .map_or_else(|| head.clone(), |algo| format!("{algo}:{head}"))
    }
}

impl TryFrom<String> for LayerDigest {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<LayerDigest> for String {
    fn from(digest: LayerDigest) -> Self {
        digest.0
    }
}

impl fmt::Display for LayerDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layer list and config digest of an image.
///
/// `layers` is ordered top layer first. Assembly applies them in reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Layer digests, top layer first.
    pub layers: Vec<LayerDigest>,
    /// Digest of the image config blob.
    pub config_digest: LayerDigest,
}

impl ImageManifest {
    /// Returns the layers in application order, bottom layer first.
    pub fn bottom_up(&self) -> impl Iterator<Item = &LayerDigest> {
        self.layers.iter().rev()
    }
}

/// Runtime configuration of an image.
///
/// Field names follow the registry's config JSON, so the same type parses
/// the config blob and persists as the sidecar next to a target directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    /// Executable and leading arguments.
    #[serde(default, deserialize_with = "null_as_default")]
    pub entrypoint: Vec<String>,
    /// Arguments appended after the entrypoint.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cmd: Vec<String>,
    /// Environment as ordered `KEY=VALUE` entries.
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
    /// Working directory inside the container; empty means `/`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub working_dir: String,
    /// `user:group`, `uid:gid`, `user`, or empty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    /// Exposed ports, keyed like `80/tcp`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    /// Image labels.
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
}

impl ImageConfig {
    /// Returns `entrypoint ++ cmd`.
    #[must_use]
    pub fn command_line(&self) -> Vec<String> {
        self.entrypoint.iter().chain(&self.cmd).cloned().collect()
    }

    /// Returns the user spec, or `None` when the image runs as-is.
    #[must_use]
    pub fn user_spec(&self) -> Option<&str> {
        let user = self.user.trim();
        (!user.is_empty()).then_some(user)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lifecycle phase of a container launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaunchPhase {
    /// Launch requested, nothing touched yet.
    Created,
    /// `config.user` resolved to numeric ids.
    IdentityResolved,
    /// Child running in its new namespaces.
    NamespaceConfigured,
    /// Child root and working directory switched.
    Chrooted,
    /// Entrypoint executing.
    Exec,
    /// Entrypoint exited with the given code.
    Exited(i32),
    /// Launch failed before or during exec.
    Failed,
}

impl fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::IdentityResolved => write!(f, "identity-resolved"),
            Self::NamespaceConfigured => write!(f, "namespace-configured"),
            Self::Chrooted => write!(f, "chrooted"),
            Self::Exec => write!(f, "exec"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_splits_algorithm_and_hex() {
        let d = LayerDigest::new("sha256:0123456789abcdef0123");
        assert_eq!(d.algorithm(), Some("sha256"));
        assert_eq!(d.encoded(), "0123456789abcdef0123");
        assert_eq!(d.short(), "sha256:0123456789ab");
    }

    #[test]
    fn digest_accepts_registry_forms() {
        for ok in [
            "sha256:4f5e0a9b",
            "sha512:AbC=",
            "multihash+base58:QmRZxt2b1FVZPNqd8hsiykDL3TdBDeTSPX9Kv46HmX4Gx8",
            "plain:l1",
        ] {
            assert!(LayerDigest::parse(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn digest_rejects_path_like_values() {
        for bad in [
            "x/../../escaped",
            "sha256:../../etc",
            "sha256:a/b",
            "..",
            "sha256:",
            ":abc",
            "SHA256:abc",
            "sha256:a b",
            "sha256-:abc",
        ] {
            assert!(LayerDigest::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn digest_deserialization_is_validated() {
        let ok: LayerDigest = serde_json::from_str(r#""sha256:abc""#).expect("valid");
        assert_eq!(ok.as_str(), "sha256:abc");
        assert!(serde_json::from_str::<LayerDigest>(r#""x/../../escaped""#).is_err());
        assert_eq!(serde_json::to_string(&ok).expect("serialize"), r#""sha256:abc""#);
    }

    #[test]
    fn manifest_bottom_up_reverses_layers() {
        let manifest = ImageManifest {
            layers: vec![LayerDigest::new("sha256:top"), LayerDigest::new("sha256:base")],
            config_digest: LayerDigest::new("sha256:cfg"),
        };
        let order: Vec<_> = manifest.bottom_up().map(LayerDigest::as_str).collect();
        assert_eq!(order, vec!["sha256:base", "sha256:top"]);
    }

    #[test]
    fn config_parses_registry_json_with_nulls() {
        let json = r#"{
            "User": "nginx:nginx",
            "Env": ["PATH=/usr/bin:/bin", "LANG=C"],
            "Cmd": ["nginx", "-g", "daemon off;"],
            "Entrypoint": null,
            "WorkingDir": "",
            "ExposedPorts": {"80/tcp": {}},
            "Labels": null,
            "StopSignal": "SIGQUIT"
        }"#;
        let config: ImageConfig = serde_json::from_str(json).unwrap();
        assert!(config.entrypoint.is_empty());
        assert_eq!(config.command_line(), vec!["nginx", "-g", "daemon off;"]);
        assert_eq!(config.user_spec(), Some("nginx:nginx"));
        assert_eq!(config.env, vec!["PATH=/usr/bin:/bin", "LANG=C"]);
        assert!(config.exposed_ports.contains_key("80/tcp"));
        assert!(config.labels.is_empty());
    }

    #[test]
    fn command_line_appends_cmd_to_entrypoint() {
        let config = ImageConfig {
            entrypoint: vec!["/docker-entrypoint.sh".into()],
            cmd: vec!["nginx".into()],
            ..ImageConfig::default()
        };
        assert_eq!(config.command_line(), vec!["/docker-entrypoint.sh", "nginx"]);
    }

    #[test]
    fn empty_user_spec_is_none() {
        let config = ImageConfig {
            user: "  ".into(),
            ..ImageConfig::default()
        };
        assert_eq!(config.user_spec(), None);
    }

    #[test]
    fn launch_phase_display() {
        assert_eq!(LaunchPhase::Exited(3).to_string(), "exited(3)");
        assert_eq!(LaunchPhase::NamespaceConfigured.to_string(), "namespace-configured");
    }
}
