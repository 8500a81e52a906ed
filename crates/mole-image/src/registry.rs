//! Docker Registry HTTP API v2 client.
//!
//! Covers the four calls needed to pull an image anonymously: a bearer
//! token from the auth service, the image manifest, the image config blob,
//! and the layer blobs themselves.

use std::io::Read;
use std::time::Duration;

use mole_common::config::RegistryEndpoints;
use mole_common::constants::{MANIFEST_V2_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE};
use mole_common::error::{MoleError, Result};
use mole_common::types::{ImageConfig, ImageManifest, LayerDigest};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use crate::reference::ImageReference;
use crate::source::BlobSource;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const MANIFEST_LIST_MEDIA_TYPES: [&str; 2] = [
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
];

/// Blocking client for one registry and its auth service.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    endpoints: RegistryEndpoints,
}

impl RegistryClient {
    /// Builds a client for `endpoints`.
    ///
    /// Only the connect phase is bounded; layer downloads may take as long
    /// as they need.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Network`] if the TLS backend cannot be set up.
    pub fn new(endpoints: RegistryEndpoints) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .user_agent(concat!("mole/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MoleError::Network {
                url: endpoints.registry_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self { http, endpoints })
    }

    /// Fetches an anonymous pull token for `image`.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Network`] if the request fails and
    /// [`MoleError::Auth`] if the service refuses or returns no token.
    pub fn token(&self, image: &ImageReference) -> Result<String> {
        let url = format!(
            "{}?service={}&scope=repository:{}:pull",
            self.endpoints.auth_url, self.endpoints.service, image.repository
        );
        tracing::debug!(url = %url, "requesting registry token");
        let response = self.http.get(&url).send().map_err(|e| network(&url, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MoleError::Auth {
                image: image.to_string(),
                message: format!("token request returned HTTP {status}"),
            });
        }
        let body = response.text().map_err(|e| network(&url, &e))?;
        parse_token(&body).map_err(|message| MoleError::Auth {
            image: image.to_string(),
            message,
        })
    }

    /// Fetches the manifest of `image`, with layers listed top-first.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Auth`] on 401/403, [`MoleError::Network`] on any
    /// other transport or HTTP failure, and [`MoleError::ManifestParse`]
    /// if the body is not a single-platform v2 or OCI manifest.
    pub fn manifest(&self, token: &str, image: &ImageReference) -> Result<ImageManifest> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.endpoints.registry_url, image.repository, image.tag
        );
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(
                ACCEPT,
                format!("{MANIFEST_V2_MEDIA_TYPE}, {OCI_MANIFEST_MEDIA_TYPE}"),
            )
            .send()
            .map_err(|e| network(&url, &e))?;
        let body = checked(response, &url, image)?
            .text()
            .map_err(|e| network(&url, &e))?;
        let manifest = parse_manifest(&body).map_err(|message| MoleError::ManifestParse {
            image: image.repository.clone(),
            reference: image.tag.clone(),
            message,
        })?;
        tracing::info!(
            image = %image,
            layers = manifest.layers.len(),
            config = %manifest.config_digest.short(),
            "fetched manifest"
        );
        Ok(manifest)
    }

    /// Fetches and decodes the config blob `digest` of `image`.
    ///
    /// # Errors
    ///
    /// Returns a network or auth error for a failed request and
    /// [`MoleError::ManifestParse`] if the blob is not an image config.
    pub fn config(
        &self,
        token: &str,
        image: &ImageReference,
        digest: &LayerDigest,
    ) -> Result<ImageConfig> {
        let url = self.blob_url(image, digest);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .map_err(|e| network(&url, &e))?;
        let body = checked(response, &url, image)?
            .text()
            .map_err(|e| network(&url, &e))?;
        parse_config(&body).map_err(|message| MoleError::ManifestParse {
            image: image.repository.clone(),
            reference: digest.to_string(),
            message,
        })
    }

    /// Binds the client to an image and token for blob downloads.
    #[must_use]
    pub fn session(&self, image: ImageReference, token: String) -> RegistrySession<'_> {
        RegistrySession {
            client: self,
            image,
            token,
        }
    }

    fn blob_url(&self, image: &ImageReference, digest: &LayerDigest) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.endpoints.registry_url, image.repository, digest
        )
    }
}

/// A [`RegistryClient`] authorized to pull blobs of one image.
#[derive(Debug)]
pub struct RegistrySession<'a> {
    client: &'a RegistryClient,
    image: ImageReference,
    token: String,
}

impl BlobSource for RegistrySession<'_> {
    fn open_blob(&self, digest: &LayerDigest) -> Result<Box<dyn Read + '_>> {
        let url = self.client.blob_url(&self.image, digest);
        tracing::debug!(digest = %digest, "downloading layer blob");
        let response = self
            .client
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .map_err(|e| MoleError::BlobDownload {
                digest: digest.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MoleError::BlobDownload {
                digest: digest.to_string(),
                message: format!("HTTP {status} from {url}"),
            });
        }
        Ok(Box::new(response))
    }
}

fn network(url: &str, err: &reqwest::Error) -> MoleError {
    MoleError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// Maps non-2xx responses to auth or network errors.
fn checked(response: Response, url: &str, image: &ImageReference) -> Result<Response> {
    let status = response.status();
    match status {
        s if s.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MoleError::Auth {
            image: image.to_string(),
            message: format!("HTTP {status} from {url}"),
        }),
        _ => Err(MoleError::Network {
            url: url.to_string(),
            message: format!("HTTP {status}"),
        }),
    }
}

#[derive(Deserialize)]
struct TokenBody {
    token: Option<String>,
    access_token: Option<String>,
}

/// Extracts the bearer token from an auth service response.
///
/// # Errors
///
/// Returns a description of the problem if the body has no token.
pub fn parse_token(body: &str) -> std::result::Result<String, String> {
    let parsed: TokenBody =
        serde_json::from_str(body).map_err(|e| format!("malformed token response: {e}"))?;
    parsed
        .token
        .or(parsed.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "token response carries no token".to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestBody {
    schema_version: Option<u32>,
    media_type: Option<String>,
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    manifests: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Descriptor {
    digest: LayerDigest,
}

/// Decodes a schema-2 or OCI image manifest.
///
/// The registry lists layers base-first; the result holds them top-first.
///
/// # Errors
///
/// Returns a description of the problem for malformed JSON, digests not of
/// the `algorithm:encoded` form, manifest lists and schema-1 manifests.
pub fn parse_manifest(body: &str) -> std::result::Result<ImageManifest, String> {
    let parsed: ManifestBody =
        serde_json::from_str(body).map_err(|e| format!("malformed manifest: {e}"))?;

    if parsed.manifests.is_some()
        || parsed
            .media_type
            .as_deref()
            .is_some_and(|m| MANIFEST_LIST_MEDIA_TYPES.contains(&m))
    {
        return Err("multi-platform manifest lists are not supported".to_string());
    }
    if parsed.schema_version.is_some_and(|v| v != 2) {
        return Err(format!(
            "unsupported manifest schema version {}",
            parsed.schema_version.unwrap_or_default()
        ));
    }
    let config = parsed
        .config
        .ok_or_else(|| "manifest has no config descriptor".to_string())?;

    Ok(ImageManifest {
        layers: parsed.layers.into_iter().rev().map(|d| d.digest).collect(),
        config_digest: config.digest,
    })
}

#[derive(Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: Option<ImageConfig>,
}

/// Decodes the `config` section of an image config blob.
///
/// A blob without one (scratch images) yields an empty config.
///
/// # Errors
///
/// Returns a description of the problem for malformed JSON.
pub fn parse_config(body: &str) -> std::result::Result<ImageConfig, String> {
    let parsed: ConfigBlob =
        serde_json::from_str(body).map_err(|e| format!("malformed image config: {e}"))?;
    Ok(parsed.config.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA2: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1472,
            "digest": "sha256:cfg"
        },
        "layers": [
            { "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 10, "digest": "sha256:base" },
            { "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 20, "digest": "sha256:top" }
        ]
    }"#;

    #[test]
    fn token_prefers_token_then_access_token() {
        assert_eq!(parse_token(r#"{"token":"abc"}"#).expect("token"), "abc");
        assert_eq!(
            parse_token(r#"{"access_token":"xyz","expires_in":300}"#).expect("token"),
            "xyz"
        );
        assert!(parse_token(r#"{"token":""}"#).is_err());
        assert!(parse_token("not json").is_err());
    }

    #[test]
    fn manifest_layers_are_stored_top_first() {
        let manifest = parse_manifest(SCHEMA2).expect("parse");
        assert_eq!(manifest.config_digest.as_str(), "sha256:cfg");
        let layers: Vec<&str> = manifest.layers.iter().map(LayerDigest::as_str).collect();
        assert_eq!(layers, vec!["sha256:top", "sha256:base"]);
        let applied: Vec<&str> = manifest.bottom_up().map(LayerDigest::as_str).collect();
        assert_eq!(applied, vec!["sha256:base", "sha256:top"]);
    }

    #[test]
    fn manifest_with_path_like_digest_is_rejected() {
        let body = SCHEMA2.replace("sha256:top", "x/../../escaped");
        let err = parse_manifest(&body).expect_err("bad digest");
        assert!(err.contains("x/../../escaped"), "{err}");

        let body = SCHEMA2.replace("sha256:cfg", "../cfg");
        assert!(parse_manifest(&body).is_err());
    }

    #[test]
    fn manifest_list_is_rejected() {
        let body = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": [{ "digest": "sha256:amd64", "platform": { "architecture": "amd64" } }]
        }"#;
        let err = parse_manifest(body).expect_err("list");
        assert!(err.contains("manifest lists"));
    }

    #[test]
    fn schema1_is_rejected() {
        let body = r#"{ "schemaVersion": 1, "name": "library/old", "fsLayers": [] }"#;
        assert!(parse_manifest(body).is_err());
    }

    #[test]
    fn config_blob_unwraps_config_section() {
        let body = r#"{
            "architecture": "amd64",
            "config": {
                "User": "nginx",
                "Env": ["PATH=/usr/bin:/bin"],
                "Cmd": ["nginx", "-g", "daemon off;"],
                "Entrypoint": null,
                "WorkingDir": ""
            },
            "rootfs": { "type": "layers", "diff_ids": [] }
        }"#;
        let config = parse_config(body).expect("parse");
        assert_eq!(config.user, "nginx");
        assert_eq!(config.cmd, vec!["nginx", "-g", "daemon off;"]);
        assert!(config.entrypoint.is_empty());
    }

    #[test]
    fn config_blob_without_section_is_empty() {
        let config = parse_config(r#"{"architecture":"amd64"}"#).expect("parse");
        assert_eq!(config, ImageConfig::default());
    }

    #[test]
    fn client_builds_with_default_endpoints() {
        let client = RegistryClient::new(RegistryEndpoints::default()).expect("client");
        let image = ImageReference::parse("alpine:3.20").expect("ref");
        assert_eq!(
            client.blob_url(&image, &LayerDigest::new("sha256:abc")),
            "https://registry-1.docker.io/v2/library/alpine/blobs/sha256:abc"
        );
    }
}
