//! System-wide constants and default paths.

use std::path::PathBuf;

/// Name of the per-user state directory created under the home directory.
pub const DATA_DIR_NAME: &str = ".mole";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MOLE_HOME";

/// Home directory used when `$HOME` is not set.
pub const FALLBACK_HOME: &str = "/root";

/// Subdirectory of the data directory holding extracted layers.
pub const LAYERS_DIR: &str = "layers";

/// Suffix of the retained compressed blob next to an extracted layer.
pub const BLOB_SUFFIX: &str = ".tar.gz";

/// Suffix of the list of directories a layer archive only implied.
pub const IMPLIED_DIRS_SUFFIX: &str = ".implied";

/// Opaque whiteout marker: resets the containing directory.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Prefix of an explicit whiteout marker: `.wh.<name>` deletes `<name>`.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Default Docker Hub token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// Default Docker Hub token service name.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// Default Docker Hub registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Namespace prepended to single-component Docker Hub image names.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Tag used when a reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Docker image manifest v2 schema 2 media type.
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// OCI image manifest media type.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// `PATH` searched for the entrypoint when the image environment sets none.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Working directory used when the image config sets none.
pub const DEFAULT_WORKING_DIR: &str = "/";

/// Application name used in CLI output.
pub const APP_NAME: &str = "mole";

/// Returns the home directory, falling back to [`FALLBACK_HOME`].
pub fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map_or_else(|| PathBuf::from(FALLBACK_HOME), PathBuf::from)
}

/// Returns the data directory: `$MOLE_HOME` if set, else `<home>/.mole`.
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|d| !d.is_empty())
        .map_or_else(|| home_dir().join(DATA_DIR_NAME), PathBuf::from)
}
