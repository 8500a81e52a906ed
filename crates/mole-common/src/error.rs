//! Unified error type for the mole workspace.
//!
//! Library crates return these errors to their caller; only the CLI decides
//! whether an error terminates the process.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum MoleError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or argument is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The registry could not be reached.
    #[error("network error contacting {url}: {message}")]
    Network {
        /// URL of the failed request.
        url: String,
        /// Underlying transport error.
        message: String,
    },

    /// No usable pull token was issued.
    #[error("authentication failed for {image}: {message}")]
    Auth {
        /// Repository the token was requested for.
        image: String,
        /// Reason reported by the token endpoint.
        message: String,
    },

    /// The manifest or image config could not be decoded.
    #[error("cannot parse manifest for {image}:{reference}: {message}")]
    ManifestParse {
        /// Repository name.
        image: String,
        /// Tag or digest that was requested.
        reference: String,
        /// Decoder error.
        message: String,
    },

    /// A layer blob could not be downloaded.
    #[error("failed to download blob {digest}: {message}")]
    BlobDownload {
        /// Digest of the blob.
        digest: String,
        /// Transport or HTTP status error.
        message: String,
    },

    /// A layer archive could not be unpacked.
    #[error("extraction failed at {path}: {message}")]
    Extraction {
        /// Path inside the staging tree (or the archive) that failed.
        path: PathBuf,
        /// Corruption, unsupported entry type, or permission denial.
        message: String,
    },

    /// A whiteout referenced a path absent from the destination.
    #[error("whiteout target does not exist: {path}")]
    DeletionTargetMissing {
        /// Destination path the whiteout tried to delete.
        path: PathBuf,
    },

    /// A content digest did not match.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// A digest is not of the `algorithm:encoded` form.
    #[error("invalid digest {digest:?}: {message}")]
    InvalidDigest {
        /// Digest as received.
        digest: String,
        /// What is wrong with it.
        message: String,
    },

    /// The user named in the image config is absent from `/etc/passwd`.
    #[error("user not found in container: {name}")]
    UserNotFound {
        /// Requested user name.
        name: String,
    },

    /// The group named in the image config is absent from `/etc/group`.
    #[error("group not found in container: {name}")]
    GroupNotFound {
        /// Requested group name.
        name: String,
    },

    /// A passwd/group record carried a non-numeric id.
    #[error("malformed id {value:?} in {file} line {line}")]
    IdentityParse {
        /// Database file that was scanned.
        file: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Offending field.
        value: String,
    },

    /// Namespace creation or mount setup for the child failed.
    #[error("namespace setup failed: {message}")]
    NamespaceSetup {
        /// Description of the failing step.
        message: String,
    },

    /// Changing the child's root or working directory failed.
    #[error("chroot into {path} failed: {message}")]
    Chroot {
        /// Root or working directory involved.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// Dropping the child's credentials failed.
    #[error("credential drop failed: {message}")]
    CredentialDrop {
        /// Underlying error.
        message: String,
    },

    /// The container process could not be started.
    #[error("failed to start {command}: {message}")]
    Spawn {
        /// Executable that was requested.
        command: String,
        /// Underlying error.
        message: String,
    },

    /// The container process exited unsuccessfully.
    #[error("container exited with status {code}")]
    ChildExit {
        /// Exit code, or `128 + signal` when killed by a signal.
        code: i32,
    },

    /// The operation needs a platform feature that is not available.
    #[error("unsupported on this platform: {message}")]
    Unsupported {
        /// Description of the missing capability.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl MoleError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the exit code the CLI should terminate with.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ChildExit { code } => *code,
            _ => 1,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MoleError>;
