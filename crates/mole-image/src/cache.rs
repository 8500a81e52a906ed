//! Content-addressed layer cache.
//!
//! Extracted layers live under `<root>/<digest>/`, with the raw compressed
//! blob kept next to them as `<root>/<digest>.tar.gz`. Directories the
//! archive only implied (no entry of their own) are listed, NUL-separated,
//! in `<root>/<digest>.implied`. A digest whose directory exists is a hit
//! and is returned untouched.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use mole_common::constants::{BLOB_SUFFIX, IMPLIED_DIRS_SUFFIX};
use mole_common::error::{MoleError, Result};
use mole_common::types::LayerDigest;

use crate::source::BlobSource;

/// A layer resolved through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLayer {
    /// Digest of the layer blob.
    pub digest: LayerDigest,
    /// Extracted layer tree.
    pub path: PathBuf,
    /// Size of the compressed blob, when it was downloaded by this call.
    pub downloaded_bytes: Option<u64>,
    /// Layer-relative directories that had no archive entry.
    pub implied_dirs: BTreeSet<PathBuf>,
}

impl CachedLayer {
    /// Returns whether the layer was already cached.
    #[must_use]
    pub const fn was_cached(&self) -> bool {
        self.downloaded_bytes.is_none()
    }
}

/// On-disk cache of extracted layers.
#[derive(Debug, Clone)]
pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    /// Opens the cache at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| MoleError::io(&root, e))?;
        tracing::debug!(path = %root.display(), "opened layer cache");
        Ok(Self { root })
    }

    /// Returns the extracted tree path for a digest.
    #[must_use]
    pub fn layer_path(&self, digest: &LayerDigest) -> PathBuf {
        self.root.join(digest.as_str())
    }

    /// Returns the retained compressed blob path for a digest.
    #[must_use]
    pub fn blob_path(&self, digest: &LayerDigest) -> PathBuf {
        self.root.join(format!("{}{BLOB_SUFFIX}", digest.as_str()))
    }

    /// Returns the path listing the implied directories of a digest.
    #[must_use]
    pub fn implied_path(&self, digest: &LayerDigest) -> PathBuf {
        self.root.join(format!("{}{IMPLIED_DIRS_SUFFIX}", digest.as_str()))
    }

    /// Checks whether a layer exists in the cache.
    #[must_use]
    pub fn has_layer(&self, digest: &LayerDigest) -> bool {
        self.layer_path(digest).exists()
    }

    /// Resolves `digest` to an extracted layer tree.
    ///
    /// A hit returns the existing directory with no download and no
    /// re-verification. A miss creates the directory, streams the blob from
    /// `source` into `<digest>.tar.gz`, verifies it, then extracts it.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::InvalidDigest`] before touching the disk if the
    /// digest could name something outside the cache root, and an error if
    /// the download, verification or extraction fails. The partially
    /// written directory is left in place; deleting it is what forces a
    /// retry.
    pub fn fetch_layer(&self, digest: &LayerDigest, source: &dyn BlobSource) -> Result<CachedLayer> {
        digest
            .validate()
            .map_err(|message| MoleError::InvalidDigest {
                digest: digest.to_string(),
                message,
            })?;
        let path = self.layer_path(digest);
        if self.has_layer(digest) {
            tracing::debug!(digest = %digest, "layer cache hit");
            return Ok(CachedLayer {
                digest: digest.clone(),
                path,
                downloaded_bytes: None,
                implied_dirs: self.load_implied(digest)?,
            });
        }

        fs::create_dir_all(&path).map_err(|e| MoleError::io(&path, e))?;

        let blob_path = self.blob_path(digest);
        let size = {
            let mut reader = source.open_blob(digest)?;
            download(digest, &mut reader, &blob_path)?
        };
        crate::hash::validate_digest(&blob_path, digest)?;

        let blob = fs::File::open(&blob_path).map_err(|e| MoleError::io(&blob_path, e))?;
        let implied_dirs = crate::archive::extract_gzip(std::io::BufReader::new(blob), &path)?;
        self.store_implied(digest, &implied_dirs)?;

        tracing::info!(digest = %digest, bytes = size, "layer fetched and extracted");
        Ok(CachedLayer {
            digest: digest.clone(),
            path,
            downloaded_bytes: Some(size),
            implied_dirs,
        })
    }

    fn store_implied(&self, digest: &LayerDigest, dirs: &BTreeSet<PathBuf>) -> Result<()> {
        if dirs.is_empty() {
            return Ok(());
        }
        let mut body = Vec::new();
        for dir in dirs {
            body.extend_from_slice(dir.as_os_str().as_bytes());
            body.push(0);
        }
        let path = self.implied_path(digest);
        fs::write(&path, body).map_err(|e| MoleError::io(&path, e))
    }

    /// Reads the implied directory list; absent means none.
    fn load_implied(&self, digest: &LayerDigest) -> Result<BTreeSet<PathBuf>> {
        let path = self.implied_path(digest);
        let body = match fs::read(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(MoleError::io(&path, e)),
        };
        Ok(body
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| PathBuf::from(OsStr::from_bytes(part)))
            .collect())
    }
}

/// Streams a blob to disk, separating read (download) from write failures.
fn download(digest: &LayerDigest, reader: &mut dyn Read, dest: &Path) -> Result<u64> {
    let mut file = fs::File::create(dest).map_err(|e| MoleError::io(dest, e))?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(MoleError::BlobDownload {
                    digest: digest.to_string(),
                    message: e.to_string(),
                });
            }
        };
        file.write_all(&buf[..n]).map_err(|e| MoleError::io(dest, e))?;
        total += n as u64;
    }
    file.flush().map_err(|e| MoleError::io(dest, e))?;
    Ok(total)
}
