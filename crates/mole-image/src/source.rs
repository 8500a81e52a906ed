//! Blob sources feeding the layer cache.
//!
//! The cache only needs one capability from the registry: open the
//! compressed blob for a digest as a byte stream. Keeping that behind a
//! trait lets the assembler run against a registry session or any local
//! stand-in.

use std::io::Read;

use mole_common::error::Result;
use mole_common::types::LayerDigest;

/// Something that can stream a compressed layer blob by digest.
pub trait BlobSource {
    /// Opens the blob identified by `digest`.
    ///
    /// # Errors
    ///
    /// Returns [`mole_common::error::MoleError::BlobDownload`] (or a network
    /// error) if the blob cannot be retrieved.
    fn open_blob(&self, digest: &LayerDigest) -> Result<Box<dyn Read + '_>>;
}
