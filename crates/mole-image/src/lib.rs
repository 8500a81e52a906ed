//! # mole-image
//!
//! Image pulling and root filesystem assembly for the mole runtime.
//!
//! Handles:
//! - **Archive**: Extraction of gzip-compressed layer tarballs.
//! - **Cache**: Content-addressed storage of extracted layers.
//! - **Merge**: Whiteout-aware union of a layer onto a root filesystem.
//! - **Assembler**: Fetch-and-merge of a whole manifest.
//! - **Registry**: Docker Registry HTTP API v2 client.
//! - **Hashing**: SHA-256 content verification.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod assembler;
pub mod cache;
pub mod hash;
pub mod merge;
pub mod reference;
pub mod registry;
pub mod source;
