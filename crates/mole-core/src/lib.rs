//! # mole-core
//!
//! Low-level Linux isolation primitives for the mole runtime.
//!
//! This crate provides thin wrappers over:
//! - **Namespaces**: clone flags for UTS, PID, and mount isolation, and the
//!   container hostname.
//! - **Filesystem**: bind mounts, `/proc`, mount propagation, mount-table
//!   scanning, and `chroot(2)` into the assembled root filesystem.
//! - **Credentials**: dropping the container process to a numeric uid/gid.
//!
//! Functions that run inside the freshly cloned child return
//! [`nix::Result`] so the caller can report the raw errno across the
//! process boundary. Host-side helpers return the workspace error type.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod credential;
pub mod filesystem;
pub mod namespace;
