//! Filesystem management for container isolation.
//!
//! Provides mount utilities for the backing bind mount and `/proc`, and the
//! `chroot(2)` switch into the container's root filesystem.

pub mod chroot;
pub mod mount;
