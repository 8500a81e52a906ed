//! Container runtime for mole: identity resolution, the launcher, and the
//! engine driving `run` and `rm`.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod engine;
pub mod identity;
pub mod process;
pub mod state;
