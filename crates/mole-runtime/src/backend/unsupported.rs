//! Fallback backend for platforms without Linux namespaces.

use mole_common::error::{MoleError, Result};

use super::{IsolatedCommand, IsolationBackend};

/// Backend that refuses to run anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl IsolationBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn run(&self, command: &IsolatedCommand) -> Result<i32> {
        Err(MoleError::Unsupported {
            message: format!(
                "cannot isolate {} on {}: Linux namespaces are required",
                command.argv.first().map_or("<empty>", String::as_str),
                std::env::consts::OS
            ),
        })
    }
}
