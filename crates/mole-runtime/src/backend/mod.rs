//! Isolation backend abstraction.
//!
//! The launcher describes what the container process needs (namespaces,
//! root directory, identity, command); a backend knows how to start such a
//! process on the current platform and wait for it.

#[cfg(target_os = "linux")]
pub mod linux;
pub mod unsupported;

use std::path::PathBuf;

use mole_common::error::Result;
use mole_core::credential::Credential;
use mole_core::namespace::NamespaceConfig;

/// A fully resolved container process, ready to be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedCommand {
    /// `entrypoint ++ cmd`; the first element is the executable.
    pub argv: Vec<String>,
    /// Complete environment, `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Directory that becomes `/` for the process.
    pub rootfs: PathBuf,
    /// Working directory inside the new root.
    pub working_dir: PathBuf,
    /// Hostname set in a fresh UTS namespace.
    pub hostname: String,
    /// Namespaces the process is created in.
    pub namespaces: NamespaceConfig,
    /// Identity to drop to, if the image names one.
    pub credential: Option<Credential>,
}

impl IsolatedCommand {
    /// Returns the `PATH` from the command environment, if any.
    #[must_use]
    pub fn search_path(&self) -> Option<&str> {
        self.env.iter().find_map(|kv| kv.strip_prefix("PATH="))
    }
}

/// Platform-specific way of running an [`IsolatedCommand`].
pub trait IsolationBackend {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Returns whether this backend can run containers here.
    fn is_available(&self) -> bool;

    /// Starts `command` and blocks until it terminates.
    ///
    /// Returns the exit code, `128 + n` for death by signal `n`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be set up or started;
    /// a process that ran and failed is reported through its exit code.
    fn run(&self, command: &IsolatedCommand) -> Result<i32>;
}

/// Returns the isolation backend for the current platform.
#[must_use]
pub fn detect_backend() -> Box<dyn IsolationBackend> {
    #[cfg(target_os = "linux")]
    {
        Box::new(linux::NamespaceBackend::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(unsupported::UnsupportedBackend)
    }
}
