//! Linux backend: `clone(2)` into fresh namespaces, `chroot(2)`, `execve(2)`.
//!
//! Everything the child needs (C strings, candidate executable paths) is
//! prepared before the clone, so the child only issues syscalls. A
//! close-on-exec pipe carries the failing stage and errno back to the
//! parent; a pipe that closes without data means `execve` succeeded.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use mole_common::constants::DEFAULT_PATH;
use mole_common::error::{MoleError, Result};
use mole_common::types::LaunchPhase;
use mole_core::filesystem::{chroot, mount};
use mole_core::namespace::uts;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, execve, pipe2};

use super::{IsolatedCommand, IsolationBackend};

const STACK_SIZE: usize = 1024 * 1024;

/// Exit status of a child that failed before `execve`.
const SETUP_FAILED: i32 = 127;

/// Step of child-side setup, as reported over the status pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PrivateMounts = 1,
    ProcMount = 2,
    Hostname = 3,
    Chroot = 4,
    WorkingDir = 5,
    Credentials = 6,
    Exec = 7,
}

impl Stage {
    const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::PrivateMounts),
            2 => Some(Self::ProcMount),
            3 => Some(Self::Hostname),
            4 => Some(Self::Chroot),
            5 => Some(Self::WorkingDir),
            6 => Some(Self::Credentials),
            7 => Some(Self::Exec),
            _ => None,
        }
    }

    fn into_error(self, errno: Errno, command: &IsolatedCommand) -> MoleError {
        match self {
            Self::PrivateMounts | Self::ProcMount | Self::Hostname => MoleError::NamespaceSetup {
                message: format!("{self}: {errno}"),
            },
            Self::Chroot => MoleError::Chroot {
                path: command.rootfs.clone(),
                message: errno.to_string(),
            },
            Self::WorkingDir => MoleError::Chroot {
                path: command.working_dir.clone(),
                message: format!("{self}: {errno}"),
            },
            Self::Credentials => MoleError::CredentialDrop {
                message: format!(
                    "{} as {}: {errno}",
                    self,
                    command
                        .credential
                        .map_or_else(|| "-".to_string(), |c| c.to_string())
                ),
            },
            Self::Exec => MoleError::Spawn {
                command: command.argv.first().cloned().unwrap_or_default(),
                message: errno.to_string(),
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrivateMounts => "making mounts private",
            Self::ProcMount => "mounting /proc",
            Self::Hostname => "setting hostname",
            Self::Chroot => "changing root",
            Self::WorkingDir => "entering working directory",
            Self::Credentials => "dropping credentials",
            Self::Exec => "executing entrypoint",
        };
        f.write_str(name)
    }
}

/// Syscall arguments built in the parent.
struct Prepared {
    candidates: Vec<CString>,
    argv: Vec<CString>,
    envp: Vec<CString>,
    proc_dir: Option<PathBuf>,
}

impl Prepared {
    fn new(command: &IsolatedCommand) -> Result<Self> {
        let program = command.argv.first().ok_or_else(|| MoleError::Config {
            message: "container command line is empty".into(),
        })?;
        let candidates = if program.contains('/') {
            vec![c_string(program)?]
        } else {
            command
                .search_path()
                .unwrap_or(DEFAULT_PATH)
                .split(':')
                .filter(|dir| !dir.is_empty())
                .map(|dir| c_string(&format!("{}/{program}", dir.trim_end_matches('/'))))
                .collect::<Result<Vec<_>>>()?
        };
        let argv = command
            .argv
            .iter()
            .map(|a| c_string(a))
            .collect::<Result<Vec<_>>>()?;
        let envp = command
            .env
            .iter()
            .map(|e| c_string(e))
            .collect::<Result<Vec<_>>>()?;
        let proc_dir = Some(command.rootfs.join("proc"))
            .filter(|p| command.namespaces.mount && command.namespaces.pid && p.is_dir());

        // Fail early on paths the child could not hand to the kernel.
        let _ = c_string_path(&command.rootfs)?;
        let _ = c_string_path(&command.working_dir)?;

        Ok(Self {
            candidates,
            argv,
            envp,
            proc_dir,
        })
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| MoleError::Config {
        message: format!("argument contains a NUL byte: {value:?}"),
    })
}

fn c_string_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| MoleError::Config {
        message: format!("path contains a NUL byte: {}", path.display()),
    })
}

/// Runs containers in new UTS, PID and mount namespaces.
#[derive(Debug, Clone)]
pub struct NamespaceBackend {
    stack_size: usize,
}

impl NamespaceBackend {
    /// Creates the backend with a 1 MiB child stack.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stack_size: STACK_SIZE,
        }
    }
}

impl Default for NamespaceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationBackend for NamespaceBackend {
    fn name(&self) -> &'static str {
        "linux-namespaces"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn run(&self, command: &IsolatedCommand) -> Result<i32> {
        let prepared = Prepared::new(command)?;
        let (reader, writer) = pipe2(OFlag::O_CLOEXEC).map_err(|e| MoleError::NamespaceSetup {
            message: format!("status pipe: {e}"),
        })?;
        let mut reader = File::from(reader);
        let writer = File::from(writer);

        let mut stack = vec![0u8; self.stack_size];
        let child = Box::new(|| -> isize {
            let (stage, errno) = match child_setup(command, &prepared) {
                Ok(()) => exec_first(&prepared),
                Err(failure) => failure,
            };
            report(&writer, stage, errno);
            // SAFETY: `_exit` terminates the child immediately without running
            // any handlers; it is async-signal-safe.
            unsafe { libc::_exit(SETUP_FAILED) }
        });

        // SAFETY: without CLONE_VM the child runs on a copy of this address
        // space, and the callback performs no allocation before `execve` or
        // `_exit`; `stack` outlives the call.
        let pid = unsafe {
            nix::sched::clone(
                child,
                &mut stack,
                command.namespaces.clone_flags(),
                Some(libc::SIGCHLD),
            )
        }
        .map_err(|e| MoleError::NamespaceSetup {
            message: format!("clone failed: {e} (namespaces require root)"),
        })?;
        drop(writer);
        tracing::info!(
            pid = pid.as_raw(),
            hostname = %command.hostname,
            phase = %LaunchPhase::NamespaceConfigured,
            "container process cloned"
        );

        let failure = read_report(&mut reader);
        if failure.is_none() {
            tracing::info!(
                pid = pid.as_raw(),
                rootfs = %command.rootfs.display(),
                phase = %LaunchPhase::Chrooted,
                "container root entered"
            );
            tracing::info!(
                pid = pid.as_raw(),
                argv = ?command.argv,
                phase = %LaunchPhase::Exec,
                "entrypoint running"
            );
        }
        let code = wait_for(pid)?;
        match failure {
            Some((stage, errno)) => {
                tracing::debug!(pid = pid.as_raw(), stage = %stage, errno = %errno, "child setup failed");
                Err(stage.into_error(errno, command))
            }
            None => {
                tracing::debug!(pid = pid.as_raw(), code, "container process exited");
                Ok(code)
            }
        }
    }
}

/// Child-side isolation steps, in order.
fn child_setup(
    command: &IsolatedCommand,
    prepared: &Prepared,
) -> std::result::Result<(), (Stage, Errno)> {
    if command.namespaces.mount {
        mount::make_mounts_private().map_err(|e| (Stage::PrivateMounts, e))?;
        if let Some(proc_dir) = &prepared.proc_dir {
            mount::mount_proc(proc_dir).map_err(|e| (Stage::ProcMount, e))?;
        }
    }
    if command.namespaces.uts {
        uts::set_hostname(&command.hostname).map_err(|e| (Stage::Hostname, e))?;
    }
    chroot::change_root(&command.rootfs).map_err(|e| (Stage::Chroot, e))?;
    chroot::enter_working_dir(&command.working_dir).map_err(|e| (Stage::WorkingDir, e))?;
    if let Some(credential) = command.credential {
        credential.apply().map_err(|e| (Stage::Credentials, e))?;
    }
    Ok(())
}

/// Tries each candidate path like `execvp(3)`; returns only on failure.
fn exec_first(prepared: &Prepared) -> (Stage, Errno) {
    let mut last = Errno::ENOENT;
    for path in &prepared.candidates {
        match execve(path, &prepared.argv, &prepared.envp) {
            Ok(never) => match never {},
            Err(Errno::ENOENT | Errno::ENOTDIR) => {}
            Err(e) => last = e,
        }
    }
    (Stage::Exec, last)
}

fn report(mut pipe: &File, stage: Stage, errno: Errno) {
    let mut msg = [0u8; 8];
    msg[..4].copy_from_slice(&(stage as u32).to_le_bytes());
    msg[4..].copy_from_slice(&(errno as i32).to_le_bytes());
    // Nothing useful can be done if the parent is gone.
    let _ = pipe.write_all(&msg);
}

fn read_report(pipe: &mut File) -> Option<(Stage, Errno)> {
    let mut msg = [0u8; 8];
    let mut filled = 0;
    while filled < msg.len() {
        match pipe.read(&mut msg[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    if filled < msg.len() {
        return None;
    }
    let stage = u32::from_le_bytes([msg[0], msg[1], msg[2], msg[3]]);
    let errno = i32::from_le_bytes([msg[4], msg[5], msg[6], msg[7]]);
    Stage::from_code(stage).map(|s| (s, Errno::from_raw(errno)))
}

/// Reaps `pid`, mapping death by signal `n` to `128 + n`.
fn wait_for(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(MoleError::NamespaceSetup {
                    message: format!("waitpid({pid}) failed: {e}"),
                });
            }
        }
    }
}
