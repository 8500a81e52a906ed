//! Container lifecycle tests across state, engine and launcher.
//!
//! Engine tests launch through a recording backend. The isolation tests at
//! the end start real processes with the namespace backend inside a root
//! built from bind mounts of the host's tool directories. Tests that need
//! mount privileges skip themselves when bind mounts are not permitted.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mole_common::config::MoleConfig;
use mole_common::error::{MoleError, Result};
use mole_common::types::ImageConfig;
use mole_runtime::backend::{IsolatedCommand, IsolationBackend};
use mole_runtime::engine::Engine;
use mole_runtime::state::{self, ContainerPaths};

/// Records each command and what the target looked like when it ran.
#[derive(Clone, Default)]
struct Recorder {
    seen: Rc<RefCell<Vec<(IsolatedCommand, bool)>>>,
}

impl IsolationBackend for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn run(&self, command: &IsolatedCommand) -> Result<i32> {
        let marker_visible = command.rootfs.join("etc/os-release").is_file();
        self.seen.borrow_mut().push((command.clone(), marker_visible));
        Ok(0)
    }
}

/// Whether this process may create bind mounts (root with `CAP_SYS_ADMIN`).
fn can_mount() -> bool {
    if !nix::unistd::geteuid().is_root() {
        return false;
    }
    let scratch = tempfile::tempdir().expect("tempdir");
    let (source, target) = (scratch.path().join("src"), scratch.path().join("dst"));
    std::fs::create_dir_all(&source).expect("src");
    std::fs::create_dir_all(&target).expect("dst");
    if mole_core::filesystem::mount::bind_mount(&source, &target).is_err() {
        return false;
    }
    mole_core::filesystem::mount::unmount(&target).is_ok()
}

fn seed_container(dir: &Path, name: &str, config: &ImageConfig) -> ContainerPaths {
    let paths = ContainerPaths::for_target(&dir.join(name)).expect("paths");
    std::fs::create_dir_all(paths.backing.join("etc")).expect("backing");
    std::fs::write(paths.backing.join("etc/os-release"), "ID=mole\n").expect("marker");
    std::fs::write(
        paths.backing.join("etc/passwd"),
        "root:x:0:0:root:/root:/bin/sh\nalice:x:1001:1001::/home/alice:/bin/sh\n",
    )
    .expect("passwd");
    state::store_config(&paths, config).expect("sidecar");
    paths
}

fn shell_config() -> ImageConfig {
    ImageConfig {
        cmd: vec!["/bin/sh".into(), "-c".into(), "echo hi".into()],
        env: vec!["PATH=/bin".into()],
        user: "alice".into(),
        ..ImageConfig::default()
    }
}

// ── Relaunch ─────────────────────────────────────────────────────────

#[test]
fn relaunch_mounts_backing_and_runs_stored_config() {
    if !can_mount() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = seed_container(dir.path(), "web", &shell_config());
    let recorder = Recorder::default();
    let engine = Engine::with_backend(
        MoleConfig::with_data_dir(dir.path().join("data")),
        Box::new(recorder.clone()),
    );

    engine.run_existing(&paths.target).expect("run");
    {
        let seen = recorder.seen.borrow();
        assert_eq!(seen.len(), 1);
        let (command, marker_visible) = &seen[0];
        assert!(*marker_visible, "backing must be bind-mounted onto target");
        assert_eq!(command.argv, vec!["/bin/sh", "-c", "echo hi"]);
        assert_eq!(command.hostname, "web");
        let credential = command.credential.expect("credential");
        assert_eq!((credential.uid, credential.gid), (1001, 1001));
    }

    // A second run reuses the existing mount instead of stacking another.
    engine.run_existing(&paths.target).expect("rerun");
    let stacked = mole_core::filesystem::mount::mount_points_under(&paths.target).expect("mounts");
    assert_eq!(stacked.len(), 1);

    engine.remove(&paths.target).expect("remove");
    assert!(!paths.target.exists());
    assert!(!paths.backing.exists());
    assert!(!paths.sidecar.exists());
}

// ── Failure paths ────────────────────────────────────────────────────

#[test]
fn relaunch_without_pull_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = Engine::with_backend(
        MoleConfig::with_data_dir(dir.path()),
        Box::new(Recorder::default()),
    );
    let err = engine
        .run_existing(&dir.path().join("never-pulled"))
        .expect_err("not pulled");
    assert!(matches!(err, MoleError::NotFound { .. }));
}

#[test]
fn unknown_user_fails_before_launch() {
    if !can_mount() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ImageConfig {
        user: "mallory".into(),
        ..shell_config()
    };
    let paths = seed_container(dir.path(), "api", &config);
    let recorder = Recorder::default();
    let engine = Engine::with_backend(
        MoleConfig::with_data_dir(dir.path().join("data")),
        Box::new(recorder.clone()),
    );

    let err = engine.run_existing(&paths.target).expect_err("unknown user");
    assert!(matches!(err, MoleError::UserNotFound { .. }));
    assert!(recorder.seen.borrow().is_empty());
    engine.remove(&paths.target).expect("cleanup");
}

#[test]
fn remove_of_unmounted_container_cleans_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = seed_container(dir.path(), "db", &shell_config());
    std::fs::create_dir_all(&paths.target).expect("target");
    let engine = Engine::with_backend(
        MoleConfig::with_data_dir(dir.path().join("data")),
        Box::new(Recorder::default()),
    );

    engine.remove(&paths.target).expect("remove");
    assert!(!paths.target.exists());
    assert!(!paths.backing.exists());
    assert!(!paths.sidecar.exists());
}

// ── Real isolation ───────────────────────────────────────────────────

#[cfg(target_os = "linux")]
mod isolation {
    use std::path::{Path, PathBuf};

    use mole_core::filesystem::mount;
    use mole_core::namespace::NamespaceConfig;
    use mole_runtime::backend::linux::NamespaceBackend;

    use super::*;

    /// A root filesystem borrowing the host's binaries and libraries.
    ///
    /// Bind mounts are detached on drop. If that fails the directory is
    /// leaked rather than removed through a live mount.
    struct HostRoot {
        dir: Option<tempfile::TempDir>,
        mounts: Vec<PathBuf>,
    }

    impl HostRoot {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let rootfs = dir.path().join("rootfs");
            std::fs::create_dir_all(rootfs.join("etc")).expect("etc");
            std::fs::create_dir_all(rootfs.join("work")).expect("work");
            let mut root = Self {
                dir: Some(dir),
                mounts: Vec::new(),
            };
            for name in ["bin", "sbin", "lib", "lib32", "lib64", "usr"] {
                let host = Path::new("/").join(name);
                let Ok(meta) = std::fs::symlink_metadata(&host) else {
                    continue;
                };
                let inside = rootfs.join(name);
                if meta.file_type().is_symlink() {
                    let link = std::fs::read_link(&host).expect("readlink");
                    std::os::unix::fs::symlink(link, &inside).expect("symlink");
                } else if meta.is_dir() {
                    std::fs::create_dir_all(&inside).expect("mkdir");
                    mount::bind_mount(&host, &inside).expect("bind host dir");
                    root.mounts.push(inside);
                }
            }
            root
        }

        fn path(&self) -> PathBuf {
            self.dir
                .as_ref()
                .map(|d| d.path().join("rootfs"))
                .expect("root dir")
        }

        fn command(&self, script: &str, env: &[&str]) -> IsolatedCommand {
            IsolatedCommand {
                argv: vec!["sh".into(), "-c".into(), script.into()],
                env: env.iter().map(ToString::to_string).collect(),
                rootfs: self.path(),
                working_dir: PathBuf::from("/work"),
                hostname: "mole-test".into(),
                namespaces: NamespaceConfig::default(),
                credential: None,
            }
        }
    }

    impl Drop for HostRoot {
        fn drop(&mut self) {
            let detached = self
                .mounts
                .iter()
                .rev()
                .all(|point| mount::unmount(point).is_ok());
            if !detached {
                std::mem::forget(self.dir.take());
            }
        }
    }

    #[test]
    fn entrypoint_runs_chrooted_with_exact_environment() {
        if !can_mount() {
            return;
        }
        let root = HostRoot::new();
        std::fs::write(root.path().join("etc/mole-marker"), "inside\n").expect("marker");
        let script = r#"
            read marker < /etc/mole-marker || exit 10
            [ "$marker" = inside ] || exit 11
            [ "$GREETING" = hello ] || exit 12
            [ -z "$HOME" ] || exit 13
            [ "$(pwd)" = /work ] || exit 14
            [ "$$" = 1 ] || exit 15
            exit 7
        "#;
        let command = root.command(script, &["PATH=/usr/bin:/bin", "GREETING=hello"]);

        let code = NamespaceBackend::new().run(&command).expect("run");
        assert_eq!(code, 7, "script reported a failed check");
    }

    #[test]
    fn zero_exit_is_reported_as_zero() {
        if !can_mount() {
            return;
        }
        let root = HostRoot::new();
        let command = root.command("exit 0", &["PATH=/usr/bin:/bin"]);
        assert_eq!(NamespaceBackend::new().run(&command).expect("run"), 0);
    }

    #[test]
    fn missing_entrypoint_is_a_spawn_error() {
        if !can_mount() {
            return;
        }
        let root = HostRoot::new();
        let mut command = root.command("", &["PATH=/usr/bin:/bin"]);
        command.argv = vec!["definitely-not-installed".into()];

        let err = NamespaceBackend::new().run(&command).expect_err("no such program");
        assert!(matches!(err, MoleError::Spawn { .. }), "{err}");
    }

    #[test]
    fn missing_working_dir_fails_before_exec() {
        if !can_mount() {
            return;
        }
        let root = HostRoot::new();
        let mut command = root.command("exit 0", &["PATH=/usr/bin:/bin"]);
        command.working_dir = PathBuf::from("/nowhere");

        let err = NamespaceBackend::new().run(&command).expect_err("no working dir");
        assert!(matches!(err, MoleError::Chroot { .. }), "{err}");
    }
}
