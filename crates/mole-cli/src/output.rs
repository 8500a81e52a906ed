//! Formatted output helpers for CLI commands.
//!
//! Everything goes to stderr: the container shares the launcher's stdout.

use std::path::Path;

use mole_common::error::MoleError;
use mole_image::assembler::AssemblyOutcome;
use mole_image::reference::ImageReference;
use mole_runtime::engine::PulledImage;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Announces a pull.
#[allow(clippy::print_stderr)]
pub fn print_pulling(image: &ImageReference, target: &Path) {
    eprintln!("  {BOLD}Pulling{RESET} {image} {DIM}-> {}{RESET}", target.display());
}

/// Prints one line per layer and a total.
#[allow(clippy::print_stderr)]
pub fn print_pull_summary(pulled: &PulledImage) {
    for line in summary_lines(&pulled.outcome) {
        eprintln!("{line}");
    }
}

fn summary_lines(outcome: &AssemblyOutcome) -> Vec<String> {
    match outcome {
        AssemblyOutcome::Skipped => {
            vec![format!("  {DIM}root filesystem already assembled{RESET}")]
        }
        AssemblyOutcome::Assembled(layers) => {
            let mut lines: Vec<String> = layers
                .iter()
                .map(|layer| match layer.downloaded_bytes {
                    Some(bytes) => format!(
                        "    {GREEN}●{RESET} {} {DIM}{}{RESET}",
                        layer.digest.short(),
                        format_bytes(bytes)
                    ),
                    None => format!("    {DIM}● {} cached{RESET}", layer.digest.short()),
                })
                .collect();
            lines.push(format!(
                "  {BOLD}{} layer(s){RESET}, {} downloaded",
                layers.len(),
                format_bytes(outcome.downloaded_bytes())
            ));
            lines
        }
    }
}

/// Returns the process exit code for a failed command.
///
/// A container that exited non-zero passes its code through; anything
/// else is 1.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<MoleError>()
        .map_or(1, MoleError::exit_code)
        .try_into()
        .unwrap_or(1)
}

/// Prints a failed command's error chain.
///
/// A container's own non-zero exit is not an error of mole and is only
/// logged.
#[allow(clippy::print_stderr)]
pub fn report_error(err: &anyhow::Error) {
    if let Some(MoleError::ChildExit { code }) = err.downcast_ref::<MoleError>() {
        tracing::debug!(code, "container exited unsuccessfully");
        return;
    }
    eprintln!("{RED}{BOLD}error:{RESET} {err:#}");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use anyhow::Context;
    use mole_common::types::LayerDigest;
    use mole_image::cache::CachedLayer;

    use super::*;

    #[test]
    fn format_bytes_displays_bytes() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn format_bytes_displays_kib() {
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }

    #[test]
    fn format_bytes_displays_mib() {
        assert_eq!(format_bytes(134_217_728), "128.0 MiB");
    }

    #[test]
    fn child_exit_code_passes_through_context() {
        let err = Err::<(), _>(MoleError::ChildExit { code: 42 })
            .context("running alpine")
            .expect_err("error");
        assert_eq!(exit_code(&err), 42);
    }

    #[test]
    fn other_errors_exit_with_one() {
        let err = anyhow::Error::new(MoleError::UserNotFound {
            name: "nobody".into(),
        });
        assert_eq!(exit_code(&err), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("plain")), 1);
    }

    #[test]
    fn out_of_range_code_falls_back_to_one() {
        let err = anyhow::Error::new(MoleError::ChildExit { code: 300 });
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn summary_lists_layers_and_total() {
        let outcome = AssemblyOutcome::Assembled(vec![
            CachedLayer {
                digest: LayerDigest::new("sha256:aaaaaaaaaaaaaaaa"),
                path: PathBuf::from("/cache/a"),
                downloaded_bytes: Some(2048),
                implied_dirs: BTreeSet::new(),
            },
            CachedLayer {
                digest: LayerDigest::new("sha256:bbbbbbbbbbbbbbbb"),
                path: PathBuf::from("/cache/b"),
                downloaded_bytes: None,
                implied_dirs: BTreeSet::new(),
            },
        ]);
        let lines = summary_lines(&outcome);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("2.0 KiB"));
        assert!(lines[1].contains("cached"));
        assert!(lines[2].contains("2 layer(s)"));
    }
}
