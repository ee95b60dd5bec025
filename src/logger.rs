use anyhow::{Context, Result};
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::os::fd::FromRawFd;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Derive the human-readable group name from the rendezvous socket path.
///
/// Group sockets are named `grouphost-<group_name>-<prefix_id>-<arch>.sock`,
/// where the prefix id is an opaque hash that keeps different deployments
/// from colliding without needing complicated filenames. When the name does
/// not follow the convention the raw file stem is used as-is, which is not
/// an error.
pub fn derive_group_name(socket_path: &Path) -> String {
    let stem = socket_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let pattern = Regex::new(r"^grouphost-(.*)-[^-]+-[^-]+$").expect("group name pattern");
    match pattern.captures(stem) {
        Some(groups) => {
            let mut name = groups[1].to_string();
            // Mark 32-bit builds so a 32-bit and a 64-bit group with the
            // same name can be told apart in the logs
            if cfg!(target_arch = "x86") {
                name.push_str("-x32");
            }
            name
        }
        None => stem.to_string(),
    }
}

/// The destination broker logs are written to.
///
/// Resolved *before* the stdio captures rewire fd 1 and 2: either an
/// explicit log file, or a private duplicate of the inherited stderr. The
/// duplicate keeps the logger working after the capture takes over the
/// original descriptor, and avoids the feedback loop of logging into the
/// stream we are relaying.
pub fn log_sink(log_file: Option<&Path>) -> Result<File> {
    match log_file {
        Some(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("could not open log file {}", path.display())),
        None => {
            let fd = unsafe { libc::dup(libc::STDERR_FILENO) };
            if fd < 0 {
                return Err(std::io::Error::last_os_error())
                    .context("could not duplicate stderr for logging");
            }
            Ok(unsafe { File::from_raw_fd(fd) })
        }
    }
}

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` wins over the CLI level when set.
pub fn init_tracing(log_level: &str, sink: File) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Arc::new(sink));

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("could not install tracing subscriber")?;

    Ok(())
}
