//! Launching a replacement process from a captured command line

use crate::error::{ProcessError, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

/// Spawn `cmdline` detached from our stdio and return its PID.
///
/// A background thread waits on the child so it never lingers as a zombie of
/// the calling process.
pub fn spawn_detached(cmdline: &[String], cwd: Option<&Path>) -> Result<u32> {
    let (program, args) = cmdline.split_first().ok_or_else(|| ProcessError::Launch {
        command: Vec::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line"),
    })?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| ProcessError::Launch {
        command: cmdline.to_vec(),
        source,
    })?;
    let pid = child.id();
    info!("Launched {:?} as process {}", cmdline, pid);

    let reaper = thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || match child.wait() {
            Ok(status) => debug!("Relaunched process {} exited: {}", pid, status),
            Err(e) => warn!("Failed to wait on relaunched process {}: {}", pid, e),
        });
    if let Err(e) = reaper {
        warn!("Could not start reaper for process {}: {}", pid, e);
    }

    Ok(pid)
}
