//! Signal delivery
//!
//! Unix goes through `kill(2)` so that ESRCH and EPERM map onto precise
//! errors. Elsewhere we fall back to sysinfo's portable signalling.

use crate::error::{ProcessError, Result};
use log::debug;

/// How hard to ask a process to go away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM, or the platform's polite equivalent
    Terminate,
    /// SIGKILL, or TerminateProcess
    Kill,
}

impl StopSignal {
    fn operation(&self) -> &'static str {
        match self {
            StopSignal::Terminate => "terminate",
            StopSignal::Kill => "kill",
        }
    }
}

#[cfg(unix)]
pub fn send(pid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // kill(0, ..) would hit our whole process group
    let raw = i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or(ProcessError::NotFound { pid })?;
    let nix_signal = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    debug!("Sending {:?} to process {}", nix_signal, pid);
    match kill(Pid::from_raw(raw), nix_signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ProcessError::NotFound { pid }),
        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
            pid,
            operation: signal.operation(),
        }),
        Err(e) => Err(ProcessError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub fn send(pid: u32, signal: StopSignal) -> Result<()> {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    let process = system.process(sys_pid).ok_or(ProcessError::NotFound { pid })?;

    debug!("Sending {:?} to process {}", signal, pid);
    let delivered = match signal {
        StopSignal::Terminate => process.kill_with(sysinfo::Signal::Term).ok_or_else(|| {
            ProcessError::Unsupported("graceful termination signal".to_string())
        })?,
        StopSignal::Kill => process.kill(),
    };

    if delivered {
        Ok(())
    } else {
        Err(ProcessError::Signal {
            pid,
            reason: format!("{} request was rejected by the OS", signal.operation()),
        })
    }
}
