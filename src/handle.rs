//! Handle to one running process
//!
//! A handle stores only the PID and the start time observed when it was
//! created. Every operation re-reads the process table and compares start
//! times, so a handle whose PID has been recycled by another process reports
//! `NotFound` instead of acting on the stranger.

use crate::config::ControllerConfig;
use crate::error::{ProcessError, Result};
use crate::info::{full_refresh_kind, is_exited_status, ProcessInfo};
use crate::launch;
use crate::signal::{self, StopSignal};
use crate::timer::ScheduledTermination;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use sysinfo::{
    Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users, MINIMUM_CPU_UPDATE_INTERVAL,
};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// PID plus start time; the pair survives PID reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    /// Seconds since the Unix epoch
    pub start_time: u64,
}

impl ProcessIdentity {
    /// Refresh this PID's table entry and confirm it is still the same, unexited process
    fn load(&self, kind: ProcessRefreshKind) -> Result<System> {
        let pid = Pid::from_u32(self.pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
        self.verify(&system)?;
        Ok(system)
    }

    fn verify(&self, system: &System) -> Result<()> {
        match system.process(Pid::from_u32(self.pid)) {
            Some(process)
                if process.start_time() == self.start_time && !is_exited_status(process.status()) =>
            {
                Ok(())
            }
            _ => Err(ProcessError::NotFound { pid: self.pid }),
        }
    }

    fn signal(&self, signal: StopSignal) -> Result<()> {
        self.load(ProcessRefreshKind::nothing())?;
        signal::send(self.pid, signal)
    }
}

/// Options for [`ProcessHandle::restart_with`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartOptions {
    /// Start the replacement in the old process's working directory
    pub preserve_cwd: bool,
}

/// A process discovered by lookup or wrapped by PID
pub struct ProcessHandle {
    identity: ProcessIdentity,
    config: ControllerConfig,
    // Previous sample for zero-interval CPU readings
    cpu_baseline: Mutex<Option<CpuSample>>,
}

struct CpuSample {
    system: System,
    taken: Instant,
    last: f32,
}

impl ProcessHandle {
    pub(crate) fn from_identity(identity: ProcessIdentity, config: ControllerConfig) -> Self {
        Self {
            identity,
            config,
            cpu_baseline: Mutex::new(None),
        }
    }

    /// Wrap a known PID. Fails with `NotFound` if no live process has it.
    pub fn from_pid(pid: u32) -> Result<Self> {
        Self::from_pid_with_config(pid, ControllerConfig::default())
    }

    pub fn from_pid_with_config(pid: u32, config: ControllerConfig) -> Result<Self> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing(),
        );

        match system.process(sys_pid) {
            Some(process) if !is_exited_status(process.status()) => Ok(Self::from_identity(
                ProcessIdentity {
                    pid,
                    start_time: process.start_time(),
                },
                config,
            )),
            _ => Err(ProcessError::NotFound { pid }),
        }
    }

    /// Replace the timing configuration used by `stop` and `restart`
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pid(&self) -> u32 {
        self.identity.pid
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    /// Creation time in seconds since the Unix epoch, captured at construction
    pub fn start_time(&self) -> u64 {
        self.identity.start_time
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    // ===== Accessors =====

    /// True while the OS lists this process and it is not a zombie
    pub fn is_running(&self) -> bool {
        self.identity.load(ProcessRefreshKind::nothing()).is_ok()
    }

    /// Wall-clock time since the process was created.
    ///
    /// Start times have one-second resolution, so the result may be up to a
    /// second off, but it never decreases for a live process.
    pub fn get_runtime(&self) -> Result<Duration> {
        self.identity.load(ProcessRefreshKind::nothing())?;
        let started = UNIX_EPOCH + Duration::from_secs(self.identity.start_time);
        Ok(SystemTime::now().duration_since(started).unwrap_or_default())
    }

    /// CPU usage in percent of one core, in `[0, 100 × cores]`.
    ///
    /// With a nonzero `interval` this blocks and measures across the interval.
    /// Intervals shorter than [`MINIMUM_CPU_UPDATE_INTERVAL`] are raised to it,
    /// since the OS counters do not move reliably over shorter windows.
    ///
    /// A zero interval never blocks: it measures since the previous
    /// zero-interval sample on this handle, and the first call returns 0.0.
    /// Calls closer together than the minimum window repeat the last reading
    /// after checking the process is still alive.
    pub fn get_cpu_usage(&self, interval: Duration) -> Result<f32> {
        let pid = Pid::from_u32(self.identity.pid);
        let kind = ProcessRefreshKind::nothing().with_cpu();

        let usage = if interval.is_zero() {
            let mut baseline = self
                .cpu_baseline
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match baseline.as_mut() {
                Some(sample) if sample.taken.elapsed() >= MINIMUM_CPU_UPDATE_INTERVAL => {
                    sample
                        .system
                        .refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
                    self.identity.verify(&sample.system)?;
                    sample.taken = Instant::now();
                    sample.last = sample.system.process(pid).map(|p| p.cpu_usage()).unwrap_or(0.0);
                    sample.last
                }
                Some(sample) => {
                    self.identity.load(ProcessRefreshKind::nothing())?;
                    sample.last
                }
                None => {
                    *baseline = Some(CpuSample {
                        system: self.identity.load(kind)?,
                        taken: Instant::now(),
                        last: 0.0,
                    });
                    0.0
                }
            }
        } else {
            let mut system = self.identity.load(kind)?;
            thread::sleep(interval.max(MINIMUM_CPU_UPDATE_INTERVAL));
            system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
            self.identity.verify(&system)?;
            system.process(pid).map(|p| p.cpu_usage()).unwrap_or(0.0)
        };

        Ok(clamp_cpu(usage))
    }

    /// Resident memory in MiB, rounded to two decimals
    pub fn get_memory_usage_mb(&self) -> Result<f64> {
        let pid = Pid::from_u32(self.identity.pid);
        let system = self.identity.load(ProcessRefreshKind::nothing().with_memory())?;
        let bytes = system.process(pid).map(|p| p.memory()).unwrap_or(0);
        Ok((bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0)
    }

    /// Fresh snapshot of name, command line, cwd, owner and status
    pub fn info(&self) -> Result<ProcessInfo> {
        let pid = Pid::from_u32(self.identity.pid);
        let system = self.identity.load(full_refresh_kind())?;
        let users = Users::new_with_refreshed_list();
        system
            .process(pid)
            .map(|process| ProcessInfo::from_process(pid, process, Some(&users)))
            .ok_or(ProcessError::NotFound { pid: self.identity.pid })
    }

    pub fn cmdline(&self) -> Result<Vec<String>> {
        Ok(self.capture_launch_spec(false)?.0)
    }

    // ===== Control =====

    /// Ask the process to shut down (SIGTERM). Does not wait for it to exit.
    pub fn terminate(&self) -> Result<()> {
        info!("Terminating process {}", self.identity.pid);
        self.identity.signal(StopSignal::Terminate)
    }

    /// Kill the process unconditionally (SIGKILL). Does not wait for it to exit.
    pub fn force_kill(&self) -> Result<()> {
        warn!("Force killing process {}", self.identity.pid);
        self.identity.signal(StopSignal::Kill)
    }

    /// Poll until the process exits or `timeout` passes; true if it exited
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        loop {
            if !self.is_running() {
                return true;
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.config.poll_interval().min(deadline - now)
                }
                None => self.config.poll_interval(),
            };
            thread::sleep(pause);
        }
    }

    /// Terminate, wait up to `timeout`, then force kill and wait again.
    ///
    /// Fails with `NotFound` if the process was already gone, and with
    /// `StillRunning` if it survives the kill.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        self.terminate()?;
        if self.wait_for_exit(timeout) {
            debug!("Process {} exited after terminate", self.identity.pid);
            return Ok(());
        }

        warn!(
            "Process {} ignored terminate for {:?}, escalating to kill",
            self.identity.pid, timeout
        );
        match self.force_kill() {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        if self.wait_for_exit(timeout) {
            Ok(())
        } else {
            Err(ProcessError::StillRunning {
                pid: self.identity.pid,
                waited: timeout.saturating_mul(2),
            })
        }
    }

    /// Terminate the process after `delay` without blocking the caller.
    ///
    /// The request fires at most once from a background thread. If the process
    /// is already gone by then, nothing happens. The only ways to prevent it
    /// are [`ScheduledTermination::cancel`] or the process exiting first.
    pub fn terminate_after(&self, delay: Duration) -> Result<ScheduledTermination> {
        let identity = self.identity;
        identity.load(ProcessRefreshKind::nothing())?;
        debug!("Scheduling termination of process {} in {:?}", identity.pid, delay);

        ScheduledTermination::spawn(identity.pid, delay, move || {
            match identity.signal(StopSignal::Terminate) {
                Ok(()) => info!("Delayed termination sent to process {}", identity.pid),
                Err(e) if e.is_not_found() => {
                    debug!("Process {} already gone at delayed termination", identity.pid)
                }
                Err(e) => warn!("Delayed termination of process {} failed: {}", identity.pid, e),
            }
        })
    }

    /// Stop the process and launch its command line again.
    ///
    /// Only the command line is replayed. Working directory, environment,
    /// open files and parent/child relationships are lost, so prefer
    /// restarting through whatever supervisor started the process.
    pub fn restart(&self) -> Result<ProcessHandle> {
        self.restart_with(RestartOptions::default())
    }

    pub fn restart_with(&self, options: RestartOptions) -> Result<ProcessHandle> {
        let (cmdline, cwd) = self.capture_launch_spec(options.preserve_cwd)?;
        info!("Restarting process {}: {:?}", self.identity.pid, cmdline);

        self.stop(self.config.stop_timeout())?;

        let new_pid = launch::spawn_detached(&cmdline, cwd.as_deref())?;
        self.await_launch(new_pid)
    }

    fn capture_launch_spec(&self, with_cwd: bool) -> Result<(Vec<String>, Option<PathBuf>)> {
        let pid = Pid::from_u32(self.identity.pid);
        let mut kind = ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always);
        if with_cwd {
            kind = kind.with_cwd(UpdateKind::Always);
        }

        let system = self.identity.load(kind)?;
        let process = system
            .process(pid)
            .ok_or(ProcessError::NotFound { pid: self.identity.pid })?;

        let cmdline: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        if cmdline.is_empty() {
            return Err(ProcessError::PermissionDenied {
                pid: self.identity.pid,
                operation: "read the command line of",
            });
        }

        Ok((cmdline, process.cwd().map(|p| p.to_path_buf())))
    }

    fn await_launch(&self, pid: u32) -> Result<ProcessHandle> {
        let deadline = deadline_after(self.config.launch_settle());
        loop {
            match Self::from_pid_with_config(pid, self.config.clone()) {
                Ok(handle) => return Ok(handle),
                Err(e) if deadline.map_or(false, |d| Instant::now() >= d) => return Err(e),
                Err(_) => thread::sleep(self.config.poll_interval()),
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.identity.pid)
            .field("start_time", &self.identity.start_time)
            .finish()
    }
}

/// `None` when `timeout` reaches past what `Instant` can represent
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn clamp_cpu(usage: f32) -> f32 {
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f32;
    usage.clamp(0.0, 100.0 * cores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_handle() {
        let handle = ProcessHandle::from_pid(std::process::id()).unwrap();
        assert!(handle.is_running());
        assert_eq!(handle.pid(), std::process::id());
        assert!(handle.get_memory_usage_mb().unwrap() > 0.0);
        assert!(!handle.cmdline().unwrap().is_empty());
    }

    #[test]
    fn test_runtime_is_monotonic() {
        let handle = ProcessHandle::from_pid(std::process::id()).unwrap();
        let first = handle.get_runtime().unwrap();
        thread::sleep(Duration::from_millis(20));
        let second = handle.get_runtime().unwrap();
        assert!(second >= first);
    }

    #[test]
    fn test_zero_interval_cpu_starts_at_zero() {
        let handle = ProcessHandle::from_pid(std::process::id()).unwrap();
        assert_eq!(handle.get_cpu_usage(Duration::ZERO).unwrap(), 0.0);
        let next = handle.get_cpu_usage(Duration::ZERO).unwrap();
        assert!(next >= 0.0);
    }

    #[test]
    fn test_recycled_pid_is_not_found() {
        let current = ProcessHandle::from_pid(std::process::id()).unwrap();
        let stranger = ProcessHandle::from_identity(
            ProcessIdentity {
                pid: current.pid(),
                start_time: current.start_time().saturating_sub(3600),
            },
            ControllerConfig::default(),
        );

        assert!(!stranger.is_running());
        assert!(stranger.get_runtime().unwrap_err().is_not_found());
        assert!(stranger.get_memory_usage_mb().unwrap_err().is_not_found());
        assert!(stranger.terminate().unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_pid() {
        let err = ProcessHandle::from_pid(u32::MAX - 1).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_clamp_cpu() {
        assert_eq!(clamp_cpu(-1.0), 0.0);
        assert_eq!(clamp_cpu(42.0), 42.0);
        assert!(clamp_cpu(f32::MAX) <= 100.0 * 4096.0);
    }
}
