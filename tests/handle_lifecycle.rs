//! End-to-end tests against real `sleep` processes
#![cfg(unix)]

use process_controller::{
    find_processes, ControllerConfig, ProcessFilter, ProcessHandle, RestartOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

/// Child process that is killed and reaped when the test ends
struct Spawned(Child);

impl Spawned {
    fn new(program: &str, args: &[&str]) -> Self {
        let child = Command::new(program).args(args).spawn().expect("spawn test process");
        Spawned(child)
    }

    fn sleep(secs: &str) -> Self {
        Self::new("sleep", &[secs])
    }

    fn busy() -> Self {
        Self::new("sh", &["-c", "while :; do :; done"])
    }

    fn pid(&self) -> u32 {
        self.0.id()
    }

    fn handle(&self) -> ProcessHandle {
        ProcessHandle::from_pid(self.pid()).expect("wrap test process")
    }
}

impl Drop for Spawned {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        stop_timeout_ms: 2_000,
        poll_interval_ms: 10,
        ..ControllerConfig::default()
    }
}

#[test]
fn lookup_by_pid_returns_exactly_one() {
    let child = Spawned::sleep("101");
    let handles = find_processes(&ProcessFilter::new().pid(child.pid())).unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].pid(), child.pid());
}

#[test]
fn lookup_by_name_and_cmdline() {
    let child = Spawned::sleep("102.5");
    let filter = ProcessFilter::new().name("sleep").cmdline(["sleep", "102.5"]);
    let handles = find_processes(&filter).unwrap();
    assert!(handles.iter().any(|h| h.pid() == child.pid()));

    let filter = ProcessFilter::new().cmdline_contains("102.5").pid(child.pid());
    assert_eq!(find_processes(&filter).unwrap().len(), 1);

    let filter = ProcessFilter::new().name("not-sleep").pid(child.pid());
    assert!(find_processes(&filter).unwrap().is_empty());
}

#[test]
fn accessors_on_live_process() {
    let child = Spawned::sleep("103");
    let handle = child.handle();

    assert!(handle.is_running());
    assert!(handle.get_memory_usage_mb().unwrap() >= 0.0);
    assert_eq!(handle.cmdline().unwrap(), vec!["sleep", "103"]);

    let first = handle.get_runtime().unwrap();
    let second = handle.get_runtime().unwrap();
    assert!(second >= first);

    let info = handle.info().unwrap();
    assert_eq!(info.pid, child.pid());
}

#[test]
fn cpu_usage_blocks_for_interval_and_stays_in_bounds() {
    let child = Spawned::sleep("104");
    let handle = child.handle();
    let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f32;

    let started = Instant::now();
    let usage = handle.get_cpu_usage(Duration::from_millis(100)).unwrap();
    let elapsed = started.elapsed();

    // Short windows are raised to the minimum the OS counters support
    assert!(elapsed >= Duration::from_millis(100).max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
    assert!(elapsed < Duration::from_secs(2));
    assert!((0.0..=100.0 * cores).contains(&usage));
}

#[test]
fn terminate_then_everything_is_not_found() {
    let child = Spawned::sleep("105");
    let handle = child.handle().with_config(fast_config());

    handle.terminate().unwrap();
    assert!(handle.wait_for_exit(Duration::from_secs(5)));
    assert!(!handle.is_running());

    assert!(handle.get_runtime().unwrap_err().is_not_found());
    assert!(handle.get_memory_usage_mb().unwrap_err().is_not_found());
    assert!(handle.get_cpu_usage(Duration::ZERO).unwrap_err().is_not_found());
    assert!(handle.info().unwrap_err().is_not_found());
    assert!(handle.terminate().unwrap_err().is_not_found());
    assert!(handle.force_kill().unwrap_err().is_not_found());
    assert!(handle.terminate_after(Duration::from_millis(10)).unwrap_err().is_not_found());
    assert!(handle.restart().unwrap_err().is_not_found());
}

#[test]
fn force_kill_stops_process() {
    let child = Spawned::sleep("106");
    let handle = child.handle().with_config(fast_config());

    handle.force_kill().unwrap();
    assert!(handle.wait_for_exit(Duration::from_secs(5)));
}

#[test]
fn two_handles_agree_on_state() {
    let child = Spawned::sleep("107");
    let a = child.handle().with_config(fast_config());
    let b = child.handle();

    assert!(a.is_running() && b.is_running());
    a.terminate().unwrap();
    assert!(a.wait_for_exit(Duration::from_secs(5)));
    assert!(!b.is_running());
}

#[test]
fn terminate_after_does_not_block() {
    let child = Spawned::sleep("108");
    let handle = child.handle().with_config(fast_config());

    let started = Instant::now();
    let timer = handle.terminate_after(Duration::from_millis(100)).unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(handle.is_running());

    thread::sleep(Duration::from_millis(200));
    assert!(handle.wait_for_exit(Duration::from_secs(5)));
    assert!(timer.has_fired());
}

#[test]
fn terminate_after_on_exited_process_is_a_no_op() {
    let child = Spawned::sleep("109");
    let handle = child.handle().with_config(fast_config());

    let timer = handle.terminate_after(Duration::from_millis(100)).unwrap();
    handle.force_kill().unwrap();
    assert!(handle.wait_for_exit(Duration::from_secs(5)));

    timer.join();
}

#[test]
fn cancelled_timer_leaves_process_alone() {
    let child = Spawned::sleep("110");
    let handle = child.handle();

    let timer = handle.terminate_after(Duration::from_millis(100)).unwrap();
    assert!(timer.cancel());
    timer.join();
    thread::sleep(Duration::from_millis(150));
    assert!(handle.is_running());
}

#[test]
fn stop_escalates_to_kill() {
    let child = Spawned::new("sh", &["-c", "trap '' TERM; while :; do sleep 0.1; done"]);
    // Let the shell install its trap
    thread::sleep(Duration::from_millis(200));
    let handle = child.handle().with_config(fast_config());

    let started = Instant::now();
    handle.stop(Duration::from_millis(300)).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(!handle.is_running());
}

#[test]
fn restart_replays_command_line() {
    let child = Spawned::sleep("100");
    let handle = child.handle().with_config(fast_config());

    let restarted = handle.restart().unwrap();

    assert_ne!(restarted.pid(), handle.pid());
    assert!(!handle.is_running());
    assert!(restarted.is_running());
    assert_eq!(restarted.cmdline().unwrap(), vec!["sleep", "100"]);

    restarted.force_kill().unwrap();
    assert!(restarted.wait_for_exit(Duration::from_secs(5)));
}

#[test]
fn busy_process_reads_busy_at_default_window() {
    let child = Spawned::busy();
    let handle = child.handle();

    let usage = handle
        .get_cpu_usage(ControllerConfig::default().cpu_sample_interval())
        .unwrap();
    assert!(usage > 50.0, "busy loop measured at {}%", usage);
}

#[test]
fn busy_process_reads_busy_through_zero_interval() {
    let child = Spawned::busy();
    let handle = child.handle();

    assert_eq!(handle.get_cpu_usage(Duration::ZERO).unwrap(), 0.0);
    thread::sleep(Duration::from_millis(300));
    let usage = handle.get_cpu_usage(Duration::ZERO).unwrap();
    assert!(usage > 50.0, "busy loop measured at {}%", usage);
}

#[test]
fn huge_durations_do_not_overflow() {
    let child = Spawned::sleep("111");
    let handle = child.handle().with_config(fast_config());

    let timer = handle.terminate_after(Duration::MAX).unwrap();
    assert!(timer.due().is_none());
    assert!(timer.cancel());
    timer.join();
    assert!(handle.is_running());

    handle.stop(Duration::MAX).unwrap();
    assert!(!handle.is_running());
    assert!(handle.wait_for_exit(Duration::MAX));
}

fn sleep_binary() -> PathBuf {
    ["/bin/sleep", "/usr/bin/sleep"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .expect("sleep binary")
}

/// Removes a path when the test ends
struct Cleanup(PathBuf);

impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
        let _ = fs::remove_file(&self.0);
    }
}

#[test]
fn long_executable_name_is_not_truncated() {
    let name = format!("a_very_long_program_name_{}", std::process::id());
    assert!(name.len() > 15);
    let link = Cleanup(std::env::temp_dir().join(&name));
    std::os::unix::fs::symlink(sleep_binary(), &link.0).unwrap();

    let child = Spawned::new(link.0.to_str().unwrap(), &["112"]);
    let handle = child.handle();
    assert_eq!(handle.info().unwrap().name, name);

    let handles = find_processes(&ProcessFilter::new().name(name.clone())).unwrap();
    assert!(handles.iter().any(|h| h.pid() == child.pid()));
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap()
}

#[test]
fn restart_can_keep_working_directory() {
    let dir = Cleanup(std::env::temp_dir().join(format!("procctl-cwd-{}", std::process::id())));
    fs::create_dir_all(&dir.0).unwrap();

    let child = Command::new("sleep")
        .arg("113")
        .current_dir(&dir.0)
        .spawn()
        .expect("spawn test process");
    let child = Spawned(child);
    let handle = child.handle().with_config(fast_config());
    assert_eq!(handle.info().unwrap().cwd, Some(canonical(&dir.0)));

    let restarted = handle
        .restart_with(RestartOptions { preserve_cwd: true })
        .unwrap();
    let cwd = restarted.info().unwrap().cwd;

    restarted.force_kill().unwrap();
    assert!(restarted.wait_for_exit(Duration::from_secs(5)));
    assert_eq!(cwd, Some(canonical(&dir.0)));
    assert!(!handle.is_running());
}
