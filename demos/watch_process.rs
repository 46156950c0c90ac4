/// Manual walkthrough of the process-controller API
///
/// Launches `sleep 30`, finds it again by command line, samples it a few
/// times, restarts it, then schedules its termination.
///
/// Run with: cargo run --example watch_process

use anyhow::{Context, Result};
use process_controller::{find_processes, ProcessFilter};
use std::process::Command;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    println!("=== process-controller walkthrough ===\n");

    let mut child = Command::new("sleep")
        .arg("30")
        .spawn()
        .context("failed to launch sleep")?;
    println!("Launched sleep 30 as pid {}", child.id());

    let filter = ProcessFilter::new().name("sleep").cmdline(["sleep", "30"]);
    let handles = find_processes(&filter)?;
    println!("Lookup {:?} found {} process(es)", filter.criteria(), handles.len());

    let handle = handles
        .into_iter()
        .find(|h| h.pid() == child.id())
        .context("launched process was not found by lookup")?;

    for _ in 0..3 {
        println!(
            "  • runtime {:>3}s  cpu {:>5.1}%  memory {:.2} MB",
            handle.get_runtime()?.as_secs(),
            handle.get_cpu_usage(Duration::from_millis(200))?,
            handle.get_memory_usage_mb()?
        );
    }

    println!("\nRestarting (command line only)...");
    let restarted = handle.restart()?;
    let _ = child.wait();
    println!("✓ Old pid {} running: {}", handle.pid(), handle.is_running());
    println!("✓ New pid {} cmdline: {:?}", restarted.pid(), restarted.cmdline()?);

    println!("\nScheduling termination in 500ms...");
    let timer = restarted.terminate_after(Duration::from_millis(500))?;
    println!("  caller is free; running = {}", restarted.is_running());
    timer.join();
    restarted.wait_for_exit(Duration::from_secs(5));
    println!("✓ After timer: running = {}", restarted.is_running());

    Ok(())
}
