use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use process_controller::{
    snapshot, ControllerConfig, ProcessError, ProcessFilter, ProcessHandle,
    ProcessInfo, RestartOptions,
};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum CliCommand {
    Help,
    Version,
    Find { filters: Vec<String>, json: bool },
    Info { pid: u32, json: bool },
    Terminate { pid: u32 },
    Kill { pid: u32 },
    Stop { pid: u32, timeout: Option<Duration> },
    Restart { pid: u32, preserve_cwd: bool },
    TerminateAfter { pid: u32, delay: Duration },
    Watch { pid: u32, interval: Duration },
}

fn print_help(program: &str) {
    println!("procctl - find, inspect and control processes");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("\nUsage: {} [--debug] <COMMAND> [ARGS]\n", program);
    println!("Commands:");
    println!("  find [--pid N] [--name S] [--cmdline S] [--filter key=value]... [--json]");
    println!("                                  List matching processes (excluding procctl itself)");
    println!("  info <pid> [--json]             Show one process");
    println!("  terminate <pid>                 Send a graceful termination request");
    println!("  kill <pid>                      Kill unconditionally");
    println!("  stop <pid> [--timeout secs]     Terminate, wait, escalate to kill");
    println!("  restart <pid> [--preserve-cwd]  Stop and relaunch the same command line");
    println!("  terminate-after <pid> <secs>    Terminate after a delay (Ctrl+C cancels)");
    println!("  watch <pid> [--interval secs]   Print CPU and memory until the process exits");
    println!("\nFilter keys: pid, name, name~, cmdline, cmdline~, cwd, user, create_time");
    println!("\nEnvironment Variables:");
    println!("  PROCCTL_STOP_TIMEOUT_MS=<ms>    Wait per signal in stop/restart (default: 5000)");
    println!("  PROCCTL_POLL_INTERVAL_MS=<ms>   Exit polling period (default: 50)");
    println!("  PROCCTL_CPU_INTERVAL_MS=<ms>    CPU sampling window (default: 250)");
    println!("  RUST_LOG=<level>                Set log level (error|warn|info|debug)");
}

fn parse_pid(value: Option<&String>) -> Result<u32> {
    let value = value.ok_or_else(|| anyhow!("missing <pid>"))?;
    value.parse().with_context(|| format!("invalid pid '{}'", value))
}

fn parse_secs(value: Option<&String>, what: &str) -> Result<Duration> {
    let value = value.ok_or_else(|| anyhow!("missing {}", what))?;
    let secs: f64 = value
        .parse()
        .with_context(|| format!("invalid {} '{}'", what, value))?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("{} out of range: {}", what, value))
}

/// Parse everything after the program name; `--debug` is stripped beforehand
fn parse_args(args: &[String]) -> Result<CliCommand> {
    let Some(command) = args.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = &args[1..];
    let flag = |name: &str| rest.iter().any(|a| a == name);
    let option = |name: &str| {
        rest.iter()
            .position(|a| a == name)
            .map(|i| rest.get(i + 1))
    };

    Ok(match command.as_str() {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-v" => CliCommand::Version,
        "find" => {
            let mut filters = Vec::new();
            let mut i = 0;
            while i < rest.len() {
                let key = match rest[i].as_str() {
                    "--pid" => Some("pid"),
                    "--name" => Some("name"),
                    "--cmdline" => Some("cmdline~"),
                    "--filter" => None,
                    "--json" => {
                        i += 1;
                        continue;
                    }
                    other => bail!("unexpected argument '{}'", other),
                };
                let value = rest
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("{} needs a value", rest[i]))?;
                filters.push(match key {
                    Some(key) => format!("{}={}", key, value),
                    None => value.clone(),
                });
                i += 2;
            }
            CliCommand::Find {
                filters,
                json: flag("--json"),
            }
        }
        "info" => CliCommand::Info {
            pid: parse_pid(rest.first())?,
            json: flag("--json"),
        },
        "terminate" => CliCommand::Terminate {
            pid: parse_pid(rest.first())?,
        },
        "kill" => CliCommand::Kill {
            pid: parse_pid(rest.first())?,
        },
        "stop" => CliCommand::Stop {
            pid: parse_pid(rest.first())?,
            timeout: match option("--timeout") {
                Some(value) => Some(parse_secs(value, "--timeout")?),
                None => None,
            },
        },
        "restart" => CliCommand::Restart {
            pid: parse_pid(rest.first())?,
            preserve_cwd: flag("--preserve-cwd"),
        },
        "terminate-after" => CliCommand::TerminateAfter {
            pid: parse_pid(rest.first())?,
            delay: parse_secs(rest.get(1), "<secs>")?,
        },
        "watch" => CliCommand::Watch {
            pid: parse_pid(rest.first())?,
            interval: match option("--interval") {
                Some(value) => parse_secs(value, "--interval")?,
                None => Duration::from_secs(1),
            },
        },
        other => bail!("unknown command '{}'. Use --help for usage", other),
    })
}

fn build_filter(exprs: &[String]) -> Result<ProcessFilter> {
    exprs
        .iter()
        .try_fold(ProcessFilter::new().excluding_current(), |filter, expr| {
            filter.parse_expr(expr)
        })
        .context("invalid filter")
}

fn format_row(info: &ProcessInfo) -> String {
    let started = info
        .started_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>7}  {:<20}  {:<10}  {}  {}",
        info.pid,
        info.name,
        info.user.as_deref().unwrap_or("-"),
        started,
        info.cmdline.join(" ")
    )
}

fn open(pid: u32, config: &ControllerConfig) -> Result<ProcessHandle> {
    ProcessHandle::from_pid_with_config(pid, config.clone())
        .with_context(|| format!("cannot open process {}", pid))
}

/// Poll CPU and memory until the process goes away; returns the number of samples taken
async fn run_watch(handle: ProcessHandle, interval: Duration, cpu_window: Duration) -> Result<usize> {
    let handle = std::sync::Arc::new(handle);
    // tokio panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    let mut samples = 0;

    loop {
        ticker.tick().await;
        let sampler = std::sync::Arc::clone(&handle);
        let sample = tokio::task::spawn_blocking(move || {
            let cpu = sampler.get_cpu_usage(cpu_window)?;
            let memory = sampler.get_memory_usage_mb()?;
            let runtime = sampler.get_runtime()?;
            Ok::<_, ProcessError>((cpu, memory, runtime))
        })
        .await?;

        match sample {
            Ok((cpu, memory, runtime)) => {
                samples += 1;
                println!(
                    "pid {}  cpu {:>6.1}%  mem {:>9.2} MB  up {}s",
                    handle.pid(),
                    cpu,
                    memory,
                    runtime.as_secs()
                );
            }
            Err(e) if e.is_not_found() => {
                info!("Process {} exited", handle.pid());
                return Ok(samples);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn run(command: CliCommand, program: &str, config: ControllerConfig) -> Result<()> {
    match command {
        CliCommand::Help => print_help(program),
        CliCommand::Version => println!("procctl {}", env!("CARGO_PKG_VERSION")),
        CliCommand::Find { filters, json } => {
            let filter = build_filter(&filters)?;
            debug!("Looking up processes with {:?}", filter);
            let infos = snapshot(&filter)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                for info in &infos {
                    println!("{}", format_row(info));
                }
                info!("{} matching processes", infos.len());
            }
        }
        CliCommand::Info { pid, json } => {
            let info = open(pid, &config)?.info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{}", format_row(&info));
                println!("  status: {}", info.status);
                if let Some(cwd) = &info.cwd {
                    println!("  cwd:    {}", cwd.display());
                }
                if let Some(exe) = &info.exe {
                    println!("  exe:    {}", exe.display());
                }
            }
        }
        CliCommand::Terminate { pid } => {
            open(pid, &config)?.terminate()?;
            println!("Termination requested for process {}", pid);
        }
        CliCommand::Kill { pid } => {
            open(pid, &config)?.force_kill()?;
            println!("Process {} killed", pid);
        }
        CliCommand::Stop { pid, timeout } => {
            let handle = open(pid, &config)?;
            let timeout = timeout.unwrap_or_else(|| config.stop_timeout());
            tokio::task::spawn_blocking(move || handle.stop(timeout)).await??;
            println!("Process {} stopped", pid);
        }
        CliCommand::Restart { pid, preserve_cwd } => {
            let handle = open(pid, &config)?;
            warn!("Restart replays only the command line; environment and open files are not restored");
            let restarted = tokio::task::spawn_blocking(move || {
                handle.restart_with(RestartOptions { preserve_cwd })
            })
            .await??;
            println!("Process {} restarted as {}", pid, restarted.pid());
        }
        CliCommand::TerminateAfter { pid, delay } => {
            let handle = open(pid, &config)?;
            let timer = handle.terminate_after(delay)?;
            println!("Process {} will be terminated in {:?} (Ctrl+C cancels)", pid, delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tokio::signal::ctrl_c() => {
                    if timer.cancel() {
                        println!("Cancelled");
                    }
                }
            }
            // Exiting would take the timer thread down with us
            tokio::task::spawn_blocking(move || timer.join()).await?;
        }
        CliCommand::Watch { pid, interval } => {
            let handle = open(pid, &config)?;
            let cpu_window = config.cpu_sample_interval().min(interval);
            tokio::select! {
                result = run_watch(handle, interval, cpu_window) => {
                    let samples = result?;
                    debug!("Watch finished after {} samples", samples);
                }
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().collect();
    let program = if args.is_empty() {
        "procctl".to_string()
    } else {
        args.remove(0)
    };

    let debug_mode = args.iter().any(|a| a == "--debug");
    args.retain(|a| a != "--debug");

    // Initialize logging with debug level if --debug flag is present
    if debug_mode {
        env::set_var("RUST_LOG", "debug");
    } else if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let command = parse_args(&args)?;
    let config = ControllerConfig::load();
    debug!("Configuration: {:?}", config);

    if let Err(e) = run(command, &program, config).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
