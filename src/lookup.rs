//! Process lookup: scan the table, filter, hand out handles

use crate::config::ControllerConfig;
use crate::error::{ProcessError, Result};
use crate::filter::ProcessFilter;
use crate::handle::{ProcessHandle, ProcessIdentity};
use crate::info::{full_refresh_kind, is_exited_status, ProcessInfo};
use log::debug;
use sysinfo::{Pid, ProcessesToUpdate, System, Users};

/// Handles for every running process that matches `filter`, ordered by PID
pub fn find_processes(filter: &ProcessFilter) -> Result<Vec<ProcessHandle>> {
    find_processes_with(filter, &ControllerConfig::default())
}

pub fn find_processes_with(filter: &ProcessFilter, config: &ControllerConfig) -> Result<Vec<ProcessHandle>> {
    Ok(snapshot(filter)?
        .into_iter()
        .map(|info| {
            ProcessHandle::from_identity(
                ProcessIdentity {
                    pid: info.pid,
                    start_time: info.start_time,
                },
                config.clone(),
            )
        })
        .collect())
}

/// First match by PID. A miss is `NotFound` when the filter pins a PID, `NoMatch` otherwise.
pub fn find_one(filter: &ProcessFilter) -> Result<ProcessHandle> {
    find_processes(filter)?.into_iter().next().ok_or_else(|| match filter.pinned_pid() {
        Some(pid) => ProcessError::NotFound { pid },
        None => ProcessError::NoMatch {
            filter: format!("{:?}", filter.criteria()),
        },
    })
}

/// Attribute snapshots of every running process that matches `filter`, ordered by PID.
///
/// Zombies are skipped. A process the OS refuses to describe at all is
/// skipped too, unless nothing matched, in which case the lookup fails with
/// `PermissionDenied` so the caller can tell "no match" from "could not look".
pub fn snapshot(filter: &ProcessFilter) -> Result<Vec<ProcessInfo>> {
    ensure_supported(sysinfo::IS_SUPPORTED_SYSTEM)?;

    let mut system = System::new();
    let pinned = filter.pinned_pid().map(Pid::from_u32);
    let targets = match pinned.as_ref() {
        Some(pid) => ProcessesToUpdate::Some(std::slice::from_ref(pid)),
        None => ProcessesToUpdate::All,
    };
    system.refresh_processes_specifics(targets, true, full_refresh_kind());
    let users = Users::new_with_refreshed_list();

    let live = system
        .processes()
        .iter()
        .filter(|(_, process)| !is_exited_status(process.status()))
        .map(|(pid, process)| ProcessInfo::from_process(*pid, process, Some(&users)));

    select(filter, live)
}

fn ensure_supported(supported: bool) -> Result<()> {
    if supported {
        Ok(())
    } else {
        Err(ProcessError::Unsupported(format!(
            "process enumeration on {}",
            std::env::consts::OS
        )))
    }
}

/// Apply `filter` to scanned processes and decide between a result and `PermissionDenied`
fn select<I>(filter: &ProcessFilter, scanned: I) -> Result<Vec<ProcessInfo>>
where
    I: IntoIterator<Item = ProcessInfo>,
{
    let mut matches = Vec::new();
    let mut uninspectable = None;
    let mut count = 0usize;

    for info in scanned {
        count += 1;
        if filter.matches(&info) {
            matches.push(info);
        } else if !info.is_inspectable() {
            uninspectable.get_or_insert(info.pid);
        }
    }

    debug!(
        "Process lookup scanned {} processes, {} matched {:?}",
        count,
        matches.len(),
        filter
    );

    if matches.is_empty() {
        if let Some(pid) = uninspectable {
            return Err(ProcessError::PermissionDenied {
                pid,
                operation: "inspect",
            });
        }
    }

    matches.sort_by_key(|info| info.pid);
    Ok(matches)
}
