//! Point-in-time snapshot of a process's attributes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, UpdateKind, Users};

/// Attributes a filter is evaluated against, captured from one table scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
    pub exe: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub user: Option<String>,
    /// Seconds since the Unix epoch
    pub start_time: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub status: String,
    pub parent: Option<u32>,
}

impl ProcessInfo {
    pub fn from_process(pid: Pid, process: &Process, users: Option<&Users>) -> Self {
        let user = users.and_then(|users| {
            process
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map(|user| user.name().to_string())
        });

        let cmdline: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        let exe = process.exe().map(|p| p.to_path_buf());
        let name = full_name(&process.name().to_string_lossy(), &cmdline, exe.as_deref());

        Self {
            pid: pid.as_u32(),
            name,
            cmdline,
            exe,
            cwd: process.cwd().map(|p| p.to_path_buf()),
            user,
            start_time: process.start_time(),
            started_at: DateTime::from_timestamp(process.start_time() as i64, 0),
            status: process.status().to_string(),
            parent: process.parent().map(|p| p.as_u32()),
        }
    }

    /// False when the OS gave us nothing to match on, typically because of access rights
    pub fn is_inspectable(&self) -> bool {
        !self.name.is_empty() || !self.cmdline.is_empty()
    }
}

/// Linux keeps only the first 15 bytes of an executable name
const COMM_LEN: usize = 15;

/// Recover the untruncated executable name when the kernel cut it short.
///
/// The first argument wins over the executable path so a long-named symlink
/// keeps its own name rather than its target's.
pub(crate) fn full_name(comm: &str, cmdline: &[String], exe: Option<&Path>) -> String {
    if comm.len() < COMM_LEN {
        return comm.to_string();
    }

    let from_arg0 = cmdline
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|n| n.to_string_lossy().to_string());
    let from_exe = exe
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string());

    from_arg0
        .into_iter()
        .chain(from_exe)
        .find(|candidate| candidate.len() > comm.len() && candidate.starts_with(comm))
        .unwrap_or_else(|| comm.to_string())
}

/// Zombie and dead entries are exited processes that have not been reaped yet
pub(crate) fn is_exited_status(status: ProcessStatus) -> bool {
    matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Everything a snapshot or filter may look at
pub(crate) fn full_refresh_kind() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing()
        .with_cmd(UpdateKind::OnlyIfNotSet)
        .with_exe(UpdateKind::OnlyIfNotSet)
        .with_cwd(UpdateKind::OnlyIfNotSet)
        .with_user(UpdateKind::OnlyIfNotSet)
}
