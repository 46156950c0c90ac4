//! process-controller - find, inspect and control operating-system processes
//!
//! Look processes up with a [`ProcessFilter`], then query or control each
//! returned [`ProcessHandle`] independently. Enumeration and resource
//! accounting come from `sysinfo`; on Unix, signals go through `kill(2)`.

pub mod config;
pub mod error;
pub mod filter;
pub mod handle;
pub mod info;
pub mod launch;
pub mod lookup;
pub mod signal;
pub mod timer;

pub use config::ControllerConfig;
pub use error::{ProcessError, Result};
pub use filter::{Criterion, FilterKey, ProcessFilter};
pub use handle::{ProcessHandle, ProcessIdentity, RestartOptions};
pub use info::ProcessInfo;
pub use lookup::{find_one, find_processes, find_processes_with, snapshot};
pub use timer::ScheduledTermination;
