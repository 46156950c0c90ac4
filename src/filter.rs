//! Process filters
//!
//! A filter is a conjunction of criteria drawn from a closed set of keys,
//! optionally combined with one arbitrary predicate over [`ProcessInfo`].

use crate::error::{ProcessError, Result};
use crate::info::ProcessInfo;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Keys accepted by [`ProcessFilter::parse_pair`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKey {
    Pid,
    Name,
    NameContains,
    Cmdline,
    CmdlineContains,
    Cwd,
    User,
    CreateTime,
}

impl FilterKey {
    pub const ALL: [FilterKey; 8] = [
        FilterKey::Pid,
        FilterKey::Name,
        FilterKey::NameContains,
        FilterKey::Cmdline,
        FilterKey::CmdlineContains,
        FilterKey::Cwd,
        FilterKey::User,
        FilterKey::CreateTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKey::Pid => "pid",
            FilterKey::Name => "name",
            FilterKey::NameContains => "name~",
            FilterKey::Cmdline => "cmdline",
            FilterKey::CmdlineContains => "cmdline~",
            FilterKey::Cwd => "cwd",
            FilterKey::User => "user",
            FilterKey::CreateTime => "create_time",
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKey {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pid" => Ok(FilterKey::Pid),
            "name" => Ok(FilterKey::Name),
            "name~" | "name_contains" => Ok(FilterKey::NameContains),
            "cmdline" => Ok(FilterKey::Cmdline),
            "cmdline~" | "cmdline_contains" => Ok(FilterKey::CmdlineContains),
            "cwd" => Ok(FilterKey::Cwd),
            "user" | "username" => Ok(FilterKey::User),
            "create_time" | "started_at" => Ok(FilterKey::CreateTime),
            other => Err(ProcessError::InvalidFilter(format!(
                "unknown key '{}' (expected one of: {})",
                other,
                FilterKey::ALL
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// One constraint, bound to its comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Pid(u32),
    Name(String),
    NameContains(String),
    /// The arguments must appear as a contiguous run of the process's argv
    Cmdline(Vec<String>),
    /// Substring of the space-joined command line
    CmdlineContains(String),
    Cwd(PathBuf),
    User(String),
    /// Start time in seconds since the Unix epoch
    StartedAt(u64),
}

impl Criterion {
    pub fn key(&self) -> FilterKey {
        match self {
            Criterion::Pid(_) => FilterKey::Pid,
            Criterion::Name(_) => FilterKey::Name,
            Criterion::NameContains(_) => FilterKey::NameContains,
            Criterion::Cmdline(_) => FilterKey::Cmdline,
            Criterion::CmdlineContains(_) => FilterKey::CmdlineContains,
            Criterion::Cwd(_) => FilterKey::Cwd,
            Criterion::User(_) => FilterKey::User,
            Criterion::StartedAt(_) => FilterKey::CreateTime,
        }
    }

    pub fn parse(key: FilterKey, value: &str) -> Result<Self> {
        let invalid = |what: &str| {
            ProcessError::InvalidFilter(format!("{} expects {}, got '{}'", key, what, value))
        };

        Ok(match key {
            FilterKey::Pid => Criterion::Pid(value.trim().parse().map_err(|_| invalid("an integer"))?),
            FilterKey::Name => Criterion::Name(value.to_string()),
            FilterKey::NameContains => Criterion::NameContains(value.to_string()),
            FilterKey::Cmdline => {
                let args: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if args.is_empty() {
                    return Err(invalid("at least one argument"));
                }
                Criterion::Cmdline(args)
            }
            FilterKey::CmdlineContains => Criterion::CmdlineContains(value.to_string()),
            FilterKey::Cwd => Criterion::Cwd(PathBuf::from(value)),
            FilterKey::User => Criterion::User(value.to_string()),
            FilterKey::CreateTime => {
                Criterion::StartedAt(value.trim().parse().map_err(|_| invalid("seconds since epoch"))?)
            }
        })
    }

    pub fn matches(&self, info: &ProcessInfo) -> bool {
        match self {
            Criterion::Pid(pid) => info.pid == *pid,
            Criterion::Name(name) => info.name == *name,
            Criterion::NameContains(part) => info.name.contains(part.as_str()),
            Criterion::Cmdline(args) => contains_run(&info.cmdline, args),
            Criterion::CmdlineContains(part) => info.cmdline.join(" ").contains(part.as_str()),
            Criterion::Cwd(cwd) => info.cwd.as_deref() == Some(cwd.as_path()),
            Criterion::User(user) => info.user.as_deref() == Some(user.as_str()),
            Criterion::StartedAt(secs) => info.start_time == *secs,
        }
    }
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

type Predicate = Arc<dyn Fn(&ProcessInfo) -> bool + Send + Sync>;

/// Conjunction of criteria; an empty filter matches every process
#[derive(Clone, Default)]
pub struct ProcessFilter {
    criteria: Vec<Criterion>,
    predicate: Option<Predicate>,
    exclude_current: bool,
}

impl ProcessFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn pid(self, pid: u32) -> Self {
        self.with(Criterion::Pid(pid))
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.with(Criterion::Name(name.into()))
    }

    pub fn name_contains(self, part: impl Into<String>) -> Self {
        self.with(Criterion::NameContains(part.into()))
    }

    pub fn cmdline<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(Criterion::Cmdline(args.into_iter().map(Into::into).collect()))
    }

    pub fn cmdline_contains(self, part: impl Into<String>) -> Self {
        self.with(Criterion::CmdlineContains(part.into()))
    }

    pub fn cwd(self, cwd: impl Into<PathBuf>) -> Self {
        self.with(Criterion::Cwd(cwd.into()))
    }

    pub fn user(self, user: impl Into<String>) -> Self {
        self.with(Criterion::User(user.into()))
    }

    pub fn started_at(self, secs: u64) -> Self {
        self.with(Criterion::StartedAt(secs))
    }

    /// Add an arbitrary predicate, ANDed with the criteria. Replaces any earlier predicate.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ProcessInfo) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Never match the calling process
    pub fn excluding_current(mut self) -> Self {
        self.exclude_current = true;
        self
    }

    /// Parse a `key=value` style pair and add it; unknown keys are rejected
    pub fn parse_pair(self, key: &str, value: &str) -> Result<Self> {
        let key: FilterKey = key.parse()?;
        Ok(self.with(Criterion::parse(key, value)?))
    }

    /// Parse `key=value` expressions such as `name=sleep` or `cmdline~=--port 80`
    pub fn parse_expr(self, expr: &str) -> Result<Self> {
        let (key, value) = expr
            .split_once('=')
            .ok_or_else(|| ProcessError::InvalidFilter(format!("expected key=value, got '{}'", expr)))?;
        self.parse_pair(key, value)
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs
            .into_iter()
            .try_fold(Self::new(), |filter, (key, value)| filter.parse_pair(key, value))
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty() && self.predicate.is_none() && !self.exclude_current
    }

    /// The PID this filter pins, if any; lets lookup refresh a single table entry
    pub fn pinned_pid(&self) -> Option<u32> {
        self.criteria.iter().find_map(|c| match c {
            Criterion::Pid(pid) => Some(*pid),
            _ => None,
        })
    }

    pub fn matches(&self, info: &ProcessInfo) -> bool {
        if self.exclude_current && info.pid == std::process::id() {
            return false;
        }
        self.criteria.iter().all(|c| c.matches(info))
            && self.predicate.as_ref().map_or(true, |p| p(info))
    }
}

impl fmt::Debug for ProcessFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessFilter")
            .field("criteria", &self.criteria)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("exclude_current", &self.exclude_current)
            .finish()
    }
}
