//! Runtime configuration.
//!
//! Everything here is selection only: which polling backend to use and how
//! many scheduler threads the default parallel context starts with and may
//! grow or shrink to. Values can be set through
//! [`RuntimeBuilder`](crate::RuntimeBuilder) or read from the environment.

use crate::error::{Error, Result};

use std::env;
use std::str::FromStr;
use std::thread;

/// Environment variable overriding the initial worker count.
pub const ENV_WORKERS: &str = "FILAMENT_WORKERS";

/// Environment variable overriding the lower bound of the default pool.
pub const ENV_MIN_WORKERS: &str = "FILAMENT_MIN_WORKERS";

/// Environment variable overriding the upper bound of the default pool.
pub const ENV_MAX_WORKERS: &str = "FILAMENT_MAX_WORKERS";

/// Environment variable selecting the polling backend.
pub const ENV_POLLER: &str = "FILAMENT_POLLER";

/// Readiness multiplexer family used by every event loop of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Linux `epoll`, paired with a `timerfd`.
    Epoll,
    /// BSD/macOS `kqueue`, paired with `EVFILT_TIMER`.
    Kqueue,
    /// Portable `poll(2)` with millisecond timeouts.
    Poll,
}

impl Backend {
    /// The preferred backend for the compilation target.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "linux") || cfg!(target_os = "android") {
            Backend::Epoll
        } else if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd"
        )) {
            Backend::Kqueue
        } else {
            Backend::Poll
        }
    }

    /// Whether the backend is compiled in for the current target.
    pub fn is_available(self) -> bool {
        match self {
            Backend::Epoll => cfg!(any(target_os = "linux", target_os = "android")),
            Backend::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd"
            )),
            Backend::Poll => true,
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoll" => Ok(Backend::Epoll),
            "kqueue" => Ok(Backend::Kqueue),
            "poll" => Ok(Backend::Poll),
            other => Err(Error::InvalidConfig(format!("unknown poller `{other}`"))),
        }
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Schedulers started by the default parallel context.
    pub worker_threads: usize,
    /// Lower bound accepted by [`ExecutionContext::resize`](crate::ExecutionContext::resize).
    pub min_threads: usize,
    /// Upper bound accepted by [`ExecutionContext::resize`](crate::ExecutionContext::resize).
    pub max_threads: usize,
    /// Polling backend.
    pub backend: Backend,
    /// Prefix used to name scheduler threads.
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            worker_threads: workers,
            min_threads: 1,
            max_threads: workers,
            backend: Backend::platform_default(),
            thread_name: String::from("filament"),
        }
    }
}

impl Config {
    /// Defaults overridden by the `FILAMENT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = lookup(ENV_WORKERS) {
            config.worker_threads = parse_count(ENV_WORKERS, &v)?;
            config.max_threads = config.max_threads.max(config.worker_threads);
        }
        if let Some(v) = lookup(ENV_MIN_WORKERS) {
            config.min_threads = parse_count(ENV_MIN_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_WORKERS) {
            config.max_threads = parse_count(ENV_MAX_WORKERS, &v)?;
        }
        if let Some(v) = lookup(ENV_POLLER) {
            config.backend = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that the bounds are coherent and the backend is compiled in.
    pub fn validate(&self) -> Result<()> {
        if self.min_threads == 0 {
            return Err(Error::InvalidConfig("min_threads must be > 0".into()));
        }
        if self.min_threads > self.max_threads {
            return Err(Error::InvalidConfig(format!(
                "min_threads ({}) exceeds max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }
        if !(self.min_threads..=self.max_threads).contains(&self.worker_threads) {
            return Err(Error::InvalidConfig(format!(
                "worker_threads ({}) outside [{}, {}]",
                self.worker_threads, self.min_threads, self.max_threads
            )));
        }
        if !self.backend.is_available() {
            return Err(Error::InvalidConfig(format!(
                "{:?} poller is not available on this platform",
                self.backend
            )));
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidConfig(format!(
            "{key} must be a positive integer, got `{value}`"
        ))),
    }
}
