use super::core::Runtime;
use crate::config::{Backend, Config};
use crate::error::Result;

/// Builder for configuring and creating a runtime.
///
/// Starts from [`Config::default`]: one scheduler per logical CPU and the
/// platform's preferred poller.
///
/// # Examples
///
/// ```rust,ignore
/// let runtime = RuntimeBuilder::new()
///     .worker_threads(4)
///     .backend(Backend::Poll)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config: Config,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// A builder seeded from the `FILAMENT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            config: Config::from_env()?,
        })
    }

    /// A builder seeded from an explicit configuration.
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Sets the initial size of the default context, widening its
    /// bounds if needed.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn worker_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_threads must be > 0");

        self.config.worker_threads = n;
        self.config.min_threads = self.config.min_threads.min(n);
        self.config.max_threads = self.config.max_threads.max(n);
        self
    }

    /// Lower bound for resizing the default context.
    pub fn min_threads(mut self, n: usize) -> Self {
        self.config.min_threads = n;
        self
    }

    /// Upper bound for resizing the default context.
    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = n;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Prefix of scheduler thread names.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Validates the configuration and starts the runtime.
    pub fn build(self) -> Result<Runtime> {
        Runtime::new(self.config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
