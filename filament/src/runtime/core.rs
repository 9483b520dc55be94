use crate::config::Config;
use crate::error::Result;
use crate::reactor::registry::Registry;
use crate::runtime::context;
use crate::runtime::executor::core::ExecutionContext;
use crate::runtime::fiber::FiberHandle;

use log::{debug, info};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// The main runtime handle.
///
/// `Runtime` owns:
/// - the registry shared by every event loop (poll descriptors, loops),
/// - a default parallel [`ExecutionContext`],
/// - every additional context created through it.
///
/// Dropping the runtime shuts every context down and joins their threads.
pub struct Runtime {
    config: Config,
    registry: Arc<Registry>,
    default: ExecutionContext,
    contexts: Mutex<Vec<ExecutionContext>>,
}

impl Runtime {
    pub(crate) fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new(config.backend);
        let default = ExecutionContext::parallel(
            &registry,
            "default",
            &config.thread_name,
            config.min_threads,
            config.max_threads,
            config.worker_threads,
        )?;

        info!(
            "runtime started: {} schedulers, {:?} poller",
            config.worker_threads, config.backend
        );

        Ok(Self {
            config,
            registry,
            default,
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The parallel context [`spawn`](Self::spawn) and
    /// [`block_on`](Self::block_on) use.
    pub fn default_context(&self) -> &ExecutionContext {
        &self.default
    }

    /// Spawns a fiber on the default context.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let handle = runtime.spawn(async { 1 + 1 });
    /// assert_eq!(runtime.block_on(handle), 2);
    /// ```
    pub fn spawn<F, T>(&self, future: F) -> FiberHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        match self.default.spawn(future) {
            Ok(handle) => handle,
            Err(err) => panic!("spawn failed: {err}"),
        }
    }

    /// Runs a future to completion on the default context, blocking the
    /// calling thread.
    ///
    /// A panic inside the future is resumed on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics when called from a scheduler thread, where blocking would
    /// stall every fiber queued behind the caller.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        assert!(
            context::scheduler().is_none(),
            "block_on called from a scheduler thread"
        );

        self.spawn(future).wait_blocking()
    }

    /// Starts a context with a single scheduler thread.
    pub fn single_threaded(&self, name: &str) -> Result<ExecutionContext> {
        let context = ExecutionContext::single_threaded(&self.registry, name, &self.config.thread_name)?;
        self.contexts.lock().push(context.clone());
        Ok(context)
    }

    /// Starts a parallel context with `max` schedulers, resizable within
    /// `[min, max]`.
    pub fn parallel(&self, name: &str, min: usize, max: usize) -> Result<ExecutionContext> {
        let context =
            ExecutionContext::parallel(&self.registry, name, &self.config.thread_name, min, max, max)?;
        self.contexts.lock().push(context.clone());
        Ok(context)
    }

    /// Starts an isolated context running `future` as its only fiber.
    ///
    /// Fibers spawned from inside it run on the default context.
    pub fn isolated<F, T>(&self, name: &str, future: F) -> Result<(ExecutionContext, FiberHandle<T>)>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.isolated_with_fallback(name, self.default.clone(), future)
    }

    /// Like [`isolated`](Self::isolated) with an explicit fallback context.
    pub fn isolated_with_fallback<F, T>(
        &self,
        name: &str,
        fallback: ExecutionContext,
        future: F,
    ) -> Result<(ExecutionContext, FiberHandle<T>)>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (context, handle) =
            ExecutionContext::isolated(&self.registry, name, &self.config.thread_name, fallback, future)?;
        self.contexts.lock().push(context.clone());
        Ok((context, handle))
    }
}

impl Drop for Runtime {
    /// Shuts down every context, then joins all scheduler threads.
    fn drop(&mut self) {
        let contexts: Vec<_> = self.contexts.lock().drain(..).collect();

        for context in contexts.iter().chain(std::iter::once(&self.default)) {
            context.shutdown();
        }
        for context in contexts.iter().chain(std::iter::once(&self.default)) {
            context.join();
        }

        debug!("runtime stopped");
    }
}
