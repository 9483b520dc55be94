use crate::error::{Error, Result};
use crate::reactor::driver::DriverHandle;
use crate::reactor::registry::Registry;
use crate::runtime::context;
use crate::runtime::executor::worker::{Scheduler, SchedulerParts, SchedulerShared};
use crate::runtime::fiber::core::{Fiber, FiberRef, next_fiber_id};
use crate::runtime::fiber::handle::{CatchUnwind, Completion, FiberHandle, JoinState, panic_message};

use crossbeam_deque::{Injector, Worker};
use log::{debug, error, trace};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering, fence};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

/// Identifies an execution context for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ContextId(pub(crate) usize);

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(0);

impl ContextId {
    pub(crate) fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// How an execution context runs its fibers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// One scheduler thread; fibers never run concurrently with each other.
    SingleThreaded,
    /// A resizable pool of schedulers sharing one queue and stealing work
    /// from each other.
    Parallel,
    /// One scheduler thread dedicated to a single fiber. Fibers spawned
    /// from inside it go to a fallback context.
    Isolated,
}

struct Pool {
    injector: Injector<FiberRef>,
    active: AtomicUsize,
    min: usize,
    max: usize,
    resize: Mutex<()>,
}

struct Dedicated {
    fallback: ExecutionContext,
    fiber: OnceLock<u64>,
}

enum Kind {
    SingleThreaded,
    Parallel(Pool),
    Isolated(Dedicated),
}

pub(crate) struct ContextInner {
    id: ContextId,
    name: String,
    thread_prefix: String,
    registry: Arc<Registry>,
    kind: Kind,
    /// Every scheduler slot; parallel contexts preallocate up to `max`.
    schedulers: Vec<Arc<SchedulerShared>>,
    pending: Mutex<Vec<Option<SchedulerParts>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    spawned: AtomicU64,
}

impl ContextInner {
    fn build(registry: &Arc<Registry>, name: &str, thread_prefix: &str, kind: Kind, slots: usize) -> Result<Arc<Self>> {
        let id = ContextId::next();
        let mut schedulers = Vec::with_capacity(slots);
        let mut pending = Vec::with_capacity(slots);

        for index in 0..slots {
            let driver = registry.create_driver(id)?;
            let queue = Worker::new_fifo();

            schedulers.push(Arc::new(SchedulerShared::new(
                index,
                queue.stealer(),
                driver.handle().clone(),
            )));
            pending.push(Some(SchedulerParts { queue, driver }));
        }

        Ok(Arc::new(Self {
            id,
            name: name.to_string(),
            thread_prefix: thread_prefix.to_string(),
            registry: registry.clone(),
            kind,
            schedulers,
            pending: Mutex::new(pending),
            threads: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            spawned: AtomicU64::new(0),
        }))
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn injector(&self) -> Option<&Injector<FiberRef>> {
        match &self.kind {
            Kind::Parallel(pool) => Some(&pool.injector),
            _ => None,
        }
    }

    /// Schedulers currently allowed to pick up work.
    pub(crate) fn active_schedulers(&self) -> &[Arc<SchedulerShared>] {
        match &self.kind {
            Kind::Parallel(pool) => &self.schedulers[..pool.active.load(Ordering::Acquire)],
            _ => &self.schedulers[..1],
        }
    }

    /// Event loop serving the calling scheduler, or the first scheduler's
    /// when the caller does not belong to this context.
    pub(crate) fn event_loop(&self) -> &Arc<DriverHandle> {
        let index = context::scheduler()
            .filter(|local| local.context.id() == self.id)
            .map_or(0, |local| local.shared.index());
        self.schedulers[index].driver()
    }

    pub(crate) fn is_dedicated(&self, fiber: &Fiber) -> bool {
        match &self.kind {
            Kind::Isolated(dedicated) => dedicated.fiber.get() == Some(&fiber.id()),
            _ => false,
        }
    }

    /// Wakes one idle scheduler of this context.
    pub(crate) fn notify_one(&self) {
        if let Some(idle) = self.active_schedulers().iter().find(|s| s.is_idle()) {
            idle.wake();
        }
    }

    /// Makes `fiber` runnable on this context.
    ///
    /// A scheduler of this context pushes to its own queue; any other
    /// thread goes through the global queue (parallel) or the scheduler's
    /// inbox (single-threaded, isolated) and wakes an idle scheduler.
    pub(crate) fn push(self: &Arc<Self>, fiber: FiberRef) {
        if self.is_shutdown() {
            trace!("dropping fiber {}: context {} is shut down", fiber.id(), self.name);
            fiber.discard();
            return;
        }

        let fiber = match context::scheduler() {
            Some(local) if local.context.id == self.id && !local.shared.is_retired() => {
                local.push(fiber);
                if matches!(self.kind, Kind::Parallel(_)) {
                    fence(Ordering::SeqCst);
                    self.notify_one();
                }
                return;
            }
            _ => fiber,
        };

        match &self.kind {
            Kind::Parallel(pool) => {
                pool.injector.push(fiber);
                fence(Ordering::SeqCst);
                self.notify_one();
            }
            Kind::SingleThreaded | Kind::Isolated(_) => self.schedulers[0].send(fiber),
        }
    }

    fn create_fiber<F, T>(self: &Arc<Self>, name: Option<String>, future: F) -> FiberHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = next_fiber_id();
        let join = JoinState::new();
        let completion = Completion::new(join.clone());
        let label = name.clone();

        let body = async move {
            let completion = completion;
            let result = CatchUnwind::new(future).await;
            if let Err(payload) = &result {
                error!(
                    "fiber {id} ({}) panicked: {}",
                    label.as_deref().unwrap_or("unnamed"),
                    panic_message(&**payload)
                );
            }
            completion.finish(result);
        };

        let fiber = Arc::new(Fiber::new(id, name, self, Box::pin(body)));
        self.spawned.fetch_add(1, Ordering::Relaxed);
        trace!("fiber {id} spawned on {}", self.name);

        FiberHandle::new(fiber, join)
    }

    pub(crate) fn spawn<F, T>(self: &Arc<Self>, name: Option<String>, future: F) -> Result<FiberHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if let Kind::Isolated(dedicated) = &self.kind {
            let inside = context::scheduler().is_some_and(|local| local.context.id == self.id);
            if inside {
                return dedicated.fallback.inner.spawn(name, future);
            }
            return Err(Error::IsolatedSpawn(self.name.clone()));
        }

        if self.is_shutdown() {
            return Err(Error::ShuttingDown(self.name.clone()));
        }

        let handle = self.create_fiber(name, future);
        self.push(handle.fiber().clone());
        Ok(handle)
    }

    fn start(self: &Arc<Self>, index: usize) -> Result<()> {
        let Some(parts) = self.pending.lock()[index].take() else {
            return Ok(());
        };

        let shared = self.schedulers[index].clone();
        shared.set_retired(false);

        let context = self.clone();
        let name = format!("{}-{}-{}", self.thread_prefix, self.name, index);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Scheduler::new(shared, context, parts).run())?;

        self.threads.lock().push(handle);
        Ok(())
    }

    fn resize(self: &Arc<Self>, target: usize) -> Result<usize> {
        let Kind::Parallel(pool) = &self.kind else {
            return Err(Error::Unsupported("resizing a non-parallel context"));
        };
        if self.is_shutdown() {
            return Err(Error::ShuttingDown(self.name.clone()));
        }

        let _guard = pool.resize.lock();
        let target = target.clamp(pool.min, pool.max);
        let current = pool.active.load(Ordering::Acquire);

        if target > current {
            for index in current..target {
                self.schedulers[index].set_retired(false);
                self.start(index)?;
                self.schedulers[index].wake();
            }
        } else {
            for index in target..current {
                self.schedulers[index].set_retired(true);
                self.schedulers[index].wake();
            }
        }

        pool.active.store(target, Ordering::Release);
        debug!("context {} resized from {current} to {target} schedulers", self.name);
        Ok(target)
    }

    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("shutting down context {}", self.name);
        for scheduler in &self.schedulers {
            scheduler.wake();
        }
    }

    /// Waits for every scheduler thread, except the calling one, to exit.
    pub(crate) fn join(&self) {
        let current = thread::current().id();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();

        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("a scheduler thread of context {} panicked", self.name);
            }
        }

        if let Some(injector) = self.injector() {
            loop {
                match injector.steal() {
                    crossbeam_deque::Steal::Success(fiber) => fiber.discard(),
                    crossbeam_deque::Steal::Retry => continue,
                    crossbeam_deque::Steal::Empty => break,
                }
            }
        }
    }
}

/// A handle to a set of schedulers sharing one run-queue policy.
///
/// Every fiber belongs to exactly one execution context and is only ever
/// resumed by schedulers of that context. Cloning the handle is cheap.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn single_threaded(registry: &Arc<Registry>, name: &str, prefix: &str) -> Result<Self> {
        let inner = ContextInner::build(registry, name, prefix, Kind::SingleThreaded, 1)?;
        inner.start(0)?;

        debug!("single-threaded context {name} started");
        Ok(Self { inner })
    }

    pub(crate) fn parallel(
        registry: &Arc<Registry>,
        name: &str,
        prefix: &str,
        min: usize,
        max: usize,
        initial: usize,
    ) -> Result<Self> {
        if min == 0 || min > max {
            return Err(Error::InvalidConfig(format!(
                "parallel context {name}: invalid bounds [{min}, {max}]"
            )));
        }

        let initial = initial.clamp(min, max);
        let pool = Pool {
            injector: Injector::new(),
            active: AtomicUsize::new(0),
            min,
            max,
            resize: Mutex::new(()),
        };

        let inner = ContextInner::build(registry, name, prefix, Kind::Parallel(pool), max)?;
        inner.resize(initial)?;

        debug!("parallel context {name} started with {initial} of [{min}, {max}] schedulers");
        Ok(Self { inner })
    }

    pub(crate) fn isolated<F, T>(
        registry: &Arc<Registry>,
        name: &str,
        prefix: &str,
        fallback: ExecutionContext,
        future: F,
    ) -> Result<(Self, FiberHandle<T>)>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let dedicated = Dedicated {
            fallback,
            fiber: OnceLock::new(),
        };
        let inner = ContextInner::build(registry, name, prefix, Kind::Isolated(dedicated), 1)?;

        let handle = inner.create_fiber(Some(name.to_string()), future);
        if let Kind::Isolated(dedicated) = &inner.kind {
            let _ = dedicated.fiber.set(handle.id());
        }

        inner.push(handle.fiber().clone());
        inner.start(0)?;

        debug!("isolated context {name} started for fiber {}", handle.id());
        Ok((Self { inner }, handle))
    }

    /// The context of the scheduler running on this thread.
    pub fn current() -> Option<Self> {
        context::scheduler().map(|local| Self {
            inner: local.context.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> ContextKind {
        match self.inner.kind {
            Kind::SingleThreaded => ContextKind::SingleThreaded,
            Kind::Parallel(_) => ContextKind::Parallel,
            Kind::Isolated(_) => ContextKind::Isolated,
        }
    }

    /// Number of schedulers currently picking up work.
    pub fn size(&self) -> usize {
        self.inner.active_schedulers().len()
    }

    /// Total fibers spawned on this context so far.
    pub fn spawned(&self) -> u64 {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// Spawns a fiber on this context.
    ///
    /// # Errors
    ///
    /// [`Error::IsolatedSpawn`] for an isolated context when called from
    /// outside it (from inside, the fiber goes to the fallback context),
    /// and [`Error::ShuttingDown`] once the context is shut down.
    pub fn spawn<F, T>(&self, future: F) -> Result<FiberHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(None, future)
    }

    /// Like [`spawn`](Self::spawn), naming the fiber for diagnostics.
    pub fn spawn_named<F, T>(&self, name: impl Into<String>, future: F) -> Result<FiberHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(Some(name.into()), future)
    }

    /// Makes a suspended fiber of this context runnable again.
    ///
    /// # Errors
    ///
    /// [`Error::ForeignFiber`] when `fiber` belongs to another context.
    pub fn enqueue(&self, fiber: &FiberRef) -> Result<()> {
        if fiber.context_id() != self.inner.id {
            return Err(Error::ForeignFiber {
                fiber: fiber.id(),
                owner: fiber
                    .context()
                    .map(|c| c.name().to_string())
                    .unwrap_or_else(|| String::from("<dropped>")),
                target: self.inner.name.clone(),
            });
        }

        fiber.resume();
        Ok(())
    }

    /// Changes the number of active schedulers of a parallel context.
    ///
    /// The request is clamped to the context's bounds; the applied size is
    /// returned. Removed schedulers keep serving their event loop but hand
    /// every runnable fiber back to the shared queue.
    pub fn resize(&self, schedulers: usize) -> Result<usize> {
        self.inner.resize(schedulers)
    }

    /// Stops every scheduler of this context after its current fiber.
    ///
    /// Queued fibers are dropped without running.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn join(&self) {
        self.inner.join();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.inner.name)
            .field("kind", &self.kind())
            .field("size", &self.size())
            .finish()
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ExecutionContext {}
