//! # Filament
//!
//! **Filament** is a cooperative fiber runtime. Fibers are lightweight
//! tasks multiplexed over a handful of scheduler threads; each scheduler
//! drives its own event loop (epoll, kqueue or `poll(2)`) together with a
//! timer store, and fibers suspend only at I/O, timers, synchronization
//! primitives and explicit yields.
//!
//! Schedulers are grouped into [`ExecutionContext`]s:
//!
//! - **single-threaded**: one scheduler,
//! - **parallel**: a resizable pool of schedulers with work stealing,
//! - **isolated**: one scheduler dedicated to a single fiber.
//!
//! A fiber belongs to the context it was spawned on for its whole life.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use filament::time::sleep;
//! use std::time::Duration;
//!
//! #[filament::main]
//! async fn main() {
//!     let handle = filament::spawn(async {
//!         sleep(Duration::from_millis(100)).await;
//!         42
//!     });
//!
//!     assert_eq!(handle.await, 42);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`fiber`]: fibers, handles and timeout tokens
//! - [`net`]: TCP listener and stream
//! - [`io`]: reads and writes on raw descriptors
//! - [`time`]: sleep, token-armed timeouts and the `timeout` combinator
//! - [`sync`]: `Mutex` and `WaitGroup`
//!
//! ## Configuration
//!
//! [`RuntimeBuilder`] starts from [`Config::default`];
//! [`RuntimeBuilder::from_env`] reads the `FILAMENT_*` variables instead.
//! The library logs through the [`log`] facade and never installs a logger.

mod config;
mod error;
mod reactor;
mod runtime;
mod utils;

pub mod io;
pub mod net;
pub mod sync;
pub mod time;

pub use config::{Backend, Config};
pub use error::{Error, Result};
pub use runtime::builder::RuntimeBuilder;
pub use runtime::core::Runtime;
pub use runtime::executor::core::{ContextKind, ExecutionContext};
pub use runtime::fiber;
pub use runtime::fiber::{FiberHandle, spawn};
pub use runtime::yield_now::yield_now;

pub use filament_macros::{main, test};
