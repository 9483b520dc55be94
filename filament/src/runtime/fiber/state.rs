//! Scheduling states of a fiber.
//!
//! ```text
//!            wake                 pick
//!   IDLE ───────────▶ QUEUED ───────────▶ RUNNING ──▶ COMPLETED
//!    ▲                  ▲                  │   │
//!    │                  │ requeue          │   │ wake
//!    │                  └──── NOTIFIED ◀───┼───┘
//!    └──────────────── Pending ────────────┘
//! ```

/// Parked: neither queued nor running. Only a wake moves it on.
pub(crate) const IDLE: usize = 0;

/// In exactly one run queue.
pub(crate) const QUEUED: usize = 1;

/// Being polled. At most one scheduler observes this state at a time.
pub(crate) const RUNNING: usize = 2;

/// Finished; its continuation has been dropped.
pub(crate) const COMPLETED: usize = 3;

/// Woken while running; requeued as soon as the current poll returns.
pub(crate) const NOTIFIED: usize = 4;
