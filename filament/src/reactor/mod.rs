//! Readiness and timer plumbing underneath the schedulers.
//!
//! Every scheduler owns one [`driver::EventLoopDriver`]: a poller plus a
//! timer store. The runtime-wide [`registry::Registry`] owns the
//! poll-descriptor arena shared by all of them and routes descriptors to
//! the loop that should report their readiness.
//!
//! Most users never touch this module directly; [`crate::net`],
//! [`crate::io`] and [`crate::time`] are built on it.

pub(crate) mod arena;
pub(crate) mod driver;
pub(crate) mod event;
pub(crate) mod future;
pub(crate) mod io;
pub(crate) mod poller;
pub(crate) mod registry;
pub(crate) mod timer;
