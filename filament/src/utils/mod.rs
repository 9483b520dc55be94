//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the runtime.
//! In particular, it exposes a generational [`Slab`] used for indexed
//! storage where stale keys must be detected rather than reused.

mod slab;

pub(crate) use slab::{Key, Slab};
