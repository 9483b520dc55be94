//! TCP sockets driven by the fiber event loops.
//!
//! - [`listener`]: accepting incoming connections,
//! - [`stream`]: connected sockets and their halves.

pub mod listener;
pub mod stream;
