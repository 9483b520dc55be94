//! Fiber-aware I/O on raw file descriptors.
//!
//! The descriptor must be non-blocking and stays owned by the caller;
//! close it with [`close`] so the runtime forgets it before the number is
//! reused.
//!
//! # Examples
//!
//! ```rust,ignore
//! let n = filament::io::read(fd, &mut buf).await?;
//! filament::io::write(other, &buf[..n]).await?;
//! filament::io::close(fd);
//! ```

use std::os::fd::RawFd;

pub use crate::reactor::future::{
    AcceptFuture, ConnectFuture, ReadFuture, RecvFuture, SendFuture, WriteFuture,
};

/// Reads at least one byte from `fd`, or `0` at end of stream.
pub fn read(fd: RawFd, buffer: &mut [u8]) -> ReadFuture<'_> {
    ReadFuture::new(fd, buffer)
}

/// Writes at least one byte to `fd`.
pub fn write(fd: RawFd, buffer: &[u8]) -> WriteFuture<'_> {
    WriteFuture::new(fd, buffer)
}

/// Closes `fd`, waking every fiber still waiting on it.
///
/// Those fibers retry their syscall and observe `EBADF`.
pub fn close(fd: RawFd) {
    crate::reactor::io::close(fd);
}
