//! Futures for the basic descriptor operations.
//!
//! Every future tries its syscall first and only touches the event loop
//! when the kernel answers `EAGAIN`. Descriptors must be non-blocking.

use crate::reactor::io::IoWait;
use crate::reactor::poller::common::Interest;
use crate::reactor::poller::platform::{
    sys_accept, sys_connect, sys_read, sys_recv, sys_send, sys_take_socket_error, sys_write,
};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Reads at least one byte into `buffer`, or `0` at end of stream.
pub struct ReadFuture<'a> {
    fd: RawFd,
    buffer: &'a mut [u8],
    wait: IoWait,
}

impl<'a> ReadFuture<'a> {
    pub(crate) fn new(fd: RawFd, buffer: &'a mut [u8]) -> Self {
        Self {
            fd,
            buffer,
            wait: IoWait::new(fd, Interest::READ),
        }
    }
}

impl Future for ReadFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (fd, buffer) = (this.fd, &mut *this.buffer);
        this.wait.poll_with(cx, || sys_read(fd, buffer))
    }
}

/// Writes at least one byte of `buffer`.
pub struct WriteFuture<'a> {
    fd: RawFd,
    buffer: &'a [u8],
    wait: IoWait,
}

impl<'a> WriteFuture<'a> {
    pub(crate) fn new(fd: RawFd, buffer: &'a [u8]) -> Self {
        Self {
            fd,
            buffer,
            wait: IoWait::new(fd, Interest::WRITE),
        }
    }
}

impl Future for WriteFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (fd, buffer) = (this.fd, this.buffer);
        this.wait.poll_with(cx, || sys_write(fd, buffer))
    }
}

/// `recv(2)` with `flags`; completes like [`ReadFuture`].
pub struct RecvFuture<'a> {
    fd: RawFd,
    buffer: &'a mut [u8],
    flags: libc::c_int,
    wait: IoWait,
}

impl<'a> RecvFuture<'a> {
    pub(crate) fn new(fd: RawFd, buffer: &'a mut [u8], flags: libc::c_int) -> Self {
        Self {
            fd,
            buffer,
            flags,
            wait: IoWait::new(fd, Interest::READ),
        }
    }
}

impl Future for RecvFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (fd, buffer, flags) = (this.fd, &mut *this.buffer, this.flags);
        this.wait.poll_with(cx, || sys_recv(fd, buffer, flags))
    }
}

/// `send(2)` of at least one byte; never raises `SIGPIPE`.
pub struct SendFuture<'a> {
    fd: RawFd,
    buffer: &'a [u8],
    wait: IoWait,
}

impl<'a> SendFuture<'a> {
    pub(crate) fn new(fd: RawFd, buffer: &'a [u8]) -> Self {
        Self {
            fd,
            buffer,
            wait: IoWait::new(fd, Interest::WRITE),
        }
    }
}

impl Future for SendFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (fd, buffer) = (this.fd, this.buffer);
        this.wait.poll_with(cx, || sys_send(fd, buffer))
    }
}

/// Accepts one connection from a listening socket.
///
/// The client descriptor comes back non-blocking and close-on-exec.
pub struct AcceptFuture {
    fd: RawFd,
    wait: IoWait,
}

impl AcceptFuture {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd,
            wait: IoWait::new(fd, Interest::READ),
        }
    }
}

impl Future for AcceptFuture {
    type Output = io::Result<(RawFd, SocketAddr)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let fd = this.fd;
        this.wait.poll_with(cx, || sys_accept(fd))
    }
}

/// Connects a non-blocking socket.
pub struct ConnectFuture {
    fd: RawFd,
    addr: SocketAddr,
    started: bool,
    wait: IoWait,
}

impl ConnectFuture {
    pub(crate) fn new(fd: RawFd, addr: SocketAddr) -> Self {
        Self {
            fd,
            addr,
            started: false,
            wait: IoWait::new(fd, Interest::WRITE),
        }
    }
}

impl Future for ConnectFuture {
    type Output = io::Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let (fd, addr) = (this.fd, this.addr);
        let started = &mut this.started;

        this.wait.poll_with(cx, || {
            if *started {
                // Writable again: SO_ERROR says how the handshake ended, and
                // a zero-length peek tells a finished one from a spurious edge.
                sys_take_socket_error(fd)?;
                return match crate::reactor::poller::platform::sys_peername(fd) {
                    Ok(_) => Ok(()),
                    Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => {
                        Err(io::ErrorKind::WouldBlock.into())
                    }
                    Err(err) => Err(err),
                };
            }

            match sys_connect(fd, &addr) {
                Ok(()) => Ok(()),
                Err(err)
                    if err.raw_os_error() == Some(libc::EINPROGRESS)
                        || err.raw_os_error() == Some(libc::EALREADY) =>
                {
                    *started = true;
                    Err(io::ErrorKind::WouldBlock.into())
                }
                Err(err) => Err(err),
            }
        })
    }
}
