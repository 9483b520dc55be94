use crate::reactor::future::{ConnectFuture, ReadFuture, RecvFuture, SendFuture};
use crate::reactor::io::Descriptor;
use crate::reactor::poller::platform::{
    domain_of, sys_close, sys_parse_sockaddr, sys_peername, sys_set_dual_stack, sys_shutdown,
    sys_socket, sys_sockname,
};

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

/// A connected TCP socket.
///
/// Reads and writes suspend the calling fiber on `EAGAIN` and resume it
/// once the event loop reports readiness. The socket is closed when the
/// stream and every half from [`split`](Self::split) are dropped.
pub struct TcpStream {
    descriptor: Arc<Descriptor>,
}

impl TcpStream {
    pub(crate) fn from_fd(fd: RawFd) -> Self {
        Self {
            descriptor: Arc::new(Descriptor::new(fd)),
        }
    }

    /// Opens a connection to `address`, such as `"127.0.0.1:8080"`.
    pub async fn connect(address: &str) -> io::Result<Self> {
        let addr = sys_parse_sockaddr(address)?;
        let domain = domain_of(&addr);

        let fd = sys_socket(domain)?;
        if let Err(err) = sys_set_dual_stack(fd, domain) {
            sys_close(fd);
            return Err(err);
        }

        // From here on the descriptor closes the socket, even if the
        // connect fails or is abandoned midway.
        let stream = Self::from_fd(fd);
        ConnectFuture::new(stream.descriptor.track(), addr).await?;

        Ok(stream)
    }

    /// Reads at least one byte, or returns `0` once the peer has closed.
    pub fn read<'a>(&'a self, buffer: &'a mut [u8]) -> RecvFuture<'a> {
        RecvFuture::new(self.descriptor.track(), buffer, 0)
    }

    /// Like [`read`](Self::read) but leaves the data in the socket.
    pub fn peek<'a>(&'a self, buffer: &'a mut [u8]) -> RecvFuture<'a> {
        RecvFuture::new(self.descriptor.track(), buffer, libc::MSG_PEEK)
    }

    /// Writes at least one byte and returns how many were written.
    pub fn write<'a>(&'a self, buffer: &'a [u8]) -> SendFuture<'a> {
        SendFuture::new(self.descriptor.track(), buffer)
    }

    /// Writes the entire buffer.
    ///
    /// # Errors
    ///
    /// Returns `WriteZero` if the socket stops accepting data.
    pub async fn write_all(&self, buffer: &[u8]) -> io::Result<()> {
        write_all(&self.descriptor, buffer).await
    }

    /// Reads until `buffer` is full.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if the peer closes first.
    pub async fn read_exact(&self, mut buffer: &mut [u8]) -> io::Result<()> {
        while !buffer.is_empty() {
            let n = ReadFuture::new(self.descriptor.track(), buffer).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            buffer = &mut buffer[n..];
        }
        Ok(())
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        sys_shutdown(self.descriptor.fd(), how)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.descriptor.fd())
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        sys_peername(self.descriptor.fd())
    }

    /// Splits the stream into halves that may live in different fibers.
    pub fn split(&self) -> (ReadHalf, WriteHalf) {
        (
            ReadHalf {
                descriptor: self.descriptor.clone(),
            },
            WriteHalf {
                descriptor: self.descriptor.clone(),
            },
        )
    }
}

async fn write_all(descriptor: &Descriptor, mut buffer: &[u8]) -> io::Result<()> {
    while !buffer.is_empty() {
        let n = SendFuture::new(descriptor.track(), buffer).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write returned zero bytes",
            ));
        }
        buffer = &buffer[n..];
    }
    Ok(())
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.descriptor.fd()
    }
}

impl std::fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpStream")
            .field("fd", &self.descriptor.fd())
            .field("peer_addr", &self.peer_addr().ok())
            .finish()
    }
}

/// The read half of a [`TcpStream`].
pub struct ReadHalf {
    descriptor: Arc<Descriptor>,
}

impl ReadHalf {
    pub fn read<'a>(&'a self, buffer: &'a mut [u8]) -> RecvFuture<'a> {
        RecvFuture::new(self.descriptor.track(), buffer, 0)
    }
}

/// The write half of a [`TcpStream`].
pub struct WriteHalf {
    descriptor: Arc<Descriptor>,
}

impl WriteHalf {
    pub fn write<'a>(&'a self, buffer: &'a [u8]) -> SendFuture<'a> {
        SendFuture::new(self.descriptor.track(), buffer)
    }

    pub async fn write_all(&self, buffer: &[u8]) -> io::Result<()> {
        write_all(&self.descriptor, buffer).await
    }
}
