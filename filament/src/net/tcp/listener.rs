use super::stream::TcpStream;
use crate::reactor::future::AcceptFuture;
use crate::reactor::io::Descriptor;
use crate::reactor::poller::platform::{
    domain_of, socketaddr_to_storage, sys_bind, sys_close, sys_listen, sys_parse_sockaddr,
    sys_set_dual_stack, sys_set_reuseaddr, sys_socket, sys_sockname,
};

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

const BACKLOG: libc::c_int = 1024;

/// A TCP socket accepting connections without blocking its scheduler.
///
/// The listening descriptor is subscribed to the event loop of whichever
/// scheduler first waits in [`accept`](Self::accept).
pub struct TcpListener {
    descriptor: Descriptor,
}

impl TcpListener {
    /// Binds to `address`, such as `"127.0.0.1:8080"` or `"[::1]:0"`.
    ///
    /// IPv6 listeners are dual-stack. `SO_REUSEADDR` is always set.
    pub fn bind(address: &str) -> io::Result<Self> {
        let addr = sys_parse_sockaddr(address)?;
        let domain = domain_of(&addr);
        let (storage, len) = socketaddr_to_storage(&addr);

        let fd = sys_socket(domain)?;
        let setup = sys_set_reuseaddr(fd)
            .and_then(|()| sys_set_dual_stack(fd, domain))
            .and_then(|()| sys_bind(fd, &storage, len))
            .and_then(|()| sys_listen(fd, BACKLOG));

        if let Err(err) = setup {
            sys_close(fd);
            return Err(err);
        }

        Ok(Self {
            descriptor: Descriptor::new(fd),
        })
    }

    /// Waits for the next connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (fd, address) = AcceptFuture::new(self.descriptor.track()).await?;

        Ok((TcpStream::from_fd(fd), address))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.descriptor.fd())
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.descriptor.fd()
    }
}

impl std::fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpListener")
            .field("fd", &self.descriptor.fd())
            .field("local_addr", &self.local_addr().ok())
            .finish()
    }
}
