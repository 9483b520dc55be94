//! Thin `libc` wrappers shared by every backend and by the I/O futures.
//!
//! Every descriptor created here is non-blocking and close-on-exec. Callers
//! translate `WouldBlock` into a park on the event loop.

use libc::{
    AF_INET, AF_INET6, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, IPPROTO_IPV6, IPV6_V6ONLY,
    O_NONBLOCK, SHUT_RD, SHUT_RDWR, SHUT_WR, SO_ERROR, SO_REUSEADDR, SOCK_STREAM, SOL_SOCKET,
    c_int, c_void, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::str::FromStr;
use std::{io, mem};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn cvt_size(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// `read(2)` into `buffer`.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len()) })
}

/// `write(2)` from `buffer`.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::write(fd, buffer.as_ptr() as *const c_void, buffer.len()) })
}

/// `recv(2)` into `buffer`.
pub(crate) fn sys_recv(fd: RawFd, buffer: &mut [u8], flags: c_int) -> io::Result<usize> {
    cvt_size(unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len(), flags) })
}

/// `send(2)` from `buffer`. Never raises `SIGPIPE` where the platform allows it.
pub(crate) fn sys_send(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe {
        libc::send(
            fd,
            buffer.as_ptr() as *const c_void,
            buffer.len(),
            SEND_FLAGS,
        )
    })
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, F_GETFL) })?;
    cvt(unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) })?;
    Ok(())
}

pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, F_GETFD) })?;
    cvt(unsafe { libc::fcntl(fd, F_SETFD, flags | FD_CLOEXEC) })?;
    Ok(())
}

fn prepare(fd: RawFd) -> io::Result<RawFd> {
    match sys_set_nonblocking(fd).and_then(|_| sys_set_cloexec(fd)) {
        Ok(()) => Ok(fd),
        Err(err) => {
            sys_close(fd);
            Err(err)
        }
    }
}

/// A non-blocking anonymous pipe, `(read end, write end)`.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as c_int; 2];
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;

    let read = prepare(fds[0]).inspect_err(|_| sys_close(fds[1]))?;
    let write = prepare(fds[1]).inspect_err(|_| sys_close(read))?;
    Ok((read, write))
}

/// A non-blocking stream socket.
pub(crate) fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    prepare(cvt(unsafe { libc::socket(domain, SOCK_STREAM, 0) })?)
}

pub(crate) fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    cvt(unsafe { libc::bind(fd, addr as *const _ as *const sockaddr, len) }).map(drop)
}

pub(crate) fn sys_listen(fd: RawFd, backlog: c_int) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd, backlog) }).map(drop)
}

/// Accepts one pending connection. The client socket comes back non-blocking.
pub(crate) fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client = cvt(unsafe { libc::accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    let client = prepare(client)?;

    match sockaddr_storage_to_socketaddr(&storage) {
        Ok(addr) => Ok((client, addr)),
        Err(err) => {
            sys_close(client);
            Err(err)
        }
    }
}

pub(crate) fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

pub(crate) fn sys_peername(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    cvt(unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
    sockaddr_storage_to_socketaddr(&storage)
}

/// Starts a non-blocking connect. `EINPROGRESS` comes back as an error.
pub(crate) fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    cvt(unsafe { libc::connect(fd, &storage as *const _ as *const sockaddr, len) }).map(drop)
}

/// Pending `SO_ERROR` of a socket, used to finish a non-blocking connect.
pub(crate) fn sys_take_socket_error(fd: RawFd) -> io::Result<()> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;

    cvt(unsafe {
        libc::getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut value as *mut _ as *mut c_void,
            &mut len,
        )
    })?;

    if value == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(value))
    }
}

pub(crate) fn sys_shutdown(fd: RawFd, how: Shutdown) -> io::Result<()> {
    let how = match how {
        Shutdown::Read => SHUT_RD,
        Shutdown::Write => SHUT_WR,
        Shutdown::Both => SHUT_RDWR,
    };

    cvt(unsafe { libc::shutdown(fd, how) }).map(drop)
}

fn set_int_option(fd: RawFd, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    })
    .map(drop)
}

pub(crate) fn sys_set_reuseaddr(fd: RawFd) -> io::Result<()> {
    set_int_option(fd, SOL_SOCKET, SO_REUSEADDR, 1)
}

/// Turns dual-stack on for IPv6 sockets; a no-op for IPv4.
pub(crate) fn sys_set_dual_stack(fd: RawFd, domain: c_int) -> io::Result<()> {
    if domain == AF_INET6 {
        set_int_option(fd, IPPROTO_IPV6, IPV6_V6ONLY, 0)?;
    }
    Ok(())
}

pub(crate) fn sys_parse_sockaddr(address: &str) -> io::Result<SocketAddr> {
    SocketAddr::from_str(address)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid socket address"))
}

pub(crate) fn domain_of(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}

pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));

            Ok(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(addr.sin_port),
            )))
        }
        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };

            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
