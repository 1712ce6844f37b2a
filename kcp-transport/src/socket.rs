//! Non-blocking UDP socket.
//!
//! [`Socket`] is a thin wrapper around `std::net::UdpSocket` that is always
//! non-blocking: a receive with nothing queued returns `Ok(None)` instead of
//! an error, so a tick can drain the socket without ever suspending. All
//! protocol logic lives elsewhere; this module owns only byte I/O and socket
//! options.
//!
//! Socket buffers are sized from [`Setting`]. The OS may clamp the request
//! (Linux caps it at `net.core.rmem_max`), so the granted size is logged.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::config::Setting;
use crate::peer::Output;

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Socket {
    inner: UdpSocket,
    local_addr: SocketAddr,
}

impl Socket {
    /// Bind to `addr`. Port 0 lets the OS choose an ephemeral port.
    pub fn bind(addr: SocketAddr, setting: &Setting) -> io::Result<Self> {
        Self::configure(UdpSocket::bind(addr)?, setting)
    }

    /// Bind to the IPv6 wildcard with `IPV6_V6ONLY` cleared, so IPv4 peers
    /// arrive as v4-mapped addresses on the same socket.
    pub fn bind_dual_mode(port: u16, setting: &Setting) -> io::Result<Self> {
        Self::configure(bind_dual_stack(port)?, setting)
    }

    /// Bind an ephemeral port of the same family as `remote` and connect to it.
    pub fn connect(remote: SocketAddr, setting: &Setting) -> io::Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Self::bind(local, setting)?;
        socket.inner.connect(remote)?;
        Ok(socket)
    }

    fn configure(inner: UdpSocket, setting: &Setting) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        set_buffer_sizes(&inner, setting);
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive from the connected remote. `Ok(None)` means nothing is queued.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.inner.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Receive from any remote. `Ok(None)` means nothing is queued.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Send to the connected remote.
    pub fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.inner.send(datagram).map(|_| ())
    }

    pub fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.inner.send_to(datagram, addr).map(|_| ())
    }

    /// `(SO_RCVBUF, SO_SNDBUF)` as granted by the OS.
    #[cfg(unix)]
    pub fn buffer_sizes(&self) -> io::Result<(usize, usize)> {
        let fd = self.inner.as_raw_fd();
        let recv = getsockopt_int(fd, libc::SOL_SOCKET, libc::SO_RCVBUF)?;
        let send = getsockopt_int(fd, libc::SOL_SOCKET, libc::SO_SNDBUF)?;
        Ok((recv as usize, send as usize))
    }
}

// ---------------------------------------------------------------------------
// Output adapters
// ---------------------------------------------------------------------------

/// Sends on a connected socket.
pub struct Connected<'a>(pub &'a Socket);

impl Output for Connected<'_> {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.0.send(datagram)
    }
}

/// Sends to a fixed remote on an unconnected socket.
pub struct SendTo<'a> {
    pub socket: &'a Socket,
    pub addr: SocketAddr,
}

impl Output for SendTo<'_> {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, self.addr)
    }
}

// ---------------------------------------------------------------------------
// Socket options
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_buffer_sizes(socket: &UdpSocket, setting: &Setting) {
    let fd = socket.as_raw_fd();
    let requests = [
        ("SO_RCVBUF", libc::SO_RCVBUF, setting.recv_buffer_size),
        ("SO_SNDBUF", libc::SO_SNDBUF, setting.send_buffer_size),
    ];
    for (name, option, size) in requests {
        let size = i32::try_from(size).unwrap_or(i32::MAX);
        match setsockopt_int(fd, libc::SOL_SOCKET, option, size) {
            Ok(()) => {
                let actual = getsockopt_int(fd, libc::SOL_SOCKET, option).unwrap_or(0);
                log::debug!("[socket] {name}={size} (actual={actual})");
            }
            Err(e) => log::warn!("[socket] failed to set {name}={size}: {e}"),
        }
    }
}

#[cfg(not(unix))]
fn set_buffer_sizes(_socket: &UdpSocket, _setting: &Setting) {
    log::debug!("[socket] buffer sizing not supported on this platform");
}

#[cfg(unix)]
fn bind_dual_stack(port: u16) -> io::Result<UdpSocket> {
    use std::os::unix::io::FromRawFd;

    let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Owns the descriptor from here on, closing it on every error path.
    let socket = unsafe { UdpSocket::from_raw_fd(fd) };
    setsockopt_int(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 0)?;

    let mut addr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    addr.sin6_port = port.to_be();
    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in6 as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(socket)
}

#[cfg(not(unix))]
fn bind_dual_stack(port: u16) -> io::Result<UdpSocket> {
    UdpSocket::bind((Ipv6Addr::UNSPECIFIED, port))
}

#[cfg(unix)]
fn setsockopt_int(fd: i32, level: i32, optname: i32, value: i32) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            optname,
            &value as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(unix)]
fn getsockopt_int(fd: i32, level: i32, optname: i32) -> io::Result<i32> {
    let mut value: i32 = 0;
    let mut len = std::mem::size_of::<i32>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            level,
            optname,
            &mut value as *mut i32 as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        (Ipv4Addr::LOCALHOST, 0).into()
    }

    #[test]
    fn empty_socket_returns_none() {
        let socket = Socket::bind(loopback(), &Setting::default()).unwrap();
        let mut buf = [0u8; 16];
        assert!(socket.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn send_to_then_recv_from() {
        let setting = Setting::default();
        let a = Socket::bind(loopback(), &setting).unwrap();
        let b = Socket::bind(loopback(), &setting).unwrap();
        a.send_to(b"ping", b.local_addr()).unwrap();

        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..100 {
            if let Some(r) = b.recv_from(&mut buf).unwrap() {
                got = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (n, from) = got.expect("datagram arrives on loopback");
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr());
    }

    #[test]
    fn connected_output_reaches_remote() {
        let setting = Setting::default();
        let server = Socket::bind(loopback(), &setting).unwrap();
        let client = Socket::connect(server.local_addr(), &setting).unwrap();
        Connected(&client).send_datagram(b"hi").unwrap();

        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..100 {
            if let Some((n, _)) = server.recv_from(&mut buf).unwrap() {
                got = Some(n);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(got, Some(2));
    }

    #[cfg(unix)]
    #[test]
    fn buffer_sizes_requested() {
        let setting = Setting {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
            ..Setting::default()
        };
        let socket = Socket::bind(loopback(), &setting).unwrap();
        let (recv, send) = socket.buffer_sizes().unwrap();
        assert!(recv > 0 && send > 0);
    }
}
