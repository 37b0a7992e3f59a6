//! Socket establishment and the active-connection abstraction.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket},
    path::PathBuf,
    time::Duration,
};

use native_tls::{TlsConnector, TlsStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Destination a connection dials.
#[derive(Clone, Debug)]
pub enum SocketTarget {
    /// TCP stream socket, optionally TLS-wrapped.
    Tcp {
        host: String,
        port: u16,
        tls: Option<TlsOptions>,
    },
    /// Unix domain stream socket.
    Unix { path: PathBuf },
    /// Connected datagram socket. Sends are fire-and-forget and the remote
    /// endpoint has no close the connection could observe.
    Udp { host: String, port: u16 },
}

impl SocketTarget {
    fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        (host, port).to_socket_addrs().map(|iter| iter.collect())
    }
}

/// TLS settings applied to a TCP target.
#[derive(Clone, Debug)]
pub struct TlsOptions {
    /// Domain name presented during the TLS handshake.
    pub domain: String,
    /// Skip peer certificate validation (the `noverify` knob).
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    fn connector(&self) -> io::Result<TlsConnector> {
        let mut builder = TlsConnector::builder();
        if self.insecure_skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build().map_err(io::Error::other)
    }
}

/// Live socket owned by the connection worker.
pub(crate) enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
    Udp(UdpSocket),
}

impl ActiveConnection {
    /// Write one full record to the socket.
    pub fn send(&mut self, record: &[u8]) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.write_all(record),
            ActiveConnection::Tls(stream) => stream.write_all(record),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.write_all(record),
            ActiveConnection::Udp(socket) => socket.send(record).map(|_| ()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.flush(),
            ActiveConnection::Tls(stream) => stream.flush(),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.flush(),
            ActiveConnection::Udp(_) => Ok(()),
        }
    }

    /// Update the write timeout on the underlying socket.
    pub fn set_write_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.set_write_timeout(Some(timeout)),
            ActiveConnection::Tls(stream) => stream.get_ref().set_write_timeout(Some(timeout)),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.set_write_timeout(Some(timeout)),
            ActiveConnection::Udp(socket) => socket.set_write_timeout(Some(timeout)),
        }
    }

    /// Shut the socket down in both directions, unblocking monitor reads.
    pub fn shutdown(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.shutdown(Shutdown::Both),
            ActiveConnection::Tls(stream) => {
                let _ = stream.shutdown();
                stream.get_ref().shutdown(Shutdown::Both)
            }
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.shutdown(Shutdown::Both),
            ActiveConnection::Udp(_) => Ok(()),
        }
    }

    /// Human-readable peer description for the `Open` event.
    pub fn peer_label(&self) -> String {
        match self {
            ActiveConnection::PlainTcp(stream) => peer_addr_label(stream.peer_addr()),
            ActiveConnection::Tls(stream) => peer_addr_label(stream.get_ref().peer_addr()),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream
                .peer_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
                .unwrap_or_else(|| "unix socket".into()),
            ActiveConnection::Udp(socket) => peer_addr_label(socket.peer_addr()),
        }
    }

    /// Clone a readable handle used to observe the peer closing the socket.
    ///
    /// Returns `None` for datagram sockets, which have no close to observe.
    /// TLS connections are monitored through the underlying TCP stream; the
    /// peer is a sink, so inbound bytes are only connection teardown.
    pub fn monitor_clone(&self) -> io::Result<Option<MonitorStream>> {
        match self {
            ActiveConnection::PlainTcp(stream) => {
                stream.try_clone().map(|s| Some(MonitorStream::Tcp(s)))
            }
            ActiveConnection::Tls(stream) => stream
                .get_ref()
                .try_clone()
                .map(|s| Some(MonitorStream::Tcp(s))),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => {
                stream.try_clone().map(|s| Some(MonitorStream::Unix(s)))
            }
            ActiveConnection::Udp(_) => Ok(None),
        }
    }
}

fn peer_addr_label(addr: io::Result<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|_| "unknown".into())
}

/// Readable clone of a live stream, consumed by a monitor thread.
pub(crate) enum MonitorStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl MonitorStream {
    /// Block until the peer closes the stream. Returns `true` when the close
    /// was observed as an error rather than a clean end-of-stream.
    pub fn wait_for_close(self) -> bool {
        let mut reader: Box<dyn Read> = match self {
            MonitorStream::Tcp(stream) => {
                let _ = stream.set_read_timeout(None);
                Box::new(stream)
            }
            #[cfg(unix)]
            MonitorStream::Unix(stream) => {
                let _ = stream.set_read_timeout(None);
                Box::new(stream)
            }
        };
        let mut buf = [0u8; 512];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return false,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return true,
            }
        }
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addrs = SocketTarget::resolve(host, port)?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses resolved for {host}:{port}"),
        )
    }))
}

fn connect_udp(host: &str, port: u16) -> io::Result<UdpSocket> {
    let addrs = SocketTarget::resolve(host, port)?;
    let mut last_err = None;
    for addr in addrs {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = match UdpSocket::bind(bind_addr) {
            Ok(socket) => socket,
            Err(err) => {
                last_err = Some(err);
                continue;
            }
        };
        match socket.connect(addr) {
            Ok(()) => return Ok(socket),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses resolved for {host}:{port}"),
        )
    }))
}

/// Establish a socket for the given target.
pub(crate) fn connect_transport(
    target: &SocketTarget,
    connect_timeout: Duration,
) -> io::Result<ActiveConnection> {
    match target {
        SocketTarget::Tcp { host, port, tls } => {
            let stream = connect_tcp(host, *port, connect_timeout)?;
            if let Some(tls) = tls {
                let connector = tls.connector()?;
                // Bound the handshake with socket timeouts, then clear them
                // so steady-state writes use the configured write timeout.
                stream.set_read_timeout(Some(connect_timeout))?;
                stream.set_write_timeout(Some(connect_timeout))?;
                let stream = connector
                    .connect(&tls.domain, stream)
                    .map_err(io::Error::other)?;
                let tcp_ref = stream.get_ref();
                tcp_ref.set_read_timeout(None)?;
                tcp_ref.set_write_timeout(None)?;
                Ok(ActiveConnection::Tls(Box::new(stream)))
            } else {
                Ok(ActiveConnection::PlainTcp(stream))
            }
        }
        SocketTarget::Unix { path } => {
            #[cfg(unix)]
            {
                let stream = UnixStream::connect(path)?;
                Ok(ActiveConnection::Unix(stream))
            }
            #[cfg(not(unix))]
            {
                let _ = (path, connect_timeout);
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix domain sockets are not supported on this platform",
                ))
            }
        }
        SocketTarget::Udp { host, port } => {
            let socket = connect_udp(host, *port)?;
            Ok(ActiveConnection::Udp(socket))
        }
    }
}
