//! The blocking byte-stream seam between the client and the operating
//! system. Production code uses [`NetTransport`]; tests substitute a
//! scripted implementation.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::Error;

/// Address of one memcached server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServerEndpoint {
    /// A TCP host and port.
    Tcp { host: String, port: u16 },
    /// A path to a UNIX domain socket.
    Unix(PathBuf),
}

impl ServerEndpoint {
    /// A TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ServerEndpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// A UNIX domain socket endpoint.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ServerEndpoint::Unix(path.into())
    }

    /// Canonical string form, used as the routing key in a cluster.
    pub fn server_key(&self) -> String {
        self.to_string()
    }
}

impl Display for ServerEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ServerEndpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            ServerEndpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<(&str, u16)> for ServerEndpoint {
    fn from((host, port): (&str, u16)) -> Self {
        ServerEndpoint::tcp(host, port)
    }
}

impl From<(String, u16)> for ServerEndpoint {
    fn from((host, port): (String, u16)) -> Self {
        ServerEndpoint::tcp(host, port)
    }
}

/// A stream produced by a secure-transport wrapper, e.g. a TLS session
/// established over the plain TCP socket.
pub trait SecureStream: Read + Write + Send {}

impl<S: Read + Write + Send> SecureStream for S {}

/// Hook wrapping a freshly connected TCP socket in a secure transport.
pub type SecureWrapper =
    Arc<dyn Fn(TcpStream) -> io::Result<Box<dyn SecureStream>> + Send + Sync>;

/// TCP keepalive knobs, applied to TCP sockets at connect time.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeepaliveOpts {
    /// Idle time before the first probe.
    pub idle: Option<Duration>,
    /// Interval between probes.
    pub interval: Option<Duration>,
    /// Probes sent before the connection is dropped.
    pub count: Option<u32>,
}

/// Socket-level options consulted when a transport connects.
#[derive(Clone, Default)]
pub struct NetConfig {
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
    pub no_delay: bool,
    pub keepalive: Option<KeepaliveOpts>,
    pub secure_transport: Option<SecureWrapper>,
}

/// A blocking byte stream to one memcached server.
pub trait Transport: Sized + Send {
    /// Open a connection to `endpoint`.
    fn connect(endpoint: &ServerEndpoint, config: &NetConfig) -> Result<Self, Error>;

    /// One recv worth of bytes. Returning 0 means the peer closed.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the entire buffer.
    fn send_all(&mut self, data: &[u8]) -> io::Result<()>;
}

/// The production transport: TCP (optionally wrapped in a secure
/// transport) or a UNIX domain socket.
pub enum NetTransport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Secure(Box<dyn SecureStream>),
}

impl Transport for NetTransport {
    fn connect(endpoint: &ServerEndpoint, config: &NetConfig) -> Result<Self, Error> {
        match endpoint {
            ServerEndpoint::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, config)?;
                debug!("connected to {}", endpoint);
                match &config.secure_transport {
                    Some(wrap) => Ok(NetTransport::Secure(wrap(stream)?)),
                    None => Ok(NetTransport::Tcp(stream)),
                }
            }
            #[cfg(unix)]
            ServerEndpoint::Unix(path) => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(config.timeout)?;
                stream.set_write_timeout(config.timeout)?;
                debug!("connected to {}", endpoint);
                Ok(NetTransport::Unix(stream))
            }
            #[cfg(not(unix))]
            ServerEndpoint::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "UNIX domain sockets are not supported on this platform",
            )
            .into()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NetTransport::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            NetTransport::Unix(stream) => stream.read(buf),
            NetTransport::Secure(stream) => stream.read(buf),
        }
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            NetTransport::Tcp(stream) => stream.write_all(data),
            #[cfg(unix)]
            NetTransport::Unix(stream) => stream.write_all(data),
            NetTransport::Secure(stream) => stream.write_all(data),
        }
    }
}

fn connect_tcp(host: &str, port: u16, config: &NetConfig) -> Result<TcpStream, Error> {
    let stream = match config.connect_timeout {
        Some(timeout) => {
            let mut last_err = None;
            let mut connected = None;
            for addr in (host, port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(stream) => {
                        connected = Some(stream);
                        break;
                    }
                    Err(err) => last_err = Some(err),
                }
            }
            match connected {
                Some(stream) => stream,
                None => {
                    return Err(last_err
                        .unwrap_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidInput, "no addresses resolved")
                        })
                        .into())
                }
            }
        }
        None => TcpStream::connect((host, port))?,
    };

    stream.set_read_timeout(config.timeout)?;
    stream.set_write_timeout(config.timeout)?;
    if config.no_delay {
        stream.set_nodelay(true)?;
    }
    if let Some(opts) = config.keepalive {
        apply_keepalive(&stream, &opts)?;
    }
    Ok(stream)
}

fn apply_keepalive(stream: &TcpStream, opts: &KeepaliveOpts) -> io::Result<()> {
    let mut keepalive = socket2::TcpKeepalive::new();
    if let Some(idle) = opts.idle {
        keepalive = keepalive.with_time(idle);
    }
    if let Some(interval) = opts.interval {
        keepalive = keepalive.with_interval(interval);
    }
    if let Some(count) = opts.count {
        keepalive = keepalive.with_retries(count);
    }
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// A transport replaying scripted recvs and capturing everything sent,
/// mirroring how the protocol is exercised against a real server but
/// with full control over chunk boundaries.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io;

    use super::{NetConfig, ServerEndpoint, Transport};
    use crate::error::Error;

    #[derive(Debug)]
    pub(crate) enum Script {
        /// Bytes returned by one recv.
        Recv(&'static [u8]),
        /// A recv interrupted by a signal.
        Interrupt,
    }

    #[derive(Debug, Default)]
    pub(crate) struct ScriptedTransport {
        pub(crate) recvs: VecDeque<Script>,
        pub(crate) sent: Vec<u8>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(recvs: Vec<Script>) -> Self {
            ScriptedTransport {
                recvs: recvs.into_iter().collect(),
                sent: Vec::new(),
            }
        }

        pub(crate) fn replying(recvs: Vec<&'static [u8]>) -> Self {
            ScriptedTransport::new(recvs.into_iter().map(Script::Recv).collect())
        }
    }

    impl Transport for ScriptedTransport {
        fn connect(_: &ServerEndpoint, _: &NetConfig) -> Result<Self, Error> {
            Ok(ScriptedTransport::default())
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.recvs.pop_front() {
                Some(Script::Recv(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(Script::Interrupt) => {
                    Err(io::Error::new(io::ErrorKind::Interrupted, "signal"))
                }
                // script exhausted: the peer hung up
                None => Ok(0),
            }
        }

        fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.sent.extend_from_slice(data);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ServerEndpoint;

    #[test]
    fn test_server_key() {
        let tcp = ServerEndpoint::tcp("localhost", 11211);
        assert_eq!("localhost:11211", tcp.server_key());

        let unix = ServerEndpoint::unix("/var/run/memcached.sock");
        assert_eq!("/var/run/memcached.sock", unix.server_key());
    }
}
