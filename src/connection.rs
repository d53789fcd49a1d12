//! TCP connections to the UR controller
//!
//! Connections are opened through a [`Connector`] so the session can be
//! driven by a scripted transport in tests. [`TcpConnector`] is the real one:
//! it walks every resolved address (IPv4 and IPv6) once, applies
//! `TCP_NODELAY` before the handshake and keeps the first socket that
//! connects.

use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::{Result, URError};

/// Dashboard server, also used to unlock protective stops
pub const UR_DASHBOARD_PORT: u16 = 29999;
pub const UR_PRIMARY_PORT: u16 = 30001;
pub const UR_SECONDARY_PORT: u16 = 30002;
/// Realtime client interface, one packet per controller cycle
pub const UR_REALTIME_PORT: u16 = 30003;
pub const UR_RTDE_PORT: u16 = 30004;

/// Host and port of one controller interface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Per-socket behaviour applied when a connection is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Bound on a single blocking read; `None` blocks indefinitely
    pub read_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            read_timeout: None,
        }
    }
}

/// Byte stream whose blocking reads can be bounded
pub trait ReadStream: Read + Send {
    /// Bound the next blocking read; `None` blocks indefinitely
    fn set_read_limit(&mut self, limit: Option<Duration>) -> io::Result<()>;
}

impl ReadStream for TcpStream {
    fn set_read_limit(&mut self, limit: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(limit)
    }
}

/// Opens byte streams to controller endpoints
pub trait Connector {
    type Stream: ReadStream;

    fn connect(&self, endpoint: &Endpoint, options: &SocketOptions) -> Result<Self::Stream>;
}

/// Plain TCP connector
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, endpoint: &Endpoint, options: &SocketOptions) -> Result<TcpStream> {
        let candidates: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| URError::Connection(format!("Failed to resolve {}: {}", endpoint, e)))?
            .collect();

        if candidates.is_empty() {
            return Err(URError::Connection(format!("No addresses found for {}", endpoint)));
        }

        let mut last_error = None;
        for addr in candidates {
            match open_socket(addr, options) {
                Ok(stream) => {
                    debug!(%endpoint, %addr, nodelay = options.nodelay, "Socket connected");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(%endpoint, %addr, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no usable address".to_string());
        Err(URError::Connection(format!("Failed to connect to {}: {}", endpoint, reason)))
    }
}

/// One attempt against one resolved address. The socket is closed on drop
/// if any step fails.
fn open_socket(addr: SocketAddr, options: &SocketOptions) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if options.nodelay {
        socket.set_nodelay(true)?;
    }
    socket.connect(&addr.into())?;

    let stream: TcpStream = socket.into();
    stream.set_read_timeout(options.read_timeout)?;
    Ok(stream)
}

/// Connect to `endpoint` over TCP, with blocking reads.
pub fn connect(endpoint: &Endpoint, disable_nagle: bool) -> Result<Connection<TcpStream>> {
    let options = SocketOptions {
        nodelay: disable_nagle,
        read_timeout: None,
    };
    Connection::open(&TcpConnector, endpoint.clone(), &options)
}

/// An open stream bound to one endpoint.
///
/// Never reused after an error: the session drops it and opens a new one.
pub struct Connection<S> {
    endpoint: Endpoint,
    stream: S,
}

impl<S> Connection<S> {
    pub fn open<C>(connector: &C, endpoint: Endpoint, options: &SocketOptions) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect(&endpoint, options)?;
        Ok(Self { endpoint, stream })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Close the connection
    pub fn close(self) {
        debug!(endpoint = %self.endpoint, "Closing connection");
    }
}

/// Whether a read error is the socket read timeout expiring.
///
/// Unix reports an expired `SO_RCVTIMEO` as `WouldBlock`, Windows as
/// `TimedOut`.
pub fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Read up to `buf.len()` bytes within `timeout`.
///
/// The timeout bounds the whole frame, not each `read`: every read is
/// limited to the time left until the deadline. Returns the number of bytes
/// read once the buffer is full or the deadline passes with some data in
/// hand. A timeout before any data is returned as the timeout error. A
/// closed peer is `UnexpectedEof`, even mid-frame.
pub fn read_frame<S: ReadStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> io::Result<usize> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let mut filled = 0;

    while filled < buf.len() {
        let limit = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    if filled > 0 {
                        break;
                    }
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline expired"));
                }
                Some(left)
            }
            None => None,
        };
        stream.set_read_limit(limit)?;

        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {} of {} bytes", filled, buf.len()),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) && filled > 0 => break,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}


#[cfg(test)]
mod tests {
    use super::mock::{MockConnector, MockRead};
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(
            Endpoint::new("10.224.60.30", UR_REALTIME_PORT).to_string(),
            "10.224.60.30:30003"
        );
        assert_eq!(Endpoint::new("::1", UR_DASHBOARD_PORT).to_string(), "[::1]:29999");
    }

    #[test]
    fn test_connect_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection = connect(&Endpoint::new("127.0.0.1", port), true).unwrap();
        assert!(connection.stream().nodelay().unwrap());
        assert_eq!(connection.endpoint().port, port);
        assert_eq!(connection.stream().read_timeout().unwrap(), None);
        let (_server, _) = listener.accept().unwrap();

        let connection = connect(&Endpoint::new("localhost", port), false).unwrap();
        assert!(!connection.stream().nodelay().unwrap());
    }

    #[test]
    fn test_connect_applies_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let options = SocketOptions {
            nodelay: true,
            read_timeout: Some(Duration::from_millis(50)),
        };

        let mut stream = TcpConnector
            .connect(&Endpoint::new("127.0.0.1", port), &options)
            .unwrap();

        // The kernel rounds SO_RCVTIMEO up to its clock tick
        let timeout = stream.read_timeout().unwrap().unwrap();
        assert!(timeout >= Duration::from_millis(50) && timeout < Duration::from_millis(60));

        let mut buf = [0u8; 8];
        let err = read_frame(&mut stream, &mut buf, options.read_timeout).unwrap_err();
        assert!(is_timeout(&err), "unexpected error kind {:?}", err.kind());
    }

    #[test]
    fn test_connect_refused_is_connection_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        match connect(&Endpoint::new("127.0.0.1", port), true) {
            Err(URError::Connection(msg)) => assert!(msg.contains(&port.to_string())),
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_read_frame_collects_partial_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let options = SocketOptions {
            nodelay: true,
            read_timeout: Some(Duration::from_millis(200)),
        };
        let mut client = TcpConnector
            .connect(&Endpoint::new("127.0.0.1", port), &options)
            .unwrap();
        let (mut server, _) = listener.accept().unwrap();

        server.write_all(&[1, 2, 3]).unwrap();
        server.flush().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        server.write_all(&[4, 5]).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(read_frame(&mut client, &mut buf, options.read_timeout).unwrap(), 5);
        assert_eq!(buf, [1, 2, 3, 4, 5]);

        drop(server);
        let err = read_frame(&mut client, &mut buf, options.read_timeout).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_frame_returns_partial_on_timeout() {
        let connector = MockConnector::new();
        connector.push_frame(vec![9; 3]);
        connector.push(MockRead::Timeout);
        let mut stream = connector
            .connect(&Endpoint::new("robot", UR_REALTIME_PORT), &SocketOptions::default())
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(read_frame(&mut stream, &mut buf, None).unwrap(), 3);
        assert_eq!(&buf[..3], &[9, 9, 9]);

        // Nothing left in the script
        let err = read_frame(&mut stream, &mut buf, None).unwrap_err();
        assert!(is_timeout(&err));
    }

    #[test]
    fn test_read_frame_retries_interrupted() {
        let connector = MockConnector::new();
        connector.push(MockRead::Fail(io::ErrorKind::Interrupted));
        connector.push_frame(vec![1, 2]);
        let mut stream = connector
            .connect(&Endpoint::new("robot", UR_REALTIME_PORT), &SocketOptions::default())
            .unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(read_frame(&mut stream, &mut buf, None).unwrap(), 2);
    }

    #[test]
    fn test_read_frame_shrinks_limit_towards_deadline() {
        let connector = MockConnector::new();
        connector.push_frame(vec![1; 3]);
        connector.push(MockRead::Delayed(Duration::from_millis(10), vec![2; 2]));
        let mut stream = connector
            .connect(&Endpoint::new("robot", UR_REALTIME_PORT), &SocketOptions::default())
            .unwrap();

        let timeout = Duration::from_millis(200);
        let mut buf = [0u8; 5];
        assert_eq!(read_frame(&mut stream, &mut buf, Some(timeout)).unwrap(), 5);

        let limits: Vec<Duration> = connector.read_limits().into_iter().flatten().collect();
        assert_eq!(limits.len(), 2);
        assert!(limits[0] <= timeout);
        assert!(limits[1] <= limits[0]);
    }

    #[test]
    fn test_read_frame_stops_at_deadline_while_data_trickles() {
        let connector = MockConnector::new();
        for _ in 0..10 {
            connector.push(MockRead::Delayed(Duration::from_millis(30), vec![7; 10]));
        }
        let mut stream = connector
            .connect(&Endpoint::new("robot", UR_REALTIME_PORT), &SocketOptions::default())
            .unwrap();

        let started = Instant::now();
        let mut buf = [0u8; 100];
        let filled = read_frame(&mut stream, &mut buf, Some(Duration::from_millis(50))).unwrap();

        assert!(filled >= 10 && filled < 100, "read {} bytes", filled);
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn test_read_frame_without_timeout_blocks_until_full() {
        let connector = MockConnector::new();
        connector.push(MockRead::Delayed(Duration::from_millis(5), vec![1; 4]));
        connector.push(MockRead::Delayed(Duration::from_millis(5), vec![2; 4]));
        let mut stream = connector
            .connect(&Endpoint::new("robot", UR_REALTIME_PORT), &SocketOptions::default())
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(read_frame(&mut stream, &mut buf, None).unwrap(), 8);
        assert!(connector.read_limits().iter().all(Option::is_none));
    }

    #[test]
    fn test_connection_close_drops_stream() {
        let connector = MockConnector::new();
        let connection = Connection::open(
            &connector,
            Endpoint::new("robot", UR_DASHBOARD_PORT),
            &SocketOptions::default(),
        )
        .unwrap();

        assert_eq!(connection.endpoint().port, UR_DASHBOARD_PORT);
        assert_eq!(connector.live(UR_DASHBOARD_PORT), 1);
        connection.close();
        assert_eq!(connector.live(UR_DASHBOARD_PORT), 0);
    }
}
