//! TCP transport for LAN instruments
//!
//! Raw socket connections (SCPI-over-socket on port 5025, instrument
//! bridges, terminal servers). Per-call read timeouts are programmed
//! directly into the socket and recomputed after every partial receive;
//! unlike serial ports there is no fixed step to compose.
//!
//! A receive of zero bytes always means the peer closed the connection and
//! is reported as end of input, never as a timeout.

use super::deadline::{Deadline, Wait};
use super::stream::{self, ByteSource, Received, RxBuffer, Want};
use super::{Link, LinkState, Transport};
use crate::constants::{DEFAULT_CONNECT_TIMEOUT, READ_CHUNK_SIZE};
use crate::descriptor::Params;
use crate::error::{DescriptorError, Error, Request, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Validated TCP endpoint settings
#[derive(Debug, Clone, PartialEq)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl TcpSettings {
    /// Settings for `host:port` with the default connect timeout
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let settings = Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from resolved descriptor parameters
    pub fn from_params(params: &Params) -> Result<Self> {
        let host = params.str("host").ok_or(DescriptorError::MissingParameter {
            interface: "tcp",
            name: "host",
        })?;
        let port = params.int("port").ok_or(DescriptorError::MissingParameter {
            interface: "tcp",
            name: "port",
        })?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid("port", format!("{} not in 1..=65535", port)))?;

        let connect_timeout = match params.float("connect_timeout") {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map_err(|e| invalid("connect_timeout", e.to_string()))?,
            Some(secs) => {
                return Err(invalid(
                    "connect_timeout",
                    format!("{} is not a positive number of seconds", secs),
                ))
            }
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let settings = Self {
            host: host.to_string(),
            port,
            connect_timeout,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check every field without touching the network
    pub fn validate(&self) -> Result<()> {
        if !is_valid_host(&self.host) {
            return Err(invalid(
                "host",
                format!("'{}' is neither a DNS name nor an IP address", self.host),
            ));
        }
        if self.port == 0 {
            return Err(invalid("port", "0 not in 1..=65535".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", "must be positive".to_string()));
        }
        Ok(())
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

fn invalid(name: &'static str, reason: String) -> Error {
    DescriptorError::InvalidParameter { name, reason }.into()
}

/// DNS name (RFC 1123 labels) or literal IPv4/IPv6 address
pub(crate) fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    let name = host.strip_suffix('.').unwrap_or(host);
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Resolve and connect, bounded by the connect timeout
///
/// Each resolved address is tried with whatever time is left. A socket that
/// fails to connect is dropped before the next attempt.
fn connect(settings: &TcpSettings) -> Result<TcpStream> {
    let addr = settings.addr();
    let candidates: Vec<SocketAddr> = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|e| Error::medium(format!("Cannot resolve {}", settings.host), e))?
        .collect();

    let deadline = Deadline::start(Some(settings.connect_timeout));
    let mut last_error = None;

    for candidate in candidates {
        let remaining = match deadline.wait() {
            Wait::For(d) => d,
            _ => break,
        };
        let socket = Socket::new(Domain::for_address(candidate), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::medium(format!("Cannot create socket for {}", addr), e))?;

        match socket.connect_timeout(&candidate.into(), remaining) {
            Ok(()) => return Ok(socket.into()),
            Err(e) => {
                debug!(addr = %candidate, error = %e, "TCP connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Err(Error::Timeout {
                operation: Request::Open,
                received: 0,
            })
        }
        Some(e) => Err(Error::medium(format!("Cannot connect to {}", addr), e)),
        None if deadline.expired() => Err(Error::Timeout {
            operation: Request::Open,
            received: 0,
        }),
        None => Err(Error::medium(
            format!("Cannot resolve {}", settings.host),
            io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        )),
    }
}

/// Adapts a connected socket to the generic fill loop
struct SocketSource<'a> {
    stream: &'a mut TcpStream,
    addr: &'a str,
}

impl SocketSource<'_> {
    fn medium(&self, e: io::Error) -> Error {
        Error::medium(format!("Cannot read from {}", self.addr), e)
    }
}

impl ByteSource for SocketSource<'_> {
    fn receive(&mut self, chunk: &mut [u8], wait: Wait) -> Result<Received> {
        let result = match wait {
            Wait::Poll => {
                self.stream.set_nonblocking(true).map_err(|e| self.medium(e))?;
                let r = self.stream.read(chunk);
                self.stream.set_nonblocking(false).map_err(|e| self.medium(e))?;
                r
            }
            Wait::Forever => {
                self.stream.set_read_timeout(None).map_err(|e| self.medium(e))?;
                self.stream.read(chunk)
            }
            Wait::For(d) => {
                self.stream.set_read_timeout(Some(d)).map_err(|e| self.medium(e))?;
                self.stream.read(chunk)
            }
        };

        match result {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => Ok(Received::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Received::Idle)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                ) =>
            {
                debug!(addr = %self.addr, error = %e, "TCP peer went away");
                Ok(Received::Closed)
            }
            Err(e) => Err(self.medium(e)),
        }
    }

    fn drain(&mut self) -> Result<()> {
        self.stream.set_nonblocking(true).map_err(|e| self.medium(e))?;
        let mut scratch = [0u8; READ_CHUNK_SIZE];
        let result = loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false).map_err(|e| self.medium(e))?;
        result.map_err(|e| self.medium(e))
    }
}

/// TCP socket transport
///
/// # Example
///
/// ```no_run
/// use instrument_link::transport::{TcpSettings, TcpTransport, Transport};
/// use std::time::Duration;
///
/// # fn example() -> instrument_link::Result<()> {
/// let mut dmm = TcpTransport::new(TcpSettings::new("192.168.1.50", 5025)?);
/// dmm.open()?;
/// dmm.write(b"MEAS:VOLT:DC?\n")?;
/// let reading = dmm.read_until(b"\n", Some(Duration::from_secs(2)))?;
/// dmm.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TcpTransport {
    settings: TcpSettings,
    addr: String,
    link: Link<TcpStream>,
    buffer: RxBuffer,
}

impl TcpTransport {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            addr: settings.addr(),
            settings,
            link: Link::default(),
            buffer: RxBuffer::new(),
        }
    }

    /// Validate descriptor parameters and create the transport
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self::new(TcpSettings::from_params(params)?))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    fn source(&mut self, operation: &'static str) -> Result<(SocketSource<'_>, &mut RxBuffer)> {
        let stream = self.link.handle(operation)?;
        Ok((
            SocketSource {
                stream,
                addr: &self.addr,
            },
            &mut self.buffer,
        ))
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<()> {
        self.link.ensure_idle()?;
        debug!(
            addr = %self.addr,
            timeout_ms = self.settings.connect_timeout.as_millis() as u64,
            "Connecting to TCP endpoint"
        );

        let stream = connect(&self.settings).inspect_err(|e| {
            warn!(addr = %self.addr, error = %e, "TCP connection failed");
        })?;

        // Instrument commands are small and latency-sensitive
        if let Err(e) = stream.set_nodelay(true) {
            warn!(addr = %self.addr, error = %e, "Failed to set TCP_NODELAY (continuing anyway)");
        }

        info!(addr = %self.addr, "TCP connection established");
        self.link.establish(stream)
    }

    fn close(&mut self) -> Result<()> {
        let stream = self.link.shutdown()?;
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!(addr = %self.addr, error = %e, "TCP shutdown failed");
        }
        self.buffer.clear();
        debug!(addr = %self.addr, "TCP connection closed");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.link.handle("write")?;
        let map_err = |e| Error::medium(format!("Cannot write to {}", self.addr), e);
        stream.set_nonblocking(false).map_err(map_err)?;
        stream.set_write_timeout(None).map_err(map_err)?;
        stream.write_all(data).map_err(map_err)
    }

    fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes> {
        let (mut source, buffer) = self.source("read")?;
        stream::fill(buffer, &mut source, Want::Exact(n), timeout)
    }

    fn read_until(&mut self, terminator: &[u8], timeout: Option<Duration>) -> Result<Bytes> {
        let (mut source, buffer) = self.source("read")?;
        stream::fill(buffer, &mut source, Want::Until(terminator), timeout)
    }

    fn read_until_timeout(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes> {
        let (mut source, buffer) = self.source("read")?;
        stream::fill_or_partial(buffer, &mut source, n, timeout)
    }

    fn discard_read(&mut self) -> Result<()> {
        let (mut source, buffer) = self.source("discard")?;
        stream::discard(buffer, &mut source)
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse, Interface};

    #[test]
    fn test_settings_from_ipv6_descriptor() {
        let params = parse(Interface::Tcp, "tcp:[2620:0:2d0:200::8]:5000", None).unwrap();
        let settings = TcpSettings::from_params(&params).unwrap();
        assert_eq!(settings.host, "2620:0:2d0:200::8");
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(settings.addr(), "[2620:0:2d0:200::8]:5000");
    }

    #[test]
    fn test_settings_connect_timeout() {
        let params = parse(Interface::Tcp, "tcp:bench-psu.lab:5025:connect_timeout=0.25", None)
            .unwrap();
        let settings = TcpSettings::from_params(&params).unwrap();
        assert_eq!(settings.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_settings_reject_bad_values() {
        for descriptor in [
            "tcp:host:0",
            "tcp:host:65536",
            "tcp:host:-1",
            "tcp:bad_host:5025",
            "tcp:-leading.example:5025",
            "tcp:host:5025:connect_timeout=0",
            "tcp:host:5025:connect_timeout=-2",
        ] {
            let params = parse(Interface::Tcp, descriptor, None).unwrap();
            let err = TcpSettings::from_params(&params).unwrap_err();
            assert!(
                matches!(err, Error::Descriptor(DescriptorError::InvalidParameter { .. })),
                "{} should be rejected",
                descriptor
            );
        }
    }

    #[test]
    fn test_host_syntax() {
        assert!(is_valid_host("localhost"));
        assert!(is_valid_host("scope-01.lab.example.com"));
        assert!(is_valid_host("fqdn.example."));
        assert!(is_valid_host("10.0.0.7"));
        assert!(is_valid_host("::1"));
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("two..dots"));
        assert!(!is_valid_host("under_score"));
        assert!(!is_valid_host(&"a".repeat(64)));
    }

    #[test]
    fn test_construction_does_not_connect() {
        let t = TcpTransport::new(TcpSettings::new("192.0.2.1", 5025).unwrap());
        assert_eq!(t.state(), LinkState::Idle);
    }
}
