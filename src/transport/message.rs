//! Message-oriented media behind the byte-stream contract
//!
//! USBTMC, VXI-11 and GPIB adapters exchange whole messages and mark the end
//! of a message themselves. The bindings for those media live outside this
//! crate and plug in through two traits:
//!
//! - [`MessageBackend`]: opens a [`MessageDevice`] for a [`MessageTarget`]
//! - [`MessageDevice`]: sends and receives complete messages
//!
//! [`MessageTransport`] adapts them to [`Transport`]:
//!
//! - `write` sends one complete message
//! - `read(n)` fetches one message when fewer than `n` bytes are buffered,
//!   delivers `n` bytes and keeps the surplus; a message that is still too
//!   short is end of input
//! - `read_until` delivers the buffered message, or fetches one; the
//!   caller's terminator is ignored since the medium marks message ends
//! - the medium's own timeout becomes [`Error::Timeout`]
//!
//! These media need an explicit timeout on every call, so a missing caller
//! timeout is replaced by the transport's default.

use super::deadline::{Deadline, Wait};
use super::stream::RxBuffer;
use super::tcp::is_valid_host;
use super::{Link, LinkState, Transport};
use crate::constants::{DEFAULT_VXI11_DEVICE, MESSAGE_DEFAULT_TIMEOUT};
use crate::descriptor::Params;
use crate::error::{DescriptorError, Error, Request, Result};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Backend seam
// =============================================================================

/// Failure reported by a message device or backend
#[derive(Debug)]
pub enum MessageError {
    /// The medium's own timeout expired
    Timeout,
    /// Anything else the binding reports
    Io(io::Error),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "medium timed out"),
            Self::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for MessageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Timeout => None,
        }
    }
}

impl From<io::Error> for MessageError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

/// An opened message-oriented instrument
pub trait MessageDevice: Send {
    /// Send one complete message
    ///
    /// `timeout` is always explicit. Zero means the message must be accepted
    /// without waiting; it never means "wait forever", whatever the binding
    /// itself uses zero for.
    fn send(&mut self, message: &[u8], timeout: Duration) -> std::result::Result<(), MessageError>;

    /// Receive one complete message
    ///
    /// A zero `timeout` returns only a message that is already queued and
    /// reports [`MessageError::Timeout`] otherwise. Bindings whose native
    /// zero means "no timeout" (GPIB `T0`) must translate it.
    fn receive(&mut self, timeout: Duration) -> std::result::Result<Vec<u8>, MessageError>;

    /// Drop any response the device has queued
    fn discard_pending(&mut self) -> std::result::Result<(), MessageError> {
        Ok(())
    }

    /// Release the device
    fn close(&mut self) -> std::result::Result<(), MessageError> {
        Ok(())
    }
}

/// Opens message devices for one kind of medium
///
/// Registered on the factory by the caller; the crate never picks a backend
/// by inspecting the platform.
pub trait MessageBackend: Send + Sync {
    fn connect(
        &self,
        target: &MessageTarget,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn MessageDevice>, MessageError>;
}

// =============================================================================
// Targets
// =============================================================================

/// GPIB address and timing, given directly rather than by descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct GpibSettings {
    /// Interface board index (GPIB0, GPIB1, ...)
    pub board: u8,
    /// Primary address, 0..=30
    pub primary: u8,
    /// Secondary address, 0..=30
    pub secondary: Option<u8>,
    /// Per-call timeout used when the caller gives none
    pub timeout: Duration,
}

impl GpibSettings {
    pub fn new(board: u8, primary: u8) -> Result<Self> {
        let settings = Self {
            board,
            primary,
            secondary: None,
            timeout: MESSAGE_DEFAULT_TIMEOUT,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary > 30 {
            return Err(invalid("primary", format!("{} not in 0..=30", self.primary)));
        }
        if let Some(secondary) = self.secondary {
            if secondary > 30 {
                return Err(invalid("secondary", format!("{} not in 0..=30", secondary)));
            }
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout", "must be positive".to_string()));
        }
        Ok(())
    }
}

/// Which instrument a backend should open
#[derive(Debug, Clone, PartialEq)]
pub enum MessageTarget {
    Usbtmc {
        vendor_id: Option<u16>,
        product_id: Option<u16>,
        serial_nr: String,
    },
    Vxi11 {
        host: String,
        name: String,
    },
    Gpib(GpibSettings),
}

impl MessageTarget {
    /// USBTMC target from resolved descriptor parameters
    pub fn usbtmc_from_params(params: &Params) -> Result<Self> {
        let serial_nr = params
            .str("serialnr")
            .ok_or(DescriptorError::MissingParameter {
                interface: "usbtmc",
                name: "serialnr",
            })?;
        if serial_nr.is_empty() {
            return Err(invalid("serialnr", "must not be empty".to_string()));
        }
        Ok(Self::Usbtmc {
            vendor_id: usb_id(params, "vendorid")?,
            product_id: usb_id(params, "productid")?,
            serial_nr: serial_nr.to_string(),
        })
    }

    /// VXI-11 target from resolved descriptor parameters
    pub fn vxi11_from_params(params: &Params) -> Result<Self> {
        let host = params.str("host").ok_or(DescriptorError::MissingParameter {
            interface: "vxi11",
            name: "host",
        })?;
        if !is_valid_host(host) {
            return Err(invalid(
                "host",
                format!("'{}' is neither a DNS name nor an IP address", host),
            ));
        }
        let name = params.str("name").unwrap_or(DEFAULT_VXI11_DEVICE);
        if name.is_empty() {
            return Err(invalid("name", "must not be empty".to_string()));
        }
        Ok(Self::Vxi11 {
            host: host.to_string(),
            name: name.to_string(),
        })
    }

    /// Interface name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Usbtmc { .. } => "usbtmc",
            Self::Vxi11 { .. } => "vxi11",
            Self::Gpib(_) => "gpib",
        }
    }

    /// Timeout applied when a caller passes none
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Gpib(settings) => settings.timeout,
            _ => MESSAGE_DEFAULT_TIMEOUT,
        }
    }
}

impl fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usbtmc {
                vendor_id,
                product_id,
                serial_nr,
            } => {
                write!(f, "usbtmc")?;
                if let Some(v) = vendor_id {
                    write!(f, ":vendorid=0x{:04x}", v)?;
                }
                if let Some(p) = product_id {
                    write!(f, ":productid=0x{:04x}", p)?;
                }
                write!(f, ":serialnr={}", serial_nr)
            }
            Self::Vxi11 { host, name } => {
                if host.contains(':') {
                    write!(f, "vxi11:[{}]:name={}", host, name)
                } else {
                    write!(f, "vxi11:{}:name={}", host, name)
                }
            }
            Self::Gpib(s) => {
                write!(f, "gpib{}::{}", s.board, s.primary)?;
                if let Some(secondary) = s.secondary {
                    write!(f, "::{}", secondary)?;
                }
                Ok(())
            }
        }
    }
}

fn invalid(name: &'static str, reason: String) -> Error {
    DescriptorError::InvalidParameter { name, reason }.into()
}

fn usb_id(params: &Params, name: &'static str) -> Result<Option<u16>> {
    params
        .int(name)
        .map(|id| {
            u16::try_from(id).map_err(|_| invalid(name, format!("{} not in 0..=0xffff", id)))
        })
        .transpose()
}

// =============================================================================
// Adapter
// =============================================================================

/// Byte-stream transport over a message-oriented device
pub struct MessageTransport {
    target: MessageTarget,
    backend: Arc<dyn MessageBackend>,
    default_timeout: Duration,
    link: Link<Box<dyn MessageDevice>>,
    buffer: RxBuffer,
}

impl fmt::Debug for MessageTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTransport")
            .field("target", &self.target)
            .field("default_timeout", &self.default_timeout)
            .field("state", &self.link.state())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl MessageTransport {
    pub fn new(target: MessageTarget, backend: Arc<dyn MessageBackend>) -> Self {
        Self {
            default_timeout: target.default_timeout(),
            target,
            backend,
            link: Link::default(),
            buffer: RxBuffer::new(),
        }
    }

    /// Replace the timeout used when a call passes none
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn target(&self) -> &MessageTarget {
        &self.target
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn effective(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.default_timeout)
    }

    /// Fetch one message into the buffer
    fn fetch(&mut self, timeout: Duration, operation: Request) -> Result<()> {
        let device = self.link.handle("read")?;
        match device.receive(timeout) {
            Ok(message) => {
                debug!(device = %self.target, bytes = message.len(), "Message received");
                self.buffer.extend(&message);
                Ok(())
            }
            Err(e) => Err(translate(e, operation, self.buffer.len(), &self.target)),
        }
    }
}

impl Drop for MessageTransport {
    fn drop(&mut self) {
        if let Link::Open(device) = &mut self.link {
            if let Err(e) = device.close() {
                debug!(device = %self.target, error = %e, "Failed to close message device on drop");
            }
        }
    }
}

fn translate(e: MessageError, operation: Request, received: usize, target: &MessageTarget) -> Error {
    match e {
        MessageError::Timeout => Error::Timeout {
            operation,
            received,
        },
        MessageError::Io(source) => Error::medium(format!("{} failed on {}", operation, target), source),
    }
}

impl Transport for MessageTransport {
    fn open(&mut self) -> Result<()> {
        self.link.ensure_idle()?;
        debug!(device = %self.target, "Opening message device");
        let device = self
            .backend
            .connect(&self.target, self.default_timeout)
            .map_err(|e| translate(e, Request::Open, 0, &self.target))?;
        info!(device = %self.target, "Message device opened");
        self.link.establish(device)
    }

    fn close(&mut self) -> Result<()> {
        let mut device = self.link.shutdown()?;
        self.buffer.clear();
        let result = device.close();
        debug!(device = %self.target, "Message device closed");
        result.map_err(|e| translate(e, Request::Close, 0, &self.target))
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.default_timeout;
        let device = self.link.handle("write")?;
        device
            .send(data, timeout)
            .map_err(|e| translate(e, Request::Write { len: data.len() }, 0, &self.target))
    }

    fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes> {
        self.link.handle("read")?;
        let request = Request::Read { len: n };
        if self.buffer.len() < n {
            self.fetch(self.effective(timeout), request.clone())?;
        }
        if self.buffer.len() < n {
            return Err(Error::EndOfInput {
                operation: request,
                received: self.buffer.len(),
            });
        }
        Ok(self.buffer.take(n))
    }

    fn read_until(&mut self, terminator: &[u8], timeout: Option<Duration>) -> Result<Bytes> {
        self.link.handle("read")?;
        if self.buffer.is_empty() {
            let request = Request::ReadUntil {
                terminator: terminator.to_vec(),
            };
            self.fetch(self.effective(timeout), request)?;
        }
        Ok(self.buffer.take_all())
    }

    fn read_until_timeout(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes> {
        self.link.handle("read")?;
        let deadline = Deadline::start(Some(self.effective(timeout)));
        let mut attempted = false;
        while self.buffer.len() < n {
            // A zero timeout still checks for a queued message once
            let remaining = match deadline.wait() {
                Wait::For(d) => d,
                Wait::Poll if !attempted => Duration::ZERO,
                Wait::Poll | Wait::Forever => break,
            };
            attempted = true;
            match self.fetch(remaining, Request::Read { len: n }) {
                Ok(()) => {}
                Err(Error::Timeout { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        let available = self.buffer.len().min(n);
        Ok(self.buffer.take(available))
    }

    fn discard_read(&mut self) -> Result<()> {
        let device = self.link.handle("discard")?;
        self.buffer.clear();
        device
            .discard_pending()
            .map_err(|e| translate(e, Request::Discard, 0, &self.target))
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }
}
