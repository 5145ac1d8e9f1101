//! Serial transport for RS-232 and USB CDC instruments
//!
//! Serial ports are opened with one fixed read timeout
//! ([`SERIAL_READ_STEP`]) and never reprogrammed: reprogramming is slow on
//! most drivers and can drop bytes. A read with a longer timeout is composed
//! of repeated fixed-step reads until the request is satisfied or the
//! deadline passes. A zero timeout never waits a step; it only consumes
//! bytes the driver has already queued.
//!
//! The port itself sits behind [`SerialLine`], implemented for
//! `serialport` ports. A custom opener can be injected with
//! [`SerialTransport::with_opener`].

use super::deadline::Wait;
use super::stream::{self, ByteSource, Received, RxBuffer, Want};
use super::{Link, LinkState, Transport};
use crate::constants::{DEFAULT_BAUD_RATE, MAX_BAUD_RATE, SERIAL_READ_STEP};
use crate::descriptor::Params;
use crate::error::{DescriptorError, Error, Result};
use bytes::Bytes;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Settings
// =============================================================================

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "N" | "NONE" => Some(Self::None),
            "E" | "EVEN" => Some(Self::Even),
            "O" | "ODD" => Some(Self::Odd),
            _ => None,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "N"),
            Self::Even => write!(f, "E"),
            Self::Odd => write!(f, "O"),
        }
    }
}

/// Number of stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    fn from_f64(v: f64) -> Option<Self> {
        if v == 1.0 {
            Some(Self::One)
        } else if v == 1.5 {
            Some(Self::OnePointFive)
        } else if v == 2.0 {
            Some(Self::Two)
        } else {
            None
        }
    }
}

/// Validated serial port settings
///
/// Defaults: 9600 baud, 8 data bits, no parity, 1 stop bit, no flow control.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub rtscts: bool,
}

impl SerialSettings {
    /// Settings for `device` with defaults for everything else
    pub fn new(device: impl Into<String>) -> Result<Self> {
        let settings = Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            rtscts: false,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings from resolved descriptor parameters
    pub fn from_params(params: &Params) -> Result<Self> {
        let device = params
            .str("device")
            .ok_or(DescriptorError::MissingParameter {
                interface: "serial",
                name: "device",
            })?;

        let baud_rate = match params.int("baudrate") {
            Some(v) => u32::try_from(v)
                .map_err(|_| invalid("baudrate", format!("{} out of range", v)))?,
            None => DEFAULT_BAUD_RATE,
        };
        let data_bits = match params.int("bytesize") {
            Some(v) => u8::try_from(v)
                .map_err(|_| invalid("bytesize", format!("{} out of range", v)))?,
            None => 8,
        };
        let parity = match params.str("parity") {
            Some(raw) => Parity::parse(raw)
                .ok_or_else(|| invalid("parity", format!("'{}' is not one of N, E, O", raw)))?,
            None => Parity::None,
        };
        let stop_bits = match params.float("stopbits") {
            Some(v) => StopBits::from_f64(v)
                .ok_or_else(|| invalid("stopbits", format!("{} is not one of 1, 1.5, 2", v)))?,
            None => StopBits::One,
        };

        let settings = Self {
            device: device.to_string(),
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            rtscts: params.bool("rtscts").unwrap_or(false),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check every field without touching the device
    pub fn validate(&self) -> Result<()> {
        if !is_valid_device_path(&self.device) {
            return Err(invalid(
                "device",
                format!("'{}' is not a serial device path", self.device),
            ));
        }
        if self.baud_rate == 0 || self.baud_rate > MAX_BAUD_RATE {
            return Err(invalid(
                "baudrate",
                format!("{} not in 1..={}", self.baud_rate, MAX_BAUD_RATE),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(invalid(
                "bytesize",
                format!("{} not in 5..=8", self.data_bits),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> Error {
    DescriptorError::InvalidParameter { name, reason }.into()
}

/// Accepts absolute paths (`/dev/ttyUSB0`), `COMn` names and Windows device
/// namespace paths (`\\.\COM12`)
fn is_valid_device_path(path: &str) -> bool {
    if path.is_empty() || path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    if let Some(rest) = path.strip_prefix('/') {
        return !rest.is_empty() && !rest.ends_with('/');
    }
    if path.starts_with(r"\\.\") {
        return path.len() > 4;
    }
    path.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("COM"))
        && path.len() > 3
        && path[3..].chars().all(|c| c.is_ascii_digit())
}

// =============================================================================
// Serial line
// =============================================================================

/// Minimal serial port surface used by [`SerialTransport`]
///
/// `read_step` must block at most one fixed step and report an expired step
/// as `ErrorKind::TimedOut` or `Ok(0)`.
pub trait SerialLine: Send {
    /// One fixed-duration read of up to `buf.len()` bytes
    fn read_step(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes queued by the driver and readable without waiting
    fn bytes_waiting(&mut self) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Drop the driver's input queue
    fn clear_input(&mut self) -> io::Result<()>;
}

impl SerialLine for Box<dyn serialport::SerialPort> {
    fn read_step(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn bytes_waiting(&mut self) -> io::Result<usize> {
        self.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)?;
        self.flush()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Opens the line for a set of settings
pub type SerialOpener = Box<dyn Fn(&SerialSettings) -> Result<Box<dyn SerialLine>> + Send>;

/// Open a real serial port with the fixed read step
fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialLine>> {
    let map_err = |e: serialport::Error| {
        Error::medium(
            format!("Cannot open serial port {}", settings.device),
            io::Error::other(e.to_string()),
        )
    };

    let stop_bits = match settings.stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
        StopBits::OnePointFive => {
            return Err(Error::medium(
                format!("Cannot open serial port {}", settings.device),
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    "1.5 stop bits not supported by this serial backend",
                ),
            ))
        }
    };
    let data_bits = match settings.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    };
    let parity = match settings.parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    };
    let flow_control = if settings.rtscts {
        serialport::FlowControl::Hardware
    } else {
        serialport::FlowControl::None
    };

    let port = serialport::new(&settings.device, settings.baud_rate)
        .data_bits(data_bits)
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(flow_control)
        .timeout(SERIAL_READ_STEP)
        .open()
        .map_err(map_err)?;
    Ok(Box::new(port))
}

/// Adapts a line to the generic fill loop
struct LineSource<'a> {
    line: &'a mut dyn SerialLine,
    device: &'a str,
}

impl ByteSource for LineSource<'_> {
    fn receive(&mut self, chunk: &mut [u8], wait: Wait) -> Result<Received> {
        let len = match wait {
            Wait::Poll => {
                let waiting = self
                    .line
                    .bytes_waiting()
                    .map_err(|e| Error::medium(format!("Cannot poll {}", self.device), e))?;
                if waiting == 0 {
                    return Ok(Received::Idle);
                }
                waiting.min(chunk.len())
            }
            Wait::Forever | Wait::For(_) => chunk.len(),
        };

        match self.line.read_step(&mut chunk[..len]) {
            Ok(0) => Ok(Received::Idle),
            Ok(n) => Ok(Received::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Received::Idle)
            }
            Err(e) => Err(Error::medium(format!("Cannot read {}", self.device), e)),
        }
    }

    fn drain(&mut self) -> Result<()> {
        self.line
            .clear_input()
            .map_err(|e| Error::medium(format!("Cannot flush {}", self.device), e))
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Serial port transport
///
/// # Example
///
/// ```no_run
/// use instrument_link::transport::{SerialSettings, SerialTransport, Transport};
/// use std::time::Duration;
///
/// # fn example() -> instrument_link::Result<()> {
/// let mut port = SerialTransport::new(SerialSettings::new("/dev/ttyUSB0")?);
/// port.open()?;
/// port.write(b"*IDN?\n")?;
/// let reply = port.read_until(b"\n", Some(Duration::from_secs(1)))?;
/// port.close()?;
/// # Ok(())
/// # }
/// ```
pub struct SerialTransport {
    settings: SerialSettings,
    opener: SerialOpener,
    link: Link<Box<dyn SerialLine>>,
    buffer: RxBuffer,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("settings", &self.settings)
            .field("state", &self.link.state())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl SerialTransport {
    /// Create a transport that opens a real serial port
    pub fn new(settings: SerialSettings) -> Self {
        Self::with_opener(settings, Box::new(open_port))
    }

    /// Create a transport whose line is produced by `opener` on `open()`
    pub fn with_opener(settings: SerialSettings, opener: SerialOpener) -> Self {
        Self {
            settings,
            opener,
            link: Link::default(),
            buffer: RxBuffer::new(),
        }
    }

    /// Validate descriptor parameters and create the transport
    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self::new(SerialSettings::from_params(params)?))
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn source(&mut self, operation: &'static str) -> Result<(LineSource<'_>, &mut RxBuffer)> {
        let device = &self.settings.device;
        let line = self.link.handle(operation)?;
        Ok((
            LineSource {
                line: line.as_mut(),
                device,
            },
            &mut self.buffer,
        ))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        self.link.ensure_idle()?;
        debug!(device = %self.settings.device, baud = self.settings.baud_rate, "Opening serial port");
        let line = (self.opener)(&self.settings)?;
        self.link.establish(line)
    }

    fn close(&mut self) -> Result<()> {
        let line = self.link.shutdown()?;
        drop(line);
        self.buffer.clear();
        debug!(device = %self.settings.device, "Serial port closed");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let device = &self.settings.device;
        self.link
            .handle("write")?
            .write_all(data)
            .map_err(|e| Error::medium(format!("Cannot write to {}", device), e))
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
