//! Descriptor-driven transport construction
//!
//! [`TransportFactory::create`] reads the interface name from a descriptor,
//! parses the rest against that interface's parameters, validates them and
//! returns a transport that has not been opened yet.
//!
//! Serial and TCP transports are built into the crate. USBTMC, VXI-11 and
//! GPIB need a [`MessageBackend`] registered on the factory by the caller.

use crate::descriptor::{self, Defaults, Interface};
use crate::error::{Error, Result};
use crate::transport::message::GpibSettings;
use crate::transport::{
    LinkState, MessageBackend, MessageTarget, MessageTransport, SerialTransport, TcpTransport,
    Transport,
};
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Any transport the factory can build
#[derive(Debug)]
pub enum AnyTransport {
    Serial(SerialTransport),
    Tcp(TcpTransport),
    Usbtmc(MessageTransport),
    Vxi11(MessageTransport),
    Gpib(MessageTransport),
}

impl AnyTransport {
    /// Interface name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serial(_) => "serial",
            Self::Tcp(_) => "tcp",
            Self::Usbtmc(_) => "usbtmc",
            Self::Vxi11(_) => "vxi11",
            Self::Gpib(_) => "gpib",
        }
    }

    fn inner(&mut self) -> &mut dyn Transport {
        match self {
            Self::Serial(t) => t,
            Self::Tcp(t) => t,
            Self::Usbtmc(t) | Self::Vxi11(t) | Self::Gpib(t) => t,
        }
    }
}

impl Transport for AnyTransport {
    fn open(&mut self) -> Result<()> {
        self.inner().open()
    }

    fn close(&mut self) -> Result<()> {
        self.inner().close()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner().write(data)
    }

    fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes> {
        self.inner().read(n, timeout)
    }

    fn read_until(&mut self, terminator: &[u8], timeout: Option<Duration>) -> Result<Bytes> {
        self.inner().read_until(terminator, timeout)
    }

    fn read_until_timeout(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes> {
        self.inner().read_until_timeout(n, timeout)
    }

    fn discard_read(&mut self) -> Result<()> {
        self.inner().discard_read()
    }

    fn state(&self) -> LinkState {
        match self {
            Self::Serial(t) => t.state(),
            Self::Tcp(t) => t.state(),
            Self::Usbtmc(t) | Self::Vxi11(t) | Self::Gpib(t) => t.state(),
        }
    }
}

/// Builds transports from descriptors, holding the message backends
#[derive(Clone, Default)]
pub struct TransportFactory {
    usbtmc: Option<Arc<dyn MessageBackend>>,
    vxi11: Option<Arc<dyn MessageBackend>>,
    gpib: Option<Arc<dyn MessageBackend>>,
}

impl fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFactory")
            .field("usbtmc", &self.usbtmc.is_some())
            .field("vxi11", &self.vxi11.is_some())
            .field("gpib", &self.gpib.is_some())
            .finish()
    }
}

impl TransportFactory {
    /// Factory for serial and TCP only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_usbtmc(mut self, backend: Arc<dyn MessageBackend>) -> Self {
        self.usbtmc = Some(backend);
        self
    }

    pub fn with_vxi11(mut self, backend: Arc<dyn MessageBackend>) -> Self {
        self.vxi11 = Some(backend);
        self
    }

    pub fn with_gpib(mut self, backend: Arc<dyn MessageBackend>) -> Self {
        self.gpib = Some(backend);
        self
    }

    /// Create an unopened transport from a descriptor
    ///
    /// `defaults` fill parameters the descriptor leaves out and may contain
    /// entries for other interfaces.
    pub fn create(&self, descriptor: &str, defaults: Option<&Defaults>) -> Result<AnyTransport> {
        let (interface, params) = descriptor::parse_any(descriptor, defaults)?;
        debug!(interface = interface.name(), params = params.len(), "Creating transport");

        match interface {
            Interface::Serial => Ok(AnyTransport::Serial(SerialTransport::from_params(&params)?)),
            Interface::Tcp => Ok(AnyTransport::Tcp(TcpTransport::from_params(&params)?)),
            Interface::Usbtmc => {
                let target = MessageTarget::usbtmc_from_params(&params)?;
                let backend = backend(&self.usbtmc, "usbtmc")?;
                Ok(AnyTransport::Usbtmc(MessageTransport::new(target, backend)))
            }
            Interface::Vxi11 => {
                let target = MessageTarget::vxi11_from_params(&params)?;
                let backend = backend(&self.vxi11, "vxi11")?;
                Ok(AnyTransport::Vxi11(MessageTransport::new(target, backend)))
            }
        }
    }

    /// Create an unopened GPIB transport from typed settings
    pub fn create_gpib(&self, settings: GpibSettings) -> Result<AnyTransport> {
        settings.validate()?;
        let backend = backend(&self.gpib, "gpib")?;
        Ok(AnyTransport::Gpib(MessageTransport::new(
            MessageTarget::Gpib(settings),
            backend,
        )))
    }
}

fn backend(slot: &Option<Arc<dyn MessageBackend>>, kind: &str) -> Result<Arc<dyn MessageBackend>> {
    slot.clone().ok_or_else(|| {
        Error::medium(
            format!("Cannot create {} transport", kind),
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no {} backend registered", kind),
            ),
        )
    })
}

/// Create a serial or TCP transport with a backend-less factory
pub fn create(descriptor: &str, defaults: Option<&Defaults>) -> Result<AnyTransport> {
    TransportFactory::new().create(descriptor, defaults)
}
