//! Instrument Link - uniform byte-stream transports for lab instruments
//!
//! Instrument drivers talk to their hardware through a single contract,
//! whatever the medium:
//! - **serial**: RS-232 / USB-serial adapters
//! - **tcp**: raw sockets (SCPI on port 5025, bridges, terminal servers)
//! - **usbtmc / vxi11 / gpib**: message-oriented media behind caller-supplied
//!   backends
//!
//! Transports are created from descriptor strings such as
//! `tcp:192.168.1.50:5025` or `serial:/dev/ttyUSB0:baudrate=115200`.
//!
//! ```no_run
//! use instrument_link::{factory, Transport};
//! use std::time::Duration;
//!
//! # fn example() -> instrument_link::Result<()> {
//! let mut psu = factory::create("serial:/dev/ttyUSB0:baudrate=115200", None)?;
//! psu.open()?;
//! psu.write(b"*IDN?\n")?;
//! let idn = psu.read_until(b"\n", Some(Duration::from_secs(1)))?;
//! psu.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod transport;

pub use config::LinkConfig;
pub use descriptor::{Defaults, Interface, ParamValue, Params};
pub use error::{DescriptorError, Error, Request, Result};
pub use factory::{AnyTransport, TransportFactory};
pub use transport::{LinkState, Transport};
