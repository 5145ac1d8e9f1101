//! Transport contract for instrument I/O
//!
//! Separates byte movement from instrument protocols:
//! - **Transport**: how bytes flow (serial, TCP, USBTMC, VXI-11, GPIB)
//! - **Drivers**: what the bytes mean (not handled here)
//!
//! Every transport follows the same lifecycle and read model:
//!
//! 1. Construct with validated settings (no I/O)
//! 2. `open()` acquires the medium
//! 3. `write()` / `read()` / `read_until()` / `read_until_timeout()` /
//!    `discard_read()`
//! 4. `close()` releases the medium; the instance cannot be reopened
//!
//! # Timeouts
//!
//! Blocking reads take `Option<Duration>`: `None` waits forever, zero only
//! looks at data that is already available, anything else bounds the wait.
//! A timed-out read keeps everything it received in the transport's buffer.
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs`
//! 2. Keep the medium handle in a [`Link`]
//! 3. Implement [`Transport`]
//! 4. Add a variant to `AnyTransport` in `factory.rs`

pub mod deadline;
pub mod message;
pub mod serial;
pub mod stream;
pub mod tcp;

pub use message::{
    GpibSettings, MessageBackend, MessageDevice, MessageError, MessageTarget, MessageTransport,
};
pub use serial::{Parity, SerialLine, SerialSettings, SerialTransport, StopBits};
pub use tcp::{TcpSettings, TcpTransport};

use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Lifecycle state visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Constructed, never opened
    Idle,
    /// Medium acquired
    Open,
    /// Closed for good
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Medium handle that only exists while the transport is open
#[derive(Debug)]
pub enum Link<H> {
    Idle,
    Open(H),
    Closed,
}

impl<H> Default for Link<H> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<H> Link<H> {
    pub fn state(&self) -> LinkState {
        match self {
            Self::Idle => LinkState::Idle,
            Self::Open(_) => LinkState::Open,
            Self::Closed => LinkState::Closed,
        }
    }

    /// Fails unless the link was never opened
    pub fn ensure_idle(&self) -> Result<()> {
        match self {
            Self::Idle => Ok(()),
            _ => Err(Error::InvalidState {
                operation: "open",
                state: self.state(),
            }),
        }
    }

    /// Install the handle acquired by a successful open
    pub fn establish(&mut self, handle: H) -> Result<()> {
        self.ensure_idle()?;
        *self = Self::Open(handle);
        Ok(())
    }

    /// Borrow the open handle for `operation`
    pub fn handle(&mut self, operation: &'static str) -> Result<&mut H> {
        match self {
            Self::Open(handle) => Ok(handle),
            _ => Err(Error::InvalidState {
                operation,
                state: self.state(),
            }),
        }
    }

    /// Move to the terminal state, handing back the handle to release
    pub fn shutdown(&mut self) -> Result<H> {
        match std::mem::replace(self, Self::Closed) {
            Self::Open(handle) => Ok(handle),
            previous => {
                let state = previous.state();
                *self = previous;
                Err(Error::InvalidState {
                    operation: "close",
                    state,
                })
            }
        }
    }
}

/// Byte-stream transport to one instrument
///
/// Implementations are not safe for concurrent use; callers sharing a
/// transport between threads must serialize access themselves.
pub trait Transport: Send {
    /// Acquire the medium. Only valid once, on a fresh transport.
    ///
    /// On failure nothing stays acquired and the transport remains idle.
    fn open(&mut self) -> Result<()>;

    /// Release the medium. The transport cannot be reopened.
    fn close(&mut self) -> Result<()>;

    /// Hand all of `data` to the medium
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `n` bytes
    ///
    /// # Errors
    ///
    /// - `Timeout` - deadline expired, received bytes stay buffered
    /// - `EndOfInput` - the peer closed before `n` bytes arrived
    fn read(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes>;

    /// Read up to and including the first `terminator`
    ///
    /// Fails like [`read`](Transport::read); a partial message stays
    /// buffered on timeout.
    fn read_until(&mut self, terminator: &[u8], timeout: Option<Duration>) -> Result<Bytes>;

    /// Read exactly `n` bytes, or whatever arrived before the deadline
    ///
    /// Never fails with `Timeout`: the partial buffer is returned and
    /// cleared instead. After a peer closure the remaining bytes are
    /// returned once; `EndOfInput` is only raised when nothing is left.
    fn read_until_timeout(&mut self, n: usize, timeout: Option<Duration>) -> Result<Bytes>;

    /// Drop buffered input and anything the medium has already queued
    fn discard_read(&mut self) -> Result<()>;

    /// Current lifecycle state
    fn state(&self) -> LinkState;
}
