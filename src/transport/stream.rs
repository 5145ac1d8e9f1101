//! Buffered byte-stream reads over partial-delivery media
//!
//! Serial ports and TCP sockets hand back whatever happens to be available.
//! [`fill`] turns that into the two supported consumption patterns (exactly
//! N bytes, or up to a terminator) by accumulating into an [`RxBuffer`]
//! until the request is satisfied, the deadline expires, or the peer closes.
//!
//! Bytes in the buffer are never dropped by a failed read. They are only
//! removed when delivered, by [`fill_or_partial`] handing them out, or by an
//! explicit discard.

use super::deadline::{Deadline, Wait};
use crate::constants::{READ_CHUNK_SIZE, RX_BUFFER_CAPACITY};
use crate::error::{Error, Request, Result};
use bytes::{Bytes, BytesMut};
use std::time::Duration;

/// Bytes received from the medium but not yet delivered
#[derive(Debug)]
pub struct RxBuffer {
    bytes: BytesMut,
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RxBuffer {
    pub fn new() -> Self {
        Self {
            bytes: BytesMut::with_capacity(RX_BUFFER_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Remove and return the first `n` bytes
    pub fn take(&mut self, n: usize) -> Bytes {
        self.bytes.split_to(n).freeze()
    }

    /// Remove and return everything buffered
    pub fn take_all(&mut self) -> Bytes {
        self.bytes.split().freeze()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Length of the prefix ending with the first `terminator`, if present
    pub fn find(&self, terminator: &[u8]) -> Option<usize> {
        if terminator.is_empty() {
            return Some(0);
        }
        self.bytes
            .windows(terminator.len())
            .position(|w| w == terminator)
            .map(|pos| pos + terminator.len())
    }
}

/// What a read is waiting for
#[derive(Debug, Clone, Copy)]
pub(crate) enum Want<'a> {
    Exact(usize),
    Until(&'a [u8]),
}

impl Want<'_> {
    /// Number of bytes to deliver if the buffer already satisfies the request
    pub fn ready(&self, buffer: &RxBuffer) -> Option<usize> {
        match *self {
            Want::Exact(n) => (buffer.len() >= n).then_some(n),
            Want::Until(terminator) => buffer.find(terminator),
        }
    }

    /// Upper bound for the next receive
    fn chunk_len(&self, buffered: usize) -> usize {
        match *self {
            Want::Exact(n) => n.saturating_sub(buffered).clamp(1, READ_CHUNK_SIZE),
            Want::Until(_) => READ_CHUNK_SIZE,
        }
    }

    pub fn request(&self) -> Request {
        match *self {
            Want::Exact(len) => Request::Read { len },
            Want::Until(terminator) => Request::ReadUntil {
                terminator: terminator.to_vec(),
            },
        }
    }
}

/// Outcome of one receive attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Received {
    /// This many bytes were written to the front of the chunk
    Data(usize),
    /// Nothing arrived during the allowed wait
    Idle,
    /// The peer closed; nothing more will ever arrive
    Closed,
}

/// A medium that delivers bytes in arbitrary partial chunks
pub(crate) trait ByteSource {
    /// Receive up to `chunk.len()` bytes, blocking no longer than `wait`
    fn receive(&mut self, chunk: &mut [u8], wait: Wait) -> Result<Received>;

    /// Throw away whatever the medium has queued, without waiting
    fn drain(&mut self) -> Result<()>;
}

/// Read from `source` into `buffer` until `want` is satisfied
///
/// The request is checked after every receive and only then is the deadline
/// evaluated, so data arriving on the last attempt is never reported as a
/// timeout.
pub(crate) fn fill<S: ByteSource + ?Sized>(
    buffer: &mut RxBuffer,
    source: &mut S,
    want: Want<'_>,
    timeout: Option<Duration>,
) -> Result<Bytes> {
    let deadline = Deadline::start(timeout);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut attempted = false;

    loop {
        if let Some(n) = want.ready(buffer) {
            return Ok(buffer.take(n));
        }
        if attempted && deadline.expired() {
            return Err(Error::Timeout {
                operation: want.request(),
                received: buffer.len(),
            });
        }
        attempted = true;

        let len = want.chunk_len(buffer.len());
        match source.receive(&mut chunk[..len], deadline.wait())? {
            Received::Data(n) => buffer.extend(&chunk[..n]),
            Received::Idle => {}
            Received::Closed => {
                return Err(Error::EndOfInput {
                    operation: want.request(),
                    received: buffer.len(),
                })
            }
        }
    }
}

/// `fill` for exactly `n` bytes, handing out partial data instead of failing
///
/// On timeout the partial buffer is returned (possibly empty) and cleared.
/// On closure the remainder is returned once; only a closure with nothing
/// buffered is still an error.
pub(crate) fn fill_or_partial<S: ByteSource + ?Sized>(
    buffer: &mut RxBuffer,
    source: &mut S,
    n: usize,
    timeout: Option<Duration>,
) -> Result<Bytes> {
    match fill(buffer, source, Want::Exact(n), timeout) {
        Err(Error::Timeout { .. }) => Ok(buffer.take_all()),
        Err(Error::EndOfInput { .. }) if !buffer.is_empty() => Ok(buffer.take_all()),
        other => other,
    }
}

/// Drop the software buffer and everything immediately available
pub(crate) fn discard<S: ByteSource + ?Sized>(buffer: &mut RxBuffer, source: &mut S) -> Result<()> {
    buffer.clear();
    source.drain()
}
