//! Centralized error types for instrument transports
//!
//! Every transport operation returns `Result<T>`, shorthand for
//! `std::result::Result<T, Error>`. Descriptor parsing has its own
//! [`DescriptorError`] which is wrapped by [`Error::Descriptor`].

use crate::transport::LinkState;
use std::fmt;

/// The operation a transport was performing when it failed
///
/// Carried by timeout and end-of-input errors so callers can log what was
/// being waited for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Open,
    Close,
    Write { len: usize },
    Read { len: usize },
    ReadUntil { terminator: Vec<u8> },
    Discard,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Write { len } => write!(f, "write of {} bytes", len),
            Self::Read { len } => write!(f, "read of {} bytes", len),
            Self::ReadUntil { terminator } => {
                write!(f, "read until {}", escape_bytes(terminator))
            }
            Self::Discard => write!(f, "discard"),
        }
    }
}

/// All transport errors
#[derive(Debug)]
pub enum Error {
    /// Operation attempted in the wrong lifecycle state
    InvalidState {
        operation: &'static str,
        state: LinkState,
    },
    /// A bounded wait expired; `received` bytes remain buffered
    Timeout { operation: Request, received: usize },
    /// The medium closed (or delivered a short message) before the request
    /// could be satisfied
    EndOfInput { operation: Request, received: usize },
    /// Descriptor string or constructor parameters rejected
    Descriptor(DescriptorError),
    /// Unrecoverable failure reported by the underlying resource
    Medium {
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for wrapping an I/O error with context
    pub fn medium(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Medium {
            context: context.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_end_of_input(&self) -> bool {
        matches!(self, Self::EndOfInput { .. })
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Medium { source, .. } => Some(source),
            Self::Descriptor(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { operation, state } => {
                write!(f, "Cannot {} transport in state {}", operation, state)
            }
            Self::Timeout {
                operation,
                received,
            } => write!(
                f,
                "Timeout during {} ({} bytes buffered)",
                operation, received
            ),
            Self::EndOfInput {
                operation,
                received,
            } => write!(
                f,
                "End of input during {} ({} bytes buffered)",
                operation, received
            ),
            Self::Descriptor(e) => write!(f, "Invalid descriptor: {}", e),
            Self::Medium { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl From<DescriptorError> for Error {
    fn from(e: DescriptorError) -> Self {
        Self::Descriptor(e)
    }
}

/// Descriptor parsing and parameter validation failures
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorError {
    /// Fewer than two `:`-separated parts
    TooFewParts { descriptor: String },
    /// A part is neither bare, bracketed, nor `key=value`
    MalformedPart { descriptor: String, part: String },
    /// First part does not name any registered interface
    UnknownInterface { name: String },
    /// First part names a different interface than the parser expected
    InterfaceMismatch { expected: &'static str, found: String },
    /// More positional parts than the interface declares
    TooManyPositionals { interface: &'static str, max: usize },
    /// Keyword not declared by the interface
    UnknownKeyword { interface: &'static str, name: String },
    /// A raw string could not be coerced to the declared type
    InvalidValue {
        name: String,
        expected: &'static str,
        raw: String,
    },
    /// The same parameter given twice
    DuplicateParameter { name: String },
    /// A required parameter was resolved neither from the descriptor nor
    /// from defaults
    MissingParameter { interface: &'static str, name: &'static str },
    /// A well-typed value was rejected by transport validation
    InvalidParameter { name: &'static str, reason: String },
}

impl std::error::Error for DescriptorError {}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewParts { descriptor } => {
                write!(f, "'{}' needs an interface and at least one part", descriptor)
            }
            Self::MalformedPart { descriptor, part } => {
                write!(f, "malformed part '{}' in '{}'", part, descriptor)
            }
            Self::UnknownInterface { name } => write!(f, "unknown interface '{}'", name),
            Self::InterfaceMismatch { expected, found } => {
                write!(f, "expected interface '{}', found '{}'", expected, found)
            }
            Self::TooManyPositionals { interface, max } => write!(
                f,
                "{} accepts at most {} positional parameters",
                interface, max
            ),
            Self::UnknownKeyword { interface, name } => {
                write!(f, "{} has no parameter '{}'", interface, name)
            }
            Self::InvalidValue {
                name,
                expected,
                raw,
            } => write!(f, "parameter '{}' expects {}, got '{}'", name, expected, raw),
            Self::DuplicateParameter { name } => {
                write!(f, "parameter '{}' given more than once", name)
            }
            Self::MissingParameter { interface, name } => {
                write!(f, "{} requires parameter '{}'", interface, name)
            }
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid {}: {}", name, reason)
            }
        }
    }
}

/// Alias for Result with the transport Error
pub type Result<T> = std::result::Result<T, Error>;

/// Render bytes for messages, escaping anything non-printable
pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        out.extend(std::ascii::escape_default(b).map(char::from));
    }
    out.push('"');
    out
}
