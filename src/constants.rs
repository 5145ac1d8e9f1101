//! Library-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

use std::time::Duration;

// =============================================================================
// Serial
// =============================================================================

/// Fixed low-level read timeout programmed into serial ports
///
/// High-level read timeouts are composed of repeated reads of this length,
/// so reprogramming the port (slow, may drop data) is never needed.
pub const SERIAL_READ_STEP: Duration = Duration::from_millis(20);

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Highest baud rate accepted by validation
pub const MAX_BAUD_RATE: u32 = 4_000_000;

// =============================================================================
// Network
// =============================================================================

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default VXI-11 device name
pub const DEFAULT_VXI11_DEVICE: &str = "inst0";

// =============================================================================
// Message-oriented media
// =============================================================================

/// Timeout substituted when a caller passes none to a message-based medium
pub const MESSAGE_DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Buffers
// =============================================================================

/// Receive chunk size for terminator-driven reads
pub const READ_CHUNK_SIZE: usize = 4096;

/// Initial capacity of the per-transport receive buffer
pub const RX_BUFFER_CAPACITY: usize = 1024;
