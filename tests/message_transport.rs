//! Integration tests for message-oriented transports
//!
//! A scripted backend stands in for USBTMC / VXI-11 / GPIB bindings and
//! records what the adapter asks of it.

use instrument_link::transport::message::GpibSettings;
use instrument_link::transport::{MessageBackend, MessageDevice, MessageError, MessageTarget};
use instrument_link::{Error, LinkState, Request, Transport, TransportFactory};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Mock backend
// =============================================================================

/// What the device will answer to successive `receive` calls
enum Reply {
    Message(&'static [u8]),
    Timeout,
    Broken,
}

#[derive(Default)]
struct DeviceLog {
    connected: Vec<(MessageTarget, Duration)>,
    sent: Vec<(Vec<u8>, Duration)>,
    receive_timeouts: Vec<Duration>,
    discards: usize,
    closes: usize,
}

struct Shared {
    replies: Mutex<VecDeque<Reply>>,
    log: Mutex<DeviceLog>,
    refuse: bool,
}

#[derive(Clone)]
struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            shared: Arc::new(Shared {
                replies: Mutex::new(replies.into()),
                log: Mutex::new(DeviceLog::default()),
                refuse: false,
            }),
        }
    }

    fn refusing() -> Self {
        Self {
            shared: Arc::new(Shared {
                replies: Mutex::new(VecDeque::new()),
                log: Mutex::new(DeviceLog::default()),
                refuse: true,
            }),
        }
    }
}

struct MockDevice {
    shared: Arc<Shared>,
}

impl MessageBackend for MockBackend {
    fn connect(
        &self,
        target: &MessageTarget,
        timeout: Duration,
    ) -> Result<Box<dyn MessageDevice>, MessageError> {
        if self.shared.refuse {
            return Err(MessageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such instrument",
            )));
        }
        self.shared.log.lock().connected.push((target.clone(), timeout));
        Ok(Box::new(MockDevice {
            shared: self.shared.clone(),
        }))
    }
}

impl MessageDevice for MockDevice {
    fn send(&mut self, message: &[u8], timeout: Duration) -> Result<(), MessageError> {
        self.shared.log.lock().sent.push((message.to_vec(), timeout));
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, MessageError> {
        self.shared.log.lock().receive_timeouts.push(timeout);
        match self.shared.replies.lock().pop_front() {
            Some(Reply::Message(m)) => Ok(m.to_vec()),
            Some(Reply::Broken) => Err(MessageError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "link lost",
            ))),
            Some(Reply::Timeout) | None => Err(MessageError::Timeout),
        }
    }

    fn discard_pending(&mut self) -> Result<(), MessageError> {
        self.shared.log.lock().discards += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), MessageError> {
        self.shared.log.lock().closes += 1;
        Ok(())
    }
}

fn usbtmc(backend: &MockBackend) -> instrument_link::AnyTransport {
    let mut t = TransportFactory::new()
        .with_usbtmc(Arc::new(backend.clone()))
        .create("usbtmc:vendorid=0x0957:serialnr=MY5001", None)
        .unwrap();
    t.open().unwrap();
    t
}

// =============================================================================
// Adapter rules
// =============================================================================

#[test]
fn test_write_sends_one_message() {
    let backend = MockBackend::new(vec![]);
    let mut t = usbtmc(&backend);

    t.write(b"*RST").unwrap();
    t.write(b"*IDN?").unwrap();

    let log = backend.shared.log.lock();
    assert_eq!(log.sent.len(), 2);
    assert_eq!(log.sent[1].0, b"*IDN?");
    assert_eq!(
        log.connected[0].0,
        MessageTarget::Usbtmc {
            vendor_id: Some(0x0957),
            product_id: None,
            serial_nr: "MY5001".into(),
        }
    );
}

#[test]
fn test_read_keeps_surplus_of_message() {
    let backend = MockBackend::new(vec![Reply::Message(b"hello")]);
    let mut t = usbtmc(&backend);

    assert_eq!(&t.read(2, None).unwrap()[..], b"he");
    // Served from the buffer, no second fetch
    assert_eq!(&t.read(3, None).unwrap()[..], b"llo");
    assert_eq!(backend.shared.log.lock().receive_timeouts.len(), 1);
}

#[test]
fn test_short_message_is_end_of_input() {
    let backend = MockBackend::new(vec![Reply::Message(b"hi")]);
    let mut t = usbtmc(&backend);

    let err = t.read(5, None).unwrap_err();
    match err {
        Error::EndOfInput {
            operation,
            received,
        } => {
            assert_eq!(operation, Request::Read { len: 5 });
            assert_eq!(received, 2);
        }
        other => panic!("expected end of input, got {}", other),
    }
    // The short message stays available
    assert_eq!(&t.read_until(b"\n", None).unwrap()[..], b"hi");
}

#[test]
fn test_read_until_ignores_terminator() {
    let backend = MockBackend::new(vec![Reply::Message(b"+4.99E-01"), Reply::Message(b"OK")]);
    let mut t = usbtmc(&backend);

    assert_eq!(&t.read_until(b"\n", None).unwrap()[..], b"+4.99E-01");
    assert_eq!(&t.read_until(b"\r\n", None).unwrap()[..], b"OK");
}

#[test]
fn test_read_until_delivers_buffered_rest_first() {
    let backend = MockBackend::new(vec![Reply::Message(b"#15abcde")]);
    let mut t = usbtmc(&backend);

    assert_eq!(&t.read(3, None).unwrap()[..], b"#15");
    assert_eq!(&t.read_until(b"\n", None).unwrap()[..], b"abcde");
    assert_eq!(backend.shared.log.lock().receive_timeouts.len(), 1);
}

#[test]
fn test_medium_timeout_maps_to_timeout() {
    let backend = MockBackend::new(vec![Reply::Timeout]);
    let mut t = usbtmc(&backend);

    let err = t.read_until(b"\n", Some(Duration::from_millis(250))).unwrap_err();
    assert!(matches!(
        err,
        Error::Timeout {
            operation: Request::ReadUntil { .. },
            received: 0
        }
    ));
    assert_eq!(
        backend.shared.log.lock().receive_timeouts,
        vec![Duration::from_millis(250)]
    );
}

#[test]
fn test_default_timeout_substituted() {
    let backend = MockBackend::new(vec![Reply::Message(b"1")]);
    let mut t = usbtmc(&backend);

    t.write(b"MEAS?").unwrap();
    t.read(1, None).unwrap();

    let log = backend.shared.log.lock();
    assert_eq!(log.connected[0].1, Duration::from_secs(5));
    assert_eq!(log.sent[0].1, Duration::from_secs(5));
    assert_eq!(log.receive_timeouts, vec![Duration::from_secs(5)]);
}

#[test]
fn test_medium_failure_is_medium_error() {
    let backend = MockBackend::new(vec![Reply::Broken]);
    let mut t = usbtmc(&backend);

    let err = t.read(1, None).unwrap_err();
    assert!(matches!(err, Error::Medium { .. }), "got {}", err);
}

#[test]
fn test_read_until_timeout_collects_messages() {
    let backend = MockBackend::new(vec![
        Reply::Message(b"ab"),
        Reply::Message(b"cd"),
        Reply::Timeout,
    ]);
    let mut t = usbtmc(&backend);

    assert_eq!(
        &t.read_until_timeout(3, Some(Duration::from_secs(1))).unwrap()[..],
        b"abc"
    );
    assert_eq!(
        &t.read_until_timeout(3, Some(Duration::from_secs(1))).unwrap()[..],
        b"d"
    );
    assert!(t
        .read_until_timeout(3, Some(Duration::from_millis(10)))
        .unwrap()
        .is_empty());
}

#[test]
fn test_zero_timeout_checks_queued_message() {
    let backend = MockBackend::new(vec![Reply::Message(b"ready")]);
    let mut t = usbtmc(&backend);

    assert_eq!(
        &t.read_until_timeout(10, Some(Duration::ZERO)).unwrap()[..],
        b"ready"
    );
    assert_eq!(
        backend.shared.log.lock().receive_timeouts,
        vec![Duration::ZERO]
    );

    // Nothing queued: one check, empty result
    assert!(t
        .read_until_timeout(10, Some(Duration::ZERO))
        .unwrap()
        .is_empty());
    assert_eq!(backend.shared.log.lock().receive_timeouts.len(), 2);
}

#[test]
fn test_discard_clears_buffer_and_device() {
    let backend = MockBackend::new(vec![Reply::Message(b"stale"), Reply::Message(b"new")]);
    let mut t = usbtmc(&backend);

    t.read(1, None).unwrap();
    t.discard_read().unwrap();
    t.discard_read().unwrap();
    assert_eq!(backend.shared.log.lock().discards, 2);

    assert_eq!(&t.read_until(b"\n", None).unwrap()[..], b"new");
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_close_releases_device() {
    let backend = MockBackend::new(vec![]);
    let mut t = usbtmc(&backend);

    t.close().unwrap();
    assert_eq!(backend.shared.log.lock().closes, 1);
    assert_eq!(t.state(), LinkState::Closed);
    assert!(matches!(t.write(b"x").unwrap_err(), Error::InvalidState { .. }));
    assert!(t.open().is_err());

    // Already released, dropping must not close again
    drop(t);
    assert_eq!(backend.shared.log.lock().closes, 1);
}

#[test]
fn test_drop_releases_open_device() {
    let backend = MockBackend::new(vec![]);
    let t = usbtmc(&backend);
    assert_eq!(backend.shared.log.lock().closes, 0);

    drop(t);
    assert_eq!(backend.shared.log.lock().closes, 1);
}

#[test]
fn test_failed_open_can_be_retried() {
    let factory = TransportFactory::new().with_vxi11(Arc::new(MockBackend::refusing()));
    let mut t = factory.create("vxi11:192.0.2.44:name=gpib0,7", None).unwrap();

    let err = t.open().unwrap_err();
    assert!(matches!(err, Error::Medium { .. }));
    assert_eq!(t.state(), LinkState::Idle);
    assert!(t.open().is_err());
    assert_eq!(t.state(), LinkState::Idle);
}

#[test]
fn test_gpib_uses_configured_timeout() {
    let backend = MockBackend::new(vec![Reply::Message(b"READY")]);
    let settings = GpibSettings {
        board: 0,
        primary: 14,
        secondary: None,
        timeout: Duration::from_millis(1200),
    };
    let mut t = TransportFactory::new()
        .with_gpib(Arc::new(backend.clone()))
        .create_gpib(settings)
        .unwrap();
    t.open().unwrap();

    assert_eq!(&t.read_until(b"", None).unwrap()[..], b"READY");
    let log = backend.shared.log.lock();
    assert_eq!(log.connected[0].1, Duration::from_millis(1200));
    assert_eq!(log.receive_timeouts, vec![Duration::from_millis(1200)]);
}
