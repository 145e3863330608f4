//! Integration tests for the multiplexed connection loop over real Unix and
//! loopback TCP sockets.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::Once;
use std::time::{Duration, Instant};

use orrery::link::{
    ConnectionError, ConnectionLoop, Handle, LinkHandler, Outbox, PollSelector, Readiness,
    Selector, TcpConnector, Watch,
};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        orrery::init_tracing();
    });
}

/// Wraps the poll backend and counts readiness checks.
#[derive(Default)]
struct CountingSelector {
    calls: usize,
    fail_next: bool,
}

impl Selector for CountingSelector {
    fn select(&mut self, watches: &[Watch<'_>], ready: &mut [Readiness]) -> io::Result<usize> {
        self.calls += 1;
        if std::mem::take(&mut self.fail_next) {
            return Err(io::Error::from_raw_os_error(4));
        }
        PollSelector.select(watches, ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connected(u16),
    Read(u16, Vec<u8>),
    Disconnected(u16, String),
}

/// Records every callback into a log shared by all connections.
struct Recorder {
    log: Rc<RefCell<Vec<Event>>>,
}

impl LinkHandler for Recorder {
    fn on_connected(&mut self, handle: Handle, _outbox: &mut Outbox) {
        self.log.borrow_mut().push(Event::Connected(handle.as_u16()));
    }

    fn on_readable(
        &mut self,
        handle: Handle,
        bytes: &[u8],
        outbox: &mut Outbox,
    ) -> Result<(), ConnectionError> {
        self.log
            .borrow_mut()
            .push(Event::Read(handle.as_u16(), bytes.to_vec()));
        if bytes == b"ping" {
            outbox.push(b"pong");
        }
        Ok(())
    }

    fn on_disconnect(&mut self, handle: Handle, error: &ConnectionError) {
        self.log
            .borrow_mut()
            .push(Event::Disconnected(handle.as_u16(), error.to_string()));
    }
}

type TestLoop = ConnectionLoop<Recorder, TcpConnector, CountingSelector>;

fn new_loop() -> (TestLoop, Rc<RefCell<Vec<Event>>>) {
    (
        ConnectionLoop::with_parts(TcpConnector, CountingSelector::default()),
        Rc::new(RefCell::new(Vec::new())),
    )
}

fn recorder(log: &Rc<RefCell<Vec<Event>>>) -> Recorder {
    Recorder {
        log: Rc::clone(log),
    }
}

fn attach_pair(link: &mut TestLoop, log: &Rc<RefCell<Vec<Event>>>) -> (Handle, UnixStream) {
    let (local, remote) = UnixStream::pair().unwrap();
    local.set_nonblocking(true).unwrap();
    let handle = link.attach(local, recorder(log)).unwrap();
    (handle, remote)
}

fn reads(log: &Rc<RefCell<Vec<Event>>>) -> Vec<u16> {
    log.borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Read(h, _) => Some(*h),
            _ => None,
        })
        .collect()
}

fn tick_until(link: &mut TestLoop, mut done: impl FnMut(&TestLoop) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(link) {
        assert!(Instant::now() < deadline, "condition never reached");
        link.tick().unwrap();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn empty_table_makes_no_readiness_check() {
    init_test_tracing();
    let (mut link, _) = new_loop();
    for _ in 0..3 {
        assert_eq!(link.tick().unwrap(), 0);
    }
    assert_eq!(link.selector().calls, 0);
}

#[test]
fn idle_connections_cost_one_check_per_tick() {
    init_test_tracing();
    let (mut link, log) = new_loop();
    let _a = attach_pair(&mut link, &log);
    let _b = attach_pair(&mut link, &log);

    assert_eq!(link.tick().unwrap(), 0);
    assert_eq!(link.tick().unwrap(), 0);
    assert_eq!(link.selector().calls, 2);
    assert!(reads(&log).is_empty());
}

#[test]
fn ready_connections_dispatch_in_ascending_handle_order() {
    init_test_tracing();
    let (mut link, log) = new_loop();
    let (h0, _r0) = attach_pair(&mut link, &log);
    let (h1, mut r1) = attach_pair(&mut link, &log);
    let (h2, mut r2) = attach_pair(&mut link, &log);
    assert_eq!([h0, h1, h2].map(Handle::as_u16), [0, 1, 2]);

    // write to 2 first so arrival order differs from handle order
    r2.write_all(b"two").unwrap();
    r1.write_all(b"one").unwrap();

    assert_eq!(link.tick().unwrap(), 2);
    assert_eq!(reads(&log), vec![1, 2]);
    assert_eq!(link.selector().calls, 1);
}

#[test]
fn replies_leave_on_a_later_tick() {
    init_test_tracing();
    let (mut link, log) = new_loop();
    let (handle, mut remote) = attach_pair(&mut link, &log);

    remote.write_all(b"ping").unwrap();
    link.tick().unwrap();
    assert_eq!(link.connection(handle).unwrap().outbox().len(), 4);

    link.tick().unwrap();
    assert!(link.connection(handle).unwrap().outbox().is_empty());
    let mut reply = [0u8; 4];
    remote.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"pong");
}

#[test]
fn peer_close_disconnects_only_that_connection() {
    init_test_tracing();
    let (mut link, log) = new_loop();
    let (h0, r0) = attach_pair(&mut link, &log);
    let (h1, mut r1) = attach_pair(&mut link, &log);

    drop(r0);
    r1.write_all(b"still here").unwrap();
    assert_eq!(link.tick().unwrap(), 2);

    assert!(!link.contains(h0));
    assert!(link.contains(h1));
    let log = log.borrow();
    assert!(log.contains(&Event::Disconnected(0, "connection closed by peer".into())));
    assert!(log.contains(&Event::Read(1, b"still here".to_vec())));
}

#[test]
fn failed_readiness_check_aborts_tick() {
    init_test_tracing();
    let (mut link, log) = new_loop();
    let (handle, mut remote) = attach_pair(&mut link, &log);
    remote.write_all(b"x").unwrap();

    link.selector_mut().fail_next = true;
    assert!(matches!(link.tick(), Err(ConnectionError::Poll(_))));
    assert!(link.contains(handle));
    assert!(reads(&log).is_empty());

    assert_eq!(link.tick().unwrap(), 1);
    assert_eq!(reads(&log), vec![0]);
}

#[test]
fn tcp_connect_and_handle_reuse() {
    init_test_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (mut link, log) = new_loop();

    let h = link.connect("127.0.0.1", port, recorder(&log)).unwrap();
    assert_eq!(h.as_u16(), 0);
    let (mut server, _) = listener.accept().unwrap();
    tick_until(&mut link, |l| l.connection(h).is_some_and(|c| c.is_established()));
    assert!(log.borrow().contains(&Event::Connected(0)));

    link.send(h, b"hello").unwrap();
    link.tick().unwrap();
    let mut buf = [0u8; 5];
    server.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    assert!(link.disconnect(h).is_some());
    assert!(link.disconnect(h).is_none());
    assert!(link.is_empty());
    assert!(matches!(link.send(h, b"x"), Err(ConnectionError::UnknownHandle(_))));

    let again = link.connect("127.0.0.1", port, recorder(&log)).unwrap();
    assert_eq!(again, h);
}

#[test]
fn refused_connect_is_reported_through_the_handler() {
    init_test_tracing();
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let (mut link, log) = new_loop();

    // loopback may refuse synchronously or only on a later readiness check
    match link.connect("127.0.0.1", port, recorder(&log)) {
        Ok(h) => {
            tick_until(&mut link, |l| !l.contains(h));
            let log = log.borrow();
            assert!(matches!(log.last(), Some(Event::Disconnected(0, _))));
            assert!(!log.contains(&Event::Connected(0)));
        }
        Err(err) => {
            assert!(matches!(err, ConnectionError::Connect { .. }));
            assert!(link.is_empty());
        }
    }
}

#[test]
fn unresolvable_host_fails_synchronously() {
    init_test_tracing();
    let (mut link, log) = new_loop();
    let err = link
        .connect("no such host.invalid", 1, recorder(&log))
        .unwrap_err();
    assert!(matches!(err, ConnectionError::Resolve { .. }));
    assert!(link.is_empty());
}
