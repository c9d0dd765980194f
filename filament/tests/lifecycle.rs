//! Socket lifecycle and the statistics tree.

use std::time::{Duration, Instant};

use filament::{Message, Pattern, Socket, StatCursor};

fn leaf_of(socket: &Socket, name: &str) -> u64 {
    filament::stats_snapshot()
        .find(&format!("socket.{}", socket.id()))
        .and_then(|s| s.find(name))
        .map_or(0, |n| n.value())
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn close_releases_pipes_and_endpoints() {
    filament::dev_tracing::init_tracing();

    let a = Socket::open(Pattern::Pair0).unwrap();
    let b = Socket::open(Pattern::Pair0).unwrap();
    a.listen("inproc://lifecycle-leak").unwrap();
    b.dial("inproc://lifecycle-leak").unwrap();

    b.send(Message::from_slice(b"alive").unwrap()).unwrap();
    assert_eq!(a.recv().unwrap().body(), b"alive");

    assert_eq!(leaf_of(&a, "pipes"), 1);
    assert_eq!(leaf_of(&a, "endpoints"), 1);
    assert_eq!(leaf_of(&a, "tx-msgs"), 0);
    assert_eq!(leaf_of(&a, "rx-msgs"), 1);
    assert_eq!(leaf_of(&b, "tx-msgs"), 1);

    a.close();
    b.close();

    // Close detaches synchronously; nothing should linger.
    assert_eq!(leaf_of(&a, "pipes"), 0);
    assert_eq!(leaf_of(&a, "endpoints"), 0);
    assert_eq!(leaf_of(&b, "pipes"), 0);
    assert_eq!(leaf_of(&b, "endpoints"), 0);
}

#[test]
fn byte_counters_track_traffic() {
    let a = Socket::open(Pattern::Pair0).unwrap();
    let b = Socket::open(Pattern::Pair0).unwrap();
    a.listen("inproc://lifecycle-bytes").unwrap();
    b.dial("inproc://lifecycle-bytes").unwrap();

    b.send(Message::from_slice(&[0u8; 100]).unwrap()).unwrap();
    assert_eq!(a.recv().unwrap().body().len(), 100);

    assert_eq!(leaf_of(&b, "tx-bytes"), 100);
    wait_until("rx byte counter", || leaf_of(&a, "rx-bytes") == 100);

    a.close();
    b.close();
}

#[test]
fn cursor_walks_the_whole_tree() {
    let s = Socket::open(Pattern::Bus0).unwrap();

    let mut cursor = StatCursor::new(filament::stats_snapshot());
    assert!(cursor.next());
    assert_eq!(cursor.name(), Some("filament"));

    let mut names = Vec::new();
    while cursor.next() {
        if let Some(n) = cursor.name() {
            names.push(n.to_string());
        }
    }
    let branch = format!("socket.{}", s.id());
    assert!(names.iter().any(|n| n == &branch), "missing {branch}");
    assert!(names.iter().any(|n| n == "pipes"));

    // Rewind restarts the same snapshot from the top.
    cursor.rewind();
    assert!(cursor.next());
    assert_eq!(cursor.name(), Some("filament"));

    s.close();
}

#[test]
fn operations_on_a_closed_socket_fail_closed() {
    let s = Socket::open(Pattern::Pair0).unwrap();
    s.close();
    assert!(s.is_closed());
    assert_eq!(
        s.send(Message::from_slice(b"late").unwrap()).unwrap_err(),
        filament::Error::Closed
    );
    assert_eq!(s.recv().unwrap_err(), filament::Error::Closed);
    assert!(matches!(
        s.listen("inproc://lifecycle-late"),
        Err(filament::Error::Closed)
    ));
    // Closing twice is fine.
    s.close();
}
