//! Publish/subscribe topic filtering.

use std::time::{Duration, Instant};

use filament::{keys, Error, Message, OptValue, Pattern, Socket, TimeoutOpt};

/// Publishing is best effort, so wait for the subscriber pipe to attach
/// before sending anything we intend to observe.
fn wait_for_pipes(socket: &Socket, want: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let snap = filament::stats_snapshot();
        let pipes = snap
            .find(&format!("socket.{}", socket.id()))
            .and_then(|s| s.find("pipes"))
            .map_or(0, |n| n.value());
        if pipes >= want {
            return;
        }
        assert!(Instant::now() < deadline, "pipe never attached");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn recv_timeout(socket: &Socket, ms: u32) {
    socket
        .set_option(keys::RECV_TIMEOUT, OptValue::Ms(TimeoutOpt::Millis(ms)))
        .unwrap();
}

#[test]
fn only_subscribed_prefixes_are_delivered() {
    filament::dev_tracing::init_tracing();

    let publ = Socket::open(Pattern::Pub0).unwrap();
    publ.listen("inproc://pubsub-filter").unwrap();
    let sub = Socket::open(Pattern::Sub0).unwrap();
    sub.subscribe(b"alpha/").unwrap();
    recv_timeout(&sub, 2000);
    sub.dial("inproc://pubsub-filter").unwrap();
    wait_for_pipes(&publ, 1);

    for topic in ["alpha/one", "beta/one", "alpha/two"] {
        publ.send(Message::from_slice(topic.as_bytes()).unwrap())
            .unwrap();
    }

    // Non-matching traffic is filtered out; order among matches holds.
    assert_eq!(sub.recv().unwrap().body(), b"alpha/one");
    assert_eq!(sub.recv().unwrap().body(), b"alpha/two");

    publ.close();
    sub.close();
}

#[test]
fn unsubscribe_stops_delivery() {
    let publ = Socket::open(Pattern::Pub0).unwrap();
    publ.listen("inproc://pubsub-unsub").unwrap();
    let sub = Socket::open(Pattern::Sub0).unwrap();
    sub.subscribe(b"news/").unwrap();
    sub.subscribe(b"sport/").unwrap();
    recv_timeout(&sub, 200);
    sub.dial("inproc://pubsub-unsub").unwrap();
    wait_for_pipes(&publ, 1);

    sub.unsubscribe(b"news/").unwrap();
    publ.send(Message::from_slice(b"news/flash").unwrap()).unwrap();
    publ.send(Message::from_slice(b"sport/score").unwrap())
        .unwrap();

    assert_eq!(sub.recv().unwrap().body(), b"sport/score");
    assert_eq!(sub.recv().unwrap_err(), Error::Timeout);

    publ.close();
    sub.close();
}

#[test]
fn empty_subscription_matches_everything() {
    let publ = Socket::open(Pattern::Pub0).unwrap();
    publ.listen("inproc://pubsub-all").unwrap();
    let sub = Socket::open(Pattern::Sub0).unwrap();
    sub.subscribe(b"").unwrap();
    recv_timeout(&sub, 2000);
    sub.dial("inproc://pubsub-all").unwrap();
    wait_for_pipes(&publ, 1);

    publ.send(Message::from_slice(b"anything").unwrap()).unwrap();
    assert_eq!(sub.recv().unwrap().body(), b"anything");

    publ.close();
    sub.close();
}

#[test]
fn unsubscribing_an_unknown_prefix_fails() {
    let sub = Socket::open(Pattern::Sub0).unwrap();
    assert_eq!(sub.unsubscribe(b"never/").unwrap_err(), Error::NotFound);
    sub.close();
}

#[test]
fn subscribe_is_pattern_specific() {
    let publ = Socket::open(Pattern::Pub0).unwrap();
    assert_eq!(publ.subscribe(b"x").unwrap_err(), Error::NotSupported);
    // A publisher has no receive side at all.
    assert_eq!(publ.try_recv().unwrap_err(), Error::NotSupported);
    publ.close();
}
