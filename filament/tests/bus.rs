//! Bus pattern fan-out and origin exclusion.

use std::time::{Duration, Instant};

use filament::{keys, Error, Message, OptValue, Pattern, Socket, TimeoutOpt};

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
        assert!(Instant::now() < deadline, "pipes never attached");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn hub_broadcast_reaches_every_spoke() {
    filament::dev_tracing::init_tracing();

    let hub = Socket::open(Pattern::Bus0).unwrap();
    hub.listen("inproc://bus-fanout").unwrap();
    let s1 = Socket::open(Pattern::Bus0).unwrap();
    s1.dial("inproc://bus-fanout").unwrap();
    let s2 = Socket::open(Pattern::Bus0).unwrap();
    s2.dial("inproc://bus-fanout").unwrap();
    wait_for_pipes(&hub, 2);

    hub.send(Message::from_slice(b"to all").unwrap()).unwrap();
    assert_eq!(s1.recv().unwrap().body(), b"to all");
    assert_eq!(s2.recv().unwrap().body(), b"to all");

    hub.close();
    s1.close();
    s2.close();
}

#[test]
fn relayed_message_skips_its_origin() {
    let hub = Socket::open(Pattern::Bus0).unwrap();
    hub.listen("inproc://bus-relay").unwrap();
    let s1 = Socket::open(Pattern::Bus0).unwrap();
    s1.set_option(keys::RECV_TIMEOUT, OptValue::Ms(TimeoutOpt::Millis(200)))
        .unwrap();
    s1.dial("inproc://bus-relay").unwrap();
    let s2 = Socket::open(Pattern::Bus0).unwrap();
    s2.dial("inproc://bus-relay").unwrap();
    wait_for_pipes(&hub, 2);

    s1.send(Message::from_slice(b"gossip").unwrap()).unwrap();
    let heard = hub.recv().unwrap();
    assert_eq!(heard.body(), b"gossip");

    // Forwarding the received message must not echo it to its origin.
    hub.send(heard).unwrap();
    assert_eq!(s2.recv().unwrap().body(), b"gossip");
    assert_eq!(s1.recv().unwrap_err(), Error::Timeout);

    hub.close();
    s1.close();
    s2.close();
}
