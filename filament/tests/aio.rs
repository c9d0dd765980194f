//! Asynchronous operations and cancellation.

use std::time::Duration;

use filament::{keys, Aio, Error, Message, OptValue, Pattern, Socket, TimeoutOpt};

#[test]
fn aio_recv_completes_when_a_message_arrives() {
    filament::dev_tracing::init_tracing();

    let a = Socket::open(Pattern::Pair0).unwrap();
    let b = Socket::open(Pattern::Pair0).unwrap();
    a.listen("inproc://aio-recv").unwrap();
    b.dial("inproc://aio-recv").unwrap();

    let aio = Aio::new();
    aio.recv(&a).unwrap();
    b.send(Message::from_slice(b"async").unwrap()).unwrap();

    aio.wait();
    assert_eq!(aio.result(), Ok(()));
    assert_eq!(aio.take_msg().unwrap().body(), b"async");

    a.close();
    b.close();
}

#[test]
fn aio_send_completes_and_frees_the_handle() {
    let a = Socket::open(Pattern::Pair0).unwrap();
    let b = Socket::open(Pattern::Pair0).unwrap();
    a.listen("inproc://aio-send").unwrap();
    b.dial("inproc://aio-send").unwrap();

    let aio = Aio::new();
    aio.send(&b, Message::from_slice(b"out").unwrap()).unwrap();
    aio.wait();
    assert_eq!(aio.result(), Ok(()));
    assert_eq!(a.recv().unwrap().body(), b"out");

    // The slot is reusable once the previous operation finished.
    aio.send(&b, Message::from_slice(b"again").unwrap()).unwrap();
    aio.wait();
    assert_eq!(a.recv().unwrap().body(), b"again");

    a.close();
    b.close();
}

#[test]
fn a_busy_aio_rejects_a_second_submission() {
    let s = Socket::open(Pattern::Pull0).unwrap();
    let aio = Aio::new();
    aio.recv(&s).unwrap();
    assert_eq!(aio.recv(&s).unwrap_err(), Error::Busy);
    aio.cancel();
    aio.wait();
    assert_eq!(aio.result(), Err(Error::Canceled));
    s.close();
}

#[test]
fn cancel_of_a_pending_recv_reports_canceled() {
    let s = Socket::open(Pattern::Pull0).unwrap();
    let aio = Aio::new();
    aio.recv(&s).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    aio.cancel();
    aio.wait();
    assert_eq!(aio.result(), Err(Error::Canceled));
    assert!(aio.take_msg().is_none());
    s.close();
}

/// Race a cancel against a completing send. However the race lands, the
/// operation must settle exactly once, as either a success or `Canceled`.
#[test]
fn cancel_races_to_a_single_terminal_result() {
    let pull = Socket::open(Pattern::Pull0).unwrap();
    pull.listen("inproc://aio-cancel-race").unwrap();
    let push = Socket::open(Pattern::Push0).unwrap();
    push.dial("inproc://aio-cancel-race").unwrap();
    pull.set_option(keys::RECV_TIMEOUT, OptValue::Ms(TimeoutOpt::Millis(50)))
        .unwrap();

    let aio = Aio::new();
    for round in 0..50 {
        aio.recv(&pull).unwrap();
        let racer = aio.clone();
        let t = std::thread::spawn(move || racer.cancel());
        push.send(Message::from_slice(b"racy").unwrap()).unwrap();
        t.join().unwrap();
        aio.wait();

        match aio.result() {
            Ok(()) => {
                let m = aio.take_msg();
                assert!(m.is_some(), "success without a message, round {round}");
            }
            Err(Error::Canceled) => {}
            // A short timeout keeps a lost race from hanging the test.
            Err(Error::Timeout) => {}
            other => panic!("unexpected terminal state {other:?}, round {round}"),
        }
        // Drain anything the canceled receive left behind.
        while pull.try_recv().is_ok() {}
    }

    push.close();
    pull.close();
}

#[test]
fn closing_the_socket_cancels_a_parked_recv() {
    let s = Socket::open(Pattern::Pull0).unwrap();
    s.listen("inproc://aio-close-cancels").unwrap();

    let aio = Aio::new();
    aio.recv(&s).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    // Teardown settles the parked operation before close returns.
    s.close();
    aio.wait();
    assert_eq!(aio.result(), Err(Error::Canceled));
    assert!(aio.take_msg().is_none());

    // The slot is free again after the forced settlement.
    let other = Socket::open(Pattern::Pull0).unwrap();
    aio.recv(&other).unwrap();
    aio.cancel();
    aio.wait();
    assert_eq!(aio.result(), Err(Error::Canceled));
    other.close();
}

#[test]
fn aio_send_times_out_without_a_peer() {
    let s = Socket::open(Pattern::Pair0).unwrap();
    s.set_option(keys::SEND_TIMEOUT, OptValue::Ms(TimeoutOpt::Millis(50)))
        .unwrap();
    let aio = Aio::new();
    aio.send(&s, Message::from_slice(b"nobody").unwrap()).unwrap();
    aio.wait();
    assert_eq!(aio.result(), Err(Error::Timeout));
    s.close();
}
