//! Request/reply correlation under concurrent clients.

use filament::{Error, Message, Pattern, Socket};

const CLIENTS: usize = 3;
const ROUNDS: usize = 10;

#[test]
fn replies_reach_the_matching_requester() {
    filament::dev_tracing::init_tracing();

    let rep = Socket::open(Pattern::Rep0).unwrap();
    rep.listen("inproc://reqrep-correlated").unwrap();

    // Echo server. Requests from all clients interleave in its backlog;
    // correlation has to route every echo back to the socket that asked.
    let server = {
        let rep = rep.clone();
        std::thread::spawn(move || {
            for _ in 0..CLIENTS * ROUNDS {
                let req = rep.recv().unwrap();
                let echo = Message::from_slice(req.body()).unwrap();
                rep.send(echo).unwrap();
            }
        })
    };

    let mut clients = Vec::new();
    for c in 0..CLIENTS {
        clients.push(std::thread::spawn(move || {
            let req = Socket::open(Pattern::Req0).unwrap();
            req.dial("inproc://reqrep-correlated").unwrap();
            for round in 0..ROUNDS {
                let body = format!("client-{c}-round-{round}");
                req.send(Message::from_slice(body.as_bytes()).unwrap())
                    .unwrap();
                let reply = req.recv().unwrap();
                assert_eq!(reply.body(), body.as_bytes());
            }
            req.close();
        }));
    }
    for c in clients {
        c.join().unwrap();
    }
    server.join().unwrap();
    rep.close();
}

#[test]
fn new_request_abandons_the_old_one() {
    let rep = Socket::open(Pattern::Rep0).unwrap();
    rep.listen("inproc://reqrep-abandon").unwrap();
    let req = Socket::open(Pattern::Req0).unwrap();
    req.dial("inproc://reqrep-abandon").unwrap();

    req.send(Message::from_slice(b"first").unwrap()).unwrap();
    // Reissue before reading the reply. The first reply must be dropped.
    req.send(Message::from_slice(b"second").unwrap()).unwrap();

    let a = rep.recv().unwrap();
    rep.send(Message::from_slice(a.body()).unwrap()).unwrap();
    let b = rep.recv().unwrap();
    rep.send(Message::from_slice(b.body()).unwrap()).unwrap();

    assert_eq!(req.recv().unwrap().body(), b"second");

    req.close();
    rep.close();
}

#[test]
fn reply_without_request_is_rejected() {
    let rep = Socket::open(Pattern::Rep0).unwrap();
    let err = rep
        .send(Message::from_slice(b"unsolicited").unwrap())
        .unwrap_err();
    assert_eq!(err, Error::InvalidState);
    rep.close();
}

#[test]
fn recv_without_request_is_rejected() {
    let req = Socket::open(Pattern::Req0).unwrap();
    assert_eq!(req.recv().unwrap_err(), Error::InvalidState);
    req.close();
}
