// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Fan-out of one publication to every subscriber whose subscriptions match its topic.

use std::collections::HashMap;

use log::debug;
use mio::Token;

use crate::conn::Conn;
use crate::registry::Registry;
use crate::topic::PatternCache;
use crate::wire::ForwardUdp;

/// Writes one framed FORWARD_UDP message to every subscriber whose subscription set
/// matches `msg.topic`, in the iteration order of `registry`. Returns the handles of
/// connections a write failed on, so the caller can disconnect them; one recipient's
/// failure never stops the fan-out to the others.
pub fn forward(
    registry: &Registry,
    conns: &mut HashMap<Token, Conn>,
    cache: &mut PatternCache,
    msg: &ForwardUdp,
) -> Vec<Token> {
    let mut failed = Vec::new();

    for (handle, entry) in registry.iter() {
        let subscribed = entry.subs.iter().any(|pattern| cache.matches(pattern, &msg.topic));
        if !subscribed {
            continue;
        }

        let Some(conn) = conns.get_mut(handle) else { continue };
        if let Err(err) = conn.queue_forward(msg) {
            debug!("forward to {} ({}) failed: {}", entry.identity, conn.peer, err);
            failed.push(*handle);
        }
    }

    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, TcpListener, TcpStream};

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn peer(stream: &TcpStream) -> SocketAddr {
        stream.peer_addr().unwrap()
    }

    #[test]
    fn forwards_only_to_matching_subscribers() {
        let mut registry = Registry::new();
        let mut conns = HashMap::new();
        let mut cache = PatternCache::new();

        let (client_a, server_a) = connected_pair();
        let (client_b, server_b) = connected_pair();

        registry.admit(Token(3), "A".to_owned(), peer(&client_a)).unwrap();
        registry.subscribe(Token(3), "a/+".to_owned());
        conns.insert(Token(3), Conn::new(server_a, peer(&client_a)).unwrap());

        registry.admit(Token(4), "B".to_owned(), peer(&client_b)).unwrap();
        registry.subscribe(Token(4), "b/*".to_owned());
        conns.insert(Token(4), Conn::new(server_b, peer(&client_b)).unwrap());

        let msg = ForwardUdp {
            sender_ip: 0x7f000001,
            sender_port: 1234,
            topic: "a/temp".to_owned(),
            data_type: 0,
            content: vec![0, 0, 0, 0, 1],
        };

        let failed = forward(&registry, &mut conns, &mut cache, &msg);
        assert!(failed.is_empty());

        let mut client_a = client_a;
        let mut buf = [0u8; 64];
        let n = std::io::Read::read(&mut client_a, &mut buf).unwrap();
        assert!(n > 0);

        client_b.set_read_timeout(Some(std::time::Duration::from_millis(50))).unwrap();
        let mut client_b = client_b;
        let err = std::io::Read::read(&mut client_b, &mut buf).unwrap_err();
        assert!(matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut));
    }
}
