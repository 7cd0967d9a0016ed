// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

use pubsub_broker::dispatcher::Dispatcher;
use pubsub_broker::wire::{self, ClientFrame, Header, TYPE_FORWARD_UDP, TYPE_SUBSCRIBE, TYPE_UNSUBSCRIBE};

/// Starts a broker on ephemeral TCP/UDP ports in a background thread and returns
/// their addresses. The thread runs for the rest of the process: nothing in this
/// suite issues the admin `exit` command, the same way the teacher's `test/test.rs`
/// never tears a `Session` down either.
fn start_broker() -> (SocketAddr, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let udp_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let tcp_addr = listener.local_addr().unwrap();
    let udp_addr = udp_socket.local_addr().unwrap();

    thread::spawn(move || {
        let mut dispatcher = Dispatcher::new(listener, udp_socket).unwrap();
        dispatcher.run().unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    (tcp_addr, udp_addr)
}

/// A subscriber connection: performs the CLIENT_ID handshake, then exposes
/// subscribe/unsubscribe and frame reads with a short timeout.
struct Subscriber {
    stream: TcpStream,
}

impl Subscriber {
    fn connect(tcp_addr: SocketAddr, identity: &str) -> Subscriber {
        let mut stream = TcpStream::connect(tcp_addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        wire::write_client_id(&mut stream, identity).unwrap();
        Subscriber { stream }
    }

    fn subscribe(&mut self, topic: &str) {
        wire::write_subscription(&mut self.stream, TYPE_SUBSCRIBE, topic).unwrap();
    }

    fn unsubscribe(&mut self, topic: &str) {
        wire::write_subscription(&mut self.stream, TYPE_UNSUBSCRIBE, topic).unwrap();
    }

    fn recv_forward(&mut self) -> wire::ForwardUdp {
        let header = Header::read(&mut self.stream).unwrap();
        assert_eq!(header.frame_type, TYPE_FORWARD_UDP);
        wire::read_forward_udp(&mut self.stream, &header).unwrap()
    }

    fn expect_nothing(&mut self) {
        let mut buf = [0u8; 1];
        let err = self.stream.read(&mut buf).unwrap_err();
        assert!(matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut));
    }
}

fn publish(udp_addr: SocketAddr, topic: &str, data_type: u8, content: &[u8]) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut datagram = vec![0u8; 51 + content.len()];
    let topic_bytes = topic.as_bytes();
    datagram[..topic_bytes.len()].copy_from_slice(topic_bytes);
    datagram[50] = data_type;
    datagram[51..].copy_from_slice(content);
    socket.send_to(&datagram, udp_addr).unwrap();
}

// Give the dispatcher a readiness pass to process what was just sent.
fn settle() {
    thread::sleep(Duration::from_millis(80));
}

#[test]
fn int_negative_is_forwarded_unchanged() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "int_sub");
    sub.subscribe("a/b");
    settle();

    publish(udp_addr, "a/b", 0, &[0x01, 0x00, 0x00, 0x00, 0x2A]);

    let msg = sub.recv_forward();
    assert_eq!(msg.topic, "a/b");
    assert_eq!(msg.data_type, 0);
    assert_eq!(msg.content, vec![0x01, 0x00, 0x00, 0x00, 0x2A]);

    let (tag, value) = pubsub_broker::udp::decode_payload(msg.data_type, &msg.content).unwrap();
    assert_eq!(tag, "INT");
    assert_eq!(value, "-42");
}

#[test]
fn short_real_value_text() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "sr_sub");
    sub.subscribe("p");
    settle();

    publish(udp_addr, "p", 1, &[0x00, 0x7B]);

    let msg = sub.recv_forward();
    let (tag, value) = pubsub_broker::udp::decode_payload(msg.data_type, &msg.content).unwrap();
    assert_eq!(tag, "SHORT_REAL");
    assert_eq!(value, "1.23");
}

#[test]
fn float_positive_value_text() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "float_sub");
    sub.subscribe("x");
    settle();

    publish(udp_addr, "x", 2, &[0x00, 0x00, 0x00, 0x00, 0x7B, 0x02]);

    let msg = sub.recv_forward();
    let (tag, value) = pubsub_broker::udp::decode_payload(msg.data_type, &msg.content).unwrap();
    assert_eq!(tag, "FLOAT");
    assert_eq!(value, "1.23");
}

#[test]
fn plus_wildcard_matches_exactly_one_segment() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "plus_sub");
    sub.subscribe("a/+/c");
    settle();

    publish(udp_addr, "a/b/c", 3, b"hit");
    let msg = sub.recv_forward();
    assert_eq!(msg.topic, "a/b/c");

    publish(udp_addr, "a/b/d/c", 3, b"miss");
    publish(udp_addr, "a//c", 3, b"miss");
    settle();
    sub.expect_nothing();
}

#[test]
fn star_wildcard_matches_any_run() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "star_sub");
    sub.subscribe("a/*");
    settle();

    publish(udp_addr, "a/b", 3, b"hit1");
    assert_eq!(sub.recv_forward().topic, "a/b");

    publish(udp_addr, "a/b/c", 3, b"hit2");
    assert_eq!(sub.recv_forward().topic, "a/b/c");

    publish(udp_addr, "a/", 3, b"hit3");
    assert_eq!(sub.recv_forward().topic, "a/");

    publish(udp_addr, "a", 3, b"miss");
    settle();
    sub.expect_nothing();
}

#[test]
fn reconnect_restores_subscriptions_without_resubscribing() {
    let (tcp_addr, udp_addr) = start_broker();

    {
        let mut sub = Subscriber::connect(tcp_addr, "C1");
        sub.subscribe("t1");
        sub.subscribe("t2");
        settle();
    }
    settle();

    let mut sub = Subscriber::connect(tcp_addr, "C1");
    settle();

    publish(udp_addr, "t1", 3, b"hello");
    let msg = sub.recv_forward();
    assert_eq!(msg.topic, "t1");
}

#[test]
fn duplicate_identity_is_refused() {
    let (tcp_addr, _udp_addr) = start_broker();

    let _first = Subscriber::connect(tcp_addr, "dup");
    settle();

    let mut second = TcpStream::connect(tcp_addr).unwrap();
    second.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    wire::write_client_id(&mut second, "dup").unwrap();
    settle();

    let mut buf = [0u8; 1];
    let n = second.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "duplicate identity's connection should be closed by the broker");
}

#[test]
fn unsubscribe_stops_further_deliveries() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "unsub_sub");
    sub.subscribe("t1");
    settle();

    publish(udp_addr, "t1", 3, b"one");
    assert_eq!(sub.recv_forward().topic, "t1");

    sub.unsubscribe("t1");
    settle();

    publish(udp_addr, "t1", 3, b"two");
    settle();
    sub.expect_nothing();
}

#[test]
fn unknown_frame_type_disconnects_the_sender() {
    let (tcp_addr, _udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "badsender");

    let header = Header { len: 5, frame_type: 99 };
    header.write(&mut sub.stream).unwrap();
    settle();

    let mut buf = [0u8; 1];
    let n = sub.stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn oversized_float_scaling_power_does_not_take_the_broker_down() {
    let (tcp_addr, udp_addr) = start_broker();
    let mut sub = Subscriber::connect(tcp_addr, "ovf_sub");
    sub.subscribe("x");
    settle();

    // data_type=FLOAT with power=20 would overflow a u64 divisor if computed unchecked.
    publish(udp_addr, "x", 2, &[0x00, 0x00, 0x00, 0x00, 0x01, 20]);
    settle();
    sub.expect_nothing();

    // The dispatcher thread must still be alive and processing subsequent datagrams.
    publish(udp_addr, "x", 2, &[0x00, 0x00, 0x00, 0x00, 0x7B, 0x02]);
    let msg = sub.recv_forward();
    let (_, value) = pubsub_broker::udp::decode_payload(msg.data_type, &msg.content).unwrap();
    assert_eq!(value, "1.23");
}

#[test]
fn client_frame_helper_round_trips_through_the_wire() {
    // sanity check that the helper used throughout this file agrees with `wire`'s own
    // parser, independent of the broker.
    let mut buf = Vec::new();
    wire::write_subscription(&mut buf, TYPE_SUBSCRIBE, "a/b").unwrap();
    let mut cursor = std::io::Cursor::new(buf);
    let header = Header::read(&mut cursor).unwrap();
    match wire::read_client_frame(&mut cursor, &header).unwrap() {
        ClientFrame::Subscribe(topic) => assert_eq!(topic, "a/b"),
        other => panic!("expected Subscribe, got {:?}", other),
    }
}
