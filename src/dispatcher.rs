// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The single-threaded readiness loop: one `mio::Poll` multiplexes admin stdin, the TCP
//! listener, the UDP socket, and every live/pending subscriber connection.
//!
//! Admin stdin stays in its inherited blocking mode, same as the original's `std::cin`
//! read after a `poll()` wakeup: a terminal (or a pipe feeding whole lines) only reports
//! readable once a full line is buffered, so one `read_line` per wakeup never blocks.
//! Subscriber and listener sockets are non-blocking; see `conn` for why.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, TcpListener, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

use log::{debug, error, info};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::conn::{Conn, PendingConn, ReadOutcome};
use crate::forwarder;
use crate::registry::{AdmitError, Registry};
use crate::topic::PatternCache;
use crate::udp;
use crate::wire::{ClientFrame, ForwardUdp};

const TOKEN_STDIN: Token = Token(0);
const TOKEN_LISTENER: Token = Token(1);
const TOKEN_UDP: Token = Token(2);
const FIRST_CONN_TOKEN: usize = 3;

pub struct Dispatcher {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    udp_socket: UdpSocket,
    registry: Registry,
    cache: PatternCache,
    conns: HashMap<Token, Conn>,
    pending: HashMap<Token, PendingConn>,
    next_token: usize,
}

impl Dispatcher {
    pub fn new(listener: TcpListener, udp_socket: UdpSocket) -> io::Result<Dispatcher> {
        listener.set_nonblocking(true)?;
        udp_socket.set_nonblocking(true)?;

        let poll = Poll::new()?;
        let stdin_fd: RawFd = 0;
        // stdin isn't always pollable (e.g. redirected from a plain file in tests), in
        // which case there's simply no admin console for this run.
        if let Err(e) = poll.registry().register(&mut SourceFd(&stdin_fd), TOKEN_STDIN, Interest::READABLE) {
            debug!("admin console unavailable: {}", e);
        }

        let listener_fd = listener.as_raw_fd();
        poll.registry().register(&mut SourceFd(&listener_fd), TOKEN_LISTENER, Interest::READABLE)?;

        let udp_fd = udp_socket.as_raw_fd();
        poll.registry().register(&mut SourceFd(&udp_fd), TOKEN_UDP, Interest::READABLE)?;

        Ok(Dispatcher {
            poll,
            events: Events::with_capacity(1024),
            listener,
            udp_socket,
            registry: Registry::new(),
            cache: PatternCache::new(),
            conns: HashMap::new(),
            pending: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
        })
    }

    /// Runs until the admin console sends `exit`, then tears every socket down.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.poll.poll(&mut self.events, None)?;

            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_error() || e.is_read_closed() || e.is_write_closed()))
                .collect();

            let mut exit_requested = false;

            for (token, readable, errored) in ready {
                match token {
                    TOKEN_STDIN => {
                        if readable && self.handle_stdin()? {
                            exit_requested = true;
                        }
                    }
                    TOKEN_LISTENER => {
                        if readable {
                            self.handle_accept();
                        }
                    }
                    TOKEN_UDP => {
                        if readable {
                            self.handle_udp();
                        }
                    }
                    _ if self.pending.contains_key(&token) => {
                        if readable {
                            self.handle_pending(token);
                        }
                    }
                    _ => {
                        if errored {
                            self.disconnect(token);
                        } else if readable {
                            self.handle_conn_readable(token);
                        }
                    }
                }
            }

            self.flush_pending_writes();

            if exit_requested {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    fn handle_stdin(&mut self) -> io::Result<bool> {
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => Ok(true),
            Ok(_) => Ok(line.trim() == "exit"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn handle_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let token = self.alloc_token();
                    match PendingConn::new(stream, peer) {
                        Ok(pending) => {
                            if let Err(e) = self.register_fd(pending.stream.as_raw_fd(), token) {
                                error!("failed to register accepted socket: {}", e);
                                continue;
                            }
                            self.pending.insert(token, pending);
                        }
                        Err(e) => error!("failed to prepare accepted socket: {}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_pending(&mut self, token: Token) {
        let outcome = match self.pending.get_mut(&token) {
            Some(pending) => pending.poll_handshake(),
            None => return,
        };

        match outcome {
            Ok(None) => {}
            Ok(Some(identity)) => {
                let pending = self.pending.remove(&token).expect("token was just looked up");
                let peer = pending.peer;
                match self.registry.admit(token, identity, peer) {
                    Ok(()) => match pending.into_conn() {
                        Ok(conn) => {
                            self.conns.insert(token, conn);
                            // The readiness edge that completed the handshake may have
                            // also carried the client's first subscribe frame(s); since
                            // mio is edge-triggered, drain them now rather than wait for
                            // a readiness edge that might not come until more data does.
                            self.handle_conn_readable(token);
                        }
                        Err(e) => {
                            error!("failed to finalize handshake: {}", e);
                            self.registry.disconnect(token);
                        }
                    },
                    Err(AdmitError::AlreadyConnected) => {
                        let _ = self.deregister_fd(pending.stream.as_raw_fd());
                    }
                }
            }
            Err(e) => {
                debug!("handshake failed: {}", e);
                if let Some(pending) = self.pending.remove(&token) {
                    let _ = self.deregister_fd(pending.stream.as_raw_fd());
                }
            }
        }
    }

    fn handle_udp(&mut self) {
        let mut buf = [0u8; udp::MAX_DATAGRAM_LEN];

        loop {
            match self.udp_socket.recv_from(&mut buf) {
                Ok((n, src)) => self.handle_datagram(&buf[..n], src.ip(), src.port()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("udp recv failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_datagram(&mut self, raw: &[u8], sender_ip: IpAddr, sender_port: u16) {
        let datagram = match udp::parse_datagram(raw) {
            Ok(d) => d,
            Err(e) => {
                debug!("dropping malformed datagram: {}", e);
                return;
            }
        };

        if let Err(e) = udp::decode_payload(datagram.data_type, datagram.content) {
            debug!("dropping malformed publication on {}: {}", datagram.topic, e);
            return;
        }

        let sender_ip = match sender_ip {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => {
                debug!("dropping datagram from non-IPv4 sender");
                return;
            }
        };

        let msg = ForwardUdp {
            sender_ip,
            sender_port,
            topic: datagram.topic.into_owned(),
            data_type: datagram.data_type,
            content: datagram.content.to_vec(),
        };

        let failed = forwarder::forward(&self.registry, &mut self.conns, &mut self.cache, &msg);
        for token in failed {
            self.disconnect(token);
        }
    }

    fn handle_conn_readable(&mut self, token: Token) {
        loop {
            let outcome = match self.conns.get_mut(&token) {
                Some(conn) => conn.poll_read(),
                None => return,
            };

            match outcome {
                Ok(ReadOutcome::Frame(ClientFrame::Subscribe(topic))) => {
                    self.registry.subscribe(token, topic);
                }
                Ok(ReadOutcome::Frame(ClientFrame::Unsubscribe(topic))) => {
                    self.registry.unsubscribe(token, &topic);
                }
                Ok(ReadOutcome::Pending) => break,
                Ok(ReadOutcome::Eof) => {
                    self.disconnect(token);
                    break;
                }
                Err(e) => {
                    debug!("disconnecting after frame error: {}", e);
                    self.disconnect(token);
                    break;
                }
            }
        }
    }

    fn flush_pending_writes(&mut self) {
        let pending: Vec<Token> =
            self.conns.iter().filter(|(_, c)| c.has_pending_write()).map(|(t, _)| *t).collect();

        for token in pending {
            let result = match self.conns.get_mut(&token) {
                Some(conn) => conn.try_flush(),
                None => continue,
            };
            if let Err(e) = result {
                debug!("disconnecting after flush error: {}", e);
                self.disconnect(token);
            }
        }
    }

    fn disconnect(&mut self, token: Token) {
        if let Some(conn) = self.conns.remove(&token) {
            let _ = self.deregister_fd(conn.stream.as_raw_fd());
        }
        self.registry.disconnect(token);
    }

    fn shutdown(&mut self) {
        info!("shutting down");

        let live: Vec<Token> = self.conns.keys().copied().collect();
        for token in live {
            self.disconnect(token);
        }

        let stale: Vec<Token> = self.pending.keys().copied().collect();
        for token in stale {
            if let Some(pending) = self.pending.remove(&token) {
                let _ = self.deregister_fd(pending.stream.as_raw_fd());
            }
        }
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn register_fd(&self, fd: RawFd, token: Token) -> io::Result<()> {
        self.poll.registry().register(&mut SourceFd(&fd), token, Interest::READABLE)
    }

    fn deregister_fd(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }
}
