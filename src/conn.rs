// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! A live subscriber connection: a non-blocking TCP stream plus an incremental frame
//! reader and a queued, opportunistically-flushed writer.
//!
//! `mio` is edge-triggered, so a readiness notification must be drained in a loop
//! until it would block (the read side) or all pending bytes are sent (the write
//! side) rather than handled with a single blocking call, unlike the original
//! `recv_all`/`send_all`. This mirrors `pipe.rs`'s `RecvOperation` prefix/payload
//! accumulation, generalized to whole frames since a full frame's bytes are already
//! available in-process once buffered, letting `wire`'s parsers run over a `Cursor`.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};

use crate::error::other_io_error;
use crate::wire::{self, ClientFrame, ForwardUdp, Header, CLIENT_ID_LEN, HEADER_LEN};

/// A connected, handshaken subscriber.
pub struct Conn {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    read_buf: Vec<u8>,
    write_buf: VecDeque<u8>,
}

pub enum ReadOutcome {
    /// No full frame available yet; wait for the next readiness notification.
    Pending,
    Frame(ClientFrame),
    Eof,
}

impl Conn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> io::Result<Conn> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Conn { stream, peer, read_buf: Vec::new(), write_buf: VecDeque::new() })
    }

    /// Reads and parses as much of one frame as is currently available.
    /// Callers should loop until `Pending` to drain everything buffered by the kernel.
    pub fn poll_read(&mut self) -> io::Result<ReadOutcome> {
        loop {
            if self.read_buf.len() >= HEADER_LEN {
                let total = frame_total_len(&self.read_buf)?;
                if self.read_buf.len() >= total {
                    let frame_bytes: Vec<u8> = self.read_buf.drain(..total).collect();
                    let mut cursor = Cursor::new(frame_bytes);
                    let header = Header::read(&mut cursor)?;
                    let frame = wire::read_client_frame(&mut cursor, &header)?;
                    return Ok(ReadOutcome::Frame(frame));
                }
            }

            let needed = bytes_needed(&self.read_buf);
            let mut chunk = vec![0u8; needed];
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Pending),
                Err(e) => return Err(e),
            }
        }
    }

    /// Encodes and queues one FORWARD_UDP frame, then attempts to flush immediately.
    pub fn queue_forward(&mut self, msg: &ForwardUdp) -> io::Result<()> {
        let mut encoded = Vec::new();
        wire::write_forward_udp(&mut encoded, msg)?;
        self.write_buf.extend(encoded);
        self.try_flush()
    }

    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Writes as much of the pending queue as the socket accepts without blocking.
    pub fn try_flush(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            let (front, _) = self.write_buf.as_slices();
            match self.stream.write(front) {
                Ok(0) => return Err(other_io_error("write returned zero bytes")),
                Ok(n) => drop(self.write_buf.drain(..n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

fn bytes_needed(buf: &[u8]) -> usize {
    if buf.len() < HEADER_LEN {
        HEADER_LEN - buf.len()
    } else {
        frame_total_len(buf).map(|total| total.saturating_sub(buf.len())).unwrap_or(1).max(1)
    }
}

fn frame_total_len(buf: &[u8]) -> io::Result<usize> {
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len < HEADER_LEN {
        return Err(crate::error::invalid_data_io_error("frame length shorter than its own header"));
    }
    Ok(len)
}

/// A just-accepted socket that hasn't completed the CLIENT_ID handshake yet.
pub struct PendingConn {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    buf: Vec<u8>,
}

const HANDSHAKE_LEN: usize = HEADER_LEN + CLIENT_ID_LEN;

impl PendingConn {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> io::Result<PendingConn> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(PendingConn { stream, peer, buf: Vec::new() })
    }

    /// Attempts to complete the handshake. Returns `Ok(None)` if not enough data has
    /// arrived yet, `Ok(Some(identity))` once the CLIENT_ID frame is fully read.
    pub fn poll_handshake(&mut self) -> io::Result<Option<String>> {
        if self.buf.len() >= HANDSHAKE_LEN {
            let mut cursor = Cursor::new(&self.buf[..HANDSHAKE_LEN]);
            return wire::read_client_id(&mut cursor).map(Some);
        }

        let needed = HANDSHAKE_LEN - self.buf.len();
        let mut chunk = vec![0u8; needed];

        match self.stream.read(&mut chunk) {
            Ok(0) => Err(crate::error::unexpected_eof_io_error("peer closed during handshake")),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                if self.buf.len() == HANDSHAKE_LEN {
                    let mut cursor = Cursor::new(&self.buf[..]);
                    wire::read_client_id(&mut cursor).map(Some)
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn into_conn(self) -> io::Result<Conn> {
        Conn::new(self.stream, self.peer)
    }
}
