// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Frame header and per-frame encode/decode for the broker/subscriber TCP protocol.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{invalid_data_io_error, other_io_error, unexpected_eof_io_error};

pub const HEADER_LEN: usize = 5;
pub const CLIENT_ID_LEN: usize = 10;

pub const TYPE_CLIENT_ID: u8 = 1;
pub const TYPE_SUBSCRIBE: u8 = 2;
pub const TYPE_UNSUBSCRIBE: u8 = 3;
pub const TYPE_FORWARD_UDP: u8 = 4;

/// Reads exactly `buf.len()` bytes, looping across short reads.
/// Any read of zero bytes before the buffer is full means the peer closed the connection.
pub fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut read = 0;

    while read < buf.len() {
        match reader.read(&mut buf[read..])? {
            0 => return Err(unexpected_eof_io_error("peer closed before full frame was received")),
            n => read += n,
        }
    }

    Ok(())
}

/// Writes every byte of `buf`, looping across short writes.
pub fn write_all<W: Write>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;

    while written < buf.len() {
        match writer.write(&buf[written..])? {
            0 => return Err(other_io_error("write returned zero bytes")),
            n => written += n,
        }
    }

    Ok(())
}

/// The 5-octet `(len, type)` header common to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub len: u32,
    pub frame_type: u8,
}

impl Header {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<Header> {
        let mut buf = [0u8; HEADER_LEN];
        read_exact(reader, &mut buf)?;

        let mut cursor = &buf[..];
        let len = cursor.read_u32::<BigEndian>()?;
        let frame_type = cursor.read_u8()?;

        Ok(Header { len, frame_type })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_LEN];
        {
            let mut cursor = &mut buf[..];
            cursor.write_u32::<BigEndian>(self.len)?;
            cursor.write_u8(self.frame_type)?;
        }
        write_all(writer, &buf)
    }
}

/// A publication ready to be forwarded to a matching subscriber.
#[derive(Debug, Clone)]
pub struct ForwardUdp {
    pub sender_ip: u32,
    pub sender_port: u16,
    pub topic: String,
    pub data_type: u8,
    pub content: Vec<u8>,
}

/// A frame as read from a subscriber connection, after the handshake.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Subscribe(String),
    Unsubscribe(String),
}

/// Reads the identity sent immediately after a TCP accept.
///
/// The field is a fixed 10-octet buffer, NUL-padded; the identity is the prefix up to
/// the first NUL, or the full 10 octets if none is present.
pub fn read_client_id<R: Read>(reader: &mut R) -> io::Result<String> {
    let header = Header::read(reader)?;

    if header.frame_type != TYPE_CLIENT_ID {
        return Err(invalid_data_io_error("expected CLIENT_ID frame type"));
    }

    let expected_len = (HEADER_LEN + CLIENT_ID_LEN) as u32;
    if header.len != expected_len {
        return Err(invalid_data_io_error("malformed CLIENT_ID frame length"));
    }

    let mut id = [0u8; CLIENT_ID_LEN];
    read_exact(reader, &mut id)?;

    let nul_at = id.iter().position(|&b| b == 0).unwrap_or(CLIENT_ID_LEN);
    Ok(String::from_utf8_lossy(&id[..nul_at]).into_owned())
}

pub fn write_client_id<W: Write>(writer: &mut W, identity: &str) -> io::Result<()> {
    if identity.len() > CLIENT_ID_LEN {
        return Err(invalid_data_io_error("identity exceeds 10 octets"));
    }

    let header = Header { len: (HEADER_LEN + CLIENT_ID_LEN) as u32, frame_type: TYPE_CLIENT_ID };
    header.write(writer)?;

    let mut id = [0u8; CLIENT_ID_LEN];
    id[..identity.len()].copy_from_slice(identity.as_bytes());
    write_all(writer, &id)
}

/// Reads one subscribe/unsubscribe/forward frame's body, given an already-read header.
/// Returns `None` for a frame type the subscriber-side protocol never reads here
/// (this side only ever reads client frames after the handshake).
pub fn read_client_frame<R: Read>(reader: &mut R, header: &Header) -> io::Result<ClientFrame> {
    match header.frame_type {
        TYPE_SUBSCRIBE | TYPE_UNSUBSCRIBE => {
            let mut topic_len_buf = [0u8; 2];
            read_exact(reader, &mut topic_len_buf)?;
            let topic_len = (&topic_len_buf[..]).read_u16::<BigEndian>()? as usize;

            let expected_len = HEADER_LEN + 2 + topic_len;
            if header.len as usize != expected_len {
                return Err(invalid_data_io_error("malformed SUBSCRIBE/UNSUBSCRIBE frame length"));
            }

            let mut topic_buf = vec![0u8; topic_len];
            read_exact(reader, &mut topic_buf)?;
            let topic = String::from_utf8_lossy(&topic_buf).into_owned();

            if header.frame_type == TYPE_SUBSCRIBE {
                Ok(ClientFrame::Subscribe(topic))
            } else {
                Ok(ClientFrame::Unsubscribe(topic))
            }
        }
        other => Err(invalid_data_io_error_for_type(other)),
    }
}

fn invalid_data_io_error_for_type(_frame_type: u8) -> io::Error {
    invalid_data_io_error("unknown or unexpected client frame type")
}

pub fn write_subscription<W: Write>(writer: &mut W, frame_type: u8, topic: &str) -> io::Result<()> {
    let topic_bytes = topic.as_bytes();
    let header = Header {
        len: (HEADER_LEN + 2 + topic_bytes.len()) as u32,
        frame_type,
    };
    header.write(writer)?;

    let mut topic_len_buf = [0u8; 2];
    (&mut topic_len_buf[..]).write_u16::<BigEndian>(topic_bytes.len() as u16)?;
    write_all(writer, &topic_len_buf)?;
    write_all(writer, topic_bytes)
}

/// Builds and writes one FORWARD_UDP frame in full.
pub fn write_forward_udp<W: Write>(writer: &mut W, msg: &ForwardUdp) -> io::Result<()> {
    let topic_bytes = msg.topic.as_bytes();
    let body_len = 4 + 2 + 2 + 1 + 2 + topic_bytes.len() + msg.content.len();
    let header = Header { len: (HEADER_LEN + body_len) as u32, frame_type: TYPE_FORWARD_UDP };
    header.write(writer)?;

    let mut fixed = Vec::with_capacity(body_len - topic_bytes.len() - msg.content.len());
    fixed.write_u32::<BigEndian>(msg.sender_ip)?;
    fixed.write_u16::<BigEndian>(msg.sender_port)?;
    fixed.write_u16::<BigEndian>(topic_bytes.len() as u16)?;
    fixed.write_u8(msg.data_type)?;
    fixed.write_u16::<BigEndian>(msg.content.len() as u16)?;
    write_all(writer, &fixed)?;
    write_all(writer, topic_bytes)?;
    write_all(writer, &msg.content)
}

/// Reads one FORWARD_UDP frame's body on the subscriber side, given an already-read header.
pub fn read_forward_udp<R: Read>(reader: &mut R, header: &Header) -> io::Result<ForwardUdp> {
    if header.frame_type != TYPE_FORWARD_UDP {
        return Err(invalid_data_io_error("expected FORWARD_UDP frame type"));
    }

    let mut fixed = [0u8; 11];
    read_exact(reader, &mut fixed)?;
    let mut cursor = &fixed[..];
    let sender_ip = cursor.read_u32::<BigEndian>()?;
    let sender_port = cursor.read_u16::<BigEndian>()?;
    let topic_len = cursor.read_u16::<BigEndian>()? as usize;
    let data_type = cursor.read_u8()?;
    let content_len = cursor.read_u16::<BigEndian>()? as usize;

    let expected_len = HEADER_LEN + 11 + topic_len + content_len;
    if header.len as usize != expected_len {
        return Err(invalid_data_io_error("malformed FORWARD_UDP frame length"));
    }

    let mut topic_buf = vec![0u8; topic_len];
    read_exact(reader, &mut topic_buf)?;
    let topic = String::from_utf8_lossy(&topic_buf).into_owned();

    let mut content = vec![0u8; content_len];
    read_exact(reader, &mut content)?;

    Ok(ForwardUdp { sender_ip, sender_port, topic, data_type, content })
}
