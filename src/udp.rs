// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Decodes publisher UDP datagrams: the fixed topic/type envelope (§6.2) and the four
//! typed payload variants (§4.2).

use std::borrow::Cow;

use byteorder::{BigEndian, ByteOrder};

use crate::error::DecodeError;

pub const TOPIC_FIELD_LEN: usize = 50;
pub const ENVELOPE_LEN: usize = TOPIC_FIELD_LEN + 1;
pub const MAX_CONTENT_LEN: usize = 1500;
/// 50 topic + 1 type + 1500 content + 1 slack, matching the canonical datagram maximum.
pub const MAX_DATAGRAM_LEN: usize = TOPIC_FIELD_LEN + 1 + MAX_CONTENT_LEN + 1;

pub const DATA_TYPE_INT: u8 = 0;
pub const DATA_TYPE_SHORT_REAL: u8 = 1;
pub const DATA_TYPE_FLOAT: u8 = 2;
pub const DATA_TYPE_STRING: u8 = 3;

/// A publisher datagram split into its wire fields. Borrows from the receive buffer.
/// `topic` is lossily re-decoded (same as the CLIENT_ID identity field) rather than
/// rejected outright, so a non-UTF-8 topic can't alias the empty-string topic.
pub struct Datagram<'a> {
    pub topic: Cow<'a, str>,
    pub data_type: u8,
    pub content: &'a [u8],
}

/// Splits a raw datagram into topic / data_type / content per §6.2.
/// Datagrams shorter than the 51-octet envelope are malformed.
pub fn parse_datagram(buf: &[u8]) -> Result<Datagram<'_>, DecodeError> {
    if buf.len() < ENVELOPE_LEN {
        return Err(DecodeError::DatagramTooShort);
    }

    let topic_field = &buf[..TOPIC_FIELD_LEN];
    let nul_at = topic_field.iter().position(|&b| b == 0).unwrap_or(TOPIC_FIELD_LEN);
    let topic = String::from_utf8_lossy(&topic_field[..nul_at]);

    let data_type = buf[TOPIC_FIELD_LEN];
    let content = &buf[ENVELOPE_LEN..];

    Ok(Datagram { topic, data_type, content })
}

/// Decodes a publication's content into a printable (type_tag, value_text) pair.
pub fn decode_payload(data_type: u8, content: &[u8]) -> Result<(&'static str, String), DecodeError> {
    match data_type {
        DATA_TYPE_INT => decode_int(content),
        DATA_TYPE_SHORT_REAL => decode_short_real(content),
        DATA_TYPE_FLOAT => decode_float(content),
        DATA_TYPE_STRING => Ok(("STRING", String::from_utf8_lossy(content).into_owned())),
        other => Err(DecodeError::UnknownDataType(other)),
    }
}

fn decode_int(content: &[u8]) -> Result<(&'static str, String), DecodeError> {
    if content.len() < 5 {
        return Err(DecodeError::ContentTooShort { data_type: DATA_TYPE_INT, needed: 5, got: content.len() });
    }

    let negative = content[0] == 1;
    let magnitude = BigEndian::read_u32(&content[1..5]) as i64;
    let value = if negative { -magnitude } else { magnitude };

    Ok(("INT", value.to_string()))
}

fn decode_short_real(content: &[u8]) -> Result<(&'static str, String), DecodeError> {
    if content.len() < 2 {
        return Err(DecodeError::ContentTooShort { data_type: DATA_TYPE_SHORT_REAL, needed: 2, got: content.len() });
    }

    let n = BigEndian::read_u16(&content[..2]);
    let whole = n / 100;
    let frac = n % 100;

    Ok(("SHORT_REAL", format!("{}.{:02}", whole, frac)))
}

fn decode_float(content: &[u8]) -> Result<(&'static str, String), DecodeError> {
    if content.len() < 6 {
        return Err(DecodeError::ContentTooShort { data_type: DATA_TYPE_FLOAT, needed: 6, got: content.len() });
    }

    let negative = content[0] == 1;
    let magnitude = BigEndian::read_u32(&content[1..5]) as u64;
    let power = content[5];

    format_scaled(magnitude, power, negative).map(|s| ("FLOAT", s))
}

/// Formats `magnitude * 10^-power`, optionally negated, as an exact decimal with no
/// floating-point rounding: trailing fractional zeros are trimmed, keeping at least one
/// fractional digit whenever `power > 0`. `power` comes straight off the wire, so a
/// divisor that would overflow `u64` (`power >= 20`) is rejected rather than computed.
fn format_scaled(magnitude: u64, power: u8, negative: bool) -> Result<String, DecodeError> {
    if power == 0 {
        return Ok(if negative && magnitude != 0 {
            format!("-{}", magnitude)
        } else {
            magnitude.to_string()
        });
    }

    let divisor = 10u64.checked_pow(power as u32).ok_or(DecodeError::ScalingPowerTooLarge(power))?;
    let whole = magnitude / divisor;
    let frac = magnitude % divisor;

    let mut frac_str = format!("{:0width$}", frac, width = power as usize);
    while frac_str.len() > 1 && frac_str.ends_with('0') {
        frac_str.pop();
    }

    let sign = if negative && (whole != 0 || frac != 0) { "-" } else { "" };
    Ok(format!("{}{}.{}", sign, whole, frac_str))
}
