// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::fmt;
use std::io::{Error, ErrorKind};

pub fn other_io_error(msg: &'static str) -> Error {
    Error::other(msg)
}

pub fn invalid_data_io_error(msg: &'static str) -> Error {
    Error::new(ErrorKind::InvalidData, msg)
}

pub fn unexpected_eof_io_error(msg: &'static str) -> Error {
    Error::new(ErrorKind::UnexpectedEof, msg)
}

/// Why a UDP publication's content could not be turned into a (type_tag, value_text) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    DatagramTooShort,
    ContentTooShort { data_type: u8, needed: usize, got: usize },
    UnknownDataType(u8),
    ScalingPowerTooLarge(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecodeError::DatagramTooShort =>
                write!(f, "datagram shorter than the 51-byte envelope"),
            DecodeError::ContentTooShort { data_type, needed, got } =>
                write!(f, "data_type {} needs at least {} content bytes, got {}", data_type, needed, got),
            DecodeError::UnknownDataType(t) =>
                write!(f, "unknown data_type {}", t),
            DecodeError::ScalingPowerTooLarge(power) =>
                write!(f, "FLOAT scaling power {} would overflow a 64-bit divisor", power),
        }
    }
}

impl std::error::Error for DecodeError {}
