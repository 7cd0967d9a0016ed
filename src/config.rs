// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Command-line configuration: the broker takes exactly one argument, its listening port.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    WrongArgCount(usize),
    InvalidPort(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::WrongArgCount(got) =>
                write!(f, "usage: broker <port> (got {} argument(s))", got),
            ConfigError::InvalidPort(arg) =>
                write!(f, "'{}' is not a valid port number", arg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_args() -> Result<Config, ConfigError> {
        Config::from_args_iter(std::env::args().skip(1))
    }

    fn from_args_iter<I: Iterator<Item = String>>(mut args: I) -> Result<Config, ConfigError> {
        let arg = args.next().ok_or(ConfigError::WrongArgCount(0))?;
        if args.next().is_some() {
            return Err(ConfigError::WrongArgCount(2));
        }

        let port = arg.parse::<u16>().map_err(|_| ConfigError::InvalidPort(arg))?;
        Ok(Config { port })
    }
}
