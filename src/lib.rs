// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! A single-threaded publish/subscribe broker: publishers send UDP datagrams, subscribers
//! hold a TCP connection and receive framed copies of the datagrams matching their
//! subscriptions.

pub mod config;
pub mod conn;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod registry;
pub mod topic;
pub mod udp;
pub mod wire;
