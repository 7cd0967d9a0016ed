// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::net::{TcpListener, UdpSocket};
use std::process::ExitCode;

use log::error;

use pubsub_broker::config::Config;
use pubsub_broker::dispatcher::Dispatcher;

fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::from_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal error: {}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);

    let listener = TcpListener::bind(&addr)?;
    let udp_socket = UdpSocket::bind(&addr)?;

    let mut dispatcher = Dispatcher::new(listener, udp_socket)?;
    dispatcher.run()
}
