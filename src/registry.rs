// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Subscriber registry: connection handle <-> identity bookkeeping, with subscription
//! state that persists across disconnect/reconnect of the same identity.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use mio::Token;

/// Per-connection state kept while a subscriber is live.
pub struct ConnEntry {
    pub identity: String,
    pub subs: HashSet<String>,
}

/// Why `admit` refused a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    AlreadyConnected,
}

#[derive(Default)]
pub struct Registry {
    by_handle: HashMap<Token, ConnEntry>,
    by_identity: HashMap<String, Token>,
    persisted: HashMap<String, HashSet<String>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Admits a newly handshaken connection under `identity`.
    ///
    /// Prints `New client <id> connected from <ip>:<port>.` to stdout on success, or
    /// `Client <id> already connected.` to stderr and refuses if the identity is already
    /// live (matching the original server's stdout/stderr split).
    pub fn admit(&mut self, handle: Token, identity: String, peer: SocketAddr) -> Result<(), AdmitError> {
        if self.by_identity.contains_key(&identity) {
            eprintln!("Client {} already connected.", identity);
            return Err(AdmitError::AlreadyConnected);
        }

        let subs = self.persisted.entry(identity.clone()).or_default().clone();
        self.by_identity.insert(identity.clone(), handle);
        self.by_handle.insert(handle, ConnEntry { identity: identity.clone(), subs });

        println!("New client {} connected from {}:{}.", identity, peer.ip(), peer.port());

        Ok(())
    }

    pub fn subscribe(&mut self, handle: Token, topic: String) {
        if let Some(entry) = self.by_handle.get_mut(&handle) {
            entry.subs.insert(topic.clone());
            self.persisted.entry(entry.identity.clone()).or_default().insert(topic);
        }
    }

    pub fn unsubscribe(&mut self, handle: Token, topic: &str) {
        if let Some(entry) = self.by_handle.get_mut(&handle) {
            entry.subs.remove(topic);
            if let Some(persisted) = self.persisted.get_mut(&entry.identity) {
                persisted.remove(topic);
            }
        }
    }

    /// Removes a connection from the live registry. Its persisted subscriptions are
    /// left untouched (they already mirror the live set in real time). Logs
    /// `Client <id> disconnected.`
    pub fn disconnect(&mut self, handle: Token) -> Option<ConnEntry> {
        let entry = self.by_handle.remove(&handle)?;
        self.by_identity.remove(&entry.identity);

        println!("Client {} disconnected.", entry.identity);

        Some(entry)
    }

    pub fn get(&self, handle: Token) -> Option<&ConnEntry> {
        self.by_handle.get(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Token, &ConnEntry)> {
        self.by_handle.iter()
    }

    pub fn persisted_subs(&self, identity: &str) -> Option<&HashSet<String>> {
        self.persisted.get(identity)
    }
}
