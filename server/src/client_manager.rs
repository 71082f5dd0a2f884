//! Client connection management for the session relay
//!
//! This module tracks every client registered with the relay:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - The watches each client holds and the paths they observe
//! - Capacity limits and address lookup for routing replies
//!
//! Watches belong to their client, so removing a client drops all of its
//! observers in one step.

use log::info;
use shared::document::paths_overlap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected client and the watches it registered
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Watched paths keyed by the client's own watch ids
    pub watches: HashMap<u32, String>,
    /// Packets received since connecting
    pub packets_received: u64,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            watches: HashMap::new(),
            packets_received: 0,
        }
    }

    /// Records activity from this client.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.packets_received += 1;
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// One watch that must hear about a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub client_id: u32,
    pub addr: SocketAddr,
    pub watch_id: u32,
    pub path: String,
}

/// Manages all connected clients and their watches
///
/// Enforces the capacity limit and hands out monotonically increasing
/// client ids starting at 1.
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr);
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    /// Returns true if the client was found and removed.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected ({} watches dropped, {} packets)",
                client.id,
                client.watches.len(),
                client.packets_received
            );
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Records activity from the client at `addr` and returns its id.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<u32> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.touch();
        Some(client.id)
    }

    /// Registers a watch. A reused watch id replaces the earlier path.
    pub fn add_watch(&mut self, client_id: u32, watch_id: u32, path: &str) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.watches.insert(watch_id, path.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remove_watch(&mut self, client_id: u32, watch_id: u32) -> bool {
        self.clients
            .get_mut(&client_id)
            .map_or(false, |client| client.watches.remove(&watch_id).is_some())
    }

    /// Every watch whose observed value a write at `path` can change.
    pub fn watchers_of(&self, path: &str) -> Vec<WatchTarget> {
        let mut targets: Vec<WatchTarget> = self
            .clients
            .values()
            .flat_map(|client| {
                client
                    .watches
                    .iter()
                    .filter(|(_, watched)| paths_overlap(watched, path))
                    .map(|(watch_id, watched)| WatchTarget {
                        client_id: client.id,
                        addr: client.addr,
                        watch_id: *watch_id,
                        path: watched.clone(),
                    })
            })
            .collect();
        targets.sort_by_key(|target| (target.client_id, target.watch_id));
        targets
    }

    /// Watches held by one client, ordered by watch id.
    pub fn watches_of_client(&self, client_id: u32) -> Vec<(u32, String)> {
        let mut watches: Vec<(u32, String)> = self
            .clients
            .get(&client_id)
            .map(|client| {
                client
                    .watches
                    .iter()
                    .map(|(watch_id, path)| (*watch_id, path.clone()))
                    .collect()
            })
            .unwrap_or_default();
        watches.sort_by_key(|(watch_id, _)| *watch_id);
        watches
    }

    pub fn watch_count(&self) -> usize {
        self.clients.values().map(|client| client.watches.len()).sum()
    }

    /// Removes clients that have been silent longer than the timeout and
    /// returns their ids.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(self.timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
