//! Relay network layer: UDP communication and the event loop around the document

use crate::client_manager::ClientManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::document::split_path;
use shared::{Document, Packet, RaceSession, SESSIONS_ROOT};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: u32 },
    Shutdown,
}

/// Messages sent from the relay loop to the sender task
#[derive(Debug)]
pub enum RelayMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

/// Relay owning the shared session document.
///
/// All reads and writes of the document happen on the relay loop, so every
/// watcher observes writes in the order the relay applied them.
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    document: Document,
    writes: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        client_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients, client_timeout))),
            document: Document::new(),
            writes: 0,
            server_tx,
            server_rx,
            relay_tx,
            relay_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that stops the relay with [`ServerMessage::Shutdown`].
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut relay_rx = std::mem::replace(&mut self.relay_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = relay_rx.recv().await {
                match message {
                    RelayMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    RelayMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.relay_tx.send(RelayMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self
            .relay_tx
            .send(RelayMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Current value at `path` in wire form.
    fn encode_at(&self, path: &str) -> Option<String> {
        let value = self.document.get(path)?;
        match serde_json::to_string(value) {
            Ok(text) => Some(text),
            Err(e) => {
                error!("Failed to encode value at {}: {}", path, e);
                None
            }
        }
    }

    /// Sends the new observed value to every watch a write at `path` touches.
    async fn notify(&self, path: &str) {
        let targets = {
            let clients = self.clients.read().await;
            clients.watchers_of(path)
        };

        for target in targets {
            let packet = Packet::Changed {
                watch_id: target.watch_id,
                value: self.encode_at(&target.path),
            };
            self.send_packet(packet, target.addr);
        }
    }

    /// Re-sends the current value of every watch the client holds.
    ///
    /// Datagrams can be lost, and a lost `Changed` would otherwise leave the
    /// client on a stale value until the next write. Watches are last-write
    /// wins and tolerate repeats, so the refresh is harmless.
    async fn resync(&self, client_id: u32, addr: SocketAddr) {
        let watches = {
            let clients = self.clients.read().await;
            clients.watches_of_client(client_id)
        };
        for (watch_id, path) in watches {
            let packet = Packet::Changed {
                watch_id,
                value: self.encode_at(&path),
            };
            self.send_packet(packet, addr);
        }
    }

    fn is_writable(path: &str) -> bool {
        split_path(path).next().is_some()
    }

    /// `GameSessions/<uuid>` itself, which only a whole record may replace.
    fn is_session_root(path: &str) -> bool {
        let mut segments = split_path(path);
        segments.next() == Some(SESSIONS_ROOT)
            && segments.next().is_some()
            && segments.next().is_none()
    }

    /// Applies one packet to the document and client roster
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        if let Packet::Connect { client_version } = packet {
            self.handle_connect(client_version, addr).await;
            return;
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.touch(addr)
        };
        let Some(client_id) = client_id else {
            debug!("Packet from unknown client at {}", addr);
            self.send_packet(
                Packet::Disconnected {
                    reason: "Not connected".to_string(),
                },
                addr,
            );
            return;
        };

        match packet {
            Packet::Set { path, value } => {
                if !Self::is_writable(&path) {
                    warn!("Client {} tried to overwrite the root", client_id);
                    return;
                }
                let value: Value = match serde_json::from_str(&value) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Client {} sent undecodable value for {}: {}", client_id, path, e);
                        return;
                    }
                };
                if Self::is_session_root(&path) {
                    if let Err(e) = RaceSession::from_value(&value) {
                        warn!("Client {} sent a malformed session {}: {}", client_id, path, e);
                        return;
                    }
                    info!("Session {} created by client {}", path, client_id);
                }
                self.document.set(&path, value);
                self.writes += 1;
                self.notify(&path).await;
            }

            Packet::Delete { path } => {
                if !Self::is_writable(&path) {
                    warn!("Client {} tried to delete the root", client_id);
                    return;
                }
                if self.document.delete(&path) {
                    debug!("Client {} deleted {}", client_id, path);
                }
                self.writes += 1;
                self.notify(&path).await;
            }

            Packet::Watch { watch_id, path } => {
                {
                    let mut clients = self.clients.write().await;
                    clients.add_watch(client_id, watch_id, &path);
                }
                let packet = Packet::Changed {
                    watch_id,
                    value: self.encode_at(&path),
                };
                self.send_packet(packet, addr);
            }

            Packet::Unwatch { watch_id } => {
                let mut clients = self.clients.write().await;
                clients.remove_watch(client_id, watch_id);
            }

            Packet::Heartbeat { timestamp } => {
                self.send_packet(Packet::Heartbeat { timestamp }, addr);
                self.resync(client_id, addr).await;
            }

            Packet::Disconnect => {
                let mut clients = self.clients.write().await;
                clients.remove_client(&client_id);
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, addr: SocketAddr) {
        info!("Client connecting from {} (version: {})", addr, client_version);

        let existing_client_id = {
            let clients = self.clients.read().await;
            clients.find_client_by_addr(addr)
        };

        if let Some(existing_id) = existing_client_id {
            info!("Removing existing client {} from {}", existing_id, addr);
            let mut clients = self.clients.write().await;
            clients.remove_client(&existing_id);
        }

        let client_id = {
            let mut clients = self.clients.write().await;
            clients.add_client(addr)
        };

        let response = match client_id {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.send_packet(response, addr);
    }

    async fn log_stats(&self) {
        let (client_count, watch_count) = {
            let clients = self.clients.read().await;
            (clients.len(), clients.watch_count())
        };
        if client_count > 0 {
            debug!(
                "{} clients, {} watches, {} sessions, {} writes",
                client_count,
                watch_count,
                self.document.child_count(SESSIONS_ROOT),
                self.writes
            );
        }
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut stats_interval = interval(STATS_INTERVAL);
        stats_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Relay started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Relay shutting down");
                            self.broadcast_packet(
                                Packet::Disconnected {
                                    reason: "Server shutting down".to_string(),
                                },
                                None,
                            );
                            // let the sender flush the farewell
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    self.log_stats().await;
                },
            }
        }

        Ok(())
    }
}
