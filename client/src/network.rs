//! UDP client for the session store relay
//!
//! [`RemoteStore`] implements [`SessionStore`] by speaking the shared
//! [`Packet`] protocol to a relay server. Operations never wait on the
//! network: packets are queued to a sender task and watch updates arrive on
//! the same unbounded channels the in-memory store uses.
//!
//! Three background tasks run per connection:
//! - **Sender**: drains the outgoing queue, optionally delayed by a fake ping
//! - **Receiver**: routes `Changed` packets to their watch channels
//! - **Heartbeat**: keeps the relay entry alive, detects a silent relay and
//!   re-sends watch registrations the relay has not answered yet
//!
//! The relay refreshes every watch it holds for a client on each heartbeat,
//! so a lost `Changed` is repaired within one heartbeat interval.
//!
//! Losing the relay flips the shared [`ConnectivitySignal`] to offline, which
//! the race treats as a local disconnect.

use crate::services::ConnectivitySignal;
use crate::store::{SessionStore, StoreError, Watch, WatchId};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use shared::{timestamp_millis, Packet, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

struct WatchEntry {
    path: String,
    tx: mpsc::UnboundedSender<Option<Value>>,
    /// Set once the relay has answered the registration.
    answered: bool,
}

type WatchRegistry = Arc<Mutex<HashMap<u32, WatchEntry>>>;

struct Link {
    connected: AtomicBool,
    last_heard: Mutex<Instant>,
    ping_ms: AtomicU64,
    connectivity: ConnectivitySignal,
}

impl Link {
    fn lost(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Lost relay connection: {}", reason);
            self.connectivity.set_online(false);
        }
    }
}

pub struct RemoteStore {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    client_id: u32,
    outgoing: mpsc::UnboundedSender<Packet>,
    watchers: WatchRegistry,
    next_watch_id: AtomicU32,
    link: Arc<Link>,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteStore {
    /// Registers with the relay and starts the connection tasks.
    pub async fn connect(
        server_addr: &str,
        fake_ping_ms: u64,
        connectivity: ConnectivitySignal,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr: SocketAddr = server_addr.parse()?;

        info!("Connecting to relay at {}...", server_addr);
        let hello = serialize(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })?;
        socket.send_to(&hello, server_addr).await?;

        let client_id = timeout(CONNECT_TIMEOUT, await_connected(&socket, server_addr)).await??;
        info!("Connected! Client ID: {}", client_id);
        connectivity.set_online(true);

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            last_heard: Mutex::new(Instant::now()),
            ping_ms: AtomicU64::new(0),
            connectivity,
        });

        let mut store = Self {
            socket,
            server_addr,
            client_id,
            outgoing,
            watchers: Arc::new(Mutex::new(HashMap::new())),
            next_watch_id: AtomicU32::new(1),
            link,
            tasks: Vec::new(),
        };
        store.spawn_network_sender(outgoing_rx, fake_ping_ms);
        store.spawn_network_receiver(fake_ping_ms);
        store.spawn_heartbeat();
        Ok(store)
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }

    /// Round trip of the latest heartbeat echo.
    pub fn ping_ms(&self) -> u64 {
        self.link.ping_ms.load(Ordering::Relaxed)
    }

    fn spawn_network_sender(
        &mut self,
        mut outgoing_rx: mpsc::UnboundedReceiver<Packet>,
        fake_ping_ms: u64,
    ) {
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;

        self.tasks.push(tokio::spawn(async move {
            while let Some(packet) = outgoing_rx.recv().await {
                if fake_ping_ms > 0 {
                    sleep(Duration::from_millis(fake_ping_ms / 2)).await;
                }
                let data = match serialize(&packet) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to serialize packet: {}", e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&data, server_addr).await {
                    error!("Error sending packet: {}", e);
                }
            }
        }));
    }

    fn spawn_network_receiver(&mut self, fake_ping_ms: u64) {
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;
        let watchers = Arc::clone(&self.watchers);
        let link = Arc::clone(&self.link);

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                let (len, addr) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };
                if addr != server_addr {
                    debug!("Ignoring datagram from {}", addr);
                    continue;
                }
                let Ok(packet) = deserialize::<Packet>(&buffer[..len]) else {
                    warn!("Failed to deserialize packet from relay");
                    continue;
                };
                if fake_ping_ms > 0 {
                    sleep(Duration::from_millis(fake_ping_ms / 2)).await;
                }

                *link.last_heard.lock() = Instant::now();
                handle_packet(packet, &watchers, &link);
            }
        }));
    }

    fn spawn_heartbeat(&mut self) {
        let outgoing = self.outgoing.clone();
        let link = Arc::clone(&self.link);
        let watchers = Arc::clone(&self.watchers);

        self.tasks.push(tokio::spawn(async move {
            let mut heartbeat = interval(HEARTBEAT_INTERVAL);

            loop {
                heartbeat.tick().await;
                if !link.connected.load(Ordering::SeqCst) {
                    break;
                }
                if link.last_heard.lock().elapsed() > RELAY_TIMEOUT {
                    link.lost("relay stopped responding");
                    break;
                }
                let packet = Packet::Heartbeat {
                    timestamp: timestamp_millis(),
                };
                if outgoing.send(packet).is_err() {
                    break;
                }

                let unanswered: Vec<Packet> = watchers
                    .lock()
                    .iter()
                    .filter(|(_, entry)| !entry.answered)
                    .map(|(watch_id, entry)| Packet::Watch {
                        watch_id: *watch_id,
                        path: entry.path.clone(),
                    })
                    .collect();
                for packet in unanswered {
                    debug!("Re-sending {:?}", packet);
                    if outgoing.send(packet).is_err() {
                        return;
                    }
                }
            }
        }));
    }

    fn send(&self, packet: Packet) -> Result<(), StoreError> {
        if !self.is_connected() {
            return Err(StoreError::Offline);
        }
        self.outgoing.send(packet).map_err(|_| StoreError::Closed)
    }
}

async fn await_connected(
    socket: &UdpSocket,
    server_addr: SocketAddr,
) -> Result<u32, Box<dyn std::error::Error>> {
    let mut buffer = [0u8; 2048];
    loop {
        let (len, addr) = socket.recv_from(&mut buffer).await?;
        if addr != server_addr {
            continue;
        }
        match deserialize::<Packet>(&buffer[..len]) {
            Ok(Packet::Connected { client_id }) => return Ok(client_id),
            Ok(Packet::Disconnected { reason }) => {
                return Err(format!("relay refused connection: {}", reason).into())
            }
            Ok(other) => debug!("Ignoring {:?} before handshake", other),
            Err(e) => warn!("Failed to deserialize handshake reply: {}", e),
        }
    }
}

fn handle_packet(packet: Packet, watchers: &WatchRegistry, link: &Link) {
    match packet {
        Packet::Changed { watch_id, value } => {
            let value = match value.map(|text| serde_json::from_str::<Value>(&text)) {
                None => None,
                Some(Ok(value)) => Some(value),
                Some(Err(e)) => {
                    warn!("Dropping undecodable value for watch {}: {}", watch_id, e);
                    return;
                }
            };
            let mut watchers = watchers.lock();
            let delivered = match watchers.get_mut(&watch_id) {
                Some(entry) => {
                    entry.answered = true;
                    entry.tx.send(value).is_ok()
                }
                None => {
                    debug!("Update for unknown watch {}", watch_id);
                    return;
                }
            };
            if !delivered {
                watchers.remove(&watch_id);
            }
        }

        Packet::Heartbeat { timestamp } => {
            let rtt = timestamp_millis().saturating_sub(timestamp);
            link.ping_ms.store(rtt, Ordering::Relaxed);
        }

        Packet::Disconnected { reason } => link.lost(&reason),

        Packet::Connected { client_id } => debug!("Duplicate handshake reply ({})", client_id),

        other => warn!("Unexpected packet from relay: {:?}", other),
    }
}

impl SessionStore for RemoteStore {
    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let value = serde_json::to_string(&value)?;
        self.send(Packet::Set {
            path: path.to_string(),
            value,
        })
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.send(Packet::Delete {
            path: path.to_string(),
        })
    }

    fn watch(&self, path: &str) -> Result<Watch, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::Offline);
        }
        let watch_id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let (tx, updates) = mpsc::unbounded_channel();
        self.watchers.lock().insert(
            watch_id,
            WatchEntry {
                path: path.to_string(),
                tx,
                answered: false,
            },
        );

        let packet = Packet::Watch {
            watch_id,
            path: path.to_string(),
        };
        if let Err(e) = self.send(packet) {
            self.watchers.lock().remove(&watch_id);
            return Err(e);
        }
        Ok(Watch {
            id: WatchId::from(watch_id),
            updates,
        })
    }

    fn unwatch(&self, id: WatchId) {
        let Ok(watch_id) = u32::try_from(id) else {
            return;
        };
        if self.watchers.lock().remove(&watch_id).is_some() {
            if let Err(e) = self.send(Packet::Unwatch { watch_id }) {
                debug!("Unwatch {} not sent: {}", watch_id, e);
            }
        }
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        if self.is_connected() {
            match serialize(&Packet::Disconnect) {
                Ok(data) => {
                    if let Err(e) = self.socket.try_send_to(&data, self.server_addr) {
                        debug!("Failed to send disconnect: {}", e);
                    }
                }
                Err(e) => error!("Failed to serialize disconnect: {}", e),
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}
