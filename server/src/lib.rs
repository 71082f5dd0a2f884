//! # Session Relay Server Library
//!
//! A small UDP relay that hosts the shared session document two racing
//! clients synchronize through. The relay holds no game logic: it applies
//! writes and deletes to a path-addressed JSON [`Document`](shared::Document)
//! and tells every interested watcher about the new value.
//!
//! ## Core Responsibilities
//!
//! ### Document Hosting
//! Writes overwrite the value at a path, creating parents as needed. Deletes
//! remove a subtree. Both are applied in arrival order on a single loop, so
//! all watchers see one consistent history.
//!
//! ### Watch Fan-Out
//! A watch replies immediately with the current value and then again after
//! every write at the watched path, one of its ancestors, or one of its
//! descendants. An absent value is sent as `None`.
//!
//! ### Client Management
//! Clients register with `Connect` and stay alive with heartbeats, which the
//! relay echoes so clients can measure round trip time. Silent clients are
//! dropped together with their watches.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", 32, Duration::from_secs(5)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The relay runs these tasks:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes outgoing packet queue and broadcasts
//! - **Timeout Checker**: Removes clients that stopped sending
//! - **Main Loop**: Applies packets to the document and fans out changes

pub mod client_manager;
pub mod network;
