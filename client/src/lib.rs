//! # Duel Race Client Library
//!
//! Client-side implementation of a two-player race that is kept in sync
//! through a shared, path-addressed session store. Neither client is
//! authoritative: each simulates its own car, publishes it, and watches the
//! opponent's published state.
//!
//! ## Architecture Overview
//!
//! ### Local Simulation
//! Every client runs its own fixed-rate motion simulation. Inputs are applied
//! immediately and never wait on the network, so the local car always feels
//! responsive regardless of latency.
//!
//! ### Peer Synchronization
//! Local state is pushed to the store at a fixed cadence and a presence
//! counter doubles as a heartbeat. The opponent's pushes are smoothed before
//! display, and a liveness monitor declares a forfeit when they stop.
//!
//! ### Session Lifecycle
//! The challenger creates the session record and drives the countdown. The
//! first finisher flags `gameOver`; the loser, or the survivor of a forfeit,
//! deletes the record.
//!
//! ## Module Organization
//!
//! ### Simulation (`game`, `track`, `input`, `remote`)
//! - Car motion, wall clamping and level transitions
//! - Per-level road and mud layouts
//! - Gesture folding for tilt and drag steering
//! - Smoothed display of the opponent car
//!
//! ### Race Control (`race`, `liveness`, `driver`)
//! - Pure state machine from handshake to result
//! - Opponent timeout detection
//! - Effect execution and the fixed-rate loop
//!
//! ### Store Access (`store`, `sync`, `lifecycle`, `countdown`, `network`)
//! - The store abstraction and an in-memory implementation
//! - Typed publish and subscribe over session paths
//! - Session creation, game over flag and deletion
//! - The challenger's timed countdown writes
//! - A UDP client for the relay server
//!
//! ### Pre-Race (`lobby`, `services`)
//! - Challenge handshake between two users
//! - Directory, car catalog and connectivity collaborators
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::RaceConfig;
//! use client::driver::{RaceDriver, RaceServices};
//! use client::input::SteeringMode;
//! use client::services::{ChallengeRecord, ConnectivitySignal, Garage};
//! use client::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let seed = ChallengeRecord {
//!         uuid: uuid::Uuid::new_v4(),
//!         challenger_tag: "alice".to_string(),
//!         challenged_tag: "bob".to_string(),
//!         is_challenger: true,
//!     };
//!     let services = RaceServices {
//!         store: Arc::new(MemoryStore::new()),
//!         connectivity: ConnectivitySignal::new(true),
//!         catalog: Arc::new(Garage::new()),
//!     };
//!
//!     let mut driver = RaceDriver::new(
//!         &seed,
//!         "pink",
//!         SteeringMode::Tilt,
//!         RaceConfig::default(),
//!         services,
//!     );
//!     let result = driver.run().await;
//!     println!("{}", result.headline());
//! }
//! ```

pub mod config;
pub mod countdown;
pub mod driver;
pub mod game;
pub mod input;
pub mod lifecycle;
pub mod liveness;
pub mod lobby;
pub mod network;
pub mod race;
pub mod remote;
pub mod services;
pub mod store;
pub mod sync;
pub mod ticker;
pub mod track;
