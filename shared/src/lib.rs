use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod document;
pub mod geometry;
pub mod session;

pub use document::Document;
pub use geometry::{Rect, Vector2};
pub use session::{ParticipantState, Presence, RaceSession, Role, SchemaError, SessionPaths};

pub const PROTOCOL_VERSION: u32 = 1;

pub const TICK_RATE: u32 = 60;
pub const STATE_PUSH_INTERVAL_TICKS: u32 = 4;
pub const PRESENCE_PUSH_INTERVAL_TICKS: u32 = 120;
pub const OPPONENT_TIMEOUT_TICKS: u32 = 10 * TICK_RATE;

pub const COUNTDOWN_START: u8 = 4;
pub const TRACK_SEGMENTS: u32 = 3;
pub const FINISH_LEVEL: u32 = TRACK_SEGMENTS + 1;

pub const FIELD_WIDTH: f32 = 375.0;
pub const FIELD_HEIGHT: f32 = 667.0;
pub const CAR_WIDTH: f32 = 20.0;
pub const CAR_HEIGHT: f32 = 36.0;
pub const START_OFFSET: f32 = 20.0;

pub const SESSIONS_ROOT: &str = "GameSessions";

/// Datagrams exchanged with the session store relay.
///
/// JSON values travel as text because bincode cannot carry self-describing
/// `serde_json::Value`s.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Set {
        path: String,
        value: String,
    },
    Delete {
        path: String,
    },
    Watch {
        watch_id: u32,
        path: String,
    },
    Unwatch {
        watch_id: u32,
    },
    Heartbeat {
        timestamp: u64,
    },
    Disconnect,

    Connected {
        client_id: u32,
    },
    Changed {
        watch_id: u32,
        value: Option<String>,
    },
    Disconnected {
        reason: String,
    },
}

/// Milliseconds since the unix epoch, zero if the clock is before it.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
