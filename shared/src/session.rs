//! Typed schema of the shared race session record
//!
//! The session lives in the document store under `GameSessions/<uuid>`:
//!
//! ```text
//! {
//!   "countdown": 4,
//!   "gameOver": 0,
//!   "challenger": { "level": 1, "position": "167.5,0", "rotation": 0.0, "carType": "pink" },
//!   "challenged": { "level": 1, "position": "207.5,0", "rotation": 0.0 },
//!   "presence":   { "challenger": 0, "challenged": 0 }
//! }
//! ```
//!
//! Field names and encodings are the interoperability contract with other
//! clients of the same store. Every value read back from the store goes
//! through the parsers in this module; anything that fails validation is
//! reported as a [`SchemaError`] and must be discarded by the caller.

use crate::geometry::Vector2;
use crate::{COUNTDOWN_START, SESSIONS_ROOT, START_OFFSET};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// Which side of the race a client plays. Fixed for the lifetime of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent the invite; owns session creation and the countdown.
    Challenger,
    /// Accepted the invite.
    Challenged,
}

impl Role {
    pub fn opponent(self) -> Role {
        match self {
            Role::Challenger => Role::Challenged,
            Role::Challenged => Role::Challenger,
        }
    }

    /// Key of this participant's subtree and presence counter in the record.
    pub fn key(self) -> &'static str {
        match self {
            Role::Challenger => "challenger",
            Role::Challenged => "challenged",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Reasons a stored value is rejected at the schema boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("value is absent")]
    Missing,
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },
}

/// One participant's car as published to the shared record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParticipantState {
    pub level: u32,
    #[serde(deserialize_with = "deserialize_position")]
    pub position: Vector2,
    pub rotation: f32,
    #[serde(rename = "carType", default)]
    pub car_type: Option<String>,
}

impl ParticipantState {
    pub fn new(level: u32, position: Vector2, rotation: f32) -> Self {
        Self {
            level,
            position,
            rotation,
            car_type: None,
        }
    }

    /// Starting grid slot: the challenger left of centre, the challenged right of it.
    pub fn starting(role: Role, field_width: f32) -> Self {
        let x = match role {
            Role::Challenger => field_width / 2.0 - START_OFFSET,
            Role::Challenged => field_width / 2.0 + START_OFFSET,
        };
        Self::new(1, Vector2::new(x, 0.0), 0.0)
    }

    pub fn with_car_type(mut self, car_type: impl Into<String>) -> Self {
        self.car_type = Some(car_type.into());
        self
    }

    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        if value.is_null() {
            return Err(SchemaError::Missing);
        }
        let state: ParticipantState =
            serde_json::from_value(value.clone()).map_err(|e| SchemaError::Malformed {
                field: "participant",
                reason: e.to_string(),
            })?;
        state.validate()?;
        Ok(state)
    }

    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "level": self.level,
            "position": format_position(self.position),
            "rotation": self.rotation,
        });
        if let (Some(car_type), Some(map)) = (&self.car_type, value.as_object_mut()) {
            map.insert("carType".to_string(), Value::String(car_type.clone()));
        }
        value
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.level < 1 {
            return Err(SchemaError::OutOfRange {
                field: "level",
                value: self.level.to_string(),
            });
        }
        if !self.rotation.is_finite() {
            return Err(SchemaError::OutOfRange {
                field: "rotation",
                value: self.rotation.to_string(),
            });
        }
        Ok(())
    }
}

/// Heartbeat counters, one per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct Presence {
    pub challenger: u32,
    pub challenged: u32,
}

/// The whole shared record for one race.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RaceSession {
    pub countdown: u8,
    #[serde(rename = "gameOver", deserialize_with = "deserialize_flag")]
    pub game_over: bool,
    pub challenger: ParticipantState,
    pub challenged: ParticipantState,
    pub presence: Presence,
}

impl RaceSession {
    /// Record written once by the challenger when the race scene opens.
    pub fn initial(field_width: f32) -> Self {
        Self {
            countdown: COUNTDOWN_START,
            game_over: false,
            challenger: ParticipantState::starting(Role::Challenger, field_width),
            challenged: ParticipantState::starting(Role::Challenged, field_width),
            presence: Presence::default(),
        }
    }

    /// Parses and validates a whole record, as written on creation.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        if value.is_null() {
            return Err(SchemaError::Missing);
        }
        let session: RaceSession =
            serde_json::from_value(value.clone()).map_err(|e| SchemaError::Malformed {
                field: "session",
                reason: e.to_string(),
            })?;
        if session.countdown > COUNTDOWN_START {
            return Err(SchemaError::OutOfRange {
                field: "countdown",
                value: session.countdown.to_string(),
            });
        }
        session.challenger.validate()?;
        session.challenged.validate()?;
        Ok(session)
    }

    pub fn to_value(&self) -> Value {
        json!({
            "countdown": self.countdown,
            "gameOver": u8::from(self.game_over),
            "challenger": self.challenger.to_value(),
            "challenged": self.challenged.to_value(),
            "presence": {
                "challenger": self.presence.challenger,
                "challenged": self.presence.challenged,
            },
        })
    }
}

/// Store paths of one session's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    root: String,
}

impl SessionPaths {
    pub fn new(uuid: &str) -> Self {
        Self {
            root: format!("{}/{}", SESSIONS_ROOT, uuid),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn countdown(&self) -> String {
        format!("{}/countdown", self.root)
    }

    pub fn game_over(&self) -> String {
        format!("{}/gameOver", self.root)
    }

    pub fn participant(&self, role: Role) -> String {
        format!("{}/{}", self.root, role.key())
    }

    pub fn car_type(&self, role: Role) -> String {
        format!("{}/{}/carType", self.root, role.key())
    }

    pub fn presence(&self, role: Role) -> String {
        format!("{}/presence/{}", self.root, role.key())
    }
}

pub fn format_position(position: Vector2) -> String {
    format!("{},{}", position.x, position.y)
}

/// Parses the `"x,y"` position encoding.
pub fn parse_position(text: &str) -> Result<Vector2, SchemaError> {
    let malformed = |reason: &str| SchemaError::Malformed {
        field: "position",
        reason: format!("{} in {:?}", reason, text),
    };

    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| malformed("missing separator"))?;
    let x: f32 = x.trim().parse().map_err(|_| malformed("bad x"))?;
    let y: f32 = y.trim().parse().map_err(|_| malformed("bad y"))?;

    let position = Vector2::new(x, y);
    if !position.is_finite() {
        return Err(malformed("non-finite coordinate"));
    }
    Ok(position)
}

pub fn parse_countdown(value: &Value) -> Result<u8, SchemaError> {
    let raw = value.as_u64().ok_or_else(|| malformed_or_missing(value, "countdown"))?;
    if raw > u64::from(COUNTDOWN_START) {
        return Err(SchemaError::OutOfRange {
            field: "countdown",
            value: raw.to_string(),
        });
    }
    Ok(raw as u8)
}

pub fn parse_presence(value: &Value) -> Result<u32, SchemaError> {
    let raw = value.as_u64().ok_or_else(|| malformed_or_missing(value, "presence"))?;
    u32::try_from(raw).map_err(|_| SchemaError::OutOfRange {
        field: "presence",
        value: raw.to_string(),
    })
}

/// The game-over flag is stored as `0`/`1`; booleans are accepted too.
pub fn parse_game_over(value: &Value) -> Result<bool, SchemaError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(SchemaError::OutOfRange {
                field: "gameOver",
                value: n.to_string(),
            }),
        },
        other => Err(malformed_or_missing(other, "gameOver")),
    }
}

pub fn parse_car_type(value: &Value) -> Result<String, SchemaError> {
    match value.as_str() {
        Some(name) if !name.trim().is_empty() => Ok(name.to_string()),
        Some(_) => Err(SchemaError::Malformed {
            field: "carType",
            reason: "empty name".to_string(),
        }),
        None => Err(malformed_or_missing(value, "carType")),
    }
}

fn malformed_or_missing(value: &Value, field: &'static str) -> SchemaError {
    if value.is_null() {
        SchemaError::Missing
    } else {
        SchemaError::Malformed {
            field,
            reason: format!("unexpected value {}", value),
        }
    }
}

fn deserialize_position<'de, D>(deserializer: D) -> Result<Vector2, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_position(&text).map_err(D::Error::custom)
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_game_over(&value).map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_role_mapping() {
        assert_eq!(Role::Challenger.opponent(), Role::Challenged);
        assert_eq!(Role::Challenged.opponent(), Role::Challenger);
        assert_eq!(Role::Challenged.key(), "challenged");
    }

    #[test]
    fn test_starting_positions_are_mirrored() {
        let challenger = ParticipantState::starting(Role::Challenger, 400.0);
        let challenged = ParticipantState::starting(Role::Challenged, 400.0);
        assert_eq!(challenger.position, Vector2::new(180.0, 0.0));
        assert_eq!(challenged.position, Vector2::new(220.0, 0.0));
        assert_eq!(challenger.level, 1);
    }

    #[test]
    fn test_parse_position() {
        let p = parse_position("12.5, 300").unwrap();
        assert_approx_eq!(p.x, 12.5);
        assert_approx_eq!(p.y, 300.0);
    }

    #[test]
    fn test_parse_position_rejects_garbage() {
        assert!(parse_position("12.5").is_err());
        assert!(parse_position("a,b").is_err());
        assert!(parse_position("NaN,1").is_err());
        assert!(parse_position("").is_err());
    }

    #[test]
    fn test_participant_field_names() {
        let state = ParticipantState::new(2, Vector2::new(10.0, 20.5), 0.25).with_car_type("pink");
        let value = state.to_value();
        assert_eq!(value["level"], 2);
        assert_eq!(value["position"], "10,20.5");
        assert_eq!(value["carType"], "pink");

        let parsed = ParticipantState::from_value(&value).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_participant_without_car_type_omits_field() {
        let value = ParticipantState::starting(Role::Challenger, 375.0).to_value();
        assert!(value.get("carType").is_none());
    }

    #[test]
    fn test_participant_accepts_integer_rotation() {
        let value = json!({ "level": 1, "position": "1,2", "rotation": 0 });
        let state = ParticipantState::from_value(&value).unwrap();
        assert_eq!(state.rotation, 0.0);
    }

    #[test]
    fn test_participant_rejects_malformed() {
        let bad_position = json!({ "level": 1, "position": "oops", "rotation": 0.0 });
        assert!(ParticipantState::from_value(&bad_position).is_err());

        let zero_level = json!({ "level": 0, "position": "1,1", "rotation": 0.0 });
        assert!(matches!(
            ParticipantState::from_value(&zero_level),
            Err(SchemaError::OutOfRange { field: "level", .. })
        ));

        let partial = json!({ "carType": "pink" });
        assert!(ParticipantState::from_value(&partial).is_err());

        assert_eq!(
            ParticipantState::from_value(&Value::Null),
            Err(SchemaError::Missing)
        );
    }

    #[test]
    fn test_initial_session_document() {
        let session = RaceSession::initial(375.0);
        let value = session.to_value();
        assert_eq!(value["countdown"], 4);
        assert_eq!(value["gameOver"], 0);
        assert_eq!(value["presence"]["challenger"], 0);
        assert_eq!(value["presence"]["challenged"], 0);

        let parsed = RaceSession::from_value(&value).unwrap();
        assert_eq!(parsed, session);
        assert_eq!(parsed.challenged.position.x, 207.5);
    }

    #[test]
    fn test_session_rejects_countdown_out_of_range() {
        let mut value = RaceSession::initial(375.0).to_value();
        value["countdown"] = json!(9);
        assert!(RaceSession::from_value(&value).is_err());
    }

    #[test]
    fn test_scalar_parsers() {
        assert_eq!(parse_countdown(&json!(3)), Ok(3));
        assert!(parse_countdown(&json!(5)).is_err());
        assert!(parse_countdown(&json!(-1)).is_err());
        assert_eq!(parse_countdown(&Value::Null), Err(SchemaError::Missing));

        assert_eq!(parse_presence(&json!(7)), Ok(7));
        assert!(parse_presence(&json!("7")).is_err());

        assert_eq!(parse_game_over(&json!(1)), Ok(true));
        assert_eq!(parse_game_over(&json!(0)), Ok(false));
        assert_eq!(parse_game_over(&json!(true)), Ok(true));
        assert!(parse_game_over(&json!(2)).is_err());

        assert_eq!(parse_car_type(&json!("brown")), Ok("brown".to_string()));
        assert!(parse_car_type(&json!("  ")).is_err());
        assert!(parse_car_type(&json!(3)).is_err());
    }

    #[test]
    fn test_session_paths() {
        let paths = SessionPaths::new("abc");
        assert_eq!(paths.root(), "GameSessions/abc");
        assert_eq!(paths.countdown(), "GameSessions/abc/countdown");
        assert_eq!(paths.game_over(), "GameSessions/abc/gameOver");
        assert_eq!(paths.participant(Role::Challenger), "GameSessions/abc/challenger");
        assert_eq!(paths.car_type(Role::Challenged), "GameSessions/abc/challenged/carType");
        assert_eq!(paths.presence(Role::Challenged), "GameSessions/abc/presence/challenged");
    }
}
