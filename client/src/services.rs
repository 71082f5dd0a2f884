//! Collaborators outside the race core
//!
//! The race only needs narrow views of the surrounding application: the
//! challenge directory, the challenge notification bus, the car skin catalog
//! and the connectivity signal. Each is a constructed service handed to the
//! driver through [`RaceServices`](crate::driver::RaceServices); none of them
//! is process-global.

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("challenge {0} not found")]
    NotFound(Uuid),
    #[error("challenge {0} was already answered")]
    AlreadyAnswered(Uuid),
    #[error("cannot challenge yourself")]
    SelfChallenge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    Declined,
}

/// Seed of one race, as seen by one of its two participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub uuid: Uuid,
    pub challenger_tag: String,
    pub challenged_tag: String,
    pub is_challenger: bool,
}

impl ChallengeRecord {
    /// Key of the shared race session.
    pub fn session_id(&self) -> String {
        self.uuid.to_string()
    }

    pub fn opponent_tag(&self) -> &str {
        if self.is_challenger {
            &self.challenged_tag
        } else {
            &self.challenger_tag
        }
    }
}

pub trait Directory: Send + Sync {
    fn create_challenge(&self, target: &str, message: &str)
        -> Result<ChallengeRecord, DirectoryError>;

    fn respond_to_challenge(&self, uuid: Uuid, accepted: bool) -> Result<(), DirectoryError>;

    /// Deleting an unknown challenge succeeds.
    fn delete_challenge(&self, uuid: Uuid) -> Result<(), DirectoryError>;

    /// Challenges addressed to the local user that are still unanswered.
    fn pending_challenges(&self) -> Result<Vec<ChallengeRecord>, DirectoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeEventKind {
    Received,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeEvent {
    pub kind: ChallengeEventKind,
    pub uuid: Uuid,
}

/// Fan-out of challenge notifications. Subscribers filter by uuid.
#[derive(Debug, Clone)]
pub struct ChallengeBus {
    tx: broadcast::Sender<ChallengeEvent>,
}

impl ChallengeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn publish(&self, kind: ChallengeEventKind, uuid: Uuid) {
        debug!("Challenge event {:?} for {}", kind, uuid);
        // no subscribers is fine
        let _ = self.tx.send(ChallengeEvent { kind, uuid });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChallengeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChallengeBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct StoredChallenge {
    challenger_tag: String,
    challenged_tag: String,
    message: String,
    status: ChallengeStatus,
}

/// Directory kept in memory. Several users can share one backing map by
/// deriving views with [`InMemoryDirectory::for_user`].
#[derive(Clone)]
pub struct InMemoryDirectory {
    me: String,
    challenges: Arc<Mutex<HashMap<Uuid, StoredChallenge>>>,
    bus: ChallengeBus,
}

impl InMemoryDirectory {
    pub fn new(me: impl Into<String>, bus: ChallengeBus) -> Self {
        Self {
            me: me.into(),
            challenges: Arc::new(Mutex::new(HashMap::new())),
            bus,
        }
    }

    /// Another user's view of the same challenges.
    pub fn for_user(&self, me: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            challenges: Arc::clone(&self.challenges),
            bus: self.bus.clone(),
        }
    }

    pub fn status(&self, uuid: Uuid) -> Option<ChallengeStatus> {
        self.challenges.lock().get(&uuid).map(|c| c.status)
    }

    pub fn message(&self, uuid: Uuid) -> Option<String> {
        self.challenges.lock().get(&uuid).map(|c| c.message.clone())
    }

    fn record(&self, uuid: Uuid, challenge: &StoredChallenge) -> ChallengeRecord {
        ChallengeRecord {
            uuid,
            challenger_tag: challenge.challenger_tag.clone(),
            challenged_tag: challenge.challenged_tag.clone(),
            is_challenger: challenge.challenger_tag == self.me,
        }
    }
}

impl Directory for InMemoryDirectory {
    fn create_challenge(
        &self,
        target: &str,
        message: &str,
    ) -> Result<ChallengeRecord, DirectoryError> {
        if target == self.me {
            return Err(DirectoryError::SelfChallenge);
        }
        let uuid = Uuid::new_v4();
        let challenge = StoredChallenge {
            challenger_tag: self.me.clone(),
            challenged_tag: target.to_string(),
            message: message.to_string(),
            status: ChallengeStatus::Pending,
        };
        let record = self.record(uuid, &challenge);
        self.challenges.lock().insert(uuid, challenge);

        info!("{} challenged {} ({})", self.me, target, uuid);
        self.bus.publish(ChallengeEventKind::Received, uuid);
        Ok(record)
    }

    fn respond_to_challenge(&self, uuid: Uuid, accepted: bool) -> Result<(), DirectoryError> {
        {
            let mut challenges = self.challenges.lock();
            let challenge = challenges
                .get_mut(&uuid)
                .ok_or(DirectoryError::NotFound(uuid))?;
            if challenge.status != ChallengeStatus::Pending {
                return Err(DirectoryError::AlreadyAnswered(uuid));
            }
            challenge.status = if accepted {
                ChallengeStatus::Accepted
            } else {
                ChallengeStatus::Declined
            };
        }

        let kind = if accepted {
            ChallengeEventKind::Accepted
        } else {
            ChallengeEventKind::Declined
        };
        self.bus.publish(kind, uuid);
        Ok(())
    }

    fn delete_challenge(&self, uuid: Uuid) -> Result<(), DirectoryError> {
        if self.challenges.lock().remove(&uuid).is_some() {
            debug!("Challenge {} deleted", uuid);
        }
        Ok(())
    }

    fn pending_challenges(&self) -> Result<Vec<ChallengeRecord>, DirectoryError> {
        Ok(self
            .challenges
            .lock()
            .iter()
            .filter(|(_, c)| c.challenged_tag == self.me && c.status == ChallengeStatus::Pending)
            .map(|(uuid, c)| self.record(*uuid, c))
            .collect())
    }
}

/// Opaque reference to a skin image owned by the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub name: String,
    pub resource: String,
}

pub trait CarCatalog: Send + Sync {
    fn resolve_car_asset(&self, name: &str) -> ImageHandle;
}

pub const BASE_CARS: [&str; 4] = ["light blue", "brown", "green", "pink"];
pub const DEFAULT_CAR: &str = BASE_CARS[0];

/// The base skins this client can draw.
#[derive(Debug, Clone)]
pub struct Garage {
    cars: Vec<String>,
}

impl Garage {
    pub fn new() -> Self {
        Self {
            cars: BASE_CARS.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cars.iter().any(|car| car == name)
    }
}

impl Default for Garage {
    fn default() -> Self {
        Self::new()
    }
}

impl CarCatalog for Garage {
    /// Unknown names fall back to the default skin.
    fn resolve_car_asset(&self, name: &str) -> ImageHandle {
        let name = if self.contains(name) { name } else { DEFAULT_CAR };
        ImageHandle {
            name: name.to_string(),
            resource: format!("cars/{}.png", name.replace(' ', "_")),
        }
    }
}

/// Observable online flag.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
            *current = online;
            true
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}
