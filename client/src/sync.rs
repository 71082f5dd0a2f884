//! Peer sync channel
//!
//! Publishes the local participant's fields to the shared session and
//! observes the opponent's. Raw store deliveries are parsed here, at the
//! boundary, and only well-formed values leave as [`SyncEvent`]s.

use crate::store::{SessionStore, Watch};
use log::{debug, info, warn};
use serde_json::Value;
use shared::session::{parse_car_type, parse_countdown, parse_game_over, parse_presence};
use shared::{ParticipantState, Role, SchemaError, SessionPaths};
use std::sync::Arc;

/// A validated change observed in the shared session.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    OpponentPresence(u32),
    OpponentState(ParticipantState),
    OpponentCarType(String),
    Countdown(u8),
    GameOver(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    OpponentPresence,
    OpponentState,
    OpponentCarType,
    Countdown,
    GameOver,
}

impl Channel {
    fn parse(self, value: &Value) -> Result<SyncEvent, SchemaError> {
        Ok(match self {
            Channel::OpponentPresence => SyncEvent::OpponentPresence(parse_presence(value)?),
            Channel::OpponentState => SyncEvent::OpponentState(ParticipantState::from_value(value)?),
            Channel::OpponentCarType => SyncEvent::OpponentCarType(parse_car_type(value)?),
            Channel::Countdown => SyncEvent::Countdown(parse_countdown(value)?),
            Channel::GameOver => SyncEvent::GameOver(parse_game_over(value)?),
        })
    }
}

struct Subscription {
    channel: Channel,
    watch: Watch,
}

pub struct PeerSync {
    store: Arc<dyn SessionStore>,
    role: Role,
    paths: SessionPaths,
    subscriptions: Vec<Subscription>,
}

impl PeerSync {
    pub fn new(store: Arc<dyn SessionStore>, uuid: &str, role: Role) -> Self {
        Self {
            store,
            role,
            paths: SessionPaths::new(uuid),
            subscriptions: Vec::new(),
        }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Overwrites the local participant subtree.
    pub fn publish_self(&self, state: &ParticipantState) {
        self.write(&self.paths.participant(self.role), state.to_value());
    }

    pub fn publish_presence_heartbeat(&self, counter: u32) {
        self.write(&self.paths.presence(self.role), Value::from(counter));
    }

    pub fn publish_car_type(&self, car_type: &str) {
        info!("Publishing car type {}", car_type);
        self.write(&self.paths.car_type(self.role), Value::from(car_type));
    }

    pub fn subscribe_opponent(&mut self) {
        let path = self.paths.participant(self.role.opponent());
        self.subscribe(Channel::OpponentState, &path);
    }

    pub fn subscribe_opponent_presence(&mut self) {
        let path = self.paths.presence(self.role.opponent());
        self.subscribe(Channel::OpponentPresence, &path);
    }

    /// Detaches itself after the first valid value.
    pub fn subscribe_opponent_car_type(&mut self) {
        let path = self.paths.car_type(self.role.opponent());
        self.subscribe(Channel::OpponentCarType, &path);
    }

    pub fn subscribe_countdown(&mut self) {
        let path = self.paths.countdown();
        self.subscribe(Channel::Countdown, &path);
    }

    pub fn subscribe_game_over(&mut self) {
        let path = self.paths.game_over();
        self.subscribe(Channel::GameOver, &path);
    }

    pub fn subscribe_all(&mut self) {
        self.subscribe_opponent_presence();
        self.subscribe_opponent_car_type();
        self.subscribe_countdown();
        self.subscribe_opponent();
        self.subscribe_game_over();
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Takes every delivery queued since the last call, in arrival order per
    /// channel. Absent and malformed values are dropped.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        let mut finished = Vec::new();

        for subscription in &mut self.subscriptions {
            while let Ok(delivery) = subscription.watch.updates.try_recv() {
                let Some(value) = delivery else {
                    debug!("{:?} is absent", subscription.channel);
                    continue;
                };
                match subscription.channel.parse(&value) {
                    Ok(event) => {
                        events.push(event);
                        if subscription.channel == Channel::OpponentCarType {
                            finished.push(subscription.watch.id);
                            break;
                        }
                    }
                    Err(e) => debug!("Discarding {:?} update {}: {}", subscription.channel, value, e),
                }
            }
        }

        for id in finished {
            self.store.unwatch(id);
            self.subscriptions.retain(|s| s.watch.id != id);
        }
        events
    }

    /// Detaches every observer of this session. Safe to call repeatedly.
    pub fn unsubscribe_all(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.store.unwatch(subscription.watch.id);
        }
    }

    fn subscribe(&mut self, channel: Channel, path: &str) {
        match self.store.watch(path) {
            Ok(watch) => {
                debug!("Watching {} as {:?}", path, channel);
                self.subscriptions.push(Subscription { channel, watch });
            }
            Err(e) => warn!("Failed to watch {}: {}", path, e),
        }
    }

    fn write(&self, path: &str, value: Value) {
        debug!("Set {} = {}", path, value);
        if let Err(e) = self.store.set(path, value) {
            warn!("Failed to write {}: {}", path, e);
        }
    }
}

impl Drop for PeerSync {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}
