//! # Race Driver
//!
//! Runs one race for one client. The driver owns the [`Race`] state machine
//! and every effectful collaborator around it:
//!
//! - [`PeerSync`] publishes local fields and queues remote deliveries
//! - [`SessionLifecycle`] creates, flags and deletes the session record
//! - [`CountdownScheduler`] runs the challenger's timed countdown writes
//! - [`InputManager`] folds queued gestures into per-tick control input
//!
//! Each simulation step first applies connectivity changes, then drains the
//! sync channel into the state machine, then advances the race by one tick.
//! Every resulting [`Command`] is executed immediately, in order. Remote
//! deliveries therefore only ever touch race state on the simulation loop.
//!
//! Dropping the driver unsubscribes all observers and aborts a pending
//! countdown, so a discarded race can never be mutated by late callbacks.

use crate::config::RaceConfig;
use crate::countdown::CountdownScheduler;
use crate::input::{ControlInput, Gesture, InputManager, SteeringMode};
use crate::lifecycle::SessionLifecycle;
use crate::race::{Command, Phase, Race, RaceResult};
use crate::services::{CarCatalog, ChallengeRecord, ConnectivitySignal, ImageHandle};
use crate::store::SessionStore;
use crate::sync::{PeerSync, SyncEvent};
use crate::ticker::Ticker;
use log::{debug, info};
use shared::{ParticipantState, Role, Vector2};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Services injected by the application shell.
#[derive(Clone)]
pub struct RaceServices {
    pub store: Arc<dyn SessionStore>,
    pub connectivity: ConnectivitySignal,
    pub catalog: Arc<dyn CarCatalog>,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceView {
    pub phase: Phase,
    pub countdown: u8,
    pub local: ParticipantState,
    pub opponent_position: Vector2,
    pub opponent_rotation: f32,
    pub opponent_skin: Option<ImageHandle>,
}

pub struct RaceDriver {
    race: Race,
    config: RaceConfig,
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn CarCatalog>,
    sync: PeerSync,
    lifecycle: SessionLifecycle,
    countdown: CountdownScheduler,
    input: InputManager,
    gesture_tx: mpsc::UnboundedSender<Gesture>,
    gesture_rx: mpsc::UnboundedReceiver<Gesture>,
    online: watch::Receiver<bool>,
    watch_connectivity: bool,
    opponent_skin: Option<ImageHandle>,
    impacts: u32,
    started: bool,
    result: Option<RaceResult>,
}

impl RaceDriver {
    pub fn new(
        seed: &ChallengeRecord,
        car_type: impl Into<String>,
        steering: SteeringMode,
        config: RaceConfig,
        services: RaceServices,
    ) -> Self {
        let role = if seed.is_challenger {
            Role::Challenger
        } else {
            Role::Challenged
        };
        let uuid = seed.session_id();
        let (gesture_tx, gesture_rx) = mpsc::unbounded_channel();

        Self {
            race: Race::new(role, car_type, config.clone()),
            sync: PeerSync::new(Arc::clone(&services.store), &uuid, role),
            lifecycle: SessionLifecycle::new(Arc::clone(&services.store), &uuid),
            countdown: CountdownScheduler::new(),
            input: InputManager::new(steering),
            gesture_tx,
            gesture_rx,
            online: services.connectivity.subscribe(),
            watch_connectivity: true,
            store: services.store,
            catalog: services.catalog,
            opponent_skin: None,
            impacts: 0,
            started: false,
            result: None,
            config,
        }
    }

    pub fn race(&self) -> &Race {
        &self.race
    }

    pub fn result(&self) -> Option<&RaceResult> {
        self.result.as_ref()
    }

    pub fn impacts(&self) -> u32 {
        self.impacts
    }

    pub fn opponent_skin(&self) -> Option<&ImageHandle> {
        self.opponent_skin.as_ref()
    }

    /// Sender for gestures from the hosting input layer.
    pub fn controller(&self) -> mpsc::UnboundedSender<Gesture> {
        self.gesture_tx.clone()
    }

    pub fn push_gesture(&mut self, gesture: Gesture) {
        self.input.push(gesture);
    }

    /// Subscribes to the session and performs the race entry actions.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!(
            "Entering race {} as {}",
            self.sync.paths().root(),
            self.race.role()
        );

        if !self.config.offline {
            self.sync.subscribe_all();
        }
        let commands = self.race.start();
        self.execute(commands);
    }

    /// One simulation step. Returns the result once the race is over.
    pub fn step(&mut self) -> Option<RaceResult> {
        if !self.started {
            self.start();
        }
        if self.result.is_some() {
            return self.result.clone();
        }

        if self.watch_connectivity {
            match self.online.has_changed() {
                Ok(true) => self.apply_connectivity(),
                Ok(false) => {}
                Err(_) => self.watch_connectivity = false,
            }
        }

        for event in self.sync.drain() {
            if self.result.is_some() {
                break;
            }
            let commands = match event {
                SyncEvent::OpponentPresence(counter) => self.race.on_opponent_presence(counter),
                SyncEvent::OpponentState(state) => self.race.on_opponent_state(state),
                SyncEvent::OpponentCarType(name) => self.race.on_opponent_car_type(name),
                SyncEvent::Countdown(value) => self.race.on_countdown(value),
                SyncEvent::GameOver(flag) => self.race.on_game_over(flag),
            };
            self.execute(commands);
        }
        if self.result.is_some() {
            return self.result.clone();
        }

        while let Ok(gesture) = self.gesture_rx.try_recv() {
            self.input.push(gesture);
        }
        let input = if self.race.phase() == Phase::Racing {
            self.input.take()
        } else {
            self.input.clear();
            ControlInput::default()
        };
        let commands = self.race.tick(&input);
        self.execute(commands);

        self.result.clone()
    }

    /// Drives the race on a fixed-rate ticker until it is over.
    pub async fn run(&mut self) -> RaceResult {
        self.start();
        let mut ticker = Ticker::new(self.config.tick_duration());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(result) = self.step() {
                        return result;
                    }
                }
                changed = self.online.changed(), if self.watch_connectivity => {
                    if changed.is_err() {
                        self.watch_connectivity = false;
                        continue;
                    }
                    self.apply_connectivity();
                    if let Some(result) = self.result.clone() {
                        return result;
                    }
                }
            }
        }
    }

    pub fn view(&self) -> RaceView {
        RaceView {
            phase: self.race.phase(),
            countdown: self.race.countdown(),
            local: self.race.local_state(),
            opponent_position: self.race.opponent_render_position(),
            opponent_rotation: self.race.remote().rotation(),
            opponent_skin: self.opponent_skin.clone(),
        }
    }

    fn apply_connectivity(&mut self) {
        let online = *self.online.borrow_and_update();
        let commands = self.race.on_connectivity(online);
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::CreateSession => self.lifecycle.create_session(self.config.field_width),
                Command::StartCountdown => self.countdown.start(
                    Arc::clone(&self.store),
                    self.sync.paths().countdown(),
                    self.config.countdown_delay,
                    self.config.countdown_step,
                ),
                Command::CancelCountdown => self.countdown.cancel(),
                Command::PublishSelf(state) => self.sync.publish_self(&state),
                Command::PublishPresence(counter) => self.sync.publish_presence_heartbeat(counter),
                Command::PublishCarType(name) => self.sync.publish_car_type(&name),
                Command::PushGameOver => self.lifecycle.push_game_over(),
                Command::ScheduleCleanup => {
                    self.lifecycle.schedule_cleanup(self.config.cleanup_grace())
                }
                Command::DeleteSession => self.lifecycle.delete_session(),
                Command::RevealOpponent(name) => {
                    info!("Opponent drives the {} car", name);
                    self.opponent_skin = Some(self.catalog.resolve_car_asset(&name));
                }
                Command::ResetTilt => self.input.reset_tilt(),
                Command::Impact => {
                    self.impacts += 1;
                    debug!("Wall impact #{}", self.impacts);
                }
                Command::Finish(result) => {
                    self.teardown();
                    self.result = Some(result);
                }
            }
        }
    }

    fn teardown(&mut self) {
        self.sync.unsubscribe_all();
        self.countdown.cancel();
    }
}

impl Drop for RaceDriver {
    fn drop(&mut self) {
        self.teardown();
    }
}
