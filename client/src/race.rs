//! # Race Protocol State Machine
//!
//! One [`Race`] exists per client per race. It owns the local runtime state
//! (phase, local and remote car, handshake flags, push and liveness counters,
//! outcome) and decides every transition of the race protocol:
//!
//! ```text
//! WaitingForOpponent --opponent ready (challenger)--> CountingDown
//! WaitingForOpponent --countdown < 4 observed------> CountingDown
//! CountingDown / WaitingForOpponent --countdown 0--> Racing
//! any non-terminal --finish | gameOver | timeout | offline--> Finished
//! ```
//!
//! ## No I/O
//!
//! The machine never touches the session store. Each operation returns the
//! [`Command`]s the caller must carry out, in order. The driver executes them
//! against the sync channel, lifecycle manager and countdown scheduler. This
//! keeps every transition deterministic and directly testable.
//!
//! ## Duplicates and reordering
//!
//! Remote notifications may arrive more than once and out of order. Every
//! transition is guarded by the current phase, countdown observations that
//! would raise the countdown are ignored, and nothing is processed after the
//! race is finished.

use crate::config::RaceConfig;
use crate::game::{GameState, MotionEvent};
use crate::input::ControlInput;
use crate::liveness::LivenessMonitor;
use crate::remote::RemoteCar;
use log::{debug, info};
use shared::{ParticipantState, Role, COUNTDOWN_START};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForOpponent,
    CountingDown,
    Racing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Undetermined,
    Won,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Normal,
    ForfeitByOpponentTimeout,
    ForfeitByLocalDisconnect,
}

/// What the results view receives when the race ends.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceResult {
    pub role: Role,
    pub outcome: Outcome,
    pub reason: TerminationReason,
    /// Local level at the end of the race.
    pub level: u32,
    pub ticks: u64,
}

impl RaceResult {
    pub fn won(&self) -> bool {
        self.outcome == Outcome::Won
    }

    pub fn headline(&self) -> &'static str {
        match (self.won(), self.reason == TerminationReason::Normal) {
            (true, true) => "You Won!",
            (true, false) => "You Won By Forfeit!",
            (false, true) => "You Lost!",
            (false, false) => "You Forfeited!",
        }
    }
}

impl fmt::Display for RaceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} on level {} after {} ticks)",
            self.headline(),
            self.role,
            self.level,
            self.ticks
        )
    }
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write the initial session record. Challenger only.
    CreateSession,
    /// Schedule the 3, 2, 1, 0 countdown writes. Challenger only.
    StartCountdown,
    CancelCountdown,
    /// Overwrite the local participant subtree.
    PublishSelf(ParticipantState),
    /// Write the local presence counter.
    PublishPresence(u32),
    PublishCarType(String),
    PushGameOver,
    /// Delete the session later unless the opponent deletes it first.
    ScheduleCleanup,
    DeleteSession,
    /// The opponent's skin became known.
    RevealOpponent(String),
    /// Zero the tilt steering accumulator.
    ResetTilt,
    /// The local car hit a wall.
    Impact,
    /// Stop observing the session and hand the result to the results view.
    Finish(RaceResult),
}

pub struct Race {
    role: Role,
    config: RaceConfig,
    car_type: String,
    phase: Phase,
    outcome: Outcome,
    reason: TerminationReason,
    opponent_ready: bool,
    countdown: u8,
    game: GameState,
    remote: RemoteCar,
    liveness: LivenessMonitor,
    presence: u32,
    presence_ticker: u32,
    state_ticker: u32,
    ticks: u64,
    racing_entries: u32,
}

impl Race {
    pub fn new(role: Role, car_type: impl Into<String>, config: RaceConfig) -> Self {
        let local = ParticipantState::starting(role, config.field_width);
        let remote = ParticipantState::starting(role.opponent(), config.field_width);
        Self {
            role,
            car_type: car_type.into(),
            phase: Phase::WaitingForOpponent,
            outcome: Outcome::Undetermined,
            reason: TerminationReason::Normal,
            opponent_ready: false,
            countdown: COUNTDOWN_START,
            game: GameState::new(&local, &config),
            remote: RemoteCar::new(remote),
            liveness: LivenessMonitor::new(config.opponent_timeout),
            presence: 0,
            presence_ticker: 0,
            state_ticker: 0,
            ticks: 0,
            racing_entries: 0,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn reason(&self) -> TerminationReason {
        self.reason
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn opponent_ready(&self) -> bool {
        self.opponent_ready
    }

    pub fn countdown(&self) -> u8 {
        self.countdown
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn remote(&self) -> &RemoteCar {
        &self.remote
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of times the race entered `Racing`. Never more than one.
    pub fn racing_entries(&self) -> u32 {
        self.racing_entries
    }

    pub fn car_type(&self) -> &str {
        &self.car_type
    }

    /// Where the opponent should be drawn right now.
    pub fn opponent_render_position(&self) -> shared::Vector2 {
        self.remote.render_position(
            self.game.car.level,
            self.config.field_height,
            self.config.car_height,
        )
    }

    /// Called once on entering the race.
    pub fn start(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.config.offline {
            info!("Offline race: skipping handshake");
            self.countdown = 0;
            self.enter_racing(&mut commands);
            return commands;
        }
        if self.role == Role::Challenger {
            commands.push(Command::CreateSession);
        }
        commands
    }

    pub fn on_opponent_presence(&mut self, counter: u32) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.is_finished() {
            return commands;
        }
        self.liveness.observe();

        if counter > 0 && !self.opponent_ready {
            self.opponent_ready = true;
            info!("Opponent is ready ({})", self.role.opponent());
            commands.push(Command::PublishCarType(self.car_type.clone()));

            if self.role == Role::Challenger && self.phase == Phase::WaitingForOpponent {
                self.phase = Phase::CountingDown;
                commands.push(Command::StartCountdown);
            }
        }
        commands
    }

    pub fn on_opponent_state(&mut self, state: ParticipantState) -> Vec<Command> {
        if self.is_finished() {
            return Vec::new();
        }
        self.liveness.observe();
        self.remote.apply(state);
        Vec::new()
    }

    pub fn on_opponent_car_type(&mut self, car_type: String) -> Vec<Command> {
        if self.remote.set_car_type(car_type.clone()) {
            vec![Command::RevealOpponent(car_type)]
        } else {
            Vec::new()
        }
    }

    pub fn on_countdown(&mut self, value: u8) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.is_finished() {
            return commands;
        }
        if value > self.countdown {
            debug!("Ignoring stale countdown {} (at {})", value, self.countdown);
            return commands;
        }
        self.countdown = value;

        if value < COUNTDOWN_START && self.phase == Phase::WaitingForOpponent {
            self.phase = Phase::CountingDown;
            info!("Countdown started");
        }
        if value == 0 && self.phase == Phase::CountingDown {
            self.enter_racing(&mut commands);
        }
        commands
    }

    pub fn on_game_over(&mut self, game_over: bool) -> Vec<Command> {
        let mut commands = Vec::new();
        if !game_over || self.is_finished() {
            return commands;
        }
        info!("Opponent finished first");
        self.finish(Outcome::Lost, TerminationReason::Normal, &mut commands);
        commands.push(Command::DeleteSession);
        self.push_result(&mut commands);
        commands
    }

    pub fn on_connectivity(&mut self, online: bool) -> Vec<Command> {
        let mut commands = Vec::new();
        if online || self.config.offline || self.is_finished() {
            return commands;
        }
        info!("Lost connectivity, forfeiting");
        self.finish(
            Outcome::Lost,
            TerminationReason::ForfeitByLocalDisconnect,
            &mut commands,
        );
        commands.push(Command::DeleteSession);
        self.push_result(&mut commands);
        commands
    }

    /// Advances the race by one simulation tick.
    pub fn tick(&mut self, input: &ControlInput) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.is_finished() {
            return commands;
        }
        self.ticks += 1;

        if self.phase == Phase::Racing {
            self.game.apply_input(input);
            for event in self.game.step() {
                match event {
                    MotionEvent::Collided => commands.push(Command::Impact),
                    MotionEvent::LevelCrossed(level) => info!("Entered level {}", level),
                    MotionEvent::Finished => {
                        self.finish(Outcome::Won, TerminationReason::Normal, &mut commands);
                        if !self.config.offline {
                            commands.push(Command::PushGameOver);
                            commands.push(Command::ScheduleCleanup);
                        }
                        self.push_result(&mut commands);
                        return commands;
                    }
                }
            }

            self.state_ticker += 1;
            if self.state_ticker >= self.config.state_push_interval {
                self.state_ticker = 0;
                if !self.config.offline {
                    commands.push(Command::PublishSelf(self.local_state()));
                }
            }
        }
        self.remote.advance();

        if self.config.offline {
            return commands;
        }

        self.presence_ticker += 1;
        if self.presence_ticker >= self.config.presence_push_interval {
            self.presence_ticker = 0;
            self.presence += 1;
            commands.push(Command::PublishPresence(self.presence));
        }

        if self.liveness.tick() {
            info!("Opponent timed out");
            self.finish(
                Outcome::Won,
                TerminationReason::ForfeitByOpponentTimeout,
                &mut commands,
            );
            commands.push(Command::DeleteSession);
            self.push_result(&mut commands);
        }
        commands
    }

    /// Local car as published, carrying the skin so overwrites keep it.
    pub fn local_state(&self) -> ParticipantState {
        self.game.snapshot().with_car_type(self.car_type.clone())
    }

    pub fn result(&self) -> Option<RaceResult> {
        if !self.is_finished() {
            return None;
        }
        Some(RaceResult {
            role: self.role,
            outcome: self.outcome,
            reason: self.reason,
            level: self.game.car.level,
            ticks: self.ticks,
        })
    }

    fn enter_racing(&mut self, commands: &mut Vec<Command>) {
        self.phase = Phase::Racing;
        self.racing_entries += 1;
        info!("Racing as {}", self.role);
        commands.push(Command::ResetTilt);
    }

    fn finish(&mut self, outcome: Outcome, reason: TerminationReason, commands: &mut Vec<Command>) {
        self.phase = Phase::Finished;
        self.outcome = outcome;
        self.reason = reason;
        self.liveness.conclude();
        commands.push(Command::CancelCountdown);
    }

    fn push_result(&self, commands: &mut Vec<Command>) {
        if let Some(result) = self.result() {
            info!("Race over: {}", result);
            commands.push(Command::Finish(result));
        }
    }
}
