use shared::{
    CAR_HEIGHT, CAR_WIDTH, FIELD_HEIGHT, FIELD_WIDTH, FINISH_LEVEL, OPPONENT_TIMEOUT_TICKS,
    PRESENCE_PUSH_INTERVAL_TICKS, STATE_PUSH_INTERVAL_TICKS, TICK_RATE,
};
use std::time::Duration;

/// Tunables for one race.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Ticks between pushes of the local car state.
    pub state_push_interval: u32,
    /// Ticks between presence heartbeats.
    pub presence_push_interval: u32,
    /// Ticks without any opponent update before the opponent forfeits.
    pub opponent_timeout: u32,
    /// Wait before the challenger writes the first countdown value.
    pub countdown_delay: Duration,
    /// Wait between countdown values.
    pub countdown_step: Duration,
    pub field_width: f32,
    pub field_height: f32,
    pub car_width: f32,
    pub car_height: f32,
    /// Level whose reach wins the race.
    pub finish_level: u32,
    /// No shared session: countdown is skipped and nobody can forfeit.
    pub offline: bool,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            state_push_interval: STATE_PUSH_INTERVAL_TICKS,
            presence_push_interval: PRESENCE_PUSH_INTERVAL_TICKS,
            opponent_timeout: OPPONENT_TIMEOUT_TICKS,
            countdown_delay: Duration::from_secs(2),
            countdown_step: Duration::from_secs(1),
            field_width: FIELD_WIDTH,
            field_height: FIELD_HEIGHT,
            car_width: CAR_WIDTH,
            car_height: CAR_HEIGHT,
            finish_level: FINISH_LEVEL,
            offline: false,
        }
    }
}

impl RaceConfig {
    /// Changes the tick rate, keeping the liveness timeout at ten seconds of ticks.
    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        self.opponent_timeout = self.opponent_timeout / self.tick_rate.max(1) * tick_rate;
        self.tick_rate = tick_rate;
        self
    }

    pub fn with_field(mut self, width: f32, height: f32) -> Self {
        self.field_width = width;
        self.field_height = height;
        self
    }

    pub fn with_opponent_timeout(mut self, ticks: u32) -> Self {
        self.opponent_timeout = ticks;
        self
    }

    pub fn with_countdown(mut self, delay: Duration, step: Duration) -> Self {
        self.countdown_delay = delay;
        self.countdown_step = step;
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    /// How long a normal winner leaves the session up for the loser to
    /// delete it. One liveness window, after which the loser has concluded.
    pub fn cleanup_grace(&self) -> Duration {
        self.tick_duration() * self.opponent_timeout
    }
}
