//! Local car simulation
//!
//! Deterministic per-tick motion of the local car over the current track
//! segment. Each client simulates only its own car; the opponent is known
//! solely through the positions it publishes.

use crate::config::RaceConfig;
use crate::input::{ControlInput, Steer};
use crate::track::Track;
use log::{debug, info};
use shared::{ParticipantState, Rect, Vector2};

/// Discrete speeds in units per tick, selected by accelerate/decelerate.
pub const SPEED_TIERS: [f32; 4] = [0.0, 1.0, 2.0, 3.0];
pub const INITIAL_TIER: usize = 1;
/// Lowest tier that still moves; the ceiling off road and in mud.
pub const CRAWL_TIER: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    /// The car just hit a wall. Reported once per impact.
    Collided,
    /// The car drove off the top of the field onto this level.
    LevelCrossed(u32),
    /// The car reached the finish level. Reported exactly once.
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Car {
    pub position: Vector2,
    /// Radians, zero pointing up the track.
    pub rotation: f32,
    pub level: u32,
    pub speed_index: usize,
    pub width: f32,
    pub height: f32,
    /// Pinned against a side wall or the bottom of the field.
    pub collided: bool,
}

impl Car {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.position, self.width, self.height)
    }

    pub fn selected_speed(&self) -> f32 {
        SPEED_TIERS[self.speed_index]
    }

    pub fn accelerate(&mut self) {
        self.speed_index = (self.speed_index + 1).min(SPEED_TIERS.len() - 1);
    }

    pub fn decelerate(&mut self) {
        self.speed_index = self.speed_index.saturating_sub(1);
    }
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub tick: u32,
    pub car: Car,
    pub track: Track,
    field_width: f32,
    field_height: f32,
    finish_level: u32,
    finished: bool,
}

impl GameState {
    pub fn new(start: &ParticipantState, config: &RaceConfig) -> Self {
        let car = Car {
            position: start.position,
            rotation: start.rotation,
            level: start.level,
            speed_index: INITIAL_TIER,
            width: config.car_width,
            height: config.car_height,
            collided: false,
        };
        Self {
            tick: 0,
            track: Track::for_level(car.level, config.field_width),
            car,
            field_width: config.field_width,
            field_height: config.field_height,
            finish_level: config.finish_level,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply_input(&mut self, input: &ControlInput) {
        for _ in 0..input.speed_change.max(0) {
            self.car.accelerate();
        }
        for _ in 0..input.speed_change.min(0).unsigned_abs() {
            self.car.decelerate();
        }
        match input.steer {
            Steer::Hold => {}
            Steer::Absolute(rotation) => self.car.rotation = rotation,
            Steer::Delta(delta) => self.car.rotation += delta,
        }
    }

    /// Speed the car moves at this tick after the surface penalties.
    pub fn effective_speed(&self) -> f32 {
        let selected = self.car.selected_speed();
        if self.track.on_road(&self.car.bounds()) {
            selected
        } else {
            selected.min(SPEED_TIERS[CRAWL_TIER])
        }
    }

    /// Advances the car by one tick.
    pub fn step(&mut self) -> Vec<MotionEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.tick += 1;

        if self.track.in_mud(&self.car.bounds()) {
            self.car.speed_index = self.car.speed_index.min(CRAWL_TIER);
        }

        let velocity = Vector2::from_heading(self.effective_speed(), self.car.rotation);
        let min_x = self.car.width / 2.0;
        let max_x = (self.field_width - self.car.width / 2.0).max(min_x);
        let moved = self.car.position.add(&velocity);
        self.car.position = Vector2::new(moved.x.max(min_x).min(max_x), moved.y.max(0.0));

        let collided = self.car.position.x == min_x
            || self.car.position.x == max_x
            || self.car.position.y == 0.0;
        if collided && !self.car.collided {
            events.push(MotionEvent::Collided);
        }
        self.car.collided = collided;

        if self.car.position.y > self.field_height {
            self.car.position.y = 0.0;
            self.car.level += 1;
            self.track = Track::for_level(self.car.level, self.field_width);
            debug!("Crossed onto level {}", self.car.level);
            events.push(MotionEvent::LevelCrossed(self.car.level));

            if self.car.level >= self.finish_level {
                self.finished = true;
                info!("Finished all segments after {} ticks", self.tick);
                events.push(MotionEvent::Finished);
            }
        }

        events
    }

    /// Current state in the shape published to the session.
    pub fn snapshot(&self) -> ParticipantState {
        ParticipantState::new(self.car.level, self.car.position, self.car.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::Role;

    fn game_at(x: f32, y: f32) -> GameState {
        let config = RaceConfig::default();
        let mut start = ParticipantState::starting(Role::Challenger, config.field_width);
        start.position = Vector2::new(x, y);
        GameState::new(&start, &config)
    }

    #[test]
    fn test_game_state_creation() {
        let game = game_at(167.5, 0.0);
        assert_eq!(game.tick, 0);
        assert_eq!(game.car.level, 1);
        assert_eq!(game.car.speed_index, INITIAL_TIER);
        assert!(!game.is_finished());
    }

    #[test]
    fn test_speed_tiers_are_bounded() {
        let mut game = game_at(187.5, 10.0);
        for _ in 0..10 {
            game.car.accelerate();
        }
        assert_eq!(game.car.speed_index, 3);
        for _ in 0..10 {
            game.car.decelerate();
        }
        assert_eq!(game.car.speed_index, 0);
    }

    #[test]
    fn test_moves_straight_up_on_road() {
        let mut game = game_at(187.5, 10.0);
        game.car.speed_index = 3;
        game.step();
        assert_approx_eq!(game.car.position.x, 187.5);
        assert_approx_eq!(game.car.position.y, 13.0);
    }

    #[test]
    fn test_off_road_speed_is_crawl() {
        let mut game = game_at(15.0, 300.0);
        game.car.speed_index = 3;
        assert!(!game.track.on_road(&game.car.bounds()));
        assert_approx_eq!(game.effective_speed(), 1.0);

        game.step();
        assert_approx_eq!(game.car.position.y, 301.0);
        // the selected tier is untouched off road
        assert_eq!(game.car.speed_index, 3);
    }

    #[test]
    fn test_stopped_car_stays_stopped_off_road() {
        let mut game = game_at(15.0, 300.0);
        game.car.speed_index = 0;
        assert_approx_eq!(game.effective_speed(), 0.0);
    }

    #[test]
    fn test_mud_clamps_selected_tier_while_overlapping() {
        let mut game = game_at(187.5, 10.0);
        let pit = game.track.mud[0];
        game.car.position = pit.center;
        game.car.speed_index = 3;

        game.step();
        assert_eq!(game.car.speed_index, CRAWL_TIER);

        // accelerating inside the pit is undone on the next tick
        game.car.accelerate();
        game.step();
        assert_eq!(game.car.speed_index, CRAWL_TIER);

        game.car.position = Vector2::new(187.5, 10.0);
        game.car.accelerate();
        game.step();
        assert_eq!(game.car.speed_index, 2);
    }

    #[test]
    fn test_heading_moves_sideways() {
        let mut game = game_at(187.5, 100.0);
        game.car.speed_index = 2;
        game.car.rotation = std::f32::consts::FRAC_PI_2;
        game.step();
        assert_approx_eq!(game.car.position.x, 185.5, 1e-4);
        assert_approx_eq!(game.car.position.y, 100.0, 1e-4);
    }

    #[test]
    fn test_walls_clamp_and_report_once() {
        let mut game = game_at(11.0, 100.0);
        game.car.rotation = std::f32::consts::FRAC_PI_2;
        game.car.speed_index = 3;

        let first = game.step();
        assert_approx_eq!(game.car.position.x, 10.0);
        assert!(first.contains(&MotionEvent::Collided));
        assert!(game.car.collided);

        let second = game.step();
        assert!(!second.contains(&MotionEvent::Collided));
        assert!(game.car.collided);
    }

    #[test]
    fn test_never_below_bottom() {
        let mut game = game_at(187.5, 1.0);
        game.car.rotation = std::f32::consts::PI;
        game.car.speed_index = 3;
        game.step();
        assert_eq!(game.car.position.y, 0.0);
        assert!(game.car.collided);
    }

    #[test]
    fn test_level_wrap_resets_y() {
        let mut game = game_at(187.5, 666.0);
        game.car.speed_index = 2;

        let events = game.step();
        assert_eq!(game.car.level, 2);
        assert_eq!(game.car.position.y, 0.0);
        assert_eq!(game.track.level, 2);
        assert!(events.contains(&MotionEvent::LevelCrossed(2)));
        assert!(!events.contains(&MotionEvent::Finished));
    }

    #[test]
    fn test_exact_field_height_does_not_wrap() {
        let mut game = game_at(187.5, 666.0);
        game.car.speed_index = 1;
        game.step();
        assert_eq!(game.car.level, 1);
        assert_approx_eq!(game.car.position.y, 667.0);
    }

    #[test]
    fn test_finish_reported_exactly_once() {
        let mut game = game_at(200.0, 666.0);
        game.car.level = 3;
        game.track = Track::for_level(3, 375.0);
        game.car.speed_index = 3;

        let events = game.step();
        assert!(events.contains(&MotionEvent::Finished));
        assert!(game.is_finished());
        assert_eq!(game.car.level, 4);

        for _ in 0..300 {
            assert!(game.step().is_empty());
        }
        assert_eq!(game.car.level, 4);
    }

    #[test]
    fn test_apply_input() {
        let mut game = game_at(187.5, 10.0);
        game.apply_input(&ControlInput {
            speed_change: 2,
            steer: Steer::Absolute(0.3),
        });
        assert_eq!(game.car.speed_index, 3);
        assert_approx_eq!(game.car.rotation, 0.3);

        game.apply_input(&ControlInput {
            speed_change: -1,
            steer: Steer::Delta(-0.1),
        });
        assert_eq!(game.car.speed_index, 2);
        assert_approx_eq!(game.car.rotation, 0.2);
    }

    #[test]
    fn test_snapshot_matches_car() {
        let mut game = game_at(187.5, 10.0);
        game.car.rotation = 0.5;
        let snapshot = game.snapshot();
        assert_eq!(snapshot.level, 1);
        assert_eq!(snapshot.position, game.car.position);
        assert_approx_eq!(snapshot.rotation, 0.5);
        assert!(snapshot.car_type.is_none());
    }
}
