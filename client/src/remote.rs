//! Opponent car as seen locally
//!
//! The opponent publishes its state every few ticks and deliveries can arrive
//! late, duplicated or out of order. [`RemoteCar`] keeps the last accepted
//! state and eases the drawn position toward it once per tick.

use shared::{ParticipantState, Vector2};

/// Fraction of the remaining gap closed per tick.
const SMOOTHING: f32 = 0.25;
/// Gaps below this are closed immediately.
const SNAP_DISTANCE: f32 = 0.5;
/// Gaps above this are treated as a jump and not eased.
const TELEPORT_DISTANCE: f32 = 150.0;

#[derive(Debug, Clone)]
pub struct RemoteCar {
    target: ParticipantState,
    smoothed: Vector2,
    car_type: Option<String>,
    updates: u64,
}

impl RemoteCar {
    pub fn new(start: ParticipantState) -> Self {
        Self {
            smoothed: start.position,
            target: start,
            car_type: None,
            updates: 0,
        }
    }

    /// Accepts a freshly received opponent state. Last write wins.
    pub fn apply(&mut self, state: ParticipantState) {
        if state.level != self.target.level {
            self.smoothed = state.position;
        }
        self.target = state;
        self.updates += 1;
    }

    /// Moves the smoothed position one step toward the latest state.
    pub fn advance(&mut self) {
        let gap = self.smoothed.distance(&self.target.position);
        if gap <= SNAP_DISTANCE || gap > TELEPORT_DISTANCE {
            self.smoothed = self.target.position;
        } else {
            self.smoothed = self.smoothed.lerp(&self.target.position, SMOOTHING);
        }
    }

    /// Where to draw the opponent for a viewer on `local_level`.
    ///
    /// An opponent on another segment is pinned to the top edge when ahead and
    /// the bottom edge when behind. The clamp is evaluated here, not when the
    /// update arrives, so it follows the viewer's own level changes.
    pub fn render_position(&self, local_level: u32, field_height: f32, car_height: f32) -> Vector2 {
        let level = self.target.level;
        if level > local_level {
            Vector2::new(self.smoothed.x, field_height - car_height)
        } else if level < local_level {
            Vector2::new(self.smoothed.x, 0.0)
        } else {
            self.smoothed
        }
    }

    pub fn level(&self) -> u32 {
        self.target.level
    }

    pub fn rotation(&self) -> f32 {
        self.target.rotation
    }

    pub fn latest(&self) -> &ParticipantState {
        &self.target
    }

    /// Skin name, learned at most once.
    pub fn car_type(&self) -> Option<&str> {
        self.car_type.as_deref()
    }

    /// Records the skin name. Returns false if it was already known.
    pub fn set_car_type(&mut self, car_type: String) -> bool {
        if self.car_type.is_some() {
            return false;
        }
        self.car_type = Some(car_type);
        true
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}
