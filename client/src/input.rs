//! Control input folding
//!
//! Gestures arrive between ticks from whatever input layer hosts the race.
//! [`InputManager`] queues them and folds everything received since the
//! previous tick into one [`ControlInput`].

use clap::ValueEnum;
use std::f32::consts::FRAC_PI_2;

/// Gyro accumulator units per radian of steering.
const TILT_SCALE: f32 = 20.0;
/// Drag distance per radian of steering.
const DRAG_SCALE: f32 = 100.0;
pub const MAX_TILT_ROTATION: f32 = FRAC_PI_2;

/// Source of the car's rotation. A per-device setting chosen before the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SteeringMode {
    /// Integrate gyroscope rate samples; rotation follows the accumulated tilt.
    #[default]
    Tilt,
    /// Horizontal drag deltas rotate the car incrementally.
    Drag,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Accelerate,
    Decelerate,
    /// Horizontal drag since the previous drag sample.
    Drag { dx: f32 },
    /// One gyroscope z-rate sample.
    GyroRate { rate: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Steer {
    #[default]
    Hold,
    Absolute(f32),
    Delta(f32),
}

/// Everything the car should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    /// Net speed tier steps, positive to accelerate.
    pub speed_change: i32,
    pub steer: Steer,
}

pub struct InputManager {
    mode: SteeringMode,
    tilt: f32,
    pending: Vec<Gesture>,
}

impl InputManager {
    pub fn new(mode: SteeringMode) -> Self {
        Self {
            mode,
            tilt: 0.0,
            pending: Vec::new(),
        }
    }

    pub fn mode(&self) -> SteeringMode {
        self.mode
    }

    pub fn push(&mut self, gesture: Gesture) {
        self.pending.push(gesture);
    }

    /// Zeroes the tilt accumulator so the race starts pointing straight up.
    pub fn reset_tilt(&mut self) {
        self.tilt = 0.0;
    }

    /// Drops queued gestures without applying them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Folds the gestures queued since the last call.
    pub fn take(&mut self) -> ControlInput {
        let mut input = ControlInput::default();
        let mut drag = 0.0;

        for gesture in self.pending.drain(..) {
            match gesture {
                Gesture::Accelerate => input.speed_change += 1,
                Gesture::Decelerate => input.speed_change -= 1,
                Gesture::Drag { dx } => drag += dx,
                Gesture::GyroRate { rate } => self.tilt += rate,
            }
        }

        input.steer = match self.mode {
            SteeringMode::Tilt => Steer::Absolute(
                (self.tilt / TILT_SCALE).clamp(-MAX_TILT_ROTATION, MAX_TILT_ROTATION),
            ),
            SteeringMode::Drag if drag != 0.0 => Steer::Delta(-drag / DRAG_SCALE),
            SteeringMode::Drag => Steer::Hold,
        };
        input
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(SteeringMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_input_manager_creation() {
        let mut input_manager = InputManager::new(SteeringMode::Drag);
        assert_eq!(input_manager.mode(), SteeringMode::Drag);
        assert_eq!(input_manager.take(), ControlInput::default());
    }

    #[test]
    fn test_speed_gestures_are_netted() {
        let mut input_manager = InputManager::new(SteeringMode::Drag);
        input_manager.push(Gesture::Accelerate);
        input_manager.push(Gesture::Accelerate);
        input_manager.push(Gesture::Decelerate);
        assert_eq!(input_manager.take().speed_change, 1);
        assert_eq!(input_manager.take().speed_change, 0);
    }

    #[test]
    fn test_drag_is_not_persisted() {
        let mut input_manager = InputManager::new(SteeringMode::Drag);
        input_manager.push(Gesture::Drag { dx: 30.0 });
        input_manager.push(Gesture::Drag { dx: 20.0 });

        match input_manager.take().steer {
            Steer::Delta(delta) => assert_approx_eq!(delta, -0.5),
            other => panic!("unexpected steer {:?}", other),
        }
        assert_eq!(input_manager.take().steer, Steer::Hold);
    }

    #[test]
    fn test_tilt_integrates_and_clamps() {
        let mut input_manager = InputManager::new(SteeringMode::Tilt);
        input_manager.push(Gesture::GyroRate { rate: 4.0 });
        input_manager.push(Gesture::GyroRate { rate: 6.0 });
        assert_eq!(input_manager.take().steer, Steer::Absolute(0.5));

        // accumulator persists between ticks
        assert_eq!(input_manager.take().steer, Steer::Absolute(0.5));

        input_manager.push(Gesture::GyroRate { rate: 1000.0 });
        assert_eq!(input_manager.take().steer, Steer::Absolute(MAX_TILT_ROTATION));

        input_manager.push(Gesture::GyroRate { rate: -5000.0 });
        assert_eq!(input_manager.take().steer, Steer::Absolute(-MAX_TILT_ROTATION));
    }

    #[test]
    fn test_reset_tilt() {
        let mut input_manager = InputManager::new(SteeringMode::Tilt);
        input_manager.push(Gesture::GyroRate { rate: 10.0 });
        input_manager.take();
        input_manager.reset_tilt();
        assert_eq!(input_manager.take().steer, Steer::Absolute(0.0));
    }

    #[test]
    fn test_drag_samples_ignored_in_tilt_mode() {
        let mut input_manager = InputManager::new(SteeringMode::Tilt);
        input_manager.push(Gesture::Drag { dx: 50.0 });
        assert_eq!(input_manager.take().steer, Steer::Absolute(0.0));
    }
}
