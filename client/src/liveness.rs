use log::warn;

/// Counts ticks since the opponent was last heard from.
///
/// Any opponent presence or position update resets the count. Once the
/// count reaches the threshold the opponent is considered gone; this fires
/// at most once and never after the race has been concluded.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    threshold: u32,
    silent_ticks: u32,
    concluded: bool,
}

impl LivenessMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            silent_ticks: 0,
            concluded: false,
        }
    }

    pub fn observe(&mut self) {
        self.silent_ticks = 0;
    }

    /// Counts one silent tick. Returns true on the tick the opponent times out.
    pub fn tick(&mut self) -> bool {
        if self.concluded {
            return false;
        }
        self.silent_ticks += 1;
        if self.silent_ticks >= self.threshold {
            warn!("No opponent update for {} ticks", self.silent_ticks);
            self.concluded = true;
            return true;
        }
        false
    }

    /// Stops the monitor for good; called once the outcome is known.
    pub fn conclude(&mut self) {
        self.concluded = true;
    }

    pub fn silent_ticks(&self) -> u32 {
        self.silent_ticks
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded
    }
}
