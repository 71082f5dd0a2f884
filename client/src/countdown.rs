use crate::store::SessionStore;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Values the challenger writes after the initial 4.
pub const COUNTDOWN_SEQUENCE: [u8; 4] = [3, 2, 1, 0];

/// Challenger-side timed countdown writes.
///
/// The sequence runs on its own task so the simulation loop never waits on
/// it. Cancelling aborts the task; any write not yet made is never made.
#[derive(Default)]
pub struct CountdownScheduler {
    handle: Option<JoinHandle<()>>,
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the sequence on the current runtime. Only the first call has
    /// any effect.
    pub fn start(
        &mut self,
        store: Arc<dyn SessionStore>,
        path: String,
        delay: Duration,
        step: Duration,
    ) {
        if self.handle.is_some() {
            debug!("Countdown already scheduled");
            return;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot schedule countdown: {}", e);
                return;
            }
        };

        info!("Countdown kicks off in {:?}", delay);
        self.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            for value in COUNTDOWN_SEQUENCE {
                tokio::time::sleep(step).await;
                debug!("Countdown {}", value);
                if let Err(e) = store.set(&path, Value::from(value)) {
                    warn!("Failed to write countdown {}: {}", value, e);
                }
            }
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                debug!("Cancelling countdown");
            }
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for CountdownScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
