//! Pre-race handshake
//!
//! The challenger waits in the lobby for the challenged user's answer; the
//! challenged user answers from their list of pending invites. Only these
//! pre-race phases react to challenge notifications.

use crate::services::{
    ChallengeBus, ChallengeEvent, ChallengeEventKind, ChallengeRecord, ConnectivitySignal,
    Directory, DirectoryError,
};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyOutcome {
    /// Enter the race as challenger.
    Accepted(ChallengeRecord),
    Declined,
    /// Connectivity was lost or the wait was cancelled.
    Aborted,
}

pub struct Lobby {
    directory: Arc<dyn Directory>,
    bus: ChallengeBus,
    connectivity: ConnectivitySignal,
}

impl Lobby {
    pub fn new(
        directory: Arc<dyn Directory>,
        bus: ChallengeBus,
        connectivity: ConnectivitySignal,
    ) -> Self {
        Self {
            directory,
            bus,
            connectivity,
        }
    }

    /// Sends a challenge and waits for its answer. The challenge record is
    /// deleted whatever the answer.
    pub async fn challenge<C>(
        &self,
        target: &str,
        message: &str,
        cancel: C,
    ) -> Result<LobbyOutcome, DirectoryError>
    where
        C: Future<Output = ()>,
    {
        let mut events = self.bus.subscribe();
        let record = self.directory.create_challenge(target, message)?;
        Ok(self.wait_with(record, &mut events, cancel).await)
    }

    /// Waits for the answer to an already sent challenge.
    pub async fn wait_for_response<C>(&self, record: ChallengeRecord, cancel: C) -> LobbyOutcome
    where
        C: Future<Output = ()>,
    {
        let mut events = self.bus.subscribe();
        self.wait_with(record, &mut events, cancel).await
    }

    /// Accepts a pending challenge and returns the seed for the race.
    pub fn accept(&self, record: &ChallengeRecord) -> Result<ChallengeRecord, DirectoryError> {
        self.directory.respond_to_challenge(record.uuid, true)?;
        info!("Accepted challenge from {}", record.challenger_tag);
        Ok(ChallengeRecord {
            is_challenger: false,
            ..record.clone()
        })
    }

    pub fn decline(&self, record: &ChallengeRecord) -> Result<(), DirectoryError> {
        self.directory.respond_to_challenge(record.uuid, false)?;
        info!("Declined challenge from {}", record.challenger_tag);
        Ok(())
    }

    async fn wait_with<C>(
        &self,
        record: ChallengeRecord,
        events: &mut broadcast::Receiver<ChallengeEvent>,
        cancel: C,
    ) -> LobbyOutcome
    where
        C: Future<Output = ()>,
    {
        let mut online = self.connectivity.subscribe();
        tokio::pin!(cancel);

        let outcome = if !*online.borrow_and_update() {
            LobbyOutcome::Aborted
        } else {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) if event.uuid == record.uuid => match event.kind {
                            ChallengeEventKind::Accepted => {
                                break LobbyOutcome::Accepted(ChallengeRecord {
                                    is_challenger: true,
                                    ..record.clone()
                                });
                            }
                            ChallengeEventKind::Declined => break LobbyOutcome::Declined,
                            ChallengeEventKind::Received => {}
                        },
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Missed {} challenge events", skipped);
                        }
                        Err(RecvError::Closed) => break LobbyOutcome::Aborted,
                    },
                    changed = online.changed() => {
                        if changed.is_err() || !*online.borrow_and_update() {
                            break LobbyOutcome::Aborted;
                        }
                    }
                    _ = &mut cancel => break LobbyOutcome::Aborted,
                }
            }
        };

        debug!("Challenge {} resolved as {:?}", record.uuid, outcome);
        if let Err(e) = self.directory.delete_challenge(record.uuid) {
            warn!("Failed to delete challenge {}: {}", record.uuid, e);
        }
        outcome
    }
}
