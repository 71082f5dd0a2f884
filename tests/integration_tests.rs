//! Integration tests for the two-player race protocol
//!
//! These tests run complete races between two drivers sharing one store,
//! either in process or through the UDP relay.

use client::config::RaceConfig;
use client::driver::{RaceDriver, RaceServices};
use client::input::{Gesture, SteeringMode};
use client::race::{Outcome, Phase, RaceResult, TerminationReason};
use client::services::{ChallengeRecord, ConnectivitySignal, Garage};
use client::store::{MemoryStore, SessionStore};
use serde_json::json;
use shared::Role;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

const SESSION: Uuid = Uuid::from_u128(0x5eed);

fn seed(is_challenger: bool) -> ChallengeRecord {
    ChallengeRecord {
        uuid: SESSION,
        challenger_tag: "alice".to_string(),
        challenged_tag: "bob".to_string(),
        is_challenger,
    }
}

fn root() -> String {
    format!("GameSessions/{}", SESSION)
}

fn services(store: Arc<dyn SessionStore>) -> RaceServices {
    RaceServices {
        store,
        connectivity: ConnectivitySignal::new(true),
        catalog: Arc::new(Garage::new()),
    }
}

fn driver(
    record: &ChallengeRecord,
    car: &str,
    config: RaceConfig,
    services: RaceServices,
) -> RaceDriver {
    RaceDriver::new(record, car, SteeringMode::Drag, config, services)
}

/// Two drivers in one process plus the speed plan that decides the winner:
/// once racing, the challenger floors it and the challenged car stops dead.
struct Duel {
    challenger: RaceDriver,
    challenged: RaceDriver,
    tuned: [bool; 2],
}

impl Duel {
    fn new(store: Arc<dyn SessionStore>, config: RaceConfig) -> Self {
        Self {
            challenger: driver(&seed(true), "pink", config.clone(), services(store.clone())),
            challenged: driver(&seed(false), "green", config, services(store)),
            tuned: [false; 2],
        }
    }

    fn with_services(
        challenger: RaceServices,
        challenged: RaceServices,
        config: RaceConfig,
    ) -> Self {
        Self {
            challenger: driver(&seed(true), "pink", config.clone(), challenger),
            challenged: driver(&seed(false), "green", config, challenged),
            tuned: [false; 2],
        }
    }

    fn steer(&mut self) {
        if !self.tuned[0] && self.challenger.race().phase() == Phase::Racing {
            self.tuned[0] = true;
            self.challenger.push_gesture(Gesture::Accelerate);
            self.challenger.push_gesture(Gesture::Accelerate);
        }
        if !self.tuned[1] && self.challenged.race().phase() == Phase::Racing {
            self.tuned[1] = true;
            self.challenged.push_gesture(Gesture::Decelerate);
        }
    }

    /// Steps both sides until both have a result, sleeping one tick between
    /// steps so timer driven work keeps up.
    async fn run(&mut self, tick: Duration, max_steps: usize) -> (RaceResult, RaceResult) {
        for _ in 0..max_steps {
            self.steer();
            let a = self.challenger.step();
            let b = self.challenged.step();
            if let (Some(a), Some(b)) = (a, b) {
                return (a, b);
            }
            sleep(tick).await;
        }
        panic!(
            "race did not finish: {:?} / {:?}",
            self.challenger.race().phase(),
            self.challenged.race().phase()
        );
    }
}

/// IN-PROCESS RACES
mod race_tests {
    use super::*;

    /// Tests a complete race decided by reaching the finish level
    #[tokio::test(start_paused = true)]
    async fn normal_finish_deletes_session_once() {
        let store = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let mut duel = Duel::new(store.clone(), config.clone());

        let (winner, loser) = duel.run(config.tick_duration(), 5000).await;

        assert_eq!(winner.role, Role::Challenger);
        assert_eq!(winner.outcome, Outcome::Won);
        assert_eq!(winner.reason, TerminationReason::Normal);
        assert_eq!(winner.headline(), "You Won!");
        assert_eq!(winner.level, config.finish_level);

        assert_eq!(loser.outcome, Outcome::Lost);
        assert_eq!(loser.reason, TerminationReason::Normal);
        assert_eq!(loser.headline(), "You Lost!");

        // the winner's cleanup reads the deletion and stands down
        sleep(config.cleanup_grace() * 2).await;
        assert!(!store.exists(&root()));
        assert_eq!(store.delete_count(&root()), 1);
        assert_eq!(store.watcher_count(), 0);
    }

    /// Tests that a winner whose opponent also believes it won still
    /// removes the session
    #[tokio::test(start_paused = true)]
    async fn winner_cleans_up_when_opponent_never_deletes() {
        let store = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let mut challenger = driver(&seed(true), "pink", config.clone(), services(store.clone()));
        let presence = format!("{}/presence/challenged", root());

        let mut tuned = false;
        let mut steps: u32 = 0;
        let result = loop {
            if steps % 100 == 0 {
                store.set(&presence, json!(steps / 100 + 1)).unwrap();
            }
            if !tuned && challenger.race().phase() == Phase::Racing {
                tuned = true;
                challenger.push_gesture(Gesture::Accelerate);
                challenger.push_gesture(Gesture::Accelerate);
            }
            if let Some(result) = challenger.step() {
                break result;
            }
            sleep(config.tick_duration()).await;
            steps += 1;
            assert!(steps < 5000, "race did not finish");
        };
        assert_eq!(result.outcome, Outcome::Won);
        assert_eq!(result.reason, TerminationReason::Normal);

        // the opponent crossed too and pushed its own flag instead of deleting
        store.set(&format!("{}/gameOver", root()), json!(1)).unwrap();
        sleep(config.cleanup_grace() / 2).await;
        assert!(store.exists(&root()));

        sleep(config.cleanup_grace()).await;
        assert!(!store.exists(&root()));
        assert_eq!(store.delete_count(&root()), 1);
        assert_eq!(store.watcher_count(), 0);
    }

    /// Tests that each side reveals the other's car skin
    #[tokio::test(start_paused = true)]
    async fn both_sides_learn_opponent_car() {
        let store = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let mut duel = Duel::new(store.clone(), config.clone());
        duel.run(config.tick_duration(), 5000).await;

        assert_eq!(duel.challenger.opponent_skin().unwrap().name, "green");
        assert_eq!(duel.challenged.opponent_skin().unwrap().name, "pink");
    }

    /// Tests that the countdown waits for the opponent to show up
    #[tokio::test(start_paused = true)]
    async fn countdown_waits_for_opponent_presence() {
        let store = Arc::new(MemoryStore::new());
        let config = RaceConfig::default().with_opponent_timeout(10_000);
        let mut duel = Duel::new(store.clone(), config.clone());
        let countdown = format!("{}/countdown", root());

        // 2s delay plus three 1s steps, with room to spare
        for _ in 0..400 {
            duel.challenger.step();
            sleep(config.tick_duration()).await;
        }
        assert_eq!(duel.challenger.race().phase(), Phase::WaitingForOpponent);
        assert!(!duel.challenger.race().opponent_ready());
        assert_eq!(store.get(&countdown), Some(json!(4)));

        let (winner, _) = duel.run(config.tick_duration(), 5000).await;
        assert!(winner.won());
        assert_eq!(duel.challenger.race().racing_entries(), 1);
        assert_eq!(duel.challenged.race().racing_entries(), 1);
    }

    /// Tests that a silent opponent forfeits after the liveness window
    #[tokio::test(start_paused = true)]
    async fn stalled_opponent_forfeits_after_timeout() {
        let store = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let mut duel = Duel::new(store.clone(), config.clone());

        // get both sides racing, then let the challenged app go silent
        let mut steps = 0;
        while duel.challenged.race().phase() != Phase::Racing {
            duel.challenger.step();
            duel.challenged.step();
            sleep(config.tick_duration()).await;
            steps += 1;
            assert!(steps < 1000, "never started racing");
        }
        // slow the challenger so the race cannot end normally first
        duel.challenger.push_gesture(Gesture::Decelerate);
        let already_silent = duel.challenger.race().liveness().silent_ticks();

        let mut silent_steps = 0;
        let result = loop {
            silent_steps += 1;
            if let Some(result) = duel.challenger.step() {
                break result;
            }
            sleep(config.tick_duration()).await;
            assert!(silent_steps < 700, "opponent never timed out");
        };

        assert!(silent_steps <= 601);
        assert!(silent_steps + already_silent >= 600);
        assert_eq!(result.outcome, Outcome::Won);
        assert_eq!(result.reason, TerminationReason::ForfeitByOpponentTimeout);
        assert_eq!(result.headline(), "You Won By Forfeit!");
        assert!(!store.exists(&root()));
        assert_eq!(store.delete_count(&root()), 1);
    }

    /// Tests that losing connectivity forfeits the local side
    #[tokio::test(start_paused = true)]
    async fn local_disconnect_forfeits_and_opponent_wins_by_timeout() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let challenged_services = services(store.clone());
        let challenged_link = challenged_services.connectivity.clone();
        let mut duel = Duel::with_services(
            services(store.clone()),
            challenged_services,
            config.clone(),
        );

        while duel.challenged.race().phase() != Phase::Racing {
            duel.challenger.step();
            duel.challenged.step();
            sleep(config.tick_duration()).await;
        }
        duel.challenger.push_gesture(Gesture::Decelerate);

        challenged_link.set_online(false);
        let lost = duel.challenged.step().unwrap();
        assert_eq!(lost.outcome, Outcome::Lost);
        assert_eq!(lost.reason, TerminationReason::ForfeitByLocalDisconnect);
        assert_eq!(lost.headline(), "You Forfeited!");
        assert!(!store.exists(&root()));

        let mut steps = 0;
        let won = loop {
            if let Some(result) = duel.challenger.step() {
                break result;
            }
            sleep(config.tick_duration()).await;
            steps += 1;
            assert!(steps < 700, "opponent never timed out");
        };
        assert_eq!(won.reason, TerminationReason::ForfeitByOpponentTimeout);
        assert_eq!(store.delete_count(&root()), 2);
    }

    /// Tests the protocol under duplicated and reordered deliveries
    #[tokio::test(start_paused = true)]
    async fn race_survives_duplicated_and_reordered_deliveries() {
        for seed in [1, 7, 42] {
            let store = Arc::new(MemoryStore::with_chaos(seed, 0.3, 0.3));
            let config = RaceConfig::default();
            let mut duel = Duel::new(store.clone(), config.clone());

            let (winner, loser) = duel.run(config.tick_duration(), 6000).await;

            assert!(winner.won(), "seed {}", seed);
            assert!(!loser.won(), "seed {}", seed);
            assert_eq!(duel.challenger.race().racing_entries(), 1);
            assert_eq!(duel.challenged.race().racing_entries(), 1);
            assert!(!store.exists(&root()));
        }
    }

    /// Tests that a finished race ignores anything written afterwards
    #[tokio::test(start_paused = true)]
    async fn late_writes_do_not_change_result() {
        let store = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let mut duel = Duel::new(store.clone(), config.clone());
        let (winner, loser) = duel.run(config.tick_duration(), 5000).await;

        store.set(&format!("{}/gameOver", root()), json!(1)).unwrap();
        store.set(&format!("{}/countdown", root()), json!(0)).unwrap();

        assert_eq!(duel.challenger.step(), Some(winner));
        assert_eq!(duel.challenged.step(), Some(loser));
    }
}

/// PRE-RACE HANDSHAKE
mod lobby_tests {
    use super::*;
    use client::lobby::{Lobby, LobbyOutcome};
    use client::services::{ChallengeBus, Directory, InMemoryDirectory};

    /// Tests an accepted challenge flowing into a finished race
    #[tokio::test(start_paused = true)]
    async fn accepted_challenge_seeds_race() {
        let bus = ChallengeBus::new();
        let alice = InMemoryDirectory::new("alice", bus.clone());
        let bob = alice.for_user("bob");
        let bob_directory: Arc<dyn Directory> = Arc::new(bob);
        let alice_lobby = Lobby::new(Arc::new(alice), bus.clone(), ConnectivitySignal::new(true));
        let bob_lobby = Lobby::new(bob_directory.clone(), bus, ConnectivitySignal::new(true));

        let answer = async {
            loop {
                if let Some(record) = bob_directory.pending_challenges().unwrap().pop() {
                    return bob_lobby.accept(&record).unwrap();
                }
                tokio::task::yield_now().await;
            }
        };
        let (outcome, bob_seed) =
            tokio::join!(alice_lobby.challenge("bob", "race me", std::future::pending()), answer);
        let alice_seed = match outcome.unwrap() {
            LobbyOutcome::Accepted(record) => record,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(alice_seed.session_id(), bob_seed.session_id());

        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let config = RaceConfig::default();
        let mut challenger = driver(&alice_seed, "pink", config.clone(), services(store.clone()));
        let mut challenged = driver(&bob_seed, "brown", config.clone(), services(store));
        assert_eq!(challenger.race().role(), Role::Challenger);
        assert_eq!(challenged.race().role(), Role::Challenged);

        for _ in 0..600 {
            challenger.step();
            challenged.step();
            sleep(config.tick_duration()).await;
        }
        assert_eq!(challenger.race().phase(), Phase::Racing);
        assert_eq!(challenged.race().phase(), Phase::Racing);
    }
}

/// RELAY ROUND TRIPS
mod relay_tests {
    use super::*;
    use client::network::RemoteStore;
    use server::network::{Server, ServerMessage};

    async fn start_relay() -> (String, tokio::sync::mpsc::UnboundedSender<ServerMessage>) {
        let mut server = Server::new("127.0.0.1:0", 8, Duration::from_secs(5))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let control = server.control();
        tokio::spawn(async move {
            server.run().await.unwrap();
        });
        (addr, control)
    }

    async fn connect(addr: &str, connectivity: &ConnectivitySignal) -> Arc<RemoteStore> {
        Arc::new(
            RemoteStore::connect(addr, 0, connectivity.clone())
                .await
                .unwrap(),
        )
    }

    /// Tests a write from one client reaching another client's watch
    #[tokio::test]
    async fn write_reaches_other_client_watch() {
        let (addr, _control) = start_relay().await;
        let online = ConnectivitySignal::new(true);
        let writer = connect(&addr, &online).await;
        let reader = connect(&addr, &online).await;
        assert_ne!(writer.client_id(), reader.client_id());

        let path = format!("{}/countdown", root());
        let mut watch = reader.watch(&path).unwrap();
        assert_eq!(watch.updates.recv().await, Some(None));

        writer.set(&path, json!(3)).unwrap();
        assert_eq!(watch.updates.recv().await, Some(Some(json!(3))));

        writer.delete(&root()).unwrap();
        assert_eq!(watch.updates.recv().await, Some(None));
    }

    /// Tests a full race where both sides talk through the relay
    #[tokio::test]
    async fn race_over_relay() {
        let (addr, _control) = start_relay().await;
        let challenger_link = ConnectivitySignal::new(true);
        let challenged_link = ConnectivitySignal::new(true);
        let challenger_store = connect(&addr, &challenger_link).await;
        let challenged_store = connect(&addr, &challenged_link).await;

        let config = RaceConfig::default()
            .with_field(375.0, 120.0)
            .with_countdown(Duration::ZERO, Duration::from_millis(10));
        let mut duel = Duel::with_services(
            RaceServices {
                store: challenger_store,
                connectivity: challenger_link,
                catalog: Arc::new(Garage::new()),
            },
            RaceServices {
                store: challenged_store,
                connectivity: challenged_link,
                catalog: Arc::new(Garage::new()),
            },
            config,
        );

        let (winner, loser) = tokio::time::timeout(
            Duration::from_secs(30),
            duel.run(Duration::from_millis(1), usize::MAX),
        )
        .await
        .unwrap();
        assert!(winner.won());
        assert_eq!(loser.outcome, Outcome::Lost);

        let observer = connect(&addr, &ConnectivitySignal::new(true)).await;
        let mut watch = observer.watch(&root()).unwrap();
        let mut latest = watch.updates.recv().await.unwrap();
        while let Ok(update) = watch.updates.try_recv() {
            latest = update;
        }
        assert_eq!(latest, None);
    }

    /// Tests that relay shutdown is seen as a connectivity loss
    #[tokio::test]
    async fn relay_shutdown_takes_client_offline() {
        let (addr, control) = start_relay().await;
        let online = ConnectivitySignal::new(true);
        let store = connect(&addr, &online).await;
        let mut changes = online.subscribe();

        control.send(ServerMessage::Shutdown).unwrap();
        changes.changed().await.unwrap();

        assert!(!online.is_online());
        assert!(!store.is_connected());
    }
}
