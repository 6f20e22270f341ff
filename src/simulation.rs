//! Seeded driver that exercises every service over a synthetic population

use crate::catalog::CharacterCatalog;
use crate::clock::{Clock, ManualClock};
use crate::duel::DuelService;
use crate::error::{EngineError, EngineResult};
use crate::friendship::FriendshipService;
use crate::leaderboard::LeaderboardEngine;
use crate::matchmaker::Matchmaker;
use crate::progress::{ActivityKind, ProgressEvent, ProgressTracker};
use crate::store::{DuelStore, MemoryStore, UserStore};
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Trait names synthetic users draw from
const TRAIT_VOCABULARY: &[&str] = &[
    "Confident",
    "Strategic",
    "Loyal",
    "Competitive",
    "Charismatic",
    "Intelligent",
    "Determined",
    "Ambitious",
    "Humorous",
    "Witty",
    "Caring",
    "Insecure",
    "Social",
    "Creative",
    "Calm",
];

/// Running statistics of a simulation
#[derive(Clone, Debug, Default, Serialize)]
pub struct SimulationStats {
    pub ticks: u64,
    pub hours_elapsed: f64,
    pub total_users: usize,

    /// Duels by status
    pub total_duels: usize,
    pub pending_duels: usize,
    pub active_duels: usize,
    pub completed_duels: usize,
    pub cancelled_duels: usize,
    /// Open duels closed by the sweep after their window ran out
    pub expired_swept: usize,
    /// Duel requests that found no opponent
    pub unmatched_requests: usize,

    pub votes_cast: usize,
    pub avg_match_score: f64,
    pub avg_votes_per_completed_duel: f64,

    pub friend_requests: usize,
    pub friendships_accepted: usize,
}

#[derive(Serialize)]
struct SimulationState<'a> {
    current_tick: u64,
    now: DateTime<Utc>,
    total_users: usize,
    stats: &'a SimulationStats,
    config: &'a SimulationConfig,
}

/// Seeded synthetic population driving the whole engine
///
/// Plays the part of the service layer around the engine: it closes
/// expired duels, requests automatic duels, seats audiences and casts
/// votes on behalf of simulated users.
pub struct Simulation {
    pub current_tick: u64,
    pub config: SimulationConfig,
    pub stats: SimulationStats,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    started_at: DateTime<Utc>,
    duels: Arc<DuelService>,
    matchmaker: Matchmaker,
    leaderboard: Arc<LeaderboardEngine>,
    progress: Arc<ProgressTracker>,
    friendships: FriendshipService,
    catalog: CharacterCatalog,
    rng_seed: u64,
    next_user_index: u64,
}

impl Simulation {
    pub fn new(config: SimulationConfig, seed: u64) -> EngineResult<Self> {
        let catalog = CharacterCatalog::seeded(&config.engine)?;
        Ok(Self::with_catalog(config, seed, catalog))
    }

    pub fn with_catalog(config: SimulationConfig, seed: u64, catalog: CharacterCatalog) -> Self {
        let engine = config.engine.clone();
        let store = Arc::new(MemoryStore::new());
        let started_at = DateTime::<Utc>::UNIX_EPOCH;
        let clock = Arc::new(ManualClock::new(started_at));

        let duels = Arc::new(DuelService::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            engine.clone(),
        ));
        let matchmaker = Matchmaker::new(store.clone(), store.clone(), duels.clone(), engine.clone());
        let leaderboard = Arc::new(LeaderboardEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
            engine.clone(),
        ));
        let progress = Arc::new(ProgressTracker::new(clock.clone(), engine));
        duels.add_observer(leaderboard.clone());
        duels.add_observer(progress.clone());
        let friendships = FriendshipService::new(store.clone(), store.clone(), clock.clone());

        Self {
            current_tick: 0,
            config,
            stats: SimulationStats::default(),
            store,
            clock,
            started_at,
            duels,
            matchmaker,
            leaderboard,
            progress,
            friendships,
            catalog,
            rng_seed: seed,
            next_user_index: 0,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn duels(&self) -> &DuelService {
        &self.duels
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn leaderboard(&self) -> &LeaderboardEngine {
        &self.leaderboard
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn friendships(&self) -> &FriendshipService {
        &self.friendships
    }

    pub fn catalog(&self) -> &CharacterCatalog {
        &self.catalog
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// Register `count` users with random traits
    ///
    /// Each user also gets matched against the catalog once, which seeds
    /// their progress the way onboarding would.
    pub fn generate_population(&mut self, count: usize) -> EngineResult<()> {
        let mut rng = StdRng::seed_from_u64(self.rng_seed ^ self.next_user_index.rotate_left(32));
        let lo = self.config.min_traits_per_user.min(self.config.max_traits_per_user);
        let hi = self.config.max_traits_per_user.max(lo);

        for _ in 0..count {
            let trait_count = rng.gen_range(lo..=hi);
            let names: Vec<&str> = TRAIT_VOCABULARY
                .choose_multiple(&mut rng, trait_count)
                .copied()
                .collect();
            let traits = names
                .into_iter()
                .map(|name| Trait::new(name, rng.gen_range(1..=10)))
                .collect();

            let user = User {
                id: UserId::from_u128(rng.gen()),
                username: format!("user{}", self.next_user_index),
                traits,
            };
            self.next_user_index += 1;

            if user.has_traits() {
                if let Some(best) = self
                    .catalog
                    .find_matching_characters(&user.traits, None)?
                    .into_iter()
                    .next()
                {
                    self.progress
                        .update_progress(user.id, ProgressEvent::CharacterMatched(best));
                }
            }
            self.store.insert_user(user);
        }

        self.update_stats()
    }

    /// Advance the clock by one tick and let users act
    pub fn tick(&mut self) -> EngineResult<()> {
        let mut rng = StdRng::seed_from_u64(self.rng_seed.wrapping_add(self.current_tick));

        // 1. Advance time
        self.clock.advance(Duration::minutes(self.config.tick_minutes));

        // 2. Close duels whose voting window ran out
        self.sweep_expired()?;

        // 3. Idle users ask for automatic duels
        self.process_duel_requests(&mut rng)?;

        // 4. Audiences vote
        self.process_votes(&mut rng)?;

        // 5. Friend requests, answered on the spot
        self.process_friend_requests(&mut rng)?;

        self.current_tick += 1;
        self.update_stats()
    }

    pub fn run(&mut self, ticks: u64) -> EngineResult<()> {
        for _ in 0..ticks {
            self.tick()?;
        }
        Ok(())
    }

    /// Expired active duels are ended (or cancelled when nobody voted),
    /// expired challenges are withdrawn
    fn sweep_expired(&mut self) -> EngineResult<()> {
        for duel in self.duels.expired_duels()? {
            match duel.status {
                DuelStatus::Active => {
                    self.duels.end_duel(duel.id)?;
                }
                _ => {
                    self.duels.cancel(duel.id)?;
                }
            }
            self.stats.expired_swept += 1;
        }
        Ok(())
    }

    fn process_duel_requests(&mut self, rng: &mut StdRng) -> EngineResult<()> {
        let users = self.store.users()?;
        let p = self.config.duel_request_prob.clamp(0.0, 1.0);

        for user in &users {
            if !user.has_traits() || !rng.gen_bool(p) {
                continue;
            }
            match self.matchmaker.create_automatic_duel(user.id) {
                Ok(duel) => self.seat_audience(&duel, &users, rng)?,
                Err(EngineError::NoCandidate { .. }) => self.stats.unmatched_requests += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn seat_audience(&self, duel: &Duel, users: &[User], rng: &mut StdRng) -> EngineResult<()> {
        let audience: Vec<&User> = users.iter().filter(|u| !duel.involves(u.id)).collect();
        for viewer in audience.choose_multiple(rng, self.config.viewers_per_duel) {
            self.duels.add_viewer(duel.id, viewer.id)?;
        }
        Ok(())
    }

    fn process_votes(&mut self, rng: &mut StdRng) -> EngineResult<()> {
        let p = self.config.vote_prob.clamp(0.0, 1.0);
        let active: Vec<Duel> = self
            .store
            .duels()?
            .into_iter()
            .filter(|d| d.status == DuelStatus::Active)
            .collect();

        for duel in active {
            let mut waiting: Vec<UserId> = duel
                .viewers
                .iter()
                .copied()
                .filter(|v| !duel.has_voted(*v))
                .collect();
            // set order is not stable across runs
            waiting.sort();

            for voter in waiting {
                if !rng.gen_bool(p) {
                    continue;
                }
                let voted_for = if rng.gen_bool(0.5) {
                    duel.challenger
                } else {
                    duel.opponent
                };
                let updated = self.duels.vote(duel.id, voter, voted_for)?;
                self.progress
                    .update_progress(voter, ProgressEvent::Activity(ActivityKind::Vote));
                if updated.status != DuelStatus::Active {
                    break;
                }
            }
        }
        Ok(())
    }

    fn process_friend_requests(&mut self, rng: &mut StdRng) -> EngineResult<()> {
        let users = self.store.users()?;
        let p = self.config.friend_request_prob.clamp(0.0, 1.0);

        for user in &users {
            if !rng.gen_bool(p) {
                continue;
            }
            let Some(other) = users.choose(rng) else {
                continue;
            };
            if other.id == user.id {
                continue;
            }
            match self.friendships.send_friend_request(user.id, other.id) {
                Ok(request) => {
                    self.stats.friend_requests += 1;
                    let accept = request.relationship_type != RelationshipType::Rival;
                    self.friendships
                        .respond_to_friend_request(request.id, other.id, accept)?;
                    if accept {
                        self.stats.friendships_accepted += 1;
                    }
                }
                Err(EngineError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn update_stats(&mut self) -> EngineResult<()> {
        let duels = self.store.duels()?;

        self.stats.ticks = self.current_tick;
        self.stats.hours_elapsed = (self.clock.now_utc() - self.started_at).num_minutes() as f64 / 60.0;
        self.stats.total_users = self.store.user_count();
        self.stats.total_duels = duels.len();

        self.stats.pending_duels = 0;
        self.stats.active_duels = 0;
        self.stats.completed_duels = 0;
        self.stats.cancelled_duels = 0;
        let mut completed_votes = 0;
        for duel in &duels {
            match duel.status {
                DuelStatus::Pending => self.stats.pending_duels += 1,
                DuelStatus::Active => self.stats.active_duels += 1,
                DuelStatus::Completed => {
                    self.stats.completed_duels += 1;
                    completed_votes += duel.votes.len();
                }
                DuelStatus::Cancelled => self.stats.cancelled_duels += 1,
            }
        }

        self.stats.votes_cast = duels.iter().map(|d| d.votes.len()).sum();
        self.stats.avg_match_score = if duels.is_empty() {
            0.0
        } else {
            duels.iter().map(|d| d.match_score).sum::<f64>() / duels.len() as f64
        };
        self.stats.avg_votes_per_completed_duel = if self.stats.completed_duels == 0 {
            0.0
        } else {
            completed_votes as f64 / self.stats.completed_duels as f64
        };

        debug!(
            tick = self.current_tick,
            duels = self.stats.total_duels,
            completed = self.stats.completed_duels,
            "stats updated"
        );
        Ok(())
    }

    /// Get current state as JSON for frontend
    pub fn get_state_json(&self) -> String {
        serde_json::to_string(&SimulationState {
            current_tick: self.current_tick,
            now: self.now(),
            total_users: self.stats.total_users,
            stats: &self.stats,
            config: &self.config,
        })
        .unwrap_or_default()
    }

    /// Counters reset; population and duels stay
    pub fn reset_stats(&mut self) -> EngineResult<()> {
        self.stats = SimulationStats::default();
        self.update_stats()
    }
}
