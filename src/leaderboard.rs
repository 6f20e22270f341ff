//! Per-category leaderboards fed by completed duels
//!
//! A score write and the category re-rank it triggers run under that
//! category's mutex. Categories are independent of each other.

use crate::clock::Clock;
use crate::duel::DuelObserver;
use crate::error::{EngineError, EngineResult};
use crate::store::{DuelStore, LeaderboardStore, UserStore};
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const NEUTRAL_TRAIT_SCORE: f64 = 5.0;
const MAIN_CHARACTER_WIN_POINTS: f64 = 10.0;
const DUEL_ENGAGEMENT_POINTS: f64 = 10.0;
const VOTE_ENGAGEMENT_POINTS: f64 = 5.0;
const MAX_SCORE: f64 = 100.0;

fn mean_over(traits: &[Trait], f: impl Fn(f64) -> f64) -> f64 {
    if traits.is_empty() {
        return 0.0;
    }
    traits.iter().map(|t| f(t.score as f64)).sum::<f64>() / traits.len() as f64
}

/// Distance from neutral, 0 at 5 and 1 at the extremes
fn extremity(score: f64) -> f64 {
    (score - NEUTRAL_TRAIT_SCORE).abs() / NEUTRAL_TRAIT_SCORE
}

impl Category {
    /// Points a duel win adds to this category's score
    pub fn win_points(&self, traits: &[Trait]) -> f64 {
        match self {
            Category::MainCharacter => MAIN_CHARACTER_WIN_POINTS,
            // rewards extreme trait values
            Category::Dramatic => mean_over(traits, |s| extremity(s) * 10.0),
            // rewards balanced trait values
            Category::Relatable => mean_over(traits, |s| (1.0 - extremity(s)) * 10.0),
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Similarity of `subject` to `other` as used by the uniqueness score
///
/// Per subject trait: `1 - |diff| / 10` when the other user has it, and
/// a full 1 when they don't. Averaged over the subject's traits.
fn peer_similarity(subject: &[Trait], other: &[Trait]) -> f64 {
    let total: f64 = subject
        .iter()
        .map(|trait_| match other.iter().find(|t| t.matches_name(trait_)) {
            Some(found) => 1.0 - trait_.score.abs_diff(found.score) as f64 / MAX_TRAIT_SCORE as f64,
            None => 1.0,
        })
        .sum();
    total / subject.len() as f64
}

/// One participant's side of an outcome, computed before any write
struct Standing {
    user: User,
    won: bool,
    uniqueness: f64,
    engagement: f64,
}

pub struct LeaderboardEngine {
    users: Arc<dyn UserStore>,
    duels: Arc<dyn DuelStore>,
    entries: Arc<dyn LeaderboardStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    /// One per category, indexed by `Category::index`
    category_locks: [Mutex<()>; 3],
}

impl LeaderboardEngine {
    pub fn new(
        users: Arc<dyn UserStore>,
        duels: Arc<dyn DuelStore>,
        entries: Arc<dyn LeaderboardStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            users,
            duels,
            entries,
            clock,
            config,
            category_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
        }
    }

    fn lock(&self, category: Category) -> MutexGuard<'_, ()> {
        self.category_locks[category.index()].lock()
    }

    fn user(&self, id: UserId) -> EngineResult<User> {
        self.users.user(id)?.ok_or_else(|| EngineError::user_not_found(id))
    }

    /// Apply a completed duel to both participants in every category
    #[instrument(skip(self, duel), fields(duel_id = %duel.id))]
    pub fn record_duel_outcome(&self, duel: &Duel) -> EngineResult<()> {
        let (Some(winner), Some(loser), DuelStatus::Completed) = (duel.winner, duel.loser(), duel.status)
        else {
            return Err(EngineError::InvalidState {
                kind: "duel",
                id: duel.id.to_string(),
                status: duel.status.as_str().to_string(),
            });
        };

        // resolve both sides before touching any entry
        let standings = [self.standing(winner, true)?, self.standing(loser, false)?];
        let now = self.clock.now_utc();

        for category in Category::ALL {
            let _guard = self.lock(category);
            for standing in &standings {
                self.apply_locked(standing, category, now)?;
            }
            self.rerank_locked(category)?;
        }
        info!(winner = %winner, loser = %loser, "duel outcome recorded");
        Ok(())
    }

    fn standing(&self, user_id: UserId, won: bool) -> EngineResult<Standing> {
        let user = self.user(user_id)?;
        let uniqueness = self.uniqueness_for(&user)?;
        let engagement = self.engagement_score(user_id, self.config.engagement_window_days)?;
        Ok(Standing {
            user,
            won,
            uniqueness,
            engagement,
        })
    }

    /// Caller holds the category lock
    fn apply_locked(&self, standing: &Standing, category: Category, now: DateTime<Utc>) -> EngineResult<()> {
        let user_id = standing.user.id;
        let mut entry = self
            .entries
            .entry(user_id, category)?
            .unwrap_or_else(|| LeaderboardEntry::new(user_id, category, now));
        if standing.won {
            entry.duels_won += 1;
            entry.score += category.win_points(&standing.user.traits);
        }
        entry.total_votes += 1;
        entry.uniqueness_score = standing.uniqueness;
        entry.engagement_score = standing.engagement;
        entry.last_updated = now;
        self.entries.save_entry(&entry)?;
        debug!(user_id = %user_id, category = %category, score = entry.score, "entry updated");
        Ok(())
    }

    /// How different the user is from their most similar peer, 0-100
    pub fn uniqueness_score(&self, user_id: UserId) -> EngineResult<f64> {
        let user = self.user(user_id)?;
        self.uniqueness_for(&user)
    }

    /// Full population scan; 100 when there is no peer or no trait to compare
    fn uniqueness_for(&self, user: &User) -> EngineResult<f64> {
        if user.traits.is_empty() {
            return Ok(MAX_SCORE);
        }
        Ok(self
            .users
            .users()?
            .iter()
            .filter(|other| other.id != user.id)
            .map(|other| (1.0 - peer_similarity(&user.traits, &other.traits)) * 100.0)
            .fold(MAX_SCORE, f64::min))
    }

    /// `min(100, duels * 10 + votes * 5)` over the trailing window
    pub fn engagement_score(&self, user_id: UserId, window_days: i64) -> EngineResult<f64> {
        let since = self.clock.now_utc() - Duration::days(window_days);

        let duel_count = self
            .duels
            .duels_for(user_id)?
            .iter()
            .filter(|d| d.start_time >= since)
            .count();
        let vote_count = self
            .duels
            .duels()?
            .iter()
            .flat_map(|d| d.votes.iter())
            .filter(|v| v.voter == user_id && v.timestamp >= since)
            .count();

        Ok((duel_count as f64 * DUEL_ENGAGEMENT_POINTS + vote_count as f64 * VOTE_ENGAGEMENT_POINTS)
            .min(MAX_SCORE))
    }

    /// Re-sort a category by score and reassign 1-based ranks
    pub fn recompute_ranks(&self, category: Category) -> EngineResult<Vec<LeaderboardEntry>> {
        let _guard = self.lock(category);
        self.rerank_locked(category)
    }

    /// Caller holds the category lock. Ties keep store order.
    fn rerank_locked(&self, category: Category) -> EngineResult<Vec<LeaderboardEntry>> {
        let mut entries = self.entries.entries(category)?;
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        for (i, entry) in entries.iter_mut().enumerate() {
            let rank = i as u32 + 1;
            if entry.rank != rank {
                entry.rank = rank;
                self.entries.save_entry(entry)?;
            }
        }
        Ok(entries)
    }

    /// Top entries of a category by score
    pub fn get_leaderboard(
        &self,
        category: Category,
        limit: Option<usize>,
    ) -> EngineResult<Vec<LeaderboardEntry>> {
        let mut entries = self.entries.entries(category)?;
        entries.sort_by(|a, b| b.score.total_cmp(&a.score));
        entries.truncate(limit.unwrap_or(self.config.default_leaderboard_limit));
        Ok(entries)
    }

    pub fn entry(&self, user: UserId, category: Category) -> EngineResult<Option<LeaderboardEntry>> {
        self.entries.entry(user, category)
    }
}

impl DuelObserver for LeaderboardEngine {
    fn on_duel_completed(&self, duel: &Duel) -> EngineResult<()> {
        self.record_duel_outcome(duel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        engine: LeaderboardEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = LeaderboardEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
            EngineConfig::default(),
        );
        Fixture { store, clock, engine }
    }

    fn add_user(store: &MemoryStore, name: &str, traits: &[(&str, i64)]) -> UserId {
        let user = User::new(name, traits.iter().map(|(n, s)| Trait::new(*n, *s)).collect());
        let id = user.id;
        store.insert_user(user);
        id
    }

    fn completed_duel(f: &Fixture, winner: UserId, loser: UserId) -> Duel {
        let mut duel = Duel::open(
            winner,
            loser,
            DuelType::Automatic,
            50.0,
            f.clock.now_utc(),
            Duration::hours(24),
        );
        duel.status = DuelStatus::Completed;
        duel.winner = Some(winner);
        f.store.save_duel(&duel).unwrap();
        duel
    }

    #[test]
    fn test_category_win_points() {
        let extreme = vec![Trait::new("Bold", 1), Trait::new("Loud", 9)];
        let neutral = vec![Trait::new("Calm", 5)];
        assert_eq!(Category::MainCharacter.win_points(&extreme), 10.0);
        assert!((Category::Dramatic.win_points(&extreme) - 8.0).abs() < 1e-12);
        assert!((Category::Relatable.win_points(&extreme) - 2.0).abs() < 1e-12);
        assert_eq!(Category::Dramatic.win_points(&neutral), 0.0);
        assert_eq!(Category::Relatable.win_points(&neutral), 10.0);
        assert_eq!(Category::Dramatic.win_points(&[]), 0.0);
    }

    #[test]
    fn test_outcome_moves_only_the_winner_score() {
        let f = fixture();
        let winner = add_user(&f.store, "ana", &[("Bold", 8)]);
        let loser = add_user(&f.store, "bo", &[("Bold", 6)]);
        let duel = completed_duel(&f, winner, loser);

        f.engine.record_duel_outcome(&duel).unwrap();

        let w = f.engine.entry(winner, Category::MainCharacter).unwrap().unwrap();
        let l = f.engine.entry(loser, Category::MainCharacter).unwrap().unwrap();
        assert_eq!(w.score, 10.0);
        assert_eq!(l.score, 0.0);
        assert_eq!((w.total_votes, w.duels_won), (1, 1));
        assert_eq!((l.total_votes, l.duels_won), (1, 0));
        assert_eq!((w.rank, l.rank), (1, 2));

        let dramatic = f.engine.entry(winner, Category::Dramatic).unwrap().unwrap();
        assert!((dramatic.score - 6.0).abs() < 1e-12);
        // one duel in the window for both
        assert_eq!(w.engagement_score, 10.0);
    }

    #[test]
    fn test_outcome_requires_completed_duel() {
        let f = fixture();
        let a = add_user(&f.store, "ana", &[("Bold", 8)]);
        let b = add_user(&f.store, "bo", &[("Bold", 6)]);
        let open = Duel::open(a, b, DuelType::Automatic, 0.0, f.clock.now_utc(), Duration::hours(1));
        assert!(matches!(
            f.engine.record_duel_outcome(&open),
            Err(EngineError::InvalidState { .. })
        ));
        assert!(f.engine.entry(a, Category::Dramatic).unwrap().is_none());
    }

    #[test]
    fn test_unknown_loser_leaves_no_partial_update() {
        let f = fixture();
        let winner = add_user(&f.store, "ana", &[("Bold", 8)]);
        let ghost = UserId::new();
        let duel = completed_duel(&f, winner, ghost);

        assert!(matches!(
            f.engine.record_duel_outcome(&duel),
            Err(EngineError::NotFound { kind: "user", .. })
        ));
        for category in Category::ALL {
            assert!(f.engine.entry(winner, category).unwrap().is_none());
            assert!(f.engine.get_leaderboard(category, None).unwrap().is_empty());
        }

        // the same duel applies cleanly once the loser exists
        let mut revived = User::new("ghost", vec![Trait::new("Bold", 3)]);
        revived.id = ghost;
        f.store.insert_user(revived);
        f.engine.record_duel_outcome(&duel).unwrap();
        let w = f.engine.entry(winner, Category::MainCharacter).unwrap().unwrap();
        assert_eq!((w.score, w.total_votes, w.duels_won), (10.0, 1, 1));
    }

    #[test]
    fn test_ranks_for_tied_scores() {
        let f = fixture();
        let now = f.clock.now_utc();
        let ids: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        for (id, score) in ids.iter().zip([30.0, 10.0, 30.0]) {
            let mut entry = LeaderboardEntry::new(*id, Category::Relatable, now);
            entry.score = score;
            f.store.save_entry(&entry).unwrap();
        }

        let ranked = f.engine.recompute_ranks(Category::Relatable).unwrap();
        let ranks: Vec<(UserId, u32)> = ranked.iter().map(|e| (e.user, e.rank)).collect();
        // stable: the first-inserted 30 stays ahead of the later one
        assert_eq!(ranks, vec![(ids[0], 1), (ids[2], 2), (ids[1], 3)]);
        assert_eq!(f.engine.entry(ids[1], Category::Relatable).unwrap().unwrap().rank, 3);

        let top = f.engine.get_leaderboard(Category::Relatable, Some(2)).unwrap();
        assert_eq!(top.len(), 2);
        assert!(top.iter().all(|e| e.score == 30.0));
    }

    #[test]
    fn test_uniqueness_against_closest_peer() {
        let f = fixture();
        let subject = add_user(&f.store, "ana", &[("Bold", 8), ("Calm", 2)]);
        assert_eq!(f.engine.uniqueness_score(subject).unwrap(), 100.0);

        // Bold: 1 - 6/10, Calm absent counts as 1 -> similarity 0.7
        add_user(&f.store, "bo", &[("bold", 2)]);
        assert!((f.engine.uniqueness_score(subject).unwrap() - 30.0).abs() < 1e-9);

        add_user(&f.store, "twin", &[("Bold", 8), ("Calm", 2)]);
        assert_eq!(f.engine.uniqueness_score(subject).unwrap(), 0.0);

        let blank = add_user(&f.store, "blank", &[]);
        assert_eq!(f.engine.uniqueness_score(blank).unwrap(), 100.0);
    }

    #[test]
    fn test_engagement_window_and_cap() {
        let f = fixture();
        let ana = add_user(&f.store, "ana", &[("Bold", 8)]);
        let bo = add_user(&f.store, "bo", &[("Bold", 6)]);
        let cy = add_user(&f.store, "cy", &[("Calm", 6)]);

        // outside the window once the clock moves on
        completed_duel(&f, ana, bo);
        f.clock.advance(Duration::days(31));

        completed_duel(&f, ana, bo);
        let mut watched = completed_duel(&f, bo, cy);
        watched.votes.push(Vote {
            voter: ana,
            voted_for: bo,
            timestamp: f.clock.now_utc(),
        });
        f.store.save_duel(&watched).unwrap();

        assert_eq!(f.engine.engagement_score(ana, 30).unwrap(), 15.0);
        assert_eq!(f.engine.engagement_score(ana, 60).unwrap(), 25.0);

        for _ in 0..11 {
            completed_duel(&f, bo, cy);
        }
        assert_eq!(f.engine.engagement_score(bo, 30).unwrap(), 100.0);
    }

    #[test]
    fn test_concurrent_outcomes_leave_dense_ranks() {
        let f = fixture();
        let users: Vec<UserId> = (0..6)
            .map(|i| add_user(&f.store, &format!("u{i}"), &[("Bold", i + 2), ("Calm", 9 - i)]))
            .collect();
        let duels: Vec<Duel> = (0..12)
            .map(|i| completed_duel(&f, users[i % 6], users[(i + 1) % 6]))
            .collect();

        std::thread::scope(|scope| {
            for duel in &duels {
                let engine = &f.engine;
                scope.spawn(move || engine.record_duel_outcome(duel).unwrap());
            }
        });

        for category in Category::ALL {
            let mut ranks: Vec<u32> = f
                .engine
                .get_leaderboard(category, Some(100))
                .unwrap()
                .iter()
                .map(|e| e.rank)
                .collect();
            ranks.sort_unstable();
            assert_eq!(ranks, (1..=6).collect::<Vec<u32>>());
        }
        let main: f64 = f
            .engine
            .get_leaderboard(Category::MainCharacter, Some(100))
            .unwrap()
            .iter()
            .map(|e| e.score)
            .sum();
        assert_eq!(main, 120.0);
    }
}
