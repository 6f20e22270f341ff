//! Automatic opponent selection
//!
//! Candidates are drawn from the whole population, filtered by
//! compatibility and existing open duels, then paired through
//! [`DuelService`] so two requests never engage the same pair twice.

use crate::duel::DuelService;
use crate::error::{EngineError, EngineResult};
use crate::similarity::compatibility;
use crate::store::{DuelStore, UserStore};
use crate::types::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Picks opponents and opens automatic duels
pub struct Matchmaker {
    users: Arc<dyn UserStore>,
    duel_store: Arc<dyn DuelStore>,
    duels: Arc<DuelService>,
    config: EngineConfig,
}

impl Matchmaker {
    pub fn new(
        users: Arc<dyn UserStore>,
        duel_store: Arc<dyn DuelStore>,
        duels: Arc<DuelService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            users,
            duel_store,
            duels,
            config,
        }
    }

    /// Users the given user could be paired with right now
    ///
    /// Excludes the user and anyone already sharing a pending/active duel
    /// with them, and anyone without traits. At most
    /// `opponent_sample_cap` candidates in population order; no ranking.
    pub fn find_potential_opponents(&self, user: &User) -> EngineResult<Vec<User>> {
        let mut excluded: HashSet<UserId> = self
            .duel_store
            .duels_for(user.id)?
            .iter()
            .filter(|d| d.status.is_open())
            .filter_map(|d| d.counterpart(user.id))
            .collect();
        excluded.insert(user.id);

        let candidates: Vec<User> = self
            .users
            .users()?
            .into_iter()
            .filter(|candidate| candidate.has_traits() && !excluded.contains(&candidate.id))
            .take(self.config.opponent_sample_cap)
            .collect();

        debug!(
            user_id = %user.id,
            excluded = excluded.len(),
            candidates = candidates.len(),
            "opponent search"
        );
        Ok(candidates)
    }

    /// Pair the user with the first available opponent
    ///
    /// The duel opens `active` with a `duel_window_hours` voting window and
    /// the pair's compatibility as its match score.
    #[instrument(skip(self))]
    pub fn create_automatic_duel(&self, user_id: UserId) -> EngineResult<Duel> {
        let user = self
            .users
            .user(user_id)?
            .ok_or_else(|| EngineError::user_not_found(user_id))?;

        self.duels.open_exclusive(|| {
            let opponent = self
                .find_potential_opponents(&user)?
                .into_iter()
                .next()
                .ok_or(EngineError::NoCandidate { user: user_id })?;
            let match_score = compatibility(&user.traits, &opponent.traits)?;

            Ok(Duel::open(
                user.id,
                opponent.id,
                DuelType::Automatic,
                match_score,
                self.duels.now(),
                self.config.duel_window(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn setup(config: EngineConfig) -> (Arc<MemoryStore>, Matchmaker) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let duels = Arc::new(DuelService::new(store.clone(), store.clone(), clock, config.clone()));
        let matchmaker = Matchmaker::new(store.clone(), store.clone(), duels, config);
        (store, matchmaker)
    }

    fn add_user(store: &MemoryStore, name: &str, traits: &[(&str, i64)]) -> User {
        let user = User::new(name, traits.iter().map(|(n, s)| Trait::new(*n, *s)).collect());
        store.insert_user(user.clone());
        user
    }

    #[test]
    fn test_candidates_exclude_self_traitless_and_engaged_users() {
        let (store, matchmaker) = setup(EngineConfig::default());
        let ana = add_user(&store, "ana", &[("Bold", 8)]);
        let _blank = add_user(&store, "blank", &[]);
        let bo = add_user(&store, "bo", &[("Bold", 6)]);
        let cy = add_user(&store, "cy", &[("Calm", 4)]);

        let names: Vec<String> = matchmaker
            .find_potential_opponents(&ana)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["bo", "cy"]);

        let duel = matchmaker.create_automatic_duel(ana.id).unwrap();
        assert_eq!(duel.opponent, bo.id);

        let names: Vec<UserId> = matchmaker
            .find_potential_opponents(&ana)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(names, vec![cy.id]);
    }

    #[test]
    fn test_candidate_list_is_capped() {
        let config = EngineConfig {
            opponent_sample_cap: 3,
            ..EngineConfig::default()
        };
        let (store, matchmaker) = setup(config);
        let ana = add_user(&store, "ana", &[("Bold", 8)]);
        for i in 0..8 {
            add_user(&store, &format!("user{i}"), &[("Bold", 5)]);
        }
        assert_eq!(matchmaker.find_potential_opponents(&ana).unwrap().len(), 3);
    }

    #[test]
    fn test_automatic_duel_shape() {
        let (store, matchmaker) = setup(EngineConfig::default());
        let ana = add_user(&store, "ana", &[("Bold", 8), ("Creative", 6)]);
        let bo = add_user(&store, "bo", &[("Bold", 6), ("Creative", 9)]);

        let duel = matchmaker.create_automatic_duel(ana.id).unwrap();
        assert_eq!(duel.challenger, ana.id);
        assert_eq!(duel.opponent, bo.id);
        assert_eq!(duel.status, DuelStatus::Active);
        assert_eq!(duel.duel_type, DuelType::Automatic);
        assert_eq!(duel.end_time - duel.start_time, Duration::hours(24));
        assert!((duel.match_score - 94.299).abs() < 0.01);
        assert!(store.duel(duel.id).unwrap().is_some());
    }

    #[test]
    fn test_automatic_duel_failures() {
        let (store, matchmaker) = setup(EngineConfig::default());
        assert!(matches!(
            matchmaker.create_automatic_duel(UserId::new()),
            Err(EngineError::NotFound { kind: "user", .. })
        ));

        let ana = add_user(&store, "ana", &[("Bold", 8)]);
        assert!(matches!(
            matchmaker.create_automatic_duel(ana.id),
            Err(EngineError::NoCandidate { .. })
        ));

        add_user(&store, "bo", &[("Bold", 6)]);
        matchmaker.create_automatic_duel(ana.id).unwrap();
        // the only opponent is now engaged
        assert!(matches!(
            matchmaker.create_automatic_duel(ana.id),
            Err(EngineError::NoCandidate { .. })
        ));
    }

    #[test]
    fn test_concurrent_requests_never_double_book_a_pair() {
        let (store, matchmaker) = setup(EngineConfig::default());
        let ana = add_user(&store, "ana", &[("Bold", 8)]);
        add_user(&store, "bo", &[("Bold", 6)]);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| matchmaker.create_automatic_duel(ana.id)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(store.duel_count(), 1);
    }
}
