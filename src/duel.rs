//! Duel lifecycle: creation, audience, voting and completion
//!
//! ```text
//! pending ──accept──▶ active ──last vote / end_duel──▶ completed
//!    │                  │
//!    └──────cancel──────┴──────────────────────────────▶ cancelled
//! ```
//!
//! Every read-modify-write of a duel runs under that duel's mutex, so
//! vote validation, the append and the completion check are one unit and
//! the `active -> completed` transition happens at most once.

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::similarity::compatibility_or_zero;
use crate::store::{DuelStore, UserStore};
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Receives every duel that reaches `completed`, exactly once
///
/// An error is logged by the publisher; the duel stays completed.
pub trait DuelObserver: Send + Sync {
    fn on_duel_completed(&self, duel: &Duel) -> EngineResult<()>;
}

impl Duel {
    /// Fresh duel with a voting window starting at `now`
    ///
    /// Automatic duels open straight into `active`; challenges wait in
    /// `pending` for the opponent to accept.
    pub fn open(
        challenger: UserId,
        opponent: UserId,
        duel_type: DuelType,
        match_score: f64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let status = match duel_type {
            DuelType::Automatic => DuelStatus::Active,
            DuelType::Challenge => DuelStatus::Pending,
        };
        Self {
            id: DuelId::new(),
            challenger,
            opponent,
            status,
            duel_type,
            viewers: HashSet::new(),
            votes: Vec::new(),
            match_score,
            start_time: now,
            end_time: now + window,
            winner: None,
        }
    }
}

/// Winner by strictly highest tally
///
/// Ties go to the tied candidate whose first vote came earliest. `None`
/// when there are no votes.
pub fn decide_winner(votes: &[Vote]) -> Option<UserId> {
    // candidates in order of their first vote
    let mut tally: Vec<(UserId, usize)> = Vec::new();
    for vote in votes {
        match tally.iter_mut().find(|(candidate, _)| *candidate == vote.voted_for) {
            Some((_, count)) => *count += 1,
            None => tally.push((vote.voted_for, 1)),
        }
    }

    let mut best: Option<(UserId, usize)> = None;
    for (candidate, count) in tally {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((candidate, count));
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn invalid_state(duel: &Duel) -> EngineError {
    EngineError::InvalidState {
        kind: "duel",
        id: duel.id.to_string(),
        status: duel.status.as_str().to_string(),
    }
}

/// The duel state machine
pub struct DuelService {
    users: Arc<dyn UserStore>,
    duels: Arc<dyn DuelStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    /// Per-duel mutual exclusion
    locks: DashMap<DuelId, Arc<Mutex<()>>>,
    /// Serializes "pick a pair and insert the duel"
    pairing: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn DuelObserver>>>,
}

impl DuelService {
    pub fn new(
        users: Arc<dyn UserStore>,
        duels: Arc<dyn DuelStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            users,
            duels,
            clock,
            config,
            locks: DashMap::new(),
            pairing: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn DuelObserver>) {
        self.observers.write().push(observer);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    pub fn duel(&self, id: DuelId) -> EngineResult<Duel> {
        self.duels
            .duel(id)?
            .ok_or_else(|| EngineError::duel_not_found(id))
    }

    fn user(&self, id: UserId) -> EngineResult<User> {
        self.users.user(id)?.ok_or_else(|| EngineError::user_not_found(id))
    }

    fn lock_for(&self, id: DuelId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` on the stored duel while holding its lock
    ///
    /// The lock entry is dropped once the duel is unknown or terminal.
    /// Terminal duels never change again, so a caller that still holds the
    /// old mutex and one that gets a fresh mutex both just observe the
    /// terminal status and reject.
    fn with_locked_duel<R>(
        &self,
        id: DuelId,
        f: impl FnOnce(Duel) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let lock = self.lock_for(id);
        let (result, settled) = {
            let _guard = lock.lock();
            let result = self.duel(id).and_then(f);
            let settled = match self.duels.duel(id) {
                Ok(Some(duel)) => !duel.status.is_open(),
                Ok(None) => true,
                Err(_) => false,
            };
            (result, settled)
        };
        if settled {
            self.locks.remove(&id);
        }
        result
    }

    /// Whether the two users already share a pending or active duel
    pub fn have_open_duel(&self, a: UserId, b: UserId) -> EngineResult<bool> {
        Ok(self
            .duels
            .duels_for(a)?
            .iter()
            .any(|d| d.status.is_open() && d.involves(b)))
    }

    /// Run `build` and store the duel it returns, one pairing at a time
    ///
    /// Keeps two concurrent requests from engaging the same users twice.
    pub(crate) fn open_exclusive<F>(&self, build: F) -> EngineResult<Duel>
    where
        F: FnOnce() -> EngineResult<Duel>,
    {
        let _pairing = self.pairing.lock();
        let duel = build()?;
        self.duels.save_duel(&duel)?;
        info!(
            duel_id = %duel.id,
            challenger = %duel.challenger,
            opponent = %duel.opponent,
            duel_type = ?duel.duel_type,
            match_score = duel.match_score,
            "duel created"
        );
        Ok(duel)
    }

    /// Challenge a specific user; waits in `pending` until accepted
    #[instrument(skip(self))]
    pub fn create_challenge(&self, challenger: UserId, opponent: UserId) -> EngineResult<Duel> {
        if challenger == opponent {
            return Err(EngineError::InvalidInput(
                "cannot challenge yourself".to_string(),
            ));
        }
        let challenger_user = self.user(challenger)?;
        let opponent_user = self.user(opponent)?;

        self.open_exclusive(|| {
            if self.have_open_duel(challenger, opponent)? {
                return Err(EngineError::AlreadyExists {
                    kind: "open duel",
                    id: format!("{challenger}/{opponent}"),
                });
            }
            let match_score = compatibility_or_zero(&challenger_user.traits, &opponent_user.traits)?;
            Ok(Duel::open(
                challenger,
                opponent,
                DuelType::Challenge,
                match_score,
                self.now(),
                self.config.duel_window(),
            ))
        })
    }

    /// Opponent accepts a challenge; the voting window restarts now
    #[instrument(skip(self))]
    pub fn accept_challenge(&self, duel_id: DuelId, actor: UserId) -> EngineResult<Duel> {
        self.with_locked_duel(duel_id, |mut duel| {
            if duel.status != DuelStatus::Pending {
                return Err(invalid_state(&duel));
            }
            if duel.opponent != actor {
                warn!(duel_id = %duel_id, actor = %actor, "challenge accepted by non-opponent");
                return Err(EngineError::NotAuthorized {
                    actor,
                    reason: "only the challenged user can accept",
                });
            }

            let now = self.now();
            duel.status = DuelStatus::Active;
            duel.start_time = now;
            duel.end_time = now + self.config.duel_window();
            self.duels.save_duel(&duel)?;
            info!(duel_id = %duel_id, "challenge accepted");
            Ok(duel)
        })
    }

    /// Add a user to the audience of an open duel
    #[instrument(skip(self))]
    pub fn add_viewer(&self, duel_id: DuelId, viewer: UserId) -> EngineResult<Duel> {
        self.user(viewer)?;

        self.with_locked_duel(duel_id, |mut duel| {
            if !duel.status.is_open() {
                return Err(invalid_state(&duel));
            }
            if duel.involves(viewer) {
                return Err(EngineError::NotAuthorized {
                    actor: viewer,
                    reason: "duel participants cannot join the audience",
                });
            }
            if duel.viewers.insert(viewer) {
                self.duels.save_duel(&duel)?;
                debug!(duel_id = %duel_id, viewers = duel.viewers.len(), "viewer joined");
            }
            Ok(duel)
        })
    }

    /// Record a viewer's vote; the vote that fills the audience ends the duel
    ///
    /// Observers run after the duel is stored as completed. Their failures
    /// are logged and do not fail the vote.
    #[instrument(skip(self))]
    pub fn vote(&self, duel_id: DuelId, voter: UserId, voted_for: UserId) -> EngineResult<Duel> {
        let (duel, completed) = self.with_locked_duel(duel_id, |mut duel| {
            if duel.status != DuelStatus::Active {
                warn!(duel_id = %duel_id, status = duel.status.as_str(), "vote on inactive duel");
                return Err(invalid_state(&duel));
            }
            if !duel.viewers.contains(&voter) {
                return Err(EngineError::NotAuthorized {
                    actor: voter,
                    reason: "not a viewer of this duel",
                });
            }
            if duel.has_voted(voter) {
                return Err(EngineError::AlreadyVoted {
                    duel: duel_id,
                    voter,
                });
            }
            if !duel.involves(voted_for) {
                return Err(EngineError::InvalidInput(format!(
                    "user {voted_for} is not in duel {duel_id}"
                )));
            }

            duel.votes.push(Vote {
                voter,
                voted_for,
                timestamp: self.now(),
            });
            debug!(duel_id = %duel_id, votes = duel.votes.len(), viewers = duel.viewers.len(), "vote recorded");

            if duel.votes.len() >= duel.viewers.len() {
                let completed = self.close_locked(&mut duel)?;
                Ok((duel, completed))
            } else {
                self.duels.save_duel(&duel)?;
                Ok((duel, false))
            }
        })?;

        if completed {
            self.publish(&duel);
        }
        Ok(duel)
    }

    /// Close an active duel now
    ///
    /// Already completed duels are returned untouched. A duel nobody voted
    /// on is cancelled instead of completed.
    #[instrument(skip(self))]
    pub fn end_duel(&self, duel_id: DuelId) -> EngineResult<Duel> {
        let (duel, completed) = self.with_locked_duel(duel_id, |mut duel| {
            match duel.status {
                DuelStatus::Completed => return Ok((duel, false)),
                DuelStatus::Active => {}
                DuelStatus::Pending | DuelStatus::Cancelled => return Err(invalid_state(&duel)),
            }
            let completed = self.close_locked(&mut duel)?;
            Ok((duel, completed))
        })?;

        if completed {
            self.publish(&duel);
        }
        Ok(duel)
    }

    /// Tally and move an active duel to its terminal state
    ///
    /// Caller holds the duel's lock. Returns whether the duel completed
    /// with a winner (as opposed to being cancelled for lack of votes).
    fn close_locked(&self, duel: &mut Duel) -> EngineResult<bool> {
        if duel.status != DuelStatus::Active {
            return Ok(false);
        }

        match decide_winner(&duel.votes) {
            Some(winner) => {
                duel.winner = Some(winner);
                duel.status = DuelStatus::Completed;
            }
            None => duel.status = DuelStatus::Cancelled,
        }
        self.duels.save_duel(duel)?;

        info!(
            duel_id = %duel.id,
            status = duel.status.as_str(),
            winner = ?duel.winner,
            votes = duel.votes.len(),
            "duel closed"
        );
        Ok(duel.status == DuelStatus::Completed)
    }

    /// Hand a completed duel to every observer
    ///
    /// The completion is already stored, so a failing observer is logged
    /// and the rest still run.
    fn publish(&self, duel: &Duel) {
        let observers = self.observers.read().clone();
        for observer in observers {
            if let Err(e) = observer.on_duel_completed(duel) {
                warn!(duel_id = %duel.id, error = %e, kind = ?e.kind(), "duel observer failed");
            }
        }
    }

    /// Withdraw a pending or active duel; terminal
    #[instrument(skip(self))]
    pub fn cancel(&self, duel_id: DuelId) -> EngineResult<Duel> {
        let duel = self.with_locked_duel(duel_id, |mut duel| {
            if !duel.status.is_open() {
                return Err(invalid_state(&duel));
            }
            duel.status = DuelStatus::Cancelled;
            self.duels.save_duel(&duel)?;
            Ok(duel)
        })?;
        info!(duel_id = %duel_id, "duel cancelled");
        Ok(duel)
    }

    /// Open duels whose window has elapsed
    ///
    /// Nothing here closes them; a scheduled sweep outside the engine
    /// decides whether to end or cancel each one.
    pub fn expired_duels(&self) -> EngineResult<Vec<Duel>> {
        let now = self.now();
        Ok(self
            .duels
            .duels()?
            .into_iter()
            .filter(|d| d.is_expired(now))
            .collect())
    }

    /// Completed duels the user took part in, newest first
    pub fn get_duel_history(&self, user: UserId) -> EngineResult<Vec<Duel>> {
        let mut history: Vec<Duel> = self
            .duels
            .duels_for(user)?
            .into_iter()
            .filter(|d| d.status == DuelStatus::Completed)
            .collect();
        history.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(history)
    }
}
