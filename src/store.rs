//! Persistence collaborators consumed by the engine
//!
//! The engine only needs keyed read/write access; the traits below are
//! what a database-backed implementation provides. [`MemoryStore`]
//! implements all of them for tests, the simulation and the wasm build.

use crate::error::{EngineError, EngineResult};
use crate::types::*;
use dashmap::DashMap;
use parking_lot::RwLock;

/// Read access to users (owned by the identity subsystem)
pub trait UserStore: Send + Sync {
    fn user(&self, id: UserId) -> EngineResult<Option<User>>;

    /// The whole population, in registration order
    fn users(&self) -> EngineResult<Vec<User>>;
}

pub trait DuelStore: Send + Sync {
    fn duel(&self, id: DuelId) -> EngineResult<Option<Duel>>;

    /// Insert or overwrite by id
    fn save_duel(&self, duel: &Duel) -> EngineResult<()>;

    /// Duels where the user is challenger or opponent
    fn duels_for(&self, user: UserId) -> EngineResult<Vec<Duel>>;

    fn duels(&self) -> EngineResult<Vec<Duel>>;
}

pub trait FriendshipStore: Send + Sync {
    fn friendship(&self, id: FriendshipId) -> EngineResult<Option<Friendship>>;

    /// Record for the unordered pair, if any
    fn friendship_between(&self, a: UserId, b: UserId) -> EngineResult<Option<Friendship>>;

    /// Insert a new record; fails if the pair already has one
    fn insert_friendship(&self, friendship: &Friendship) -> EngineResult<()>;

    /// Move a record from `expected` to `next` as one step. Fails with
    /// `InvalidState` if the record is no longer in `expected`.
    fn transition_friendship(
        &self,
        id: FriendshipId,
        expected: FriendshipStatus,
        next: FriendshipStatus,
    ) -> EngineResult<Friendship>;

    fn friendships_of(&self, user: UserId) -> EngineResult<Vec<Friendship>>;
}

pub trait LeaderboardStore: Send + Sync {
    fn entry(&self, user: UserId, category: Category) -> EngineResult<Option<LeaderboardEntry>>;

    /// Insert or overwrite by (user, category)
    fn save_entry(&self, entry: &LeaderboardEntry) -> EngineResult<()>;

    /// Entries of one category in first-insertion order
    fn entries(&self, category: Category) -> EngineResult<Vec<LeaderboardEntry>>;
}

/// In-memory implementation of every store
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    user_order: RwLock<Vec<UserId>>,
    duels: DashMap<DuelId, Duel>,
    duel_order: RwLock<Vec<DuelId>>,
    friendships: DashMap<FriendshipId, Friendship>,
    /// Unordered pair -> friendship, smaller id first
    friendship_pairs: DashMap<(UserId, UserId), FriendshipId>,
    leaderboards: DashMap<Category, Vec<LeaderboardEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a user
    pub fn insert_user(&self, user: User) {
        let id = user.id;
        if self.users.insert(id, user).is_none() {
            self.user_order.write().push(id);
        }
    }

    pub fn set_traits(&self, id: UserId, traits: Vec<Trait>) -> EngineResult<()> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| EngineError::user_not_found(id))?;
        user.traits = traits;
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn duel_count(&self) -> usize {
        self.duels.len()
    }

    fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl UserStore for MemoryStore {
    fn user(&self, id: UserId) -> EngineResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    fn users(&self) -> EngineResult<Vec<User>> {
        Ok(self
            .user_order
            .read()
            .iter()
            .filter_map(|id| self.users.get(id).map(|u| u.value().clone()))
            .collect())
    }
}

impl DuelStore for MemoryStore {
    fn duel(&self, id: DuelId) -> EngineResult<Option<Duel>> {
        Ok(self.duels.get(&id).map(|d| d.value().clone()))
    }

    fn save_duel(&self, duel: &Duel) -> EngineResult<()> {
        if self.duels.insert(duel.id, duel.clone()).is_none() {
            self.duel_order.write().push(duel.id);
        }
        Ok(())
    }

    fn duels_for(&self, user: UserId) -> EngineResult<Vec<Duel>> {
        Ok(self
            .duels()?
            .into_iter()
            .filter(|d| d.involves(user))
            .collect())
    }

    fn duels(&self) -> EngineResult<Vec<Duel>> {
        Ok(self
            .duel_order
            .read()
            .iter()
            .filter_map(|id| self.duels.get(id).map(|d| d.value().clone()))
            .collect())
    }
}

impl FriendshipStore for MemoryStore {
    fn friendship(&self, id: FriendshipId) -> EngineResult<Option<Friendship>> {
        Ok(self.friendships.get(&id).map(|f| f.value().clone()))
    }

    fn friendship_between(&self, a: UserId, b: UserId) -> EngineResult<Option<Friendship>> {
        let Some(id) = self.friendship_pairs.get(&Self::pair_key(a, b)).map(|r| *r.value()) else {
            return Ok(None);
        };
        self.friendship(id)
    }

    fn insert_friendship(&self, friendship: &Friendship) -> EngineResult<()> {
        use dashmap::mapref::entry::Entry;

        // The pair entry is the uniqueness guard: its shard lock is held
        // until the record itself is in place.
        match self
            .friendship_pairs
            .entry(Self::pair_key(friendship.requester, friendship.recipient))
        {
            Entry::Occupied(existing) => Err(EngineError::AlreadyExists {
                kind: "friendship",
                id: existing.get().to_string(),
            }),
            Entry::Vacant(slot) => {
                self.friendships.insert(friendship.id, friendship.clone());
                slot.insert(friendship.id);
                Ok(())
            }
        }
    }

    fn transition_friendship(
        &self,
        id: FriendshipId,
        expected: FriendshipStatus,
        next: FriendshipStatus,
    ) -> EngineResult<Friendship> {
        // the shard write guard spans the check and the update
        let mut existing = self.friendships.get_mut(&id).ok_or_else(|| EngineError::NotFound {
            kind: "friendship",
            id: id.to_string(),
        })?;
        if existing.status != expected {
            return Err(EngineError::InvalidState {
                kind: "friendship",
                id: id.to_string(),
                status: existing.status.as_str().to_string(),
            });
        }
        existing.status = next;
        Ok(existing.value().clone())
    }

    fn friendships_of(&self, user: UserId) -> EngineResult<Vec<Friendship>> {
        let mut found: Vec<Friendship> = self
            .friendships
            .iter()
            .filter(|f| f.requester == user || f.recipient == user)
            .map(|f| f.value().clone())
            .collect();
        found.sort_by_key(|f| f.created_at);
        Ok(found)
    }
}

impl LeaderboardStore for MemoryStore {
    fn entry(&self, user: UserId, category: Category) -> EngineResult<Option<LeaderboardEntry>> {
        Ok(self
            .leaderboards
            .get(&category)
            .and_then(|entries| entries.iter().find(|e| e.user == user).cloned()))
    }

    fn save_entry(&self, entry: &LeaderboardEntry) -> EngineResult<()> {
        let mut entries = self.leaderboards.entry(entry.category).or_default();
        match entries.iter_mut().find(|e| e.user == entry.user) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    fn entries(&self, category: Category) -> EngineResult<Vec<LeaderboardEntry>> {
        Ok(self
            .leaderboards
            .get(&category)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_users_listed_in_registration_order() {
        let store = MemoryStore::new();
        let names = ["ana", "bo", "cy", "dee"];
        for name in names {
            store.insert_user(User::new(name, vec![Trait::new("Bold", 5)]));
        }
        let listed: Vec<String> = store.users().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(listed, names);
    }

    #[test]
    fn test_set_traits_requires_known_user() {
        let store = MemoryStore::new();
        let err = store.set_traits(UserId::new(), vec![]).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "user", .. }));
    }

    #[test]
    fn test_friendship_pair_is_unordered_and_unique() {
        let store = MemoryStore::new();
        let a = UserId::new();
        let b = UserId::new();
        let friendship = Friendship {
            id: FriendshipId::new(),
            requester: a,
            recipient: b,
            status: FriendshipStatus::Pending,
            compatibility_score: 50.0,
            relationship_type: RelationshipType::Mentor,
            created_at: Utc::now(),
        };
        store.insert_friendship(&friendship).unwrap();
        assert!(store.friendship_between(b, a).unwrap().is_some());

        let reverse = Friendship {
            id: FriendshipId::new(),
            requester: b,
            recipient: a,
            ..friendship
        };
        assert!(matches!(
            store.insert_friendship(&reverse),
            Err(EngineError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_friendship_transition_checks_expected_status() {
        let store = MemoryStore::new();
        let friendship = Friendship {
            id: FriendshipId::new(),
            requester: UserId::new(),
            recipient: UserId::new(),
            status: FriendshipStatus::Pending,
            compatibility_score: 80.0,
            relationship_type: RelationshipType::Friend,
            created_at: Utc::now(),
        };
        store.insert_friendship(&friendship).unwrap();

        let accepted = store
            .transition_friendship(friendship.id, FriendshipStatus::Pending, FriendshipStatus::Accepted)
            .unwrap();
        assert_eq!(accepted.status, FriendshipStatus::Accepted);

        let err = store
            .transition_friendship(friendship.id, FriendshipStatus::Pending, FriendshipStatus::Rejected)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { ref status, .. } if status == "accepted"));
        assert_eq!(
            store.friendship(friendship.id).unwrap().unwrap().status,
            FriendshipStatus::Accepted
        );
        assert!(matches!(
            store.transition_friendship(FriendshipId::new(), FriendshipStatus::Pending, FriendshipStatus::Accepted),
            Err(EngineError::NotFound { kind: "friendship", .. })
        ));
    }

    #[test]
    fn test_leaderboard_entries_keep_insertion_order_on_update() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = LeaderboardEntry::new(UserId::new(), Category::Dramatic, now);
        let second = LeaderboardEntry::new(UserId::new(), Category::Dramatic, now);
        store.save_entry(&first).unwrap();
        store.save_entry(&second).unwrap();

        let mut updated = first.clone();
        updated.score = 42.0;
        store.save_entry(&updated).unwrap();

        let entries = store.entries(Category::Dramatic).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].user, first.user);
        assert_eq!(entries[0].score, 42.0);
        assert!(store.entries(Category::Relatable).unwrap().is_empty());
    }
}
