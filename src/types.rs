//! Domain types shared by every service, plus engine and simulation config

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| EngineError::InvalidInput(format!("bad id {s:?}: {e}")))
            }
        }
    };
}

id_type!(
    /// Identity of a user (owned by the identity subsystem)
    UserId
);
id_type!(DuelId);
id_type!(FriendshipId);

pub const MIN_TRAIT_SCORE: u8 = 1;
pub const MAX_TRAIT_SCORE: u8 = 10;

/// A named personality trait with an intensity in [1, 10]
///
/// Display casing is kept as given; the engine compares names
/// case-insensitively through [`Trait::key`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TraitRecord")]
pub struct Trait {
    pub name: String,
    pub score: u8,
}

#[derive(Deserialize)]
struct TraitRecord {
    name: String,
    score: i64,
}

impl From<TraitRecord> for Trait {
    fn from(record: TraitRecord) -> Self {
        let score = record
            .score
            .clamp(MIN_TRAIT_SCORE as i64, MAX_TRAIT_SCORE as i64) as u8;
        Trait {
            name: record.name,
            score,
        }
    }
}

impl Trait {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        TraitRecord {
            name: name.into(),
            score,
        }
        .into()
    }

    /// Lower-cased name used for all comparisons
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn matches_name(&self, other: &Trait) -> bool {
        self.key() == other.key()
    }
}

/// Mean trait score, 0 for an empty list
pub fn mean_trait_score(traits: &[Trait]) -> f64 {
    if traits.is_empty() {
        return 0.0;
    }
    traits.iter().map(|t| t.score as f64).sum::<f64>() / traits.len() as f64
}

/// Read-only view of a user as seen by the engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub traits: Vec<Trait>,
}

impl User {
    pub fn new(username: impl Into<String>, traits: Vec<Trait>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            traits,
        }
    }

    pub fn has_traits(&self) -> bool {
        !self.traits.is_empty()
    }
}

/// Duel lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl DuelStatus {
    /// Pending and active duels count as an ongoing engagement
    pub fn is_open(&self) -> bool {
        matches!(self, DuelStatus::Pending | DuelStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DuelStatus::Pending => "pending",
            DuelStatus::Active => "active",
            DuelStatus::Completed => "completed",
            DuelStatus::Cancelled => "cancelled",
        }
    }
}

/// How a duel came about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelType {
    Automatic,
    Challenge,
}

/// A single audience vote
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: UserId,
    pub voted_for: UserId,
    pub timestamp: DateTime<Utc>,
}

/// A time-boxed, audience-voted head-to-head between two users
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Duel {
    pub id: DuelId,
    pub challenger: UserId,
    pub opponent: UserId,
    pub status: DuelStatus,
    pub duel_type: DuelType,
    pub viewers: HashSet<UserId>,
    /// Votes in submission order; one per voter
    pub votes: Vec<Vote>,
    /// Compatibility of the two trait vectors, 0-100
    pub match_score: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Set only on the transition to completed
    pub winner: Option<UserId>,
}

impl Duel {
    pub fn involves(&self, user: UserId) -> bool {
        self.challenger == user || self.opponent == user
    }

    /// The other side of the duel, if `user` takes part in it
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if self.challenger == user {
            Some(self.opponent)
        } else if self.opponent == user {
            Some(self.challenger)
        } else {
            None
        }
    }

    /// Whichever participant is not the winner
    pub fn loser(&self) -> Option<UserId> {
        self.winner.and_then(|w| self.counterpart(w))
    }

    pub fn has_voted(&self, voter: UserId) -> bool {
        self.votes.iter().any(|v| v.voter == voter)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.end_time <= now
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Rejected => "rejected",
        }
    }
}

/// Relationship classification between two trait sets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Rival,
    Mentor,
    Mentee,
    Friend,
}

/// At most one per unordered (requester, recipient) pair
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Friendship {
    pub id: FriendshipId,
    pub requester: UserId,
    pub recipient: UserId,
    pub status: FriendshipStatus,
    /// 0-100
    pub compatibility_score: f64,
    pub relationship_type: RelationshipType,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    pub fn connects(&self, a: UserId, b: UserId) -> bool {
        (self.requester == a && self.recipient == b) || (self.requester == b && self.recipient == a)
    }
}

/// Leaderboard categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MainCharacter,
    Dramatic,
    Relatable,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::MainCharacter, Category::Dramatic, Category::Relatable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MainCharacter => "main_character",
            Category::Dramatic => "dramatic",
            Category::Relatable => "relatable",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown category {s:?}")))
    }
}

/// One per (user, category); created lazily, never deleted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user: UserId,
    pub category: Category,
    pub score: f64,
    /// 1-based; 0 until the first rank pass
    pub rank: u32,
    /// Number of completed duels the user took part in
    pub total_votes: u32,
    pub duels_won: u32,
    /// 0-100
    pub uniqueness_score: f64,
    /// 0-100
    pub engagement_score: f64,
    pub last_updated: DateTime<Utc>,
}

impl LeaderboardEntry {
    pub fn new(user: UserId, category: Category, now: DateTime<Utc>) -> Self {
        Self {
            user,
            category,
            score: 0.0,
            rank: 0,
            total_votes: 0,
            duels_won: 0,
            uniqueness_score: 0.0,
            engagement_score: 0.0,
            last_updated: now,
        }
    }
}

/// Engine configuration parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max candidates returned by opponent search
    pub opponent_sample_cap: usize,
    /// Voting window of a new duel
    pub duel_window_hours: i64,
    /// Trailing window of the engagement score
    pub engagement_window_days: i64,
    pub default_leaderboard_limit: usize,
    pub character_match_limit: usize,
    pub universe_suggestion_limit: usize,
    /// How long a best-friend character pick stays cached
    pub best_friend_refresh_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opponent_sample_cap: 10,
            duel_window_hours: 24,
            engagement_window_days: 30,
            default_leaderboard_limit: 10,
            character_match_limit: 5,
            universe_suggestion_limit: 3,
            best_friend_refresh_hours: 24,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn duel_window(&self) -> Duration {
        Duration::hours(self.duel_window_hours)
    }

    pub fn best_friend_refresh(&self) -> Duration {
        Duration::hours(self.best_friend_refresh_hours)
    }
}

/// Synthetic population driver parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub engine: EngineConfig,
    /// Simulated minutes per tick
    pub tick_minutes: i64,
    /// Chance per tick that an idle user asks for an automatic duel
    pub duel_request_prob: f64,
    /// Viewers attached to each new duel
    pub viewers_per_duel: usize,
    /// Chance per tick that a viewer who hasn't voted casts a vote
    pub vote_prob: f64,
    /// Chance per tick that a user sends a friend request
    pub friend_request_prob: f64,
    pub min_traits_per_user: usize,
    pub max_traits_per_user: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            tick_minutes: 30,
            duel_request_prob: 0.05,
            viewers_per_duel: 5,
            vote_prob: 0.2,
            friend_request_prob: 0.01,
            min_traits_per_user: 3,
            max_traits_per_user: 6,
        }
    }
}

impl SimulationConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
