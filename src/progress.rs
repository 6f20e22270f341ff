//! Per-user experience, levels, streaks and unlocks

use crate::catalog::{CharacterCatalog, CharacterMatch};
use crate::clock::Clock;
use crate::duel::DuelObserver;
use crate::error::{EngineError, EngineResult};
use crate::types::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

pub const XP_DUEL_PARTICIPATION: u64 = 25;
pub const XP_DUEL_WIN: u64 = 100;
pub const XP_CHARACTER_MATCH: u64 = 30;
pub const XP_STREAK_BONUS: u64 = 20;
pub const XP_DAILY_QUIZ: u64 = 50;
pub const XP_PER_LEVEL: u64 = 1000;
/// Match similarity above which a character match unlocks an evolution stage
pub const EVOLUTION_THRESHOLD: f64 = 0.8;

/// Activities tracked for daily streaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Duel,
    Vote,
    CharacterMatch,
    DailyQuiz,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Streak {
    pub kind: ActivityKind,
    pub current: u32,
    pub highest: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub name: String,
    pub description: String,
    pub unlocked_at: DateTime<Utc>,
}

/// Achievement a quiz hands out when the submitted score reaches `required_score`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuizReward {
    pub name: String,
    pub description: String,
    pub required_score: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvolutionStage {
    /// 1-based, in unlock order
    pub level: u32,
    pub character: String,
    pub traits: Vec<Trait>,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestFriendPick {
    pub character: String,
    pub universe: String,
    pub score: f64,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub user: UserId,
    pub xp: u64,
    pub level: u32,
    pub duels_participated: u32,
    pub duels_won: u32,
    pub daily_quizzes_taken: u32,
    pub achievements: Vec<Achievement>,
    pub streaks: Vec<Streak>,
    pub evolution: Vec<EvolutionStage>,
    pub best_friend: Option<BestFriendPick>,
}

impl Progress {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            xp: 0,
            level: 1,
            duels_participated: 0,
            duels_won: 0,
            daily_quizzes_taken: 0,
            achievements: Vec::new(),
            streaks: Vec::new(),
            evolution: Vec::new(),
            best_friend: None,
        }
    }

    pub fn streak(&self, kind: ActivityKind) -> Option<&Streak> {
        self.streaks.iter().find(|s| s.kind == kind)
    }

    fn record_duel(&mut self, won: bool) {
        self.duels_participated += 1;
        self.xp += XP_DUEL_PARTICIPATION;
        if won {
            self.duels_won += 1;
            self.xp += XP_DUEL_WIN;
        }
    }

    fn record_character_match(&mut self, matched: &CharacterMatch, now: DateTime<Utc>) {
        self.xp += XP_CHARACTER_MATCH;
        if matched.similarity > EVOLUTION_THRESHOLD {
            self.evolution.push(EvolutionStage {
                level: self.evolution.len() as u32 + 1,
                character: matched.character.name.clone(),
                traits: matched.character.traits.clone(),
                unlocked_at: now,
            });
        }
    }

    /// Unlocks every reward the score reaches; held achievements are not repeated
    fn record_quiz(&mut self, score: u32, rewards: &[QuizReward], now: DateTime<Utc>) {
        self.daily_quizzes_taken += 1;
        self.xp += XP_DAILY_QUIZ;
        for reward in rewards.iter().filter(|r| score >= r.required_score) {
            if self.achievements.iter().any(|a| a.name == reward.name) {
                continue;
            }
            self.achievements.push(Achievement {
                name: reward.name.clone(),
                description: reward.description.clone(),
                unlocked_at: now,
            });
        }
    }

    /// Calendar days are UTC days
    fn record_activity(&mut self, kind: ActivityKind, now: DateTime<Utc>) {
        let index = match self.streaks.iter().position(|s| s.kind == kind) {
            Some(i) => i,
            None => {
                self.streaks.push(Streak {
                    kind,
                    current: 0,
                    highest: 0,
                    last_activity: None,
                });
                self.streaks.len() - 1
            }
        };
        let streak = &mut self.streaks[index];

        let today = now.date_naive();
        let gap_days = streak
            .last_activity
            .map(|last| (today - last.date_naive()).num_days());
        match gap_days {
            Some(1) => {
                streak.current += 1;
                self.xp += XP_STREAK_BONUS;
            }
            Some(0) => {}
            _ => streak.current = 1,
        }
        streak.highest = streak.highest.max(streak.current);
        streak.last_activity = Some(now);
    }

    /// One achievement per level-up, however many levels were crossed
    fn check_level_up(&mut self, now: DateTime<Utc>) -> bool {
        let level = (self.xp / XP_PER_LEVEL) as u32 + 1;
        if level <= self.level {
            return false;
        }
        self.level = level;
        self.achievements.push(Achievement {
            name: format!("Level {level}"),
            description: format!("Reached level {level}"),
            unlocked_at: now,
        });
        true
    }
}

/// Something that earns progress
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    DuelCompleted { won: bool },
    CharacterMatched(CharacterMatch),
    QuizCompleted { score: u32, rewards: Vec<QuizReward> },
    Activity(ActivityKind),
}

/// Ordering key for the progress leaderboard, highest first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSort {
    #[default]
    Xp,
    Level,
    DuelsWon,
}

impl ProgressSort {
    fn key(&self, progress: &Progress) -> u64 {
        match self {
            ProgressSort::Xp => progress.xp,
            ProgressSort::Level => progress.level as u64,
            ProgressSort::DuelsWon => progress.duels_won as u64,
        }
    }
}

impl FromStr for ProgressSort {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xp" => Ok(ProgressSort::Xp),
            "level" => Ok(ProgressSort::Level),
            "duels_won" => Ok(ProgressSort::DuelsWon),
            _ => Err(EngineError::InvalidInput(format!("unknown progress sort {s:?}"))),
        }
    }
}

pub struct ProgressTracker {
    progress: DashMap<UserId, Progress>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ProgressTracker {
    pub fn new(clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            progress: DashMap::new(),
            clock,
            config,
        }
    }

    /// Current progress; a fresh level-1 record for unknown users
    pub fn progress(&self, user: UserId) -> Progress {
        self.progress
            .get(&user)
            .map(|p| p.value().clone())
            .unwrap_or_else(|| Progress::new(user))
    }

    pub fn update_progress(&self, user: UserId, event: ProgressEvent) -> Progress {
        let now = self.clock.now_utc();
        let mut progress = self.progress.entry(user).or_insert_with(|| Progress::new(user));

        match &event {
            ProgressEvent::DuelCompleted { won } => progress.record_duel(*won),
            ProgressEvent::CharacterMatched(matched) => progress.record_character_match(matched, now),
            ProgressEvent::QuizCompleted { score, rewards } => progress.record_quiz(*score, rewards, now),
            ProgressEvent::Activity(kind) => progress.record_activity(*kind, now),
        }
        if progress.check_level_up(now) {
            info!(user_id = %user, level = progress.level, "level up");
        }
        debug!(user_id = %user, xp = progress.xp, event = ?event, "progress updated");
        progress.value().clone()
    }

    /// Top progress records by `sort`
    ///
    /// Equal keys fall back to XP, then user id, so the order is stable
    /// across calls.
    pub fn leaderboard(&self, sort: ProgressSort, limit: Option<usize>) -> Vec<Progress> {
        let mut records: Vec<Progress> = self.progress.iter().map(|p| p.value().clone()).collect();
        records.sort_by(|a, b| {
            sort.key(b)
                .cmp(&sort.key(a))
                .then_with(|| b.xp.cmp(&a.xp))
                .then_with(|| a.user.cmp(&b.user))
        });
        records.truncate(limit.unwrap_or(self.config.default_leaderboard_limit));
        records
    }

    /// Best-friend character, recomputed once the cached pick is stale
    pub fn best_friend(
        &self,
        user: UserId,
        traits: &[Trait],
        catalog: &CharacterCatalog,
    ) -> EngineResult<BestFriendPick> {
        let now = self.clock.now_utc();
        let fresh_after = now - self.config.best_friend_refresh();
        if let Some(pick) = self
            .progress
            .get(&user)
            .and_then(|p| p.best_friend.clone())
            .filter(|pick| pick.unlocked_at > fresh_after)
        {
            return Ok(pick);
        }

        let found = catalog
            .find_best_friend(traits)
            .ok_or_else(|| EngineError::NotFound {
                kind: "character",
                id: "best friend".to_string(),
            })?;
        let pick = BestFriendPick {
            character: found.character.name,
            universe: found.character.universe,
            score: found.score,
            unlocked_at: now,
        };
        self.progress
            .entry(user)
            .or_insert_with(|| Progress::new(user))
            .best_friend = Some(pick.clone());
        debug!(user_id = %user, character = %pick.character, "best friend picked");
        Ok(pick)
    }
}

impl DuelObserver for ProgressTracker {
    fn on_duel_completed(&self, duel: &Duel) -> EngineResult<()> {
        for user in [duel.challenger, duel.opponent] {
            self.update_progress(
                user,
                ProgressEvent::DuelCompleted {
                    won: duel.winner == Some(user),
                },
            );
            self.update_progress(user, ProgressEvent::Activity(ActivityKind::Duel));
        }
        Ok(())
    }
}
