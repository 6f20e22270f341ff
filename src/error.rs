//! Engine error type and its serializable kind tag

use crate::types::{DuelId, UserId};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the engine services
///
/// Every error is scoped to the single operation that produced it; none
/// are retried internally.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced user, duel or friendship does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Entity is not in the status the operation requires
    #[error("{kind} {id} is {status}")]
    InvalidState {
        kind: &'static str,
        id: String,
        status: String,
    },

    /// Actor lacks the required relationship to the target
    #[error("user {actor} is not authorized: {reason}")]
    NotAuthorized { actor: UserId, reason: &'static str },

    /// Uniqueness invariant would be violated
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Voter already has a vote recorded on this duel
    #[error("user {voter} already voted on duel {duel}")]
    AlreadyVoted { duel: DuelId, voter: UserId },

    /// Similarity requested over an empty trait vector
    #[error("degenerate trait vector: similarity needs at least one trait on each side")]
    DegenerateInput,

    /// Matchmaking found no eligible opponent
    #[error("no suitable opponent found for user {user}")]
    NoCandidate { user: UserId },

    /// Request is malformed independent of stored state
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Storage collaborator failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Config or catalog (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable error tag for the API layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    NotAuthorized,
    AlreadyExists,
    AlreadyVoted,
    DegenerateInput,
    NoCandidate,
    InvalidInput,
    Storage,
    Serialization,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::NotAuthorized { .. } => ErrorKind::NotAuthorized,
            EngineError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            EngineError::AlreadyVoted { .. } => ErrorKind::AlreadyVoted,
            EngineError::DegenerateInput => ErrorKind::DegenerateInput,
            EngineError::NoCandidate { .. } => ErrorKind::NoCandidate,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub(crate) fn user_not_found(id: UserId) -> Self {
        EngineError::NotFound {
            kind: "user",
            id: id.to_string(),
        }
    }

    pub(crate) fn duel_not_found(id: DuelId) -> Self {
        EngineError::NotFound {
            kind: "duel",
            id: id.to_string(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_match_variants() {
        let user = UserId::new();
        assert_eq!(EngineError::user_not_found(user).kind(), ErrorKind::NotFound);
        assert_eq!(EngineError::DegenerateInput.kind(), ErrorKind::DegenerateInput);
        assert_eq!(
            EngineError::NoCandidate { user }.kind(),
            ErrorKind::NoCandidate
        );
    }

    #[test]
    fn test_messages_name_the_entity() {
        let duel = DuelId::new();
        let msg = EngineError::duel_not_found(duel).to_string();
        assert!(msg.starts_with("duel not found"));
        assert!(msg.contains(&duel.to_string()));
    }
}
