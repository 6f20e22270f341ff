//! Friend requests between users
//!
//! A request is scored and classified when it is sent. Answering it is a
//! single `pending -> accepted | rejected` step in the store.

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::similarity::{compatibility_or_zero, relationship_type};
use crate::store::{FriendshipStore, UserStore};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// An accepted friendship seen from one side
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FriendSummary {
    pub friend: UserId,
    pub compatibility_score: f64,
    pub relationship_type: RelationshipType,
}

/// Friend requests and the resulting relationships
pub struct FriendshipService {
    users: Arc<dyn UserStore>,
    friendships: Arc<dyn FriendshipStore>,
    clock: Arc<dyn Clock>,
}

impl FriendshipService {
    pub fn new(
        users: Arc<dyn UserStore>,
        friendships: Arc<dyn FriendshipStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            friendships,
            clock,
        }
    }

    fn user(&self, id: UserId) -> EngineResult<User> {
        self.users.user(id)?.ok_or_else(|| EngineError::user_not_found(id))
    }

    /// Open a pending request, scored and classified from the requester's side
    #[instrument(skip(self))]
    pub fn send_friend_request(&self, requester: UserId, recipient: UserId) -> EngineResult<Friendship> {
        if requester == recipient {
            return Err(EngineError::InvalidInput(
                "cannot send a friend request to yourself".to_string(),
            ));
        }
        let requester_user = self.user(requester)?;
        let recipient_user = self.user(recipient)?;

        let compatibility_score = compatibility_or_zero(&requester_user.traits, &recipient_user.traits)?;
        let friendship = Friendship {
            id: FriendshipId::new(),
            requester,
            recipient,
            status: FriendshipStatus::Pending,
            compatibility_score,
            relationship_type: relationship_type(
                compatibility_score,
                &requester_user.traits,
                &recipient_user.traits,
            ),
            created_at: self.clock.now_utc(),
        };
        // the store rejects a second record for the pair
        self.friendships.insert_friendship(&friendship)?;

        info!(
            friendship_id = %friendship.id,
            compatibility = compatibility_score,
            relationship = ?friendship.relationship_type,
            "friend request sent"
        );
        Ok(friendship)
    }

    /// Accept or reject a pending request; only its recipient may answer
    #[instrument(skip(self))]
    pub fn respond_to_friend_request(
        &self,
        friendship_id: FriendshipId,
        actor: UserId,
        accept: bool,
    ) -> EngineResult<Friendship> {
        let friendship = self
            .friendships
            .friendship(friendship_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "friendship",
                id: friendship_id.to_string(),
            })?;

        if friendship.recipient != actor {
            warn!(friendship_id = %friendship_id, actor = %actor, "response from non-recipient");
            return Err(EngineError::NotAuthorized {
                actor,
                reason: "only the recipient can answer a friend request",
            });
        }

        let next = if accept {
            FriendshipStatus::Accepted
        } else {
            FriendshipStatus::Rejected
        };
        // the pending check and the write happen together in the store,
        // so two concurrent answers cannot both succeed
        let friendship =
            self.friendships
                .transition_friendship(friendship_id, FriendshipStatus::Pending, next)?;
        info!(friendship_id = %friendship_id, status = friendship.status.as_str(), "friend request answered");
        Ok(friendship)
    }

    pub fn friends_list(&self, user: UserId) -> EngineResult<Vec<FriendSummary>> {
        Ok(self
            .friendships
            .friendships_of(user)?
            .into_iter()
            .filter(|f| f.status == FriendshipStatus::Accepted)
            .map(|f| FriendSummary {
                friend: if f.requester == user {
                    f.recipient
                } else {
                    f.requester
                },
                compatibility_score: f.compatibility_score,
                relationship_type: f.relationship_type,
            })
            .collect())
    }
}
