//! Authorization gate: may this user act on this board at this level?
//!
//! The gate only reads. Store failures come back as `SyncError::Store`
//! and are never turned into a denial.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{BoardMember, Role};
use crate::storage::AccessLookup;

/// A granted access decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// The board owner. No membership row was consulted.
    Owner,
    Member(BoardMember),
}

impl Access {
    /// Effective role; the owner always acts as admin.
    pub fn role(&self) -> Role {
        match self {
            Access::Owner => Role::Admin,
            Access::Member(member) => member.role,
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Access::Owner)
    }
}

#[derive(Clone)]
pub struct AccessGate {
    lookup: Arc<dyn AccessLookup>,
}

impl AccessGate {
    pub fn new(lookup: Arc<dyn AccessLookup>) -> Self {
        Self { lookup }
    }

    /// Check `user_id` against `board_id`.
    ///
    /// With `required` set, a member must hold one of those roles. Without
    /// it any membership is enough. The owner passes regardless.
    pub async fn check(
        &self,
        board_id: Option<Uuid>,
        user_id: Option<Uuid>,
        required: Option<&[Role]>,
    ) -> Result<Access, SyncError> {
        let (Some(board_id), Some(user_id)) = (board_id, user_id) else {
            return Err(SyncError::MissingIdentifier);
        };

        let board = self
            .lookup
            .board(board_id)
            .await?
            .ok_or(SyncError::NotFound("Board"))?;

        if board.owner_id == user_id {
            return Ok(Access::Owner);
        }

        let member = self
            .lookup
            .member(board_id, user_id)
            .await?
            .ok_or(SyncError::NotMember)?;

        if let Some(roles) = required {
            if !roles.contains(&member.role) {
                return Err(SyncError::RoleMismatch(roles.to_vec()));
            }
        }

        Ok(Access::Member(member))
    }

    /// `check` for callers that always have both ids.
    pub async fn require(
        &self,
        board_id: Uuid,
        user_id: Uuid,
        required: Option<&[Role]>,
    ) -> Result<Access, SyncError> {
        self.check(Some(board_id), Some(user_id), required).await
    }
}
