//! Domain error model.
//!
//! Every failure a caller can branch on has its own variant and a stable
//! machine code (see [`DomainError::code`]). Storage and transport failures
//! collapse into [`DomainError::Internal`].

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced entity id or token does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A name is already taken within its uniqueness scope.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// A referenced role or permission belongs to another organization.
    #[error("cross-tenant reference: {0}")]
    CrossTenantReference(String),

    /// The user already holds a membership in the organization.
    #[error("already a member of this organization")]
    AlreadyMember,

    /// The operation is not valid for the entity's lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The invitation exists but is past its expiry.
    #[error("invitation has expired")]
    Expired,

    /// The invitation is no longer pending.
    #[error("invitation has already been processed")]
    AlreadyProcessed,

    /// A pending invitation for this email already exists.
    #[error("an invitation is already pending for {0}")]
    PendingInvitationExists(String),

    /// The user already has a pending join request for this organization.
    #[error("a join request is already pending")]
    PendingJoinRequestExists,

    /// An all-or-nothing batch was rejected; nothing was applied.
    #[error("batch rejected: {} invalid id(s)", .0.len())]
    BatchRejected(Vec<String>),

    /// Malformed input (bad enum value, missing or empty field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Unexpected infrastructure failure. The message is for logs only.
    #[error("internal error")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    pub fn cross_tenant(msg: impl Into<String>) -> Self {
        Self::CrossTenantReference(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable, machine-checkable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::NotFound(_) => "not_found",
            DomainError::DuplicateName(_) => "duplicate_name",
            DomainError::CrossTenantReference(_) => "cross_tenant_reference",
            DomainError::AlreadyMember => "already_member",
            DomainError::InvalidState(_) => "invalid_state",
            DomainError::Expired => "expired",
            DomainError::AlreadyProcessed => "already_processed",
            DomainError::PendingInvitationExists(_) => "invitation_already_sent",
            DomainError::PendingJoinRequestExists => "join_request_pending",
            DomainError::BatchRejected(_) => "batch_rejected",
            DomainError::Validation(_) => "validation_error",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::Internal(_) => "internal_error",
        }
    }
}
