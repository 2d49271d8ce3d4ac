//! Error taxonomy for the lending core.

/// Message surfaced for every authorization-adjacent failure. Callers must not
/// learn which resolution rule failed.
pub const NOT_AUTHORIZED_MESSAGE: &str = "not authorized";

#[derive(thiserror::Error, Debug)]
pub enum LendingError {
    #[error("referenced {kind} {id} does not exist")]
    EntityNotFound { kind: &'static str, id: String },
    #[error("no organization scope could be determined for the target")]
    EntityNotScoped,
    #[error("actor holds no membership in the resolved organization")]
    EntityNotMember,
    #[error("resolved privilege level is insufficient for this action")]
    NotAuthorized,
    #[error("item does not belong to the order's organization")]
    OrganizationMismatch,
    #[error("unrecognized status tag: {0}")]
    InvalidStatus(String),
    #[error("item {0} is not available for the requested period")]
    ItemUnavailable(String),
    #[error("item {0} is not borrowable")]
    ItemNotBorrowable(String),
    #[error("item {0} still has bookings and cannot be deleted")]
    ItemInUse(String),
    #[error("storage failure: {0}")]
    Store(#[from] sled::Error),
    #[error("codec failure: {0}")]
    Codec(String),
}

impl LendingError {
    /// User-facing message. The three rights-resolution failures collapse into
    /// one generic string; everything else keeps its operation-specific text.
    pub fn public_message(&self) -> String {
        match self {
            LendingError::EntityNotScoped
            | LendingError::EntityNotMember
            | LendingError::NotAuthorized => NOT_AUTHORIZED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
