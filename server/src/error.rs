use thiserror::Error;

/// Postgres SQLSTATE codes worth retrying once at the transaction boundary.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
}

/// Persistence-layer failures: the database itself, or a stored value that
/// no longer decodes (corrupt geometry or power set).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn corrupt(context: impl std::fmt::Display) -> Self {
        StoreError::Corrupt(context.to_string())
    }
}

/// Errors out of claim resolution. `Rejected` carries an actionable string
/// surfaced verbatim to the requester; everything else is opaque to players.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ClaimError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ClaimError::Rejected(reason.into())
    }

    /// The player-facing rejection reason, if this is one.
    pub fn user_reason(&self) -> Option<&str> {
        match self {
            ClaimError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClaimError::Db(e) | ClaimError::Store(StoreError::Db(e)) => is_retryable_db_error(e),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConquestError {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl ConquestError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ConquestError::Rejected(reason.into())
    }

    pub fn user_reason(&self) -> Option<&str> {
        match self {
            ConquestError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ConquestError::Db(e) | ConquestError::Store(StoreError::Db(e)) => {
                is_retryable_db_error(e)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("power already owned")]
    AlreadyOwned,
    #[error("no territory exists for this player")]
    MissingPlayer,
    #[error("power is not owned")]
    NotOwned,
    #[error("payment was not verified")]
    PaymentNotVerified,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub fn is_retryable_db_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref())),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{ClaimError, GeometryError};

    #[test]
    fn rejected_errors_expose_a_user_reason() {
        let error = ClaimError::rejected("trail too short");
        assert_eq!(error.user_reason(), Some("trail too short"));
    }

    #[test]
    fn internal_errors_stay_opaque() {
        let error = ClaimError::Geometry(GeometryError::InvalidGeometry("degenerate ring"));
        assert_eq!(error.user_reason(), None);
    }
}
