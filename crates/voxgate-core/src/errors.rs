use std::fmt;

/// Raised while loading or validating engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Operational errors surfaced by the decision engine.
///
/// Callers branch on the variant: `NotFound` means "nothing there yet",
/// `Conflict` is a lost race that is safe to retry, and the transition
/// variants mean the queue state machine refused the request untouched.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {entity} '{id}' does not belong to tenant '{tenant_id}'")]
    Forbidden {
        entity: &'static str,
        id: String,
        tenant_id: String,
    },

    #[error("invalid transition: cannot {op} a queue item in state '{from}'")]
    InvalidTransition { op: &'static str, from: String },

    #[error("queue item '{queue_id}' is claimed by '{claimed_by}', not '{validator_id}'")]
    NotClaimant {
        queue_id: String,
        claimed_by: String,
        validator_id: String,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("feedback delivery failed: {0}")]
    Delivery(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    /// True when retrying the same call may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::Conflict(_) | EngineError::Delivery(_) => true,
            EngineError::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(EngineError::Conflict("race".into()).is_recoverable());
        assert!(!EngineError::not_found("baseline", "s1").is_recoverable());
        assert!(!EngineError::LockPoisoned.is_recoverable());

        let busy = EngineError::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_recoverable());
    }

    #[test]
    fn test_messages_name_the_entity() {
        let e = EngineError::not_found("queue item", "q-9");
        assert_eq!(e.to_string(), "not found: queue item 'q-9'");

        let e = EngineError::InvalidTransition {
            op: "release",
            from: "pending".into(),
        };
        assert!(e.to_string().contains("cannot release"));
    }
}
