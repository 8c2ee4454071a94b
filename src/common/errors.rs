use thiserror::Error;

use crate::definition::migration::MigrationId;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid migration definition{}: {reason}", describe(.id))]
    InvalidDefinition {
        id: Option<MigrationId>,
        reason: String,
    },

    #[error("migration {id} has already been applied")]
    AlreadyApplied { id: MigrationId },

    #[error("migration {id} has not been applied")]
    NotApplied { id: MigrationId },

    #[error("migration lock is held by {owner}{}", describe(.id))]
    ConcurrentMigration {
        id: Option<MigrationId>,
        owner: String,
    },

    #[error("operation failed{}: {reason}", describe(.id))]
    OperationFailure {
        id: Option<MigrationId>,
        reason: String,
        #[source]
        source: Option<sqlx::Error>,
    },
}

fn describe(id: &Option<MigrationId>) -> String {
    id.map(|id| format!(" in migration {}", id))
        .unwrap_or_default()
}

impl MigrationError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        MigrationError::InvalidDefinition {
            id: None,
            reason: reason.into(),
        }
    }

    pub fn operation(reason: impl Into<String>, source: sqlx::Error) -> Self {
        MigrationError::OperationFailure {
            id: None,
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        MigrationError::OperationFailure {
            id: None,
            reason: reason.into(),
            source: None,
        }
    }

    /// Attaches `migration` to errors that were raised without one.
    pub fn with_id(self, migration: MigrationId) -> Self {
        match self {
            MigrationError::InvalidDefinition { id: None, reason } => {
                MigrationError::InvalidDefinition {
                    id: Some(migration),
                    reason,
                }
            }
            MigrationError::ConcurrentMigration { id: None, owner } => {
                MigrationError::ConcurrentMigration {
                    id: Some(migration),
                    owner,
                }
            }
            MigrationError::OperationFailure {
                id: None,
                reason,
                source,
            } => MigrationError::OperationFailure {
                id: Some(migration),
                reason,
                source,
            },
            other => other,
        }
    }

    pub fn migration_id(&self) -> Option<MigrationId> {
        match self {
            MigrationError::InvalidDefinition { id, .. }
            | MigrationError::ConcurrentMigration { id, .. }
            | MigrationError::OperationFailure { id, .. } => *id,
            MigrationError::AlreadyApplied { id } | MigrationError::NotApplied { id } => Some(*id),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            MigrationError::InvalidDefinition { .. } => 2,
            MigrationError::AlreadyApplied { .. } => 3,
            MigrationError::ConcurrentMigration { .. } => 4,
            MigrationError::OperationFailure { .. } => 5,
            MigrationError::NotApplied { .. } => 6,
        }
    }
}
