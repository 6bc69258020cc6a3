// src/infra/errors.rs — Error types for habitus

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HabitusError {
    // Caller errors (surfaced synchronously)
    #[error("Invalid {what}: {message}")]
    Validation { what: &'static str, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    // Persistence (logged; in-memory state stays authoritative)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HabitusError {
    pub fn validation(what: &'static str, message: impl Into<String>) -> Self {
        HabitusError::Validation {
            what,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        HabitusError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Persistence failures: the in-memory state is still valid.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            HabitusError::Storage(_) | HabitusError::Database(_) | HabitusError::Io(_)
        )
    }

    /// Errors caused by the caller's input rather than the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            HabitusError::Validation { .. } | HabitusError::Config(_) | HabitusError::NotFound { .. }
        )
    }
}

pub type Result<T, E = HabitusError> = std::result::Result<T, E>;
