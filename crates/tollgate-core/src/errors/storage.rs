// ABOUTME: Storage error types shared by all OAuth2Store backends
// ABOUTME: Covers backend failures, timeouts, conflicts, and corrupt rows with sqlx conversion
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

/// Errors raised by storage backends
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Query or connection failure in the backend
    #[error("storage backend error during {context}: {message}")]
    Backend {
        /// Operation being performed
        context: &'static str,
        /// Backend-provided message
        message: String,
    },

    /// Operation did not complete in the configured time
    #[error("storage operation {operation} timed out")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },

    /// Uniqueness or state precondition violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table or collection name
        table: &'static str,
        /// Decoding failure
        reason: String,
    },
}

impl StorageError {
    /// Construct a backend error with context
    pub fn backend(context: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            context,
            message: message.into(),
        }
    }

    /// Construct a corrupt-row error
    pub fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "database-errors")]
impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_owned()),
            sqlx::Error::PoolTimedOut => Self::Timeout {
                operation: "acquire connection",
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_owned())
            }
            other => Self::backend("query", other.to_string()),
        }
    }
}
