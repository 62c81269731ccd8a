//! Error types for the lore store.
//!
//! Every raw driver error is classified into exactly one [`StoreError`] kind
//! before it leaves the crate, so callers branch on [`ErrorKind`] and never on
//! message text or sqlx types.

use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Operation label used when a driver error is converted without context.
const UNSPECIFIED_OPERATION: &str = "database operation";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Timed out acquiring a pooled connection during {operation}")]
    ConnectionAcquisitionTimeout { operation: String },

    #[error("Statement failed during {operation}: {message}")]
    StatementExecution {
        operation: String,
        /// Backend-native error code (SQLSTATE or vendor code)
        code: Option<String>,
        message: String,
    },

    #[error("Constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        code: Option<String>,
    },

    #[error("Migration to version {version} failed: {message}")]
    MigrationFailure { version: i64, message: String },

    #[error("Network error talking to the database: {message}")]
    TransientNetwork { message: String },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },

    #[error("The store is shutting down and no longer accepts work")]
    ShuttingDown,
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionAcquisitionTimeout,
    StatementExecution,
    ConstraintViolation,
    MigrationFailure,
    TransientNetwork,
    Configuration,
    Decode,
    ShuttingDown,
}

impl StoreError {
    /// Create a statement execution error.
    pub fn statement(
        operation: impl Into<String>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StatementExecution {
            operation: operation.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a constraint violation without a backend code (repository-level validation).
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
            code: None,
        }
    }

    /// Create a migration failure for the given version.
    pub fn migration(version: i64, message: impl Into<String>) -> Self {
        Self::MigrationFailure {
            version,
            message: message.into(),
        }
    }

    /// Create a transient network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a column decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionAcquisitionTimeout { .. } => ErrorKind::ConnectionAcquisitionTimeout,
            Self::StatementExecution { .. } => ErrorKind::StatementExecution,
            Self::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Self::MigrationFailure { .. } => ErrorKind::MigrationFailure,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Check if this error is retryable by caller policy.
    ///
    /// Constraint violations are never retryable; retrying a transient network
    /// error should use backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionAcquisitionTimeout { .. } | Self::TransientNetwork { .. }
        )
    }

    /// Attach the logical operation name to errors that carry one.
    pub fn with_operation(self, operation: &str) -> Self {
        match self {
            Self::ConnectionAcquisitionTimeout { .. } => Self::ConnectionAcquisitionTimeout {
                operation: operation.to_string(),
            },
            Self::StatementExecution { code, message, .. } => Self::StatementExecution {
                operation: operation.to_string(),
                code,
                message,
            },
            other => other,
        }
    }

    /// Log full diagnostics under a fresh correlation id and return the
    /// message that is safe to show an end user.
    pub fn report(&self, operation: &str) -> FailureReport {
        let correlation_id = Uuid::new_v4();
        error!(
            correlation_id = %correlation_id,
            operation = %operation,
            kind = ?self.kind(),
            error = %self,
            "Lore store operation failed"
        );

        let user_message = match self.kind() {
            ErrorKind::ConstraintViolation => {
                format!("That change is not allowed (ref: {})", correlation_id.simple())
            }
            ErrorKind::ConnectionAcquisitionTimeout | ErrorKind::TransientNetwork => format!(
                "The lore database is busy, please try again shortly (ref: {})",
                correlation_id.simple()
            ),
            _ => format!(
                "An internal error occurred (ref: {})",
                correlation_id.simple()
            ),
        };

        FailureReport {
            correlation_id,
            user_message,
        }
    }
}

/// Non-leaking description of a failure, for end users.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub correlation_id: Uuid,
    pub user_message: String,
}

/// Classify sqlx errors into a StoreError kind.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation
                    | sqlx::error::ErrorKind::ForeignKeyViolation
                    | sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => StoreError::ConstraintViolation {
                        message: db_err.message().to_string(),
                        code,
                    },
                    _ if code.as_deref().is_some_and(is_connection_exception) => {
                        StoreError::network(db_err.message())
                    }
                    _ => StoreError::statement(UNSPECIFIED_OPERATION, code, db_err.message()),
                }
            }
            sqlx::Error::PoolTimedOut => {
                warn!("Timed out waiting for a pooled database connection");
                StoreError::ConnectionAcquisitionTimeout {
                    operation: UNSPECIFIED_OPERATION.to_string(),
                }
            }
            sqlx::Error::PoolClosed => StoreError::network("Connection pool is closed"),
            sqlx::Error::Io(io_err) => StoreError::network(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => StoreError::network(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => StoreError::network(format!("Protocol error: {}", msg)),
            sqlx::Error::Configuration(msg) => StoreError::configuration(msg.to_string()),
            sqlx::Error::ColumnNotFound(col) => {
                StoreError::decode(col.clone(), format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::decode(index, source.to_string())
            }
            sqlx::Error::Decode(source) => StoreError::decode("<unknown>", source.to_string()),
            sqlx::Error::RowNotFound => {
                StoreError::statement(UNSPECIFIED_OPERATION, None, "No rows returned")
            }
            other => StoreError::statement(UNSPECIFIED_OPERATION, None, other.to_string()),
        }
    }
}

/// SQLSTATE class 08 (connection exception) and the MySQL client codes for a
/// lost server connection.
fn is_connection_exception(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "2006" | "2013" | "1053")
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Adds operation context to a failed result and logs statement failures.
pub trait OperationContext<T> {
    fn during(self, operation: &str) -> StoreResult<T>;
}

impl<T> OperationContext<T> for StoreResult<T> {
    fn during(self, operation: &str) -> StoreResult<T> {
        self.map_err(|err| {
            let err = err.with_operation(operation);
            if let StoreError::StatementExecution { code, message, .. } = &err {
                error!(
                    operation = %operation,
                    code = ?code,
                    message = %message,
                    "Statement execution failed"
                );
            }
            err
        })
    }
}
