//! Crate-level error types for the event store, command handling and queries.

use uuid::Uuid;

/// Boxed infrastructure error carried as the cause of
/// [`StoreError::Unavailable`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by an [`EventStore`](crate::EventStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The resource's stored version did not equal the expected version.
    ///
    /// Nothing was written. The caller must reload and re-decide.
    #[error(
        "concurrency conflict on resource {resource_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The resource that was being appended to.
        resource_id: Uuid,
        /// The version the caller based its decision on.
        expected: u64,
        /// The version found in the store.
        actual: u64,
    },

    /// The resource exists but belongs to another aggregate kind.
    #[error("resource {resource_id} is a {actual}, not a {expected}")]
    ResourceTypeMismatch {
        /// The resource that was being appended to.
        resource_id: Uuid,
        /// The aggregate kind the caller expected.
        expected: String,
        /// The aggregate kind recorded in the store.
        actual: String,
    },

    /// The backing store could not be reached or failed mid-operation.
    #[error("event store unavailable")]
    Unavailable(#[source] BoxError),

    /// A stored payload or column could not be (de)serialized.
    #[error("event (de)serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap any infrastructure error as [`StoreError::Unavailable`].
    pub fn unavailable(cause: impl Into<BoxError>) -> Self {
        Self::Unavailable(cause.into())
    }

    /// Whether this is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(Box::new(err))
    }
}

/// Error returned when handling a command against an aggregate fails.
///
/// Generic over `E`, the domain error type of the aggregate. Domain errors
/// pass through unchanged; everything else is generalized into the opaque
/// [`UnableToHandleCommand`](HandleCommandError::UnableToHandleCommand) with
/// the original cause kept as the error `source` for logging.
///
/// # Type Parameters
///
/// * `E` - Domain error type, must implement `Error + Send + Sync + 'static`
#[derive(Debug, thiserror::Error)]
pub enum HandleCommandError<E: std::error::Error + Send + Sync + 'static> {
    /// Command rejected by aggregate logic.
    #[error(transparent)]
    Domain(E),

    /// The store failed or concurrency retries were exhausted.
    #[error("unable to handle command")]
    UnableToHandleCommand(#[source] StoreError),
}

impl<E: std::error::Error + Send + Sync + 'static> HandleCommandError<E> {
    /// The domain error, if the command was rejected by the aggregate.
    pub fn domain(&self) -> Option<&E> {
        match self {
            Self::Domain(e) => Some(e),
            Self::UnableToHandleCommand(_) => None,
        }
    }
}

/// Error returned when a query cannot fetch the events it needs.
#[derive(Debug, thiserror::Error)]
#[error("unable to query")]
pub struct UnableToQuery(#[source] pub StoreError);

impl From<StoreError> for UnableToQuery {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    /// A minimal domain error for testing `HandleCommandError<E>`.
    #[derive(Debug, thiserror::Error)]
    #[error("test domain error")]
    struct TestDomainError;

    #[test]
    fn domain_error_displays_inner() {
        let err: HandleCommandError<TestDomainError> = HandleCommandError::Domain(TestDomainError);
        assert_eq!(err.to_string(), "test domain error");
        assert!(err.domain().is_some());
    }

    #[test]
    fn unable_to_handle_command_hides_conflict_detail() {
        let conflict = StoreError::ConcurrencyConflict {
            resource_id: Uuid::nil(),
            expected: 1,
            actual: 2,
        };
        let err: HandleCommandError<TestDomainError> =
            HandleCommandError::UnableToHandleCommand(conflict);

        assert_eq!(err.to_string(), "unable to handle command");
        let source = err.source().expect("cause should be attached");
        assert!(source.to_string().contains("expected version 1"));
        assert!(err.domain().is_none());
    }

    #[test]
    fn sqlx_errors_become_unavailable() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(!err.is_conflict());
    }

    #[test]
    fn serde_errors_become_serialization() {
        let serde_err = serde_json::from_str::<u64>("not json").unwrap_err();
        let err = StoreError::from(serde_err);
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn unable_to_query_keeps_source() {
        let err = UnableToQuery::from(StoreError::unavailable("disk on fire"));
        assert_eq!(err.to_string(), "unable to query");
        let source = err.source().expect("cause should be attached");
        assert_eq!(source.to_string(), "event store unavailable");
    }

    // Verify `Send + Sync` bounds are satisfied so errors can cross task
    // boundaries, which is required for use with `tokio` tasks.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<HandleCommandError<TestDomainError>>();
            assert_send_sync::<StoreError>();
            assert_send_sync::<UnableToQuery>();
        }
    };
}
