//! The external record service that publication reactions talk to.
//!
//! Only the interface is defined here. Each call is a single
//! request/response that either succeeds or fails with an optional cause;
//! wire protocols belong to the implementor.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Doi, Persona, RecordId, UserId};

/// Default time allowed for a single record service call.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// What kind of work a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// A structured review of a dataset.
    DatasetReview,
    /// A comment on a published review.
    Comment,
}

/// Everything the record service needs to create a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// What is being recorded.
    pub kind: RecordKind,
    /// Record title.
    pub title: String,
    /// Record body, plain text.
    pub description: String,
    /// The author of the work.
    pub creator: UserId,
    /// How the author is named on the record.
    pub persona: Persona,
    /// Identifier of the work being reviewed or commented on.
    pub related_identifier: String,
}

/// A failed record service call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed{}", .cause.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
pub struct RecordServiceError {
    /// The operation that failed, e.g. `"create_record"`.
    pub operation: &'static str,
    /// Why it failed, when the service said.
    pub cause: Option<String>,
}

impl RecordServiceError {
    /// A failure with no known cause.
    pub fn failed(operation: &'static str) -> Self {
        Self {
            operation,
            cause: None,
        }
    }

    /// A failure with a cause worth logging.
    pub fn with_cause(operation: &'static str, cause: impl Into<String>) -> Self {
        Self {
            operation,
            cause: Some(cause.into()),
        }
    }
}

/// The external service that mints and publishes records with DOIs.
#[async_trait]
pub trait RecordService: Send + Sync + 'static {
    /// Create an unpublished record, returning its id.
    async fn create_record(&self, draft: &RecordDraft) -> Result<RecordId, RecordServiceError>;

    /// Publish a previously created record.
    async fn publish_record(&self, record_id: RecordId) -> Result<(), RecordServiceError>;

    /// Look up the DOI reserved for a record.
    async fn get_doi(&self, record_id: RecordId) -> Result<Doi, RecordServiceError>;
}

/// Settings shared by the publication reactions.
#[derive(Debug, Clone)]
pub struct PublicationConfig {
    /// Time allowed for each record service call. A call that runs longer
    /// fails the reaction invocation; the triggering event stays committed.
    ///
    /// Default: 10 seconds.
    pub collaborator_timeout: Duration,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }
}

impl PublicationConfig {
    /// Set the per-call timeout.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }
}

/// Await a record service call, failing it once `limit` elapses.
pub async fn call_with_timeout<T>(
    limit: Duration,
    operation: &'static str,
    call: impl Future<Output = Result<T, RecordServiceError>>,
) -> Result<T, RecordServiceError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(RecordServiceError::with_cause(
            operation,
            format!("timed out after {limit:?}"),
        )),
    }
}
