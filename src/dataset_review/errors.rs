//! Why a dataset review command was rejected.

use super::state::Requirement;
use crate::types::RecordId;

/// Why a [`DatasetReviewCommand`](super::DatasetReviewCommand) was rejected.
///
/// Where several rules are broken at once, the first in declaration order
/// wins: not started, then wrong author, then being published, then
/// published.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatasetReviewError {
    #[error("the review has not been started")]
    NotStarted,
    #[error("the review has already been started")]
    AlreadyStarted,
    #[error("the review was started by another user")]
    StartedByAnotherUser,
    #[error("the review is being published")]
    IsBeingPublished,
    #[error("the review has been published")]
    HasBeenPublished,
    /// Publication was requested before every requirement was met.
    #[error("the review is not ready to be published ({} requirements missing)", .missing.len())]
    NotReadyToBePublished { missing: Vec<Requirement> },
    #[error("publication of the review was not requested")]
    PublicationWasNotRequested,
    #[error("no record has been created for the review")]
    RecordNotCreated,
    /// The review is already tied to a different record.
    #[error("record {record_id} has already been created for the review")]
    RecordAlreadyCreated { record_id: RecordId },
}
