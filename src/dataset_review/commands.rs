//! Commands accepted by the dataset review aggregate.

use super::events::{YesNoUnsure, YesPartlyNoUnsure};
use crate::types::{DatasetId, Doi, Persona, RecordId, UserId};

/// Commands accepted by the [`DatasetReview`](super::DatasetReview)
/// aggregate.
///
/// Editing commands name the user issuing them so the aggregate can refuse
/// anyone but the author. `MarkRecordCreated` and `MarkPublished` are only
/// issued by the publication reactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetReviewCommand {
    /// Begin a review of `dataset_id`.
    Start {
        author_id: UserId,
        dataset_id: DatasetId,
    },
    AnswerIfTheDatasetFollowsFairAndCarePrinciples {
        answer: YesPartlyNoUnsure,
        answered_by: UserId,
    },
    AnswerIfTheDatasetHasEnoughMetadata {
        answer: YesPartlyNoUnsure,
        answered_by: UserId,
    },
    AnswerIfTheDatasetHasTrackedChanges {
        answer: YesPartlyNoUnsure,
        answered_by: UserId,
    },
    AnswerIfTheDatasetIsReadyToBeShared {
        answer: YesNoUnsure,
        answered_by: UserId,
    },
    /// A blank answer is stored as "nothing missing".
    AnswerIfTheDatasetIsMissingAnything {
        answer: Option<String>,
        answered_by: UserId,
    },
    ChoosePersona {
        persona: Persona,
        chosen_by: UserId,
    },
    DeclareCompetingInterests {
        competing_interests: Option<String>,
        declared_by: UserId,
    },
    DeclareFollowingCodeOfConduct {
        declared_by: UserId,
    },
    /// Ask for the finished review to be published.
    Publish {
        requested_by: UserId,
    },
    MarkRecordCreated {
        record_id: RecordId,
    },
    MarkPublished {
        doi: Doi,
    },
}
