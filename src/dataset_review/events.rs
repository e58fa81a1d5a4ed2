//! Events recorded for a dataset review, and the answer scales they carry.

use serde::{Deserialize, Serialize};

use crate::types::{DatasetId, Doi, Persona, RecordId, UserId};

/// Answer to a question that allows a partial yes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum YesPartlyNoUnsure {
    Yes,
    Partly,
    No,
    Unsure,
}

/// Answer to a plain yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum YesNoUnsure {
    Yes,
    No,
    Unsure,
}

/// Domain events produced by the [`DatasetReview`](super::DatasetReview)
/// aggregate.
///
/// Variant names are stored as the `event_type` column, so renaming one
/// orphans every stored row of that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DatasetReviewEvent {
    /// An author began reviewing a dataset.
    Started {
        author_id: UserId,
        dataset_id: DatasetId,
    },
    AnsweredIfTheDatasetFollowsFairAndCarePrinciples {
        answer: YesPartlyNoUnsure,
    },
    AnsweredIfTheDatasetHasEnoughMetadata {
        answer: YesPartlyNoUnsure,
    },
    AnsweredIfTheDatasetHasTrackedChanges {
        answer: YesPartlyNoUnsure,
    },
    AnsweredIfTheDatasetIsReadyToBeShared {
        answer: YesNoUnsure,
    },
    /// Free-text answer. `None` means the author said nothing is missing.
    AnsweredIfTheDatasetIsMissingAnything {
        answer: Option<String>,
    },
    PersonaChosen {
        persona: Persona,
    },
    /// `None` means the author has no competing interests.
    CompetingInterestsDeclared {
        competing_interests: Option<String>,
    },
    DeclaredFollowingCodeOfConduct,
    /// The author asked for the review to be published. Triggers record
    /// creation.
    PublicationRequested,
    /// The external record service accepted the review.
    RecordCreated {
        record_id: RecordId,
    },
    /// The record is public under `doi`.
    Published {
        doi: Doi,
    },
}
