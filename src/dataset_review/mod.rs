//! Dataset review aggregate: a structured, multi-question review of a
//! dataset, published as a citable record once every required question is
//! answered.
//!
//! Publication is two steps driven by reactions, so the external record id
//! is stored before the record is made public:
//!
//! 1. `Publish` commits `PublicationRequested`, and
//!    [`CreateRecordForDatasetReview`] answers it with `RecordCreated`.
//! 2. [`PublishDatasetReviewRecord`] answers `RecordCreated` with
//!    `Published`.

mod commands;
mod errors;
mod events;
pub mod queries;
mod reactions;
mod state;

pub use commands::DatasetReviewCommand;
pub use errors::DatasetReviewError;
pub use events::{DatasetReviewEvent, YesNoUnsure, YesPartlyNoUnsure};
pub use reactions::{CreateRecordForDatasetReview, PublicationError, PublishDatasetReviewRecord};
pub use state::{Answers, BeingPublished, DatasetReview, InProgress, Published, Requirement};

use crate::aggregate::Aggregate;
use crate::types::UserId;

impl DatasetReview {
    /// The review as `user` may edit it.
    ///
    /// # Errors
    ///
    /// Checked in order: [`NotStarted`](DatasetReviewError::NotStarted),
    /// [`StartedByAnotherUser`](DatasetReviewError::StartedByAnotherUser),
    /// [`IsBeingPublished`](DatasetReviewError::IsBeingPublished),
    /// [`HasBeenPublished`](DatasetReviewError::HasBeenPublished).
    pub fn editable_by(&self, user: &UserId) -> Result<&InProgress, DatasetReviewError> {
        match self {
            Self::NotStarted => Err(DatasetReviewError::NotStarted),
            started if started.author_id() != Some(user) => {
                Err(DatasetReviewError::StartedByAnotherUser)
            }
            Self::BeingPublished(_) => Err(DatasetReviewError::IsBeingPublished),
            Self::Published(_) => Err(DatasetReviewError::HasBeenPublished),
            Self::InProgress(review) => Ok(review),
        }
    }
}

/// `event(next)` unless `current` already holds `next`.
fn unless_already<T: PartialEq>(
    current: &Option<T>,
    next: T,
    event: impl FnOnce(T) -> DatasetReviewEvent,
) -> Option<DatasetReviewEvent> {
    if current.as_ref() == Some(&next) {
        None
    } else {
        Some(event(next))
    }
}

impl Aggregate for DatasetReview {
    const RESOURCE_TYPE: &'static str = "DatasetReview";

    type Command = DatasetReviewCommand;
    type Event = DatasetReviewEvent;
    type Error = DatasetReviewError;

    fn decide(&self, command: Self::Command) -> Result<Option<Self::Event>, Self::Error> {
        use DatasetReviewCommand as C;
        use DatasetReviewEvent as E;

        match command {
            C::Start {
                author_id,
                dataset_id,
            } => match self {
                Self::NotStarted => Ok(Some(E::Started {
                    author_id,
                    dataset_id,
                })),
                _ => Err(DatasetReviewError::AlreadyStarted),
            },
            C::AnswerIfTheDatasetFollowsFairAndCarePrinciples {
                answer,
                answered_by,
            } => {
                let review = self.editable_by(&answered_by)?;
                Ok(unless_already(
                    &review.answers.follows_fair_and_care_principles,
                    answer,
                    |answer| E::AnsweredIfTheDatasetFollowsFairAndCarePrinciples { answer },
                ))
            }
            C::AnswerIfTheDatasetHasEnoughMetadata {
                answer,
                answered_by,
            } => {
                let review = self.editable_by(&answered_by)?;
                Ok(unless_already(
                    &review.answers.has_enough_metadata,
                    answer,
                    |answer| E::AnsweredIfTheDatasetHasEnoughMetadata { answer },
                ))
            }
            C::AnswerIfTheDatasetHasTrackedChanges {
                answer,
                answered_by,
            } => {
                let review = self.editable_by(&answered_by)?;
                Ok(unless_already(
                    &review.answers.has_tracked_changes,
                    answer,
                    |answer| E::AnsweredIfTheDatasetHasTrackedChanges { answer },
                ))
            }
            C::AnswerIfTheDatasetIsReadyToBeShared {
                answer,
                answered_by,
            } => {
                let review = self.editable_by(&answered_by)?;
                Ok(unless_already(
                    &review.answers.is_ready_to_be_shared,
                    answer,
                    |answer| E::AnsweredIfTheDatasetIsReadyToBeShared { answer },
                ))
            }
            C::AnswerIfTheDatasetIsMissingAnything {
                answer,
                answered_by,
            } => {
                let review = self.editable_by(&answered_by)?;
                let answer = answer.filter(|text| !text.trim().is_empty());
                Ok(unless_already(
                    &review.answers.is_missing_anything,
                    answer,
                    |answer| E::AnsweredIfTheDatasetIsMissingAnything { answer },
                ))
            }
            C::ChoosePersona { persona, chosen_by } => {
                let review = self.editable_by(&chosen_by)?;
                Ok(unless_already(&review.answers.persona, persona, |persona| {
                    E::PersonaChosen { persona }
                }))
            }
            C::DeclareCompetingInterests {
                competing_interests,
                declared_by,
            } => {
                let review = self.editable_by(&declared_by)?;
                let competing_interests =
                    competing_interests.filter(|text| !text.trim().is_empty());
                Ok(unless_already(
                    &review.answers.competing_interests,
                    competing_interests,
                    |competing_interests| E::CompetingInterestsDeclared {
                        competing_interests,
                    },
                ))
            }
            C::DeclareFollowingCodeOfConduct { declared_by } => {
                let review = self.editable_by(&declared_by)?;
                if review.answers.declared_following_code_of_conduct {
                    Ok(None)
                } else {
                    Ok(Some(E::DeclaredFollowingCodeOfConduct))
                }
            }
            C::Publish { requested_by } => {
                let review = self.editable_by(&requested_by)?;
                let missing = review.answers.missing();
                if missing.is_empty() {
                    Ok(Some(E::PublicationRequested))
                } else {
                    Err(DatasetReviewError::NotReadyToBePublished { missing })
                }
            }
            C::MarkRecordCreated { record_id } => match self {
                Self::NotStarted => Err(DatasetReviewError::NotStarted),
                Self::InProgress(_) => Err(DatasetReviewError::PublicationWasNotRequested),
                Self::BeingPublished(review) => match review.record_id {
                    None => Ok(Some(E::RecordCreated { record_id })),
                    Some(existing) if existing == record_id => Ok(None),
                    Some(existing) => Err(DatasetReviewError::RecordAlreadyCreated {
                        record_id: existing,
                    }),
                },
                Self::Published(review) if review.record_id == record_id => Ok(None),
                Self::Published(_) => Err(DatasetReviewError::HasBeenPublished),
            },
            C::MarkPublished { doi } => match self {
                Self::NotStarted => Err(DatasetReviewError::NotStarted),
                Self::InProgress(_) => Err(DatasetReviewError::PublicationWasNotRequested),
                Self::BeingPublished(review) => match review.record_id {
                    Some(_) => Ok(Some(E::Published { doi })),
                    None => Err(DatasetReviewError::RecordNotCreated),
                },
                Self::Published(review) if review.doi == doi => Ok(None),
                Self::Published(_) => Err(DatasetReviewError::HasBeenPublished),
            },
        }
    }

    fn evolve(self, event: &Self::Event) -> Self {
        self.apply(event)
    }
}
