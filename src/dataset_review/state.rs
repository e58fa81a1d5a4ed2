//! The dataset review lifecycle and the answers gathered while it is in
//! progress.

use serde::{Deserialize, Serialize};

use super::events::{DatasetReviewEvent, YesNoUnsure, YesPartlyNoUnsure};
use crate::types::{DatasetId, Doi, Persona, RecordId, UserId};

/// The lifecycle of a dataset review.
///
/// `evolve` only ever moves forward: `NotStarted` to `InProgress` to
/// `BeingPublished` to `Published`. Answers are frozen once publication is
/// requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DatasetReview {
    #[default]
    NotStarted,
    InProgress(InProgress),
    BeingPublished(BeingPublished),
    Published(Published),
}

/// A review still being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InProgress {
    pub author_id: UserId,
    pub dataset_id: DatasetId,
    pub answers: Answers,
}

/// A review whose publication has been requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeingPublished {
    pub author_id: UserId,
    pub dataset_id: DatasetId,
    pub answers: Answers,
    /// Set once the record service has accepted the review.
    pub record_id: Option<RecordId>,
}

/// A review that is public.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub author_id: UserId,
    pub dataset_id: DatasetId,
    pub answers: Answers,
    pub record_id: RecordId,
    pub doi: Doi,
}

/// The latest answer to each question. `None` means not answered yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    pub follows_fair_and_care_principles: Option<YesPartlyNoUnsure>,
    pub has_enough_metadata: Option<YesPartlyNoUnsure>,
    pub has_tracked_changes: Option<YesPartlyNoUnsure>,
    pub is_ready_to_be_shared: Option<YesNoUnsure>,
    /// `Some(None)` means answered with nothing missing.
    pub is_missing_anything: Option<Option<String>>,
    pub persona: Option<Persona>,
    /// `Some(None)` means declared with no competing interests.
    pub competing_interests: Option<Option<String>>,
    pub declared_following_code_of_conduct: bool,
}

/// Something that must be done before a review can be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    FollowsFairAndCarePrinciples,
    HasEnoughMetadata,
    HasTrackedChanges,
    Persona,
    CompetingInterests,
    CodeOfConduct,
}

impl Answers {
    fn record(&mut self, event: &DatasetReviewEvent) {
        use DatasetReviewEvent as E;

        match event {
            E::AnsweredIfTheDatasetFollowsFairAndCarePrinciples { answer } => {
                self.follows_fair_and_care_principles = Some(*answer);
            }
            E::AnsweredIfTheDatasetHasEnoughMetadata { answer } => {
                self.has_enough_metadata = Some(*answer);
            }
            E::AnsweredIfTheDatasetHasTrackedChanges { answer } => {
                self.has_tracked_changes = Some(*answer);
            }
            E::AnsweredIfTheDatasetIsReadyToBeShared { answer } => {
                self.is_ready_to_be_shared = Some(*answer);
            }
            E::AnsweredIfTheDatasetIsMissingAnything { answer } => {
                self.is_missing_anything = Some(answer.clone());
            }
            E::PersonaChosen { persona } => self.persona = Some(*persona),
            E::CompetingInterestsDeclared {
                competing_interests,
            } => self.competing_interests = Some(competing_interests.clone()),
            E::DeclaredFollowingCodeOfConduct => self.declared_following_code_of_conduct = true,
            E::Started { .. }
            | E::PublicationRequested
            | E::RecordCreated { .. }
            | E::Published { .. } => {}
        }
    }

    /// Requirements not met yet, in a stable order. Empty when the review
    /// can be published.
    pub fn missing(&self) -> Vec<Requirement> {
        let checks = [
            (
                self.follows_fair_and_care_principles.is_some(),
                Requirement::FollowsFairAndCarePrinciples,
            ),
            (self.has_enough_metadata.is_some(), Requirement::HasEnoughMetadata),
            (self.has_tracked_changes.is_some(), Requirement::HasTrackedChanges),
            (self.persona.is_some(), Requirement::Persona),
            (self.competing_interests.is_some(), Requirement::CompetingInterests),
            (self.declared_following_code_of_conduct, Requirement::CodeOfConduct),
        ];
        checks
            .into_iter()
            .filter_map(|(met, requirement)| (!met).then_some(requirement))
            .collect()
    }
}

impl DatasetReview {
    /// The author, once started.
    pub fn author_id(&self) -> Option<&UserId> {
        match self {
            Self::NotStarted => None,
            Self::InProgress(review) => Some(&review.author_id),
            Self::BeingPublished(review) => Some(&review.author_id),
            Self::Published(review) => Some(&review.author_id),
        }
    }

    /// The dataset under review, once started.
    pub fn dataset_id(&self) -> Option<&DatasetId> {
        match self {
            Self::NotStarted => None,
            Self::InProgress(review) => Some(&review.dataset_id),
            Self::BeingPublished(review) => Some(&review.dataset_id),
            Self::Published(review) => Some(&review.dataset_id),
        }
    }

    /// The answers given so far, once started.
    pub fn answers(&self) -> Option<&Answers> {
        match self {
            Self::NotStarted => None,
            Self::InProgress(review) => Some(&review.answers),
            Self::BeingPublished(review) => Some(&review.answers),
            Self::Published(review) => Some(&review.answers),
        }
    }

    pub(super) fn apply(self, event: &DatasetReviewEvent) -> Self {
        use DatasetReviewEvent as E;

        match (self, event) {
            (
                Self::NotStarted,
                E::Started {
                    author_id,
                    dataset_id,
                },
            ) => Self::InProgress(InProgress {
                author_id: author_id.clone(),
                dataset_id: dataset_id.clone(),
                answers: Answers::default(),
            }),
            (Self::InProgress(review), E::PublicationRequested) => {
                Self::BeingPublished(BeingPublished {
                    author_id: review.author_id,
                    dataset_id: review.dataset_id,
                    answers: review.answers,
                    record_id: None,
                })
            }
            (Self::InProgress(mut review), event) => {
                review.answers.record(event);
                Self::InProgress(review)
            }
            (Self::BeingPublished(mut review), E::RecordCreated { record_id })
                if review.record_id.is_none() =>
            {
                review.record_id = Some(*record_id);
                Self::BeingPublished(review)
            }
            (Self::BeingPublished(review), E::Published { doi }) => match review.record_id {
                Some(record_id) => Self::Published(Published {
                    author_id: review.author_id,
                    dataset_id: review.dataset_id,
                    answers: review.answers,
                    record_id,
                    doi: doi.clone(),
                }),
                None => Self::BeingPublished(review),
            },
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;

    fn started() -> DatasetReview {
        DatasetReview::default().evolve(&DatasetReviewEvent::Started {
            author_id: "0000-0002-1825-0097".into(),
            dataset_id: "10.5061/dryad.wstqjq2n3".into(),
        })
    }

    #[test]
    fn fresh_review_is_missing_everything() {
        let DatasetReview::InProgress(review) = started() else {
            panic!("expected InProgress");
        };
        assert_eq!(review.answers.missing().len(), 6);
    }

    #[test]
    fn later_answers_replace_earlier_ones() {
        let state = started()
            .evolve(&DatasetReviewEvent::AnsweredIfTheDatasetHasEnoughMetadata {
                answer: YesPartlyNoUnsure::No,
            })
            .evolve(&DatasetReviewEvent::AnsweredIfTheDatasetHasEnoughMetadata {
                answer: YesPartlyNoUnsure::Yes,
            });
        assert_eq!(
            state.answers().and_then(|a| a.has_enough_metadata),
            Some(YesPartlyNoUnsure::Yes)
        );
    }

    #[test]
    fn optional_questions_do_not_block_publication() {
        let state = [
            DatasetReviewEvent::AnsweredIfTheDatasetFollowsFairAndCarePrinciples {
                answer: YesPartlyNoUnsure::Yes,
            },
            DatasetReviewEvent::AnsweredIfTheDatasetHasEnoughMetadata {
                answer: YesPartlyNoUnsure::Partly,
            },
            DatasetReviewEvent::AnsweredIfTheDatasetHasTrackedChanges {
                answer: YesPartlyNoUnsure::Unsure,
            },
            DatasetReviewEvent::PersonaChosen {
                persona: Persona::Public,
            },
            DatasetReviewEvent::CompetingInterestsDeclared {
                competing_interests: None,
            },
            DatasetReviewEvent::DeclaredFollowingCodeOfConduct,
        ]
        .iter()
        .fold(started(), DatasetReview::evolve);

        assert_eq!(state.answers().map(Answers::missing), Some(Vec::new()));
    }

    #[test]
    fn answers_are_frozen_once_publication_is_requested() {
        let state = started()
            .evolve(&DatasetReviewEvent::PublicationRequested)
            .evolve(&DatasetReviewEvent::PersonaChosen {
                persona: Persona::Pseudonym,
            });
        assert!(matches!(state, DatasetReview::BeingPublished(_)));
        assert_eq!(state.answers().and_then(|a| a.persona), None);
    }

    #[test]
    fn published_without_a_record_is_ignored() {
        let state = started()
            .evolve(&DatasetReviewEvent::PublicationRequested)
            .evolve(&DatasetReviewEvent::Published {
                doi: "10.5281/zenodo.1".into(),
            });
        assert!(matches!(
            state,
            DatasetReview::BeingPublished(BeingPublished {
                record_id: None,
                ..
            })
        ));
    }

    #[test]
    fn events_before_start_are_ignored() {
        let state = DatasetReview::default().evolve(&DatasetReviewEvent::PublicationRequested);
        assert_eq!(state, DatasetReview::NotStarted);
    }
}
