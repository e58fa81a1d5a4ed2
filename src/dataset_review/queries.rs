//! Read-side questions about dataset reviews.
//!
//! Every function takes events the caller already fetched, usually with
//! [`events_for`](crate::query::events_for). Permission checks answer with
//! the same error precedence as the aggregate; value lookups return `None`
//! for "not answered yet".

use std::fmt::Write as _;

use uuid::Uuid;

use super::events::{DatasetReviewEvent, YesNoUnsure, YesPartlyNoUnsure};
use super::state::{Answers, DatasetReview, Published};
use super::errors::DatasetReviewError;
use crate::error::UnableToQuery;
use crate::event::{EventFilter, StoredEvent};
use crate::projection::fold;
use crate::query::{by_resource, find_last};
use crate::records::{RecordDraft, RecordKind};
use crate::types::{DatasetId, Persona, RecordId, UserId};

fn state_of(events: &[DatasetReviewEvent]) -> DatasetReview {
    fold::<DatasetReview, _>(events)
}

/// Whether `user` may answer questions on this review now.
///
/// # Errors
///
/// `NotStarted`, `StartedByAnotherUser`, `IsBeingPublished` or
/// `HasBeenPublished`, in that order of precedence.
pub fn check_if_user_can_answer(
    events: &[DatasetReviewEvent],
    user: &UserId,
) -> Result<(), DatasetReviewError> {
    state_of(events).editable_by(user).map(|_| ())
}

/// Whether `user` may request publication now.
///
/// # Errors
///
/// The errors of [`check_if_user_can_answer`], then
/// `NotReadyToBePublished` listing what is still missing.
pub fn check_if_user_can_publish(
    events: &[DatasetReviewEvent],
    user: &UserId,
) -> Result<(), DatasetReviewError> {
    let state = state_of(events);
    let review = state.editable_by(user)?;
    let missing = review.answers.missing();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DatasetReviewError::NotReadyToBePublished { missing })
    }
}

pub fn get_answer_to_if_the_dataset_follows_fair_and_care_principles(
    events: &[DatasetReviewEvent],
) -> Option<YesPartlyNoUnsure> {
    find_last(events, |event| match event {
        DatasetReviewEvent::AnsweredIfTheDatasetFollowsFairAndCarePrinciples { answer } => {
            Some(*answer)
        }
        _ => None,
    })
}

pub fn get_answer_to_if_the_dataset_has_enough_metadata(
    events: &[DatasetReviewEvent],
) -> Option<YesPartlyNoUnsure> {
    find_last(events, |event| match event {
        DatasetReviewEvent::AnsweredIfTheDatasetHasEnoughMetadata { answer } => Some(*answer),
        _ => None,
    })
}

pub fn get_answer_to_if_the_dataset_has_tracked_changes(
    events: &[DatasetReviewEvent],
) -> Option<YesPartlyNoUnsure> {
    find_last(events, |event| match event {
        DatasetReviewEvent::AnsweredIfTheDatasetHasTrackedChanges { answer } => Some(*answer),
        _ => None,
    })
}

pub fn get_answer_to_if_the_dataset_is_ready_to_be_shared(
    events: &[DatasetReviewEvent],
) -> Option<YesNoUnsure> {
    find_last(events, |event| match event {
        DatasetReviewEvent::AnsweredIfTheDatasetIsReadyToBeShared { answer } => Some(*answer),
        _ => None,
    })
}

/// `Some(None)` when the author answered that nothing is missing.
pub fn get_answer_to_if_the_dataset_is_missing_anything(
    events: &[DatasetReviewEvent],
) -> Option<Option<String>> {
    find_last(events, |event| match event {
        DatasetReviewEvent::AnsweredIfTheDatasetIsMissingAnything { answer } => {
            Some(answer.clone())
        }
        _ => None,
    })
}

pub fn get_persona(events: &[DatasetReviewEvent]) -> Option<Persona> {
    find_last(events, |event| match event {
        DatasetReviewEvent::PersonaChosen { persona } => Some(*persona),
        _ => None,
    })
}

/// `Some(None)` when the author declared no competing interests.
pub fn get_competing_interests(events: &[DatasetReviewEvent]) -> Option<Option<String>> {
    find_last(events, |event| match event {
        DatasetReviewEvent::CompetingInterestsDeclared {
            competing_interests,
        } => Some(competing_interests.clone()),
        _ => None,
    })
}

/// The author of the review.
///
/// # Errors
///
/// `NotStarted` when there is no `Started` event.
pub fn get_author(events: &[DatasetReviewEvent]) -> Result<UserId, DatasetReviewError> {
    find_last(events, |event| match event {
        DatasetReviewEvent::Started { author_id, .. } => Some(author_id.clone()),
        _ => None,
    })
    .ok_or(DatasetReviewError::NotStarted)
}

pub fn get_record_id(events: &[DatasetReviewEvent]) -> Option<RecordId> {
    find_last(events, |event| match event {
        DatasetReviewEvent::RecordCreated { record_id } => Some(*record_id),
        _ => None,
    })
}

/// Everything the record service needs to create the review's record.
///
/// # Errors
///
/// `NotStarted`, or `PublicationWasNotRequested` while the review is still
/// in progress.
pub fn get_data_for_record(
    events: &[DatasetReviewEvent],
) -> Result<RecordDraft, DatasetReviewError> {
    let (author_id, dataset_id, answers) = match state_of(events) {
        DatasetReview::NotStarted => return Err(DatasetReviewError::NotStarted),
        DatasetReview::InProgress(_) => {
            return Err(DatasetReviewError::PublicationWasNotRequested);
        }
        DatasetReview::BeingPublished(review) => {
            (review.author_id, review.dataset_id, review.answers)
        }
        DatasetReview::Published(review) => (review.author_id, review.dataset_id, review.answers),
    };

    Ok(RecordDraft {
        kind: RecordKind::DatasetReview,
        title: format!("Structured review of dataset {dataset_id}"),
        description: describe(&answers),
        creator: author_id,
        persona: answers.persona.unwrap_or(Persona::Public),
        related_identifier: dataset_id.to_string(),
    })
}

/// The published review.
///
/// # Errors
///
/// `NotStarted`, `PublicationWasNotRequested` or `IsBeingPublished` when
/// the review is not public yet.
pub fn get_published_review(
    events: &[DatasetReviewEvent],
) -> Result<Published, DatasetReviewError> {
    match state_of(events) {
        DatasetReview::NotStarted => Err(DatasetReviewError::NotStarted),
        DatasetReview::InProgress(_) => Err(DatasetReviewError::PublicationWasNotRequested),
        DatasetReview::BeingPublished(_) => Err(DatasetReviewError::IsBeingPublished),
        DatasetReview::Published(review) => Ok(review),
    }
}

/// Narrows a `read_matching` call to what
/// [`find_in_progress_review_for_dataset`] needs.
pub fn in_progress_filter() -> EventFilter {
    EventFilter::for_types(["Started", "PublicationRequested"])
}

/// The review `user` is still writing for `dataset`, if any.
///
/// `rows` are stored events of every dataset review, normally fetched with
/// [`in_progress_filter`].
///
/// # Errors
///
/// Returns [`UnableToQuery`] if a row cannot be decoded.
pub fn find_in_progress_review_for_dataset(
    rows: &[StoredEvent],
    user: &UserId,
    dataset: &DatasetId,
) -> Result<Option<Uuid>, UnableToQuery> {
    Ok(by_resource::<DatasetReview>(rows)?
        .into_iter()
        .find_map(|(resource_id, events)| match state_of(&events) {
            DatasetReview::InProgress(review)
                if review.author_id == *user && review.dataset_id == *dataset =>
            {
                Some(resource_id)
            }
            _ => None,
        }))
}

/// Narrows a `read_matching` call to the `Started` events of `user`.
pub fn by_author_filter(user: &UserId) -> EventFilter {
    EventFilter::for_types(["Started"]).with_predicate("author_id", user.clone())
}

/// Every review started by `user`, oldest first, with the dataset reviewed.
///
/// # Errors
///
/// Returns [`UnableToQuery`] if a row cannot be decoded.
pub fn find_reviews_by_author(
    rows: &[StoredEvent],
    user: &UserId,
) -> Result<Vec<(Uuid, DatasetId)>, UnableToQuery> {
    Ok(by_resource::<DatasetReview>(rows)?
        .into_iter()
        .filter_map(|(resource_id, events)| {
            events.iter().find_map(|event| match event {
                DatasetReviewEvent::Started {
                    author_id,
                    dataset_id,
                } if author_id == user => Some((resource_id, dataset_id.clone())),
                _ => None,
            })
        })
        .collect())
}

fn describe(answers: &Answers) -> String {
    let mut text = String::new();
    let mut line = |question: &str, answer: Option<String>| {
        if let Some(answer) = answer {
            let _ = writeln!(text, "{question}: {answer}");
        }
    };

    line(
        "Does this dataset follow FAIR and CARE principles?",
        answers.follows_fair_and_care_principles.map(label_partly),
    );
    line(
        "Does the dataset have enough metadata?",
        answers.has_enough_metadata.map(label_partly),
    );
    line(
        "Does this dataset include a way to list or track changes or versions?",
        answers.has_tracked_changes.map(label_partly),
    );
    line(
        "Is this dataset well-suited to support its stated research purpose?",
        answers.is_ready_to_be_shared.map(label),
    );
    line(
        "What else, if anything, would it be helpful for the researcher to include?",
        answers
            .is_missing_anything
            .as_ref()
            .map(|missing| missing.clone().unwrap_or_else(|| "Nothing".to_string())),
    );
    line(
        "Competing interests",
        answers.competing_interests.as_ref().map(|interests| {
            interests
                .clone()
                .unwrap_or_else(|| "The author declares that they have no competing interests.".to_string())
        }),
    );

    text
}

fn label_partly(answer: YesPartlyNoUnsure) -> String {
    match answer {
        YesPartlyNoUnsure::Yes => "Yes",
        YesPartlyNoUnsure::Partly => "Partly",
        YesPartlyNoUnsure::No => "No",
        YesPartlyNoUnsure::Unsure => "I don't know",
    }
    .to_string()
}

fn label(answer: YesNoUnsure) -> String {
    match answer {
        YesNoUnsure::Yes => "Yes",
        YesNoUnsure::No => "No",
        YesNoUnsure::Unsure => "I don't know",
    }
    .to_string()
}
