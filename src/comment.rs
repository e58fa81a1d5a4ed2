//! Comment aggregate: a free-text comment on a published review, published
//! as its own citable record.
//!
//! Follows the dataset review lifecycle and error precedence, with a single
//! publication step: [`PublishComment`] creates, publishes and marks the
//! record in one reaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::command::CommandContext;
use crate::error::{HandleCommandError, StoreError, UnableToQuery};
use crate::event::{EventFilter, StoredEvent};
use crate::handler::CommandHandler;
use crate::projection::fold;
use crate::query::{by_resource, events_for, find_last};
use crate::reaction::Reaction;
use crate::records::{
    PublicationConfig, RecordDraft, RecordKind, RecordService, RecordServiceError,
    call_with_timeout,
};
use crate::types::{Doi, Persona, PrereviewId, RecordId, UserId};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The lifecycle of a comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Comment {
    #[default]
    NotStarted,
    InProgress(CommentDraft),
    BeingPublished(CommentDraft),
    Published(PublishedComment),
}

/// What the author has written and declared so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub author_id: UserId,
    pub prereview_id: PrereviewId,
    pub text: Option<String>,
    pub persona: Option<Persona>,
    /// `Some(None)` means declared with no competing interests.
    pub competing_interests: Option<Option<String>>,
    pub agreed_to_code_of_conduct: bool,
}

/// A comment that is public.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedComment {
    pub draft: CommentDraft,
    pub record_id: RecordId,
    pub doi: Doi,
}

/// Something that must be done before a comment can be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommentRequirement {
    Text,
    Persona,
    CompetingInterests,
    CodeOfConduct,
}

impl CommentDraft {
    /// Requirements not met yet. Empty when the comment can be published.
    pub fn missing(&self) -> Vec<CommentRequirement> {
        let checks = [
            (self.text.is_some(), CommentRequirement::Text),
            (self.persona.is_some(), CommentRequirement::Persona),
            (
                self.competing_interests.is_some(),
                CommentRequirement::CompetingInterests,
            ),
            (self.agreed_to_code_of_conduct, CommentRequirement::CodeOfConduct),
        ];
        checks
            .into_iter()
            .filter_map(|(met, requirement)| (!met).then_some(requirement))
            .collect()
    }
}

impl Comment {
    pub fn author_id(&self) -> Option<&UserId> {
        match self {
            Self::NotStarted => None,
            Self::InProgress(draft) | Self::BeingPublished(draft) => Some(&draft.author_id),
            Self::Published(comment) => Some(&comment.draft.author_id),
        }
    }

    /// The draft as `user` may edit it.
    ///
    /// # Errors
    ///
    /// `NotStarted`, `StartedByAnotherUser`, `IsBeingPublished` or
    /// `HasBeenPublished`, in that order of precedence.
    pub fn editable_by(&self, user: &UserId) -> Result<&CommentDraft, CommentError> {
        match self {
            Self::NotStarted => Err(CommentError::NotStarted),
            started if started.author_id() != Some(user) => {
                Err(CommentError::StartedByAnotherUser)
            }
            Self::BeingPublished(_) => Err(CommentError::IsBeingPublished),
            Self::Published(_) => Err(CommentError::HasBeenPublished),
            Self::InProgress(draft) => Ok(draft),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands accepted by the [`Comment`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentCommand {
    Start {
        author_id: UserId,
        prereview_id: PrereviewId,
    },
    /// Replace the comment text. Blank text is rejected.
    EnterComment {
        text: String,
        entered_by: UserId,
    },
    ChoosePersona {
        persona: Persona,
        chosen_by: UserId,
    },
    DeclareCompetingInterests {
        competing_interests: Option<String>,
        declared_by: UserId,
    },
    AgreeToCodeOfConduct {
        agreed_by: UserId,
    },
    Publish {
        requested_by: UserId,
    },
    /// Issued by [`PublishComment`] once the record is public.
    MarkPublished {
        record_id: RecordId,
        doi: Doi,
    },
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Domain events produced by the [`Comment`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CommentEvent {
    Started {
        author_id: UserId,
        prereview_id: PrereviewId,
    },
    CommentEntered {
        text: String,
    },
    PersonaChosen {
        persona: Persona,
    },
    CompetingInterestsDeclared {
        competing_interests: Option<String>,
    },
    CodeOfConductAgreed,
    PublicationRequested,
    Published {
        record_id: RecordId,
        doi: Doi,
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a [`CommentCommand`] was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommentError {
    #[error("the comment has not been started")]
    NotStarted,
    #[error("the comment has already been started")]
    AlreadyStarted,
    #[error("the comment was started by another user")]
    StartedByAnotherUser,
    #[error("the comment is being published")]
    IsBeingPublished,
    #[error("the comment has been published")]
    HasBeenPublished,
    #[error("the comment text must not be empty")]
    EmptyComment,
    #[error("the comment is not ready to be published ({} requirements missing)", .missing.len())]
    NotReadyToBePublished { missing: Vec<CommentRequirement> },
    #[error("publication of the comment was not requested")]
    PublicationWasNotRequested,
}

// ---------------------------------------------------------------------------
// Aggregate impl
// ---------------------------------------------------------------------------

impl Aggregate for Comment {
    const RESOURCE_TYPE: &'static str = "Comment";

    type Command = CommentCommand;
    type Event = CommentEvent;
    type Error = CommentError;

    fn decide(&self, command: CommentCommand) -> Result<Option<CommentEvent>, CommentError> {
        match command {
            CommentCommand::Start {
                author_id,
                prereview_id,
            } => match self {
                Self::NotStarted => Ok(Some(CommentEvent::Started {
                    author_id,
                    prereview_id,
                })),
                _ => Err(CommentError::AlreadyStarted),
            },
            CommentCommand::EnterComment { text, entered_by } => {
                let draft = self.editable_by(&entered_by)?;
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(CommentError::EmptyComment);
                }
                if draft.text.as_ref() == Some(&text) {
                    Ok(None)
                } else {
                    Ok(Some(CommentEvent::CommentEntered { text }))
                }
            }
            CommentCommand::ChoosePersona { persona, chosen_by } => {
                let draft = self.editable_by(&chosen_by)?;
                if draft.persona == Some(persona) {
                    Ok(None)
                } else {
                    Ok(Some(CommentEvent::PersonaChosen { persona }))
                }
            }
            CommentCommand::DeclareCompetingInterests {
                competing_interests,
                declared_by,
            } => {
                let draft = self.editable_by(&declared_by)?;
                let competing_interests =
                    competing_interests.filter(|text| !text.trim().is_empty());
                if draft.competing_interests.as_ref() == Some(&competing_interests) {
                    Ok(None)
                } else {
                    Ok(Some(CommentEvent::CompetingInterestsDeclared {
                        competing_interests,
                    }))
                }
            }
            CommentCommand::AgreeToCodeOfConduct { agreed_by } => {
                let draft = self.editable_by(&agreed_by)?;
                if draft.agreed_to_code_of_conduct {
                    Ok(None)
                } else {
                    Ok(Some(CommentEvent::CodeOfConductAgreed))
                }
            }
            CommentCommand::Publish { requested_by } => {
                let draft = self.editable_by(&requested_by)?;
                let missing = draft.missing();
                if missing.is_empty() {
                    Ok(Some(CommentEvent::PublicationRequested))
                } else {
                    Err(CommentError::NotReadyToBePublished { missing })
                }
            }
            CommentCommand::MarkPublished { record_id, doi } => match self {
                Self::NotStarted => Err(CommentError::NotStarted),
                Self::InProgress(_) => Err(CommentError::PublicationWasNotRequested),
                Self::BeingPublished(_) => Ok(Some(CommentEvent::Published { record_id, doi })),
                Self::Published(comment) if comment.record_id == record_id && comment.doi == doi => {
                    Ok(None)
                }
                Self::Published(_) => Err(CommentError::HasBeenPublished),
            },
        }
    }

    fn evolve(self, event: &CommentEvent) -> Self {
        match (self, event) {
            (
                Self::NotStarted,
                CommentEvent::Started {
                    author_id,
                    prereview_id,
                },
            ) => Self::InProgress(CommentDraft {
                author_id: author_id.clone(),
                prereview_id: *prereview_id,
                text: None,
                persona: None,
                competing_interests: None,
                agreed_to_code_of_conduct: false,
            }),
            (Self::InProgress(mut draft), event) => match event {
                CommentEvent::CommentEntered { text } => {
                    draft.text = Some(text.clone());
                    Self::InProgress(draft)
                }
                CommentEvent::PersonaChosen { persona } => {
                    draft.persona = Some(*persona);
                    Self::InProgress(draft)
                }
                CommentEvent::CompetingInterestsDeclared {
                    competing_interests,
                } => {
                    draft.competing_interests = Some(competing_interests.clone());
                    Self::InProgress(draft)
                }
                CommentEvent::CodeOfConductAgreed => {
                    draft.agreed_to_code_of_conduct = true;
                    Self::InProgress(draft)
                }
                CommentEvent::PublicationRequested => Self::BeingPublished(draft),
                CommentEvent::Started { .. } | CommentEvent::Published { .. } => {
                    Self::InProgress(draft)
                }
            },
            (Self::BeingPublished(draft), CommentEvent::Published { record_id, doi }) => {
                Self::Published(PublishedComment {
                    draft,
                    record_id: *record_id,
                    doi: doi.clone(),
                })
            }
            (state, _) => state,
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Whether `user` may edit the comment now.
///
/// # Errors
///
/// The errors of [`Comment::editable_by`].
pub fn check_if_user_can_edit(events: &[CommentEvent], user: &UserId) -> Result<(), CommentError> {
    fold::<Comment, _>(events).editable_by(user).map(|_| ())
}

/// The latest comment text, if any was entered.
pub fn get_comment_text(events: &[CommentEvent]) -> Option<String> {
    find_last(events, |event| match event {
        CommentEvent::CommentEntered { text } => Some(text.clone()),
        _ => None,
    })
}

/// # Errors
///
/// `NotStarted` when there is no `Started` event.
pub fn get_author(events: &[CommentEvent]) -> Result<UserId, CommentError> {
    find_last(events, |event| match event {
        CommentEvent::Started { author_id, .. } => Some(author_id.clone()),
        _ => None,
    })
    .ok_or(CommentError::NotStarted)
}

/// The published comment.
///
/// # Errors
///
/// `NotStarted`, `PublicationWasNotRequested` or `IsBeingPublished` when
/// the comment is not public yet.
pub fn get_published_comment(events: &[CommentEvent]) -> Result<PublishedComment, CommentError> {
    match fold::<Comment, _>(events) {
        Comment::NotStarted => Err(CommentError::NotStarted),
        Comment::InProgress(_) => Err(CommentError::PublicationWasNotRequested),
        Comment::BeingPublished(_) => Err(CommentError::IsBeingPublished),
        Comment::Published(comment) => Ok(comment),
    }
}

/// Everything the record service needs to create the comment's record.
///
/// # Errors
///
/// `NotStarted`, or `PublicationWasNotRequested` while the comment is still
/// being written.
pub fn get_data_for_record(events: &[CommentEvent]) -> Result<RecordDraft, CommentError> {
    let draft = match fold::<Comment, _>(events) {
        Comment::NotStarted => return Err(CommentError::NotStarted),
        Comment::InProgress(_) => return Err(CommentError::PublicationWasNotRequested),
        Comment::BeingPublished(draft) => draft,
        Comment::Published(comment) => comment.draft,
    };

    Ok(RecordDraft {
        kind: RecordKind::Comment,
        title: format!("Comment on review {}", draft.prereview_id),
        description: draft.text.unwrap_or_default(),
        creator: draft.author_id,
        persona: draft.persona.unwrap_or(Persona::Public),
        related_identifier: draft.prereview_id.to_string(),
    })
}

/// Narrows a `read_matching` call to what [`find_in_progress_comment`]
/// needs.
pub fn in_progress_filter() -> EventFilter {
    EventFilter::for_types(["Started", "PublicationRequested"])
}

/// The comment `user` is still writing on `prereview_id`, if any.
///
/// # Errors
///
/// Returns [`UnableToQuery`] if a row cannot be decoded.
pub fn find_in_progress_comment(
    rows: &[StoredEvent],
    user: &UserId,
    prereview_id: PrereviewId,
) -> Result<Option<Uuid>, UnableToQuery> {
    Ok(by_resource::<Comment>(rows)?
        .into_iter()
        .find_map(|(resource_id, events)| match fold::<Comment, _>(&events) {
            Comment::InProgress(draft)
                if draft.author_id == *user && draft.prereview_id == prereview_id =>
            {
                Some(resource_id)
            }
            _ => None,
        }))
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// Why publishing a comment did not complete.
#[derive(Debug, thiserror::Error)]
pub enum CommentPublicationError {
    #[error(transparent)]
    UnableToQuery(#[from] UnableToQuery),
    #[error("failed to create record")]
    FailedToCreateRecord(#[source] RecordServiceError),
    #[error("failed to get DOI")]
    FailedToGetDoi(#[source] RecordServiceError),
    #[error("failed to publish record")]
    FailedToPublishRecord(#[source] RecordServiceError),
    #[error("follow-up command rejected")]
    Rejected(#[from] CommentError),
    #[error("unable to handle command")]
    UnableToHandleCommand(#[source] StoreError),
}

impl From<HandleCommandError<CommentError>> for CommentPublicationError {
    fn from(err: HandleCommandError<CommentError>) -> Self {
        match err {
            HandleCommandError::Domain(e) => Self::Rejected(e),
            HandleCommandError::UnableToHandleCommand(e) => Self::UnableToHandleCommand(e),
        }
    }
}

/// Creates, publishes and marks the record of a comment once publication is
/// requested.
pub struct PublishComment {
    handler: CommandHandler,
    records: Arc<dyn RecordService>,
    config: PublicationConfig,
}

impl PublishComment {
    pub fn new(
        handler: CommandHandler,
        records: Arc<dyn RecordService>,
        config: PublicationConfig,
    ) -> Self {
        Self {
            handler,
            records,
            config,
        }
    }
}

#[async_trait]
impl Reaction for PublishComment {
    type Aggregate = Comment;
    type Error = CommentPublicationError;

    fn name(&self) -> &'static str {
        "publish-comment"
    }

    fn subscribes_to(&self, event: &CommentEvent) -> bool {
        matches!(event, CommentEvent::PublicationRequested)
    }

    async fn react(
        &self,
        resource_id: Uuid,
        _event: &CommentEvent,
        ctx: &CommandContext,
    ) -> Result<(), CommentPublicationError> {
        let events = events_for::<Comment>(self.handler.store().as_ref(), resource_id).await?;
        if !matches!(fold::<Comment, _>(&events), Comment::BeingPublished(_)) {
            tracing::debug!(reaction = self.name(), %resource_id, "comment already published");
            return Ok(());
        }

        let draft = get_data_for_record(&events)?;
        let limit = self.config.collaborator_timeout;
        let record_id = call_with_timeout(limit, "create_record", self.records.create_record(&draft))
            .await
            .map_err(CommentPublicationError::FailedToCreateRecord)?;
        let doi = call_with_timeout(limit, "get_doi", self.records.get_doi(record_id))
            .await
            .map_err(CommentPublicationError::FailedToGetDoi)?;
        call_with_timeout(limit, "publish_record", self.records.publish_record(record_id))
            .await
            .map_err(CommentPublicationError::FailedToPublishRecord)?;

        tracing::info!(reaction = self.name(), %resource_id, %record_id, %doi, "comment published");

        self.handler
            .handle::<Comment>(
                resource_id,
                CommentCommand::MarkPublished { record_id, doi },
                ctx.follow_up(self.name()),
            )
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
