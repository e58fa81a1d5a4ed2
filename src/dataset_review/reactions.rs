//! Publication reactions: create a record once publication is requested,
//! then publish it and record its DOI.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::commands::DatasetReviewCommand;
use super::errors::DatasetReviewError;
use super::events::DatasetReviewEvent;
use super::queries;
use super::state::{BeingPublished, DatasetReview};
use crate::command::CommandContext;
use crate::error::{HandleCommandError, StoreError, UnableToQuery};
use crate::handler::CommandHandler;
use crate::projection::fold;
use crate::query::events_for;
use crate::reaction::Reaction;
use crate::records::{PublicationConfig, RecordService, RecordServiceError, call_with_timeout};

/// Why a publication step did not complete.
///
/// The review keeps its `BeingPublished` stage; the failed step can be
/// retried from the dead letters.
#[derive(Debug, thiserror::Error)]
pub enum PublicationError {
    #[error(transparent)]
    UnableToQuery(#[from] UnableToQuery),
    #[error("failed to create record")]
    FailedToCreateRecord(#[source] RecordServiceError),
    #[error("failed to get DOI")]
    FailedToGetDoi(#[source] RecordServiceError),
    #[error("failed to publish record")]
    FailedToPublishRecord(#[source] RecordServiceError),
    /// The follow-up command was refused by the aggregate.
    #[error("follow-up command rejected")]
    Rejected(#[from] DatasetReviewError),
    #[error("unable to handle command")]
    UnableToHandleCommand(#[source] StoreError),
}

impl From<HandleCommandError<DatasetReviewError>> for PublicationError {
    fn from(err: HandleCommandError<DatasetReviewError>) -> Self {
        match err {
            HandleCommandError::Domain(e) => Self::Rejected(e),
            HandleCommandError::UnableToHandleCommand(e) => Self::UnableToHandleCommand(e),
        }
    }
}

/// Creates the external record once publication is requested, then stores
/// its id with `MarkRecordCreated`.
pub struct CreateRecordForDatasetReview {
    handler: CommandHandler,
    records: Arc<dyn RecordService>,
    config: PublicationConfig,
}

impl CreateRecordForDatasetReview {
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
impl Reaction for CreateRecordForDatasetReview {
    type Aggregate = DatasetReview;
    type Error = PublicationError;

    fn name(&self) -> &'static str {
        "create-record-for-dataset-review"
    }

    fn subscribes_to(&self, event: &DatasetReviewEvent) -> bool {
        matches!(event, DatasetReviewEvent::PublicationRequested)
    }

    async fn react(
        &self,
        resource_id: Uuid,
        _event: &DatasetReviewEvent,
        ctx: &CommandContext,
    ) -> Result<(), PublicationError> {
        let events = events_for::<DatasetReview>(self.handler.store().as_ref(), resource_id).await?;

        // Redelivered, or a record already exists.
        if !matches!(
            fold::<DatasetReview, _>(&events),
            DatasetReview::BeingPublished(BeingPublished {
                record_id: None,
                ..
            })
        ) {
            tracing::debug!(reaction = self.name(), %resource_id, "record already created");
            return Ok(());
        }

        let draft = queries::get_data_for_record(&events)?;
        let record_id = call_with_timeout(
            self.config.collaborator_timeout,
            "create_record",
            self.records.create_record(&draft),
        )
        .await
        .map_err(PublicationError::FailedToCreateRecord)?;

        tracing::info!(reaction = self.name(), %resource_id, %record_id, "record created");

        self.handler
            .handle::<DatasetReview>(
                resource_id,
                DatasetReviewCommand::MarkRecordCreated { record_id },
                ctx.follow_up(self.name()),
            )
            .await?;
        Ok(())
    }
}

/// Publishes the record created for a review, then marks the review
/// published under the record's DOI.
pub struct PublishDatasetReviewRecord {
    handler: CommandHandler,
    records: Arc<dyn RecordService>,
    config: PublicationConfig,
}

impl PublishDatasetReviewRecord {
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
impl Reaction for PublishDatasetReviewRecord {
    type Aggregate = DatasetReview;
    type Error = PublicationError;

    fn name(&self) -> &'static str {
        "publish-dataset-review-record"
    }

    fn subscribes_to(&self, event: &DatasetReviewEvent) -> bool {
        matches!(event, DatasetReviewEvent::RecordCreated { .. })
    }

    async fn react(
        &self,
        resource_id: Uuid,
        _event: &DatasetReviewEvent,
        ctx: &CommandContext,
    ) -> Result<(), PublicationError> {
        let events = events_for::<DatasetReview>(self.handler.store().as_ref(), resource_id).await?;

        let DatasetReview::BeingPublished(BeingPublished {
            record_id: Some(record_id),
            ..
        }) = fold::<DatasetReview, _>(&events)
        else {
            tracing::debug!(reaction = self.name(), %resource_id, "review already published");
            return Ok(());
        };

        let limit = self.config.collaborator_timeout;
        let doi = call_with_timeout(limit, "get_doi", self.records.get_doi(record_id))
            .await
            .map_err(PublicationError::FailedToGetDoi)?;
        call_with_timeout(limit, "publish_record", self.records.publish_record(record_id))
            .await
            .map_err(PublicationError::FailedToPublishRecord)?;

        tracing::info!(reaction = self.name(), %resource_id, %record_id, %doi, "record published");

        self.handler
            .handle::<DatasetReview>(
                resource_id,
                DatasetReviewCommand::MarkPublished { doi },
                ctx.follow_up(self.name()),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::dataset_review::test_fixtures::*;
    use crate::store::{EventStore, InMemoryEventStore};
    use crate::testing::FakeRecordService;
    use crate::types::RecordId;

    async fn seeded(events: Vec<DatasetReviewEvent>) -> (CommandHandler, Uuid) {
        let handler = CommandHandler::new(InMemoryEventStore::new(), EventBus::new());
        let id = Uuid::new_v4();
        let encoded = events
            .iter()
            .map(|e| {
                crate::event::encode_domain_event::<DatasetReview>(e)
                    .expect("encoding should succeed")
            })
            .collect();
        handler
            .store()
            .append(id, "DatasetReview", 0, encoded)
            .await
            .expect("seed append should succeed");
        (handler, id)
    }

    #[tokio::test]
    async fn creates_the_record_and_marks_it() {
        let (handler, id) = seeded(being_published()).await;
        let records = Arc::new(FakeRecordService::new());
        let reaction = CreateRecordForDatasetReview::new(
            handler.clone(),
            records.clone(),
            PublicationConfig::default(),
        );

        reaction
            .react(id, &DatasetReviewEvent::PublicationRequested, &CommandContext::default())
            .await
            .expect("reaction should succeed");

        assert_eq!(records.create_calls(), 1);
        let state: DatasetReview = handler.state(id).await.expect("state should load");
        assert!(matches!(
            state,
            DatasetReview::BeingPublished(BeingPublished {
                record_id: Some(RecordId(1)),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn redelivery_after_the_record_exists_does_nothing() {
        let (handler, id) = seeded(record_created()).await;
        let records = Arc::new(FakeRecordService::new());
        let reaction = CreateRecordForDatasetReview::new(
            handler,
            records.clone(),
            PublicationConfig::default(),
        );

        reaction
            .react(id, &DatasetReviewEvent::PublicationRequested, &CommandContext::default())
            .await
            .expect("reaction should succeed");

        assert_eq!(records.create_calls(), 0);
    }

    #[tokio::test]
    async fn collaborator_failure_is_tagged() {
        let (handler, id) = seeded(being_published()).await;
        let records = Arc::new(FakeRecordService::new());
        records.fail("create_record");
        let reaction = CreateRecordForDatasetReview::new(
            handler.clone(),
            records,
            PublicationConfig::default(),
        );

        let err = reaction
            .react(id, &DatasetReviewEvent::PublicationRequested, &CommandContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PublicationError::FailedToCreateRecord(_)));
        let state: DatasetReview = handler.state(id).await.expect("state should load");
        assert!(matches!(state, DatasetReview::BeingPublished(_)));
    }

    #[tokio::test]
    async fn publishes_the_created_record() {
        let (handler, id) = seeded(record_created()).await;
        let records = Arc::new(FakeRecordService::new());
        let reaction = PublishDatasetReviewRecord::new(
            handler.clone(),
            records.clone(),
            PublicationConfig::default(),
        );

        reaction
            .react(
                id,
                &DatasetReviewEvent::RecordCreated {
                    record_id: RecordId(1),
                },
                &CommandContext::default(),
            )
            .await
            .expect("reaction should succeed");

        assert_eq!(records.published(), vec![RecordId(1)]);
        let review = queries::get_published_review(
            &events_for::<DatasetReview>(handler.store().as_ref(), id)
                .await
                .expect("query should succeed"),
        )
        .expect("review should be published");
        assert_eq!(review.doi, FakeRecordService::doi_for(RecordId(1)));
    }

    #[tokio::test]
    async fn doi_failure_does_not_publish() {
        let (handler, id) = seeded(record_created()).await;
        let records = Arc::new(FakeRecordService::new());
        records.fail("get_doi");
        let reaction =
            PublishDatasetReviewRecord::new(handler, records.clone(), PublicationConfig::default());

        let err = reaction
            .react(
                id,
                &DatasetReviewEvent::RecordCreated {
                    record_id: RecordId(1),
                },
                &CommandContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PublicationError::FailedToGetDoi(_)));
        assert!(records.published().is_empty());
    }

    #[test]
    fn handle_errors_convert_by_kind() {
        let err: PublicationError =
            HandleCommandError::Domain(DatasetReviewError::RecordNotCreated).into();
        assert!(matches!(
            err,
            PublicationError::Rejected(DatasetReviewError::RecordNotCreated)
        ));
    }
}
