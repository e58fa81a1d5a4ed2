//! Drives one dataset review from start to publication.
//!
//! Uses the SQLite store named by `REVIEWFOLD_DATABASE_URL` (in-memory when
//! unset) and an in-process fake record service.
//!
//! ```text
//! RUST_LOG=reviewfold=debug cargo run --example publish_dataset_review
//! ```

use std::sync::Arc;
use std::time::Duration;

use reviewfold::dataset_review::{
    CreateRecordForDatasetReview, DatasetReview, DatasetReviewCommand, PublishDatasetReviewRecord,
    YesNoUnsure, YesPartlyNoUnsure, queries,
};
use reviewfold::testing::FakeRecordService;
use reviewfold::{
    CommandContext, CommandHandler, DatasetId, EventBus, Persona, PublicationConfig,
    ReactionEngine, SqliteConfig, SqliteEventStore, UserId, query,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reviewfold=info")),
        )
        .init();

    let store = SqliteEventStore::connect(&SqliteConfig::from_env()).await?;
    let handler = CommandHandler::new(store, EventBus::new());
    let records = Arc::new(FakeRecordService::new());
    let config = PublicationConfig::default();

    let reactions = ReactionEngine::builder(&handler)
        .reaction(CreateRecordForDatasetReview::new(
            handler.clone(),
            records.clone(),
            config.clone(),
        ))
        .reaction(PublishDatasetReviewRecord::new(
            handler.clone(),
            records.clone(),
            config,
        ))
        .start();

    let author = UserId::from("0000-0002-1825-0097");
    let review_id = Uuid::new_v4();
    let ctx = CommandContext::default()
        .with_actor(author.to_string())
        .with_correlation_id("demo");

    let commands = [
        DatasetReviewCommand::Start {
            author_id: author.clone(),
            dataset_id: DatasetId::from("10.5061/dryad.wstqjq2n3"),
        },
        DatasetReviewCommand::AnswerIfTheDatasetFollowsFairAndCarePrinciples {
            answer: YesPartlyNoUnsure::Partly,
            answered_by: author.clone(),
        },
        DatasetReviewCommand::AnswerIfTheDatasetHasEnoughMetadata {
            answer: YesPartlyNoUnsure::Yes,
            answered_by: author.clone(),
        },
        DatasetReviewCommand::AnswerIfTheDatasetHasTrackedChanges {
            answer: YesPartlyNoUnsure::Unsure,
            answered_by: author.clone(),
        },
        DatasetReviewCommand::AnswerIfTheDatasetIsReadyToBeShared {
            answer: YesNoUnsure::Yes,
            answered_by: author.clone(),
        },
        DatasetReviewCommand::AnswerIfTheDatasetIsMissingAnything {
            answer: Some("A README describing the column units".into()),
            answered_by: author.clone(),
        },
        DatasetReviewCommand::ChoosePersona {
            persona: Persona::Public,
            chosen_by: author.clone(),
        },
        DatasetReviewCommand::DeclareCompetingInterests {
            competing_interests: None,
            declared_by: author.clone(),
        },
        DatasetReviewCommand::DeclareFollowingCodeOfConduct {
            declared_by: author.clone(),
        },
        DatasetReviewCommand::Publish {
            requested_by: author.clone(),
        },
    ];

    for command in commands {
        handler
            .handle::<DatasetReview>(review_id, command, ctx.clone())
            .await?;
    }

    for _ in 0..100 {
        let events = query::events_for::<DatasetReview>(handler.store().as_ref(), review_id).await?;
        if let Ok(review) = queries::get_published_review(&events) {
            println!(
                "review {review_id} published as record {} with DOI {}",
                review.record_id, review.doi
            );
            reactions.shutdown().await?;
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for letter in reactions.dead_letters() {
        eprintln!("{} failed: {}", letter.reaction, letter.error);
    }
    reactions.shutdown().await?;
    Err("review was not published".into())
}
