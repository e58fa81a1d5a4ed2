//! End-to-end tests: commands, stores, queries and reactions wired together
//! through the public API only.

use std::sync::Arc;
use std::time::Duration;

use reviewfold::dataset_review::{
    self, CreateRecordForDatasetReview, DatasetReview, DatasetReviewCommand, DatasetReviewError,
    DatasetReviewEvent, PublishDatasetReviewRecord, YesPartlyNoUnsure,
};
use reviewfold::testing::FakeRecordService;
use reviewfold::{
    CommandContext, CommandHandler, CommittedEvent, DatasetId, EventBus, EventStore,
    HandleCommandError, InMemoryEventStore, NewEvent, Persona, PublicationConfig, ReactionEngine,
    ReactionHandle, RecordId, SqliteConfig, SqliteEventStore, StoreError, UnableToQuery, UserId,
    encode_domain_event, query,
};
use uuid::Uuid;

fn author() -> UserId {
    UserId::from("0000-0002-1825-0097")
}

fn other_user() -> UserId {
    UserId::from("0000-0001-5109-3700")
}

fn dataset() -> DatasetId {
    DatasetId::from("10.5061/dryad.wstqjq2n3")
}

fn ctx() -> CommandContext {
    CommandContext::default()
        .with_actor(author().to_string())
        .with_correlation_id("integration")
}

async fn start(handler: &CommandHandler, id: Uuid) {
    handler
        .handle::<DatasetReview>(
            id,
            DatasetReviewCommand::Start {
                author_id: author(),
                dataset_id: dataset(),
            },
            ctx(),
        )
        .await
        .expect("start should succeed");
}

/// Start a review and answer everything `Publish` requires.
async fn prepare(handler: &CommandHandler, id: Uuid) {
    start(handler, id).await;
    let commands = [
        DatasetReviewCommand::AnswerIfTheDatasetFollowsFairAndCarePrinciples {
            answer: YesPartlyNoUnsure::Yes,
            answered_by: author(),
        },
        DatasetReviewCommand::AnswerIfTheDatasetHasEnoughMetadata {
            answer: YesPartlyNoUnsure::Partly,
            answered_by: author(),
        },
        DatasetReviewCommand::AnswerIfTheDatasetHasTrackedChanges {
            answer: YesPartlyNoUnsure::No,
            answered_by: author(),
        },
        DatasetReviewCommand::ChoosePersona {
            persona: Persona::Pseudonym,
            chosen_by: author(),
        },
        DatasetReviewCommand::DeclareCompetingInterests {
            competing_interests: None,
            declared_by: author(),
        },
        DatasetReviewCommand::DeclareFollowingCodeOfConduct {
            declared_by: author(),
        },
    ];
    for command in commands {
        handler
            .handle::<DatasetReview>(id, command, ctx())
            .await
            .expect("answer should succeed");
    }
}

async fn request_publication(handler: &CommandHandler, id: Uuid) {
    handler
        .handle::<DatasetReview>(
            id,
            DatasetReviewCommand::Publish {
                requested_by: author(),
            },
            ctx(),
        )
        .await
        .expect("publish should succeed");
}

fn publication_reactions(
    handler: &CommandHandler,
    records: &Arc<FakeRecordService>,
) -> ReactionHandle {
    let config = PublicationConfig::default().with_collaborator_timeout(Duration::from_secs(2));
    ReactionEngine::builder(handler)
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
        .start()
}

async fn state(handler: &CommandHandler, id: Uuid) -> DatasetReview {
    handler.state(id).await.expect("state should load")
}

/// Poll until the review reaches the `Published` stage.
async fn wait_until_published(handler: &CommandHandler, id: Uuid) {
    for _ in 0..200 {
        if matches!(state(handler, id).await, DatasetReview::Published(_)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("review {id} was not published in time");
}

async fn wait_for_dead_letter(reactions: &ReactionHandle) {
    for _ in 0..200 {
        if !reactions.dead_letters().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no dead letter was recorded in time");
}

#[tokio::test]
async fn start_on_a_fresh_resource() {
    let store = InMemoryEventStore::new();
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let id = Uuid::new_v4();
    assert_eq!(store.version(id).await.expect("version"), 0);

    start(&handler, id).await;

    assert_eq!(store.version(id).await.expect("version"), 1);
    let stored = store.read(id).await.expect("read should succeed");
    assert_eq!(stored[0].event_type, "Started");
    assert_eq!(stored[0].payload["author_id"], author().as_str());
    assert!(matches!(state(&handler, id).await, DatasetReview::InProgress(_)));
}

#[tokio::test]
async fn starting_twice_is_rejected_and_writes_nothing() {
    let store = InMemoryEventStore::new();
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let id = Uuid::new_v4();
    start(&handler, id).await;

    let err = handler
        .handle::<DatasetReview>(
            id,
            DatasetReviewCommand::Start {
                author_id: other_user(),
                dataset_id: dataset(),
            },
            ctx(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HandleCommandError::Domain(DatasetReviewError::AlreadyStarted)
    ));
    assert_eq!(store.version(id).await.expect("version"), 1);
}

#[tokio::test]
async fn another_user_cannot_answer() {
    let store = InMemoryEventStore::new();
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let id = Uuid::new_v4();
    start(&handler, id).await;

    let events = query::events_for::<DatasetReview>(&store, id)
        .await
        .expect("query should succeed");

    assert_eq!(
        dataset_review::queries::check_if_user_can_answer(&events, &other_user()),
        Err(DatasetReviewError::StartedByAnotherUser)
    );
}

#[tokio::test]
async fn repeated_answer_leaves_the_version_unchanged() {
    let store = InMemoryEventStore::new();
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let id = Uuid::new_v4();
    start(&handler, id).await;

    let answer = DatasetReviewCommand::AnswerIfTheDatasetHasEnoughMetadata {
        answer: YesPartlyNoUnsure::Yes,
        answered_by: author(),
    };
    let first = handler
        .handle::<DatasetReview>(id, answer.clone(), ctx())
        .await
        .expect("answer should succeed");
    let second = handler
        .handle::<DatasetReview>(id, answer, ctx())
        .await
        .expect("repeat should succeed");

    assert!(first.is_some());
    assert_eq!(second, None);
    assert_eq!(store.version(id).await.expect("version"), 2);
}

async fn concurrent_appends_conflict(store: Arc<dyn EventStore>) {
    let id = Uuid::new_v4();
    let started = encode_domain_event::<DatasetReview>(&DatasetReviewEvent::Started {
        author_id: author(),
        dataset_id: dataset(),
    })
    .expect("encoding should succeed");
    store
        .append(id, "DatasetReview", 0, vec![started])
        .await
        .expect("seed append should succeed");

    let answer = |answer| {
        encode_domain_event::<DatasetReview>(
            &DatasetReviewEvent::AnsweredIfTheDatasetHasEnoughMetadata { answer },
        )
        .expect("encoding should succeed")
    };

    let (a, b) = tokio::join!(
        store.append(id, "DatasetReview", 1, vec![answer(YesPartlyNoUnsure::Yes)]),
        store.append(id, "DatasetReview", 1, vec![answer(YesPartlyNoUnsure::No)]),
    );

    let outcomes = [a, b];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one append should win: {outcomes:?}");
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(StoreError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
            ..
        })
    )));

    assert_eq!(store.version(id).await.expect("version"), 2);
    let versions: Vec<u64> = store
        .read(id)
        .await
        .expect("read should succeed")
        .iter()
        .map(|e| e.resource_version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
async fn concurrent_appends_in_memory() {
    concurrent_appends_conflict(Arc::new(InMemoryEventStore::new())).await;
}

#[tokio::test]
async fn concurrent_appends_in_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = SqliteEventStore::open(dir.path().join("events.db"))
        .await
        .expect("store should open");
    concurrent_appends_conflict(Arc::new(store)).await;
}

async fn undecodable_row_stops_commands_and_queries(store: Arc<dyn EventStore>) {
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let id = Uuid::new_v4();

    prepare(&handler, id).await;
    request_publication(&handler, id).await;
    for command in [
        DatasetReviewCommand::MarkRecordCreated {
            record_id: RecordId(7),
        },
        DatasetReviewCommand::MarkPublished {
            doi: "10.5072/zenodo.7".into(),
        },
    ] {
        handler
            .handle::<DatasetReview>(id, command, ctx())
            .await
            .expect("publication step should succeed");
    }

    let version = store.version(id).await.expect("version");
    let corrupt = NewEvent {
        event_id: Uuid::new_v4(),
        event_type: "Published".into(),
        event_timestamp: chrono::Utc::now(),
        payload: serde_json::json!({ "doi": 5 }),
    };
    store
        .append(id, "DatasetReview", version, vec![corrupt])
        .await
        .expect("raw append should succeed");

    let err = handler
        .handle::<DatasetReview>(
            id,
            DatasetReviewCommand::MarkPublished {
                doi: "10.1/other".into(),
            },
            ctx(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unable to handle command");
    assert!(matches!(
        err,
        HandleCommandError::UnableToHandleCommand(StoreError::Serialization(_))
    ));
    assert_eq!(store.version(id).await.expect("version"), version + 1);

    let err = query::events_for::<DatasetReview>(store.as_ref(), id)
        .await
        .unwrap_err();
    assert!(matches!(err, UnableToQuery(StoreError::Serialization(_))));
}

#[tokio::test]
async fn undecodable_row_in_memory() {
    undecodable_row_stops_commands_and_queries(Arc::new(InMemoryEventStore::new())).await;
}

#[tokio::test]
async fn undecodable_row_in_sqlite() {
    let store = SqliteEventStore::in_memory()
        .await
        .expect("store should open");
    undecodable_row_stops_commands_and_queries(Arc::new(store)).await;
}

async fn cancelled_append_leaves_the_store_usable(store: SqliteEventStore) {
    let started = || {
        encode_domain_event::<DatasetReview>(&DatasetReviewEvent::Started {
            author_id: author(),
            dataset_id: dataset(),
        })
        .expect("encoding should succeed")
    };

    let big = Uuid::new_v4();
    let events: Vec<NewEvent> = (0..500).map(|_| started()).collect();
    let writer = store.clone();
    let task = tokio::spawn(async move { writer.append(big, "DatasetReview", 0, events).await });
    tokio::time::sleep(Duration::from_micros(300)).await;
    task.abort();
    let _ = task.await;

    let id = Uuid::new_v4();
    for version in 0..3 {
        store
            .append(id, "DatasetReview", version, vec![started()])
            .await
            .expect("append after a cancelled append should succeed");
    }
    assert_eq!(store.version(id).await.expect("version"), 3);

    // The cancelled append either committed whole or left nothing behind.
    let written = store.read(big).await.expect("read should succeed").len() as u64;
    assert!(written == 0 || written == 500, "partial append: {written}");
    assert_eq!(store.version(big).await.expect("version"), written);
}

#[tokio::test]
async fn cancelled_append_on_a_sqlite_file() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let url = format!("sqlite://{}", dir.path().join("events.db").display());
    let config = SqliteConfig {
        max_connections: 1,
        ..SqliteConfig::default().with_url(url)
    };
    let store = SqliteEventStore::connect(&config)
        .await
        .expect("store should open");
    cancelled_append_leaves_the_store_usable(store).await;
}

#[tokio::test]
async fn cancelled_append_on_sqlite_in_memory() {
    let store = SqliteEventStore::in_memory()
        .await
        .expect("store should open");
    cancelled_append_leaves_the_store_usable(store).await;
}

#[tokio::test]
async fn review_is_published_by_reactions() {
    let handler = CommandHandler::new(InMemoryEventStore::new(), EventBus::new());
    let records = Arc::new(FakeRecordService::new());
    let reactions = publication_reactions(&handler, &records);
    let id = Uuid::new_v4();

    prepare(&handler, id).await;
    request_publication(&handler, id).await;
    wait_until_published(&handler, id).await;

    let events = query::events_for::<DatasetReview>(handler.store().as_ref(), id)
        .await
        .expect("query should succeed");
    let review = dataset_review::queries::get_published_review(&events)
        .expect("review should be published");
    assert_eq!(review.doi, FakeRecordService::doi_for(review.record_id));
    assert_eq!(records.created()[0].persona, Persona::Pseudonym);
    assert_eq!(records.published(), vec![review.record_id]);
    assert!(reactions.dead_letters().is_empty());

    reactions.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test]
async fn failed_record_creation_keeps_the_review_pending() {
    let store = InMemoryEventStore::new();
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let records = Arc::new(FakeRecordService::new());
    records.fail("create_record");
    let reactions = publication_reactions(&handler, &records);
    let id = Uuid::new_v4();

    prepare(&handler, id).await;
    request_publication(&handler, id).await;
    wait_for_dead_letter(&reactions).await;

    let letters = reactions.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].reaction, "create-record-for-dataset-review");
    assert!(letters[0].error.starts_with("failed to create record"));
    assert!(matches!(
        state(&handler, id).await,
        DatasetReview::BeingPublished(_)
    ));
    let stored = store.read(id).await.expect("read should succeed");
    assert!(stored.iter().all(|e| e.event_type != "Published"));

    // Once the service recovers, a manual retry finishes the publication.
    records.recover("create_record");
    let report = reactions.retry_dead_letters().await;
    assert_eq!(report.failed, 0);
    wait_until_published(&handler, id).await;

    reactions.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test]
async fn redelivered_publication_request_after_publication_does_nothing() {
    let bus = EventBus::new();
    let store = InMemoryEventStore::new();
    let handler = CommandHandler::new(store.clone(), bus.clone());
    let records = Arc::new(FakeRecordService::new());
    let mut observer = bus.subscribe();
    let reactions = publication_reactions(&handler, &records);
    let id = Uuid::new_v4();

    prepare(&handler, id).await;
    request_publication(&handler, id).await;
    wait_until_published(&handler, id).await;

    let requested: CommittedEvent = loop {
        let committed = observer.recv().await.expect("bus should deliver");
        if committed.event.event_type == "PublicationRequested" {
            break committed;
        }
    };
    let version = store.version(id).await.expect("version");

    let report = reactions.deliver(&requested).await;

    assert_eq!(report.failed, 0);
    assert_eq!(records.create_calls(), 1);
    assert_eq!(records.published().len(), 1);
    assert_eq!(store.version(id).await.expect("version"), version);
    assert!(reactions.dead_letters().is_empty());

    reactions.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test]
async fn sqlite_store_runs_the_whole_workflow() {
    let store = SqliteEventStore::in_memory()
        .await
        .expect("store should open");
    let handler = CommandHandler::new(store.clone(), EventBus::new());
    let records = Arc::new(FakeRecordService::new());
    let reactions = publication_reactions(&handler, &records);
    let id = Uuid::new_v4();

    prepare(&handler, id).await;
    request_publication(&handler, id).await;
    wait_until_published(&handler, id).await;

    let rows = store
        .read_matching(
            "DatasetReview",
            &dataset_review::queries::by_author_filter(&author()),
        )
        .await
        .expect("read should succeed");
    assert_eq!(
        dataset_review::queries::find_reviews_by_author(&rows, &author())
            .expect("query should succeed"),
        vec![(id, dataset())]
    );

    let versions: Vec<u64> = store
        .read(id)
        .await
        .expect("read should succeed")
        .iter()
        .map(|e| e.resource_version)
        .collect();
    let expected: Vec<u64> = (1..=versions.len() as u64).collect();
    assert_eq!(versions, expected);

    reactions.shutdown().await.expect("shutdown should succeed");
}
