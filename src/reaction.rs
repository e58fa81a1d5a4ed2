//! Reactions: asynchronous side effects triggered by committed events.
//!
//! A reaction subscribes to the [`EventBus`], waits for an event it cares
//! about, calls external collaborators, and issues a follow-up command
//! through the ordinary [`CommandHandler`](crate::CommandHandler) path.
//!
//! Delivery is at-least-once and may be late. A reaction must therefore
//! re-check its precondition against freshly queried state before doing
//! anything, and rely on the idempotent `decide` of its follow-up command.
//!
//! A failed invocation is logged and kept as a [`DeadLetter`]. It never
//! reaches the caller of the command that committed the event, and it never
//! undoes that event; the resource simply stays in its pending stage until
//! [`ReactionHandle::retry_dead_letters`] or a redelivery succeeds.
//!
//! A subscriber that falls so far behind that the bus drops events catches
//! up from the event log: it re-reads its aggregate's events committed
//! after the last one it saw and offers them again.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::bus::{CommittedEvent, EventBus};
use crate::command::CommandContext;
use crate::event::{EventFilter, decode_domain_event};
use crate::handler::CommandHandler;
use crate::store::EventStore;

/// A handler keyed by event variant that performs side effects.
///
/// # Contract
///
/// - [`subscribes_to`](Reaction::subscribes_to) must be cheap and pure.
/// - [`react`](Reaction::react) may be called more than once for the same
///   event, including after its follow-up command already succeeded.
#[async_trait]
pub trait Reaction: Send + Sync + 'static {
    /// The aggregate whose events this reaction consumes.
    type Aggregate: Aggregate;

    /// Why an invocation failed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable name, used in logs and dead letters.
    fn name(&self) -> &'static str;

    /// Whether `event` triggers this reaction.
    fn subscribes_to(&self, event: &<Self::Aggregate as Aggregate>::Event) -> bool;

    /// Handle one triggering event.
    ///
    /// # Arguments
    ///
    /// * `resource_id` - The resource the event was committed to.
    /// * `event` - The triggering event.
    /// * `ctx` - Context of the command that committed the event.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when a query, a collaborator call or the
    /// follow-up command fails.
    async fn react(
        &self,
        resource_id: Uuid,
        event: &<Self::Aggregate as Aggregate>::Event,
        ctx: &CommandContext,
    ) -> Result<(), Self::Error>;
}

/// A failed reaction invocation, kept for inspection and manual retry.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Name of the reaction that failed.
    pub reaction: &'static str,
    /// The triggering event.
    pub event: CommittedEvent,
    /// The error and its causes, outermost first.
    pub error: String,
    /// When the last attempt failed.
    pub failed_at: DateTime<Utc>,
    /// How many attempts have failed so far.
    pub attempts: u32,
}

/// Counts from a batch of deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionReport {
    /// Invocations that completed.
    pub handled: usize,
    /// Invocations that failed and were dead-lettered.
    pub failed: usize,
}

/// The result of offering one event to one reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery {
    /// The event was not for this reaction.
    Ignored,
    Handled,
    Failed(String),
}

/// Type-erased interface over a [`Reaction`] of any aggregate.
#[async_trait]
trait ReactionRunner: Send + Sync {
    fn name(&self) -> &'static str;

    fn resource_type(&self) -> &'static str;

    async fn deliver(&self, committed: &CommittedEvent) -> Delivery;
}

struct TypedRunner<R> {
    reaction: R,
}

#[async_trait]
impl<R: Reaction> ReactionRunner for TypedRunner<R> {
    fn name(&self) -> &'static str {
        self.reaction.name()
    }

    fn resource_type(&self) -> &'static str {
        <R::Aggregate as Aggregate>::RESOURCE_TYPE
    }

    async fn deliver(&self, committed: &CommittedEvent) -> Delivery {
        let row = &committed.event;
        if row.resource_type != <R::Aggregate as Aggregate>::RESOURCE_TYPE {
            return Delivery::Ignored;
        }

        let event = match decode_domain_event::<R::Aggregate>(row) {
            Ok(event) => event,
            Err(e) => {
                return Delivery::Failed(format!(
                    "cannot decode {} event: {e}",
                    row.event_type
                ));
            }
        };

        if !self.reaction.subscribes_to(&event) {
            return Delivery::Ignored;
        }

        match self
            .reaction
            .react(row.resource_id, &event, &committed.context)
            .await
        {
            Ok(()) => Delivery::Handled,
            Err(e) => Delivery::Failed(error_chain(&e)),
        }
    }
}

/// Render an error and its sources as `outer: inner: root`.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

type DeadLetters = Arc<Mutex<Vec<DeadLetter>>>;

/// Offer one event to one runner, logging and dead-lettering a failure.
async fn dispatch(
    runner: &dyn ReactionRunner,
    committed: &CommittedEvent,
    dead_letters: &DeadLetters,
    previous_attempts: u32,
) -> Delivery {
    let delivery = runner.deliver(committed).await;
    match &delivery {
        Delivery::Ignored => {}
        Delivery::Handled => {
            tracing::info!(
                reaction = runner.name(),
                resource_id = %committed.event.resource_id,
                event_type = %committed.event.event_type,
                version = committed.event.resource_version,
                "reaction handled event"
            );
        }
        Delivery::Failed(error) => {
            let attempts = previous_attempts + 1;
            tracing::error!(
                reaction = runner.name(),
                resource_id = %committed.event.resource_id,
                event_type = %committed.event.event_type,
                version = committed.event.resource_version,
                attempts,
                error = %error,
                "reaction failed, dead-lettering"
            );
            dead_letters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DeadLetter {
                    reaction: runner.name(),
                    event: committed.clone(),
                    error: error.clone(),
                    failed_at: Utc::now(),
                    attempts,
                });
        }
    }
    delivery
}

/// Entry point for wiring reactions to a bus.
pub struct ReactionEngine;

impl ReactionEngine {
    /// Start collecting reactions for the events `handler` commits.
    ///
    /// Subscribers listen on the handler's bus and catch up from its store
    /// when they lag.
    pub fn builder(handler: &CommandHandler) -> ReactionEngineBuilder {
        ReactionEngineBuilder {
            bus: handler.bus().clone(),
            store: Arc::clone(handler.store()),
            runners: Vec::new(),
        }
    }
}

/// Collects reactions, then spawns one subscriber task per reaction.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use reviewfold::dataset_review::{CreateRecordForDatasetReview, PublishDatasetReviewRecord};
/// use reviewfold::testing::FakeRecordService;
/// use reviewfold::{CommandHandler, EventBus, InMemoryEventStore, PublicationConfig, ReactionEngine};
///
/// # async fn example() {
/// let handler = CommandHandler::new(InMemoryEventStore::new(), EventBus::new());
/// let records = Arc::new(FakeRecordService::new());
///
/// let reactions = ReactionEngine::builder(&handler)
///     .reaction(CreateRecordForDatasetReview::new(
///         handler.clone(),
///         records.clone(),
///         PublicationConfig::default(),
///     ))
///     .reaction(PublishDatasetReviewRecord::new(
///         handler.clone(),
///         records,
///         PublicationConfig::default(),
///     ))
///     .start();
/// # reactions.shutdown().await.ok();
/// # }
/// ```
pub struct ReactionEngineBuilder {
    bus: EventBus,
    store: Arc<dyn EventStore>,
    runners: Vec<Arc<dyn ReactionRunner>>,
}

impl ReactionEngineBuilder {
    /// Register a reaction.
    pub fn reaction<R: Reaction>(mut self, reaction: R) -> Self {
        self.runners.push(Arc::new(TypedRunner { reaction }));
        self
    }

    /// Subscribe every reaction to the bus and spawn its task.
    ///
    /// Subscriptions are taken before this returns, so every event
    /// published afterwards reaches every reaction.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(self) -> ReactionHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dead_letters: DeadLetters = Arc::default();
        let started_at = Utc::now();

        let tasks = self
            .runners
            .iter()
            .map(|runner| {
                let subscriber = Subscriber {
                    runner: Arc::clone(runner),
                    store: Arc::clone(&self.store),
                    dead_letters: Arc::clone(&dead_letters),
                    cursor: Cursor::Since(started_at),
                    behind: false,
                };
                tokio::spawn(subscriber.run(self.bus.subscribe(), shutdown_rx.clone()))
            })
            .collect();

        tracing::info!(reactions = self.runners.len(), "reaction engine started");

        ReactionHandle {
            shutdown_tx,
            runners: self.runners.into(),
            dead_letters,
            tasks: Arc::new(tokio::sync::Mutex::new(tasks)),
        }
    }
}

/// Where a subscriber's catch-up read resumes.
#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// Nothing seen yet: events recorded at or after the engine started.
    Since(DateTime<Utc>),
    /// Events committed after this one.
    After(Uuid),
}

/// One reaction's receive loop and its catch-up position.
struct Subscriber {
    runner: Arc<dyn ReactionRunner>,
    store: Arc<dyn EventStore>,
    dead_letters: DeadLetters,
    cursor: Cursor,
    /// Set while a lag has not been made up from the log.
    behind: bool,
}

impl Subscriber {
    async fn run(
        mut self,
        mut receiver: broadcast::Receiver<CommittedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let name = self.runner.name();
        tracing::debug!(reaction = name, "subscriber started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped handle counts as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = receiver.recv() => match received {
                    Ok(committed) => {
                        if self.behind {
                            self.catch_up().await;
                        }
                        self.offer(&committed).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            reaction = name,
                            skipped,
                            "reaction lagged behind the event bus, catching up from the event log"
                        );
                        self.behind = true;
                        self.catch_up().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::debug!(reaction = name, "subscriber stopped");
    }

    async fn offer(&mut self, committed: &CommittedEvent) {
        if committed.event.resource_type == self.runner.resource_type() {
            self.cursor = Cursor::After(committed.event.event_id);
        }
        dispatch(self.runner.as_ref(), committed, &self.dead_letters, 0).await;
    }

    /// Re-offer every event of the reaction's aggregate committed after the
    /// cursor. Events the bus still delivers afterwards are offered again,
    /// which reactions tolerate.
    async fn catch_up(&mut self) {
        let name = self.runner.name();
        let rows = match self
            .store
            .read_matching(self.runner.resource_type(), &EventFilter::all())
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(reaction = name, error = %e, "catch-up read failed, will retry");
                return;
            }
        };

        let start = match self.cursor {
            Cursor::After(event_id) => rows
                .iter()
                .position(|row| row.event_id == event_id)
                .map_or(0, |i| i + 1),
            Cursor::Since(started_at) => rows
                .iter()
                .position(|row| row.event_timestamp >= started_at)
                .unwrap_or(rows.len()),
        };

        let replayed = rows.len() - start;
        for row in rows.into_iter().skip(start) {
            let committed = CommittedEvent {
                event: row,
                context: CommandContext::default(),
            };
            self.offer(&committed).await;
        }
        self.behind = false;
        tracing::info!(reaction = name, replayed, "caught up from the event log");
    }
}

/// Handle for a running reaction engine.
///
/// `Clone` is cheap: all fields are `Arc`-wrapped. Dropping every clone
/// stops the subscriber tasks after their current event; call
/// [`shutdown`](ReactionHandle::shutdown) to wait for that.
#[derive(Clone)]
pub struct ReactionHandle {
    shutdown_tx: watch::Sender<bool>,
    runners: Arc<[Arc<dyn ReactionRunner>]>,
    dead_letters: DeadLetters,
    tasks: Arc<tokio::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl ReactionHandle {
    /// Failed invocations not yet retried successfully, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Offer an event to every reaction now, on the caller's task.
    ///
    /// Used to replay an event by hand. Failures are dead-lettered as usual.
    pub async fn deliver(&self, committed: &CommittedEvent) -> ReactionReport {
        let mut report = ReactionReport::default();
        for runner in self.runners.iter() {
            tally(
                &mut report,
                dispatch(runner.as_ref(), committed, &self.dead_letters, 0).await,
            );
        }
        report
    }

    /// Retry every dead letter once.
    ///
    /// Letters that fail again are put back with their attempt count
    /// increased.
    pub async fn retry_dead_letters(&self) -> ReactionReport {
        let letters = std::mem::take(
            &mut *self
                .dead_letters
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut report = ReactionReport::default();
        for letter in letters {
            let Some(runner) = self.runners.iter().find(|r| r.name() == letter.reaction) else {
                tracing::warn!(reaction = letter.reaction, "no reaction registered, dropping");
                continue;
            };
            tally(
                &mut report,
                dispatch(
                    runner.as_ref(),
                    &letter.event,
                    &self.dead_letters,
                    letter.attempts,
                )
                .await,
            );
        }

        tracing::info!(
            handled = report.handled,
            failed = report.failed,
            "dead letters retried"
        );
        report
    }

    /// Signal every subscriber to stop and wait for them.
    ///
    /// Events already being handled are finished first. Calling `shutdown`
    /// more than once is safe.
    ///
    /// # Errors
    ///
    /// Returns the first [`JoinError`] if a subscriber task panicked.
    pub async fn shutdown(&self) -> Result<(), JoinError> {
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        let mut first_error = None;
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "reaction subscriber panicked");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn tally(report: &mut ReactionReport, delivery: Delivery) {
    match delivery {
        Delivery::Ignored => {}
        Delivery::Handled => report.handled += 1,
        Delivery::Failed(_) => report.failed += 1,
    }
}
