//! Given/when/then specifications for aggregate business rules, and a fake
//! record service for exercising reactions.
//!
//! Business rules are pure, so they can be checked without a store, a bus
//! or a runtime: fold some given events, decide one command, assert the
//! outcome.
//!
//! ```
//! use reviewfold::testing;
//! use reviewfold::dataset_review::{
//!     DatasetReview, DatasetReviewCommand, DatasetReviewError, DatasetReviewEvent,
//! };
//! use reviewfold::{DatasetId, UserId};
//!
//! let author = UserId::from("0000-0002-1825-0097");
//! let dataset = DatasetId::from("10.5061/dryad.wstqjq2n3");
//!
//! testing::spec::<DatasetReview>()
//!     .given([DatasetReviewEvent::Started {
//!         author_id: author.clone(),
//!         dataset_id: dataset.clone(),
//!     }])
//!     .when(DatasetReviewCommand::Start {
//!         author_id: UserId::from("0000-0001-5109-3700"),
//!         dataset_id: dataset,
//!     })
//!     .then_error(DatasetReviewError::AlreadyStarted);
//! ```

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::aggregate::Aggregate;
use crate::records::{RecordDraft, RecordService, RecordServiceError};
use crate::types::{Doi, RecordId};

/// The `(decide, evolve, initial_state)` triple that defines an aggregate.
///
/// Plain function pointers, so a triple can also be assembled from free
/// functions that never implement [`Aggregate`].
pub struct Decider<S, C, E, Err> {
    /// Decide on a command given the current state.
    pub decide: fn(&S, C) -> Result<Option<E>, Err>,
    /// Evolve the state by one event.
    pub evolve: fn(S, &E) -> S,
    /// The state before any event.
    pub initial_state: fn() -> S,
}

impl<S, C, E, Err> Clone for Decider<S, C, E, Err> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, C, E, Err> Copy for Decider<S, C, E, Err> {}

/// The triple of an [`Aggregate`] implementation.
pub fn decider<A: Aggregate>() -> Decider<A, A::Command, A::Event, A::Error> {
    Decider {
        decide: A::decide,
        evolve: A::evolve,
        initial_state: A::default,
    }
}

/// Start a specification for an [`Aggregate`] implementation.
pub fn spec<A: Aggregate>() -> CommandSpec<A, A::Command, A::Event, A::Error> {
    CommandSpec::new(decider::<A>())
}

impl<S, C, E, Err> Decider<S, C, E, Err> {
    /// Fold `events` from the initial state.
    pub fn fold<'a>(&self, events: impl IntoIterator<Item = &'a E>) -> S
    where
        E: 'a,
    {
        events
            .into_iter()
            .fold((self.initial_state)(), |state, event| (self.evolve)(state, event))
    }
}

/// A given/when/then specification under construction.
pub struct CommandSpec<S, C, E, Err> {
    decider: Decider<S, C, E, Err>,
    given: Vec<E>,
}

impl<S, C, E, Err> CommandSpec<S, C, E, Err> {
    /// Start a specification for an arbitrary decider triple.
    pub fn new(decider: Decider<S, C, E, Err>) -> Self {
        Self {
            decider,
            given: Vec::new(),
        }
    }

    /// Events that happened before the command, oldest first.
    ///
    /// May be called more than once; events accumulate.
    pub fn given(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.given.extend(events);
        self
    }

    /// Fold the given events and decide `command`.
    pub fn when(self, command: C) -> Then<S, E, Err> {
        let state = self.decider.fold(&self.given);
        let outcome = (self.decider.decide)(&state, command);
        Then {
            evolve: self.decider.evolve,
            state,
            outcome,
        }
    }
}

/// The outcome of a decision, ready to be asserted on.
pub struct Then<S, E, Err> {
    evolve: fn(S, &E) -> S,
    state: S,
    outcome: Result<Option<E>, Err>,
}

impl<S, E, Err> Then<S, E, Err>
where
    E: PartialEq + Debug,
    Err: PartialEq + Debug,
{
    /// Assert the decision produced exactly `expected`.
    ///
    /// # Returns
    ///
    /// The state after evolving by the event, for follow-up assertions.
    ///
    /// # Panics
    ///
    /// Panics with the actual outcome if it differs.
    #[track_caller]
    pub fn then(self, expected: E) -> S {
        match self.outcome {
            Ok(Some(event)) => {
                assert_eq!(event, expected, "decision produced a different event");
                (self.evolve)(self.state, &event)
            }
            Ok(None) => panic!("expected event {expected:?}, but the decision was a no-op"),
            Err(err) => panic!("expected event {expected:?}, but the decision failed: {err:?}"),
        }
    }

    /// Assert the decision was a no-op.
    ///
    /// # Panics
    ///
    /// Panics with the actual outcome if an event or error was produced.
    #[track_caller]
    pub fn then_nothing(self) {
        match self.outcome {
            Ok(None) => {}
            Ok(Some(event)) => panic!("expected no event, but the decision produced {event:?}"),
            Err(err) => panic!("expected no event, but the decision failed: {err:?}"),
        }
    }

    /// Assert the decision was rejected with `expected`.
    ///
    /// # Panics
    ///
    /// Panics with the actual outcome if it differs.
    #[track_caller]
    pub fn then_error(self, expected: Err) {
        match self.outcome {
            Err(err) => assert_eq!(err, expected, "decision failed with a different error"),
            Ok(Some(event)) => {
                panic!("expected error {expected:?}, but the decision produced {event:?}")
            }
            Ok(None) => panic!("expected error {expected:?}, but the decision was a no-op"),
        }
    }

    /// The raw decision outcome, for assertions the helpers do not cover.
    pub fn outcome(&self) -> &Result<Option<E>, Err> {
        &self.outcome
    }
}

/// An in-memory [`RecordService`] that records every call.
///
/// Record ids are handed out from 1 upward, and the DOI of a record is
/// [`FakeRecordService::doi_for`] its id. Any operation can be made to fail
/// with [`fail`](FakeRecordService::fail) until
/// [`recover`](FakeRecordService::recover) is called.
#[derive(Debug, Default)]
pub struct FakeRecordService {
    next_record_id: AtomicU64,
    failing: Mutex<HashSet<&'static str>>,
    created: Mutex<Vec<RecordDraft>>,
    published: Mutex<Vec<RecordId>>,
}

impl FakeRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` (`"create_record"`, `"get_doi"` or
    /// `"publish_record"`) fail.
    pub fn fail(&self, operation: &'static str) {
        lock(&self.failing).insert(operation);
    }

    /// Undo [`fail`](FakeRecordService::fail).
    pub fn recover(&self, operation: &'static str) {
        lock(&self.failing).remove(operation);
    }

    /// Drafts of every record created so far.
    pub fn created(&self) -> Vec<RecordDraft> {
        lock(&self.created).clone()
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.created).len()
    }

    /// Ids of every record published so far, in call order.
    pub fn published(&self) -> Vec<RecordId> {
        lock(&self.published).clone()
    }

    /// The DOI this service reports for `record_id`.
    pub fn doi_for(record_id: RecordId) -> Doi {
        Doi::new(format!("10.5072/zenodo.{record_id}"))
    }

    fn check(&self, operation: &'static str) -> Result<(), RecordServiceError> {
        if lock(&self.failing).contains(operation) {
            Err(RecordServiceError::with_cause(operation, "service unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordService for FakeRecordService {
    async fn create_record(&self, draft: &RecordDraft) -> Result<RecordId, RecordServiceError> {
        self.check("create_record")?;
        lock(&self.created).push(draft.clone());
        Ok(RecordId(self.next_record_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn publish_record(&self, record_id: RecordId) -> Result<(), RecordServiceError> {
        self.check("publish_record")?;
        lock(&self.published).push(record_id);
        Ok(())
    }

    async fn get_doi(&self, record_id: RecordId) -> Result<Doi, RecordServiceError> {
        self.check("get_doi")?;
        Ok(Self::doi_for(record_id))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
