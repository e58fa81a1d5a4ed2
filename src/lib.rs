//! Event-sourced aggregates for multi-step review workflows.
//!
//! Every change to a resource is an immutable event in an append-only log
//! guarded by optimistic concurrency. Current state is a fold of those
//! events, commands are decided against that state, and committed events
//! drive asynchronous reactions that call external services and feed the
//! results back as follow-up commands.

mod aggregate;
pub use aggregate::Aggregate;
mod bus;
pub use bus::{CommittedEvent, DEFAULT_CAPACITY, EventBus};
mod command;
pub use command::CommandContext;
mod error;
pub use error::{BoxError, HandleCommandError, StoreError, UnableToQuery};
mod event;
pub use event::{EventFilter, NewEvent, StoredEvent, decode_domain_event, encode_domain_event};
mod handler;
pub use handler::{CommandHandler, DEFAULT_MAX_ATTEMPTS, HandlerConfig};
mod projection;
pub use projection::{decode_events, fold, project};
pub mod query;
mod reaction;
pub use reaction::{
    DeadLetter, Reaction, ReactionEngine, ReactionEngineBuilder, ReactionHandle, ReactionReport,
};
mod records;
pub use records::{
    DEFAULT_COLLABORATOR_TIMEOUT, PublicationConfig, RecordDraft, RecordKind, RecordService,
    RecordServiceError, call_with_timeout,
};
mod sqlite;
pub use sqlite::{DATABASE_URL_ENV, SqliteConfig, SqliteEventStore};
mod store;
pub use store::{EventStore, InMemoryEventStore};
pub mod testing;
mod types;
pub use types::{DatasetId, Doi, Persona, PrereviewId, RecordId, UserId};

pub mod comment;
pub mod dataset_review;
