//! Aggregate trait: the decide/evolve pair that defines a resource's rules.

use serde::{Serialize, de::DeserializeOwned};

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state. It is
/// normally a closed enum of lifecycle stages whose [`Default`] is the
/// `NotStarted` stage, so folding an empty history yields `NotStarted`.
///
/// # Associated Types
///
/// - `Command`: the set of commands this aggregate can decide on.
/// - `Event`: the set of events this aggregate can produce and evolve by.
/// - `Error`: command rejection, one variant per violated invariant.
///
/// # Contract
///
/// - [`decide`](Aggregate::decide) must be a pure decision function: no I/O,
///   no clock, no randomness. It returns `Ok(None)` when the command is
///   already satisfied by the current state.
/// - [`evolve`](Aggregate::evolve) must be a pure, total function. It takes
///   ownership of the current state and a reference to an event, returning
///   the next state. An event that does not fit the current stage returns
///   the state unchanged.
/// - `Event` must use adjacently tagged serde
///   (`#[serde(tag = "type", content = "data")]`). The tag becomes the
///   stored `event_type` column and the content becomes the `payload`.
pub trait Aggregate: Default + Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Identifies this aggregate kind (e.g. `"DatasetReview"`). Stored in
    /// the `type` column of the `resources` table.
    const RESOURCE_TYPE: &'static str;

    /// The set of commands this aggregate can decide on.
    ///
    /// `Clone` because the command handler re-decides the same command after
    /// an optimistic-concurrency conflict.
    type Command: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// The set of events this aggregate can produce and evolve by.
    type Event: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Command rejection error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate a command against the current state.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` when the command changes the resource.
    /// - `Ok(None)` when the command is already satisfied (idempotent no-op).
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the command violates a business rule.
    fn decide(&self, command: Self::Command) -> Result<Option<Self::Event>, Self::Error>;

    /// Apply a single event to produce the next state.
    fn evolve(self, event: &Self::Event) -> Self;
}
