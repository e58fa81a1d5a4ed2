//! Command orchestration: load, fold, decide, append, publish.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::bus::{CommittedEvent, EventBus};
use crate::command::CommandContext;
use crate::error::{HandleCommandError, StoreError};
use crate::event::encode_domain_event;
use crate::projection::project;
use crate::store::EventStore;

/// Default number of attempts before a conflicting command gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tuning for [`CommandHandler`].
///
/// # Examples
///
/// ```
/// use reviewfold::HandlerConfig;
///
/// let config = HandlerConfig::default().with_max_attempts(5);
/// assert_eq!(config.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Total attempts (first try included) when the append hits an
    /// optimistic-concurrency conflict. Values below 1 behave as 1.
    ///
    /// Default: 3.
    pub max_attempts: u32,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl HandlerConfig {
    /// Set the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Runs commands against aggregates stored in an [`EventStore`].
///
/// Each call reads the resource's events, folds them into state, asks the
/// aggregate to decide, and appends the resulting event with the read
/// version as the expected version. A conflicting concurrent writer makes
/// it start over from the read, up to
/// [`max_attempts`](HandlerConfig::max_attempts) times. Committed events
/// are then published on the [`EventBus`].
///
/// No lock is held across the read/append window; correctness rests on the
/// store's version check. `Clone` is cheap and clones share the store and
/// bus.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<dyn EventStore>,
    bus: EventBus,
    config: HandlerConfig,
}

impl CommandHandler {
    /// Create a handler over `store` publishing to `bus`.
    pub fn new(store: impl EventStore, bus: EventBus) -> Self {
        Self {
            store: Arc::new(store),
            bus,
            config: HandlerConfig::default(),
        }
    }

    /// Replace the handler's configuration.
    pub fn with_config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// The store commands are run against. Queries read through it too.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// The bus committed events are published on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Handle a command against the resource `resource_id`.
    ///
    /// # Arguments
    ///
    /// * `resource_id` - The aggregate instance to target.
    /// * `command` - The domain command.
    /// * `ctx` - Cross-cutting metadata, recorded in the span and passed to
    ///   reactions with the committed event.
    ///
    /// # Returns
    ///
    /// `Some(event)` with the committed event, or `None` when the command
    /// was already satisfied and nothing was written.
    ///
    /// # Errors
    ///
    /// * [`HandleCommandError::Domain`] when the aggregate rejects the
    ///   command. Nothing is written and the command is not retried.
    /// * [`HandleCommandError::UnableToHandleCommand`] when the store fails
    ///   or every attempt met a concurrency conflict.
    pub async fn handle<A: Aggregate>(
        &self,
        resource_id: Uuid,
        command: A::Command,
        ctx: CommandContext,
    ) -> Result<Option<A::Event>, HandleCommandError<A::Error>> {
        let span = tracing::info_span!(
            "handle_command",
            resource_type = A::RESOURCE_TYPE,
            %resource_id,
            actor = ctx.actor.as_deref(),
            correlation_id = ctx.correlation_id.as_deref(),
        );
        self.handle_with_retry::<A>(resource_id, command, ctx)
            .instrument(span)
            .await
    }

    async fn handle_with_retry<A: Aggregate>(
        &self,
        resource_id: Uuid,
        command: A::Command,
        ctx: CommandContext,
    ) -> Result<Option<A::Event>, HandleCommandError<A::Error>> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt::<A>(resource_id, command.clone(), &ctx).await {
                Err(Attempt::Conflict(_)) if attempt < max_attempts => {
                    tracing::warn!(attempt, max_attempts, "concurrency conflict, re-deciding");
                    attempt += 1;
                }
                Err(Attempt::Conflict(conflict)) => {
                    tracing::warn!(attempt, "concurrency conflict, giving up");
                    return Err(HandleCommandError::UnableToHandleCommand(conflict));
                }
                Err(Attempt::Domain(e)) => return Err(HandleCommandError::Domain(e)),
                Err(Attempt::Store(e)) => {
                    tracing::error!(error = %e, "event store failed");
                    return Err(HandleCommandError::UnableToHandleCommand(e));
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    /// One read/decide/append pass.
    async fn attempt<A: Aggregate>(
        &self,
        resource_id: Uuid,
        command: A::Command,
        ctx: &CommandContext,
    ) -> Result<Option<A::Event>, Attempt<A::Error>> {
        let stored = self.store.read(resource_id).await.map_err(Attempt::Store)?;
        let expected_version = stored.len() as u64;
        let state: A = project(&stored).map_err(Attempt::Store)?;

        let Some(event) = state.decide(command).map_err(Attempt::Domain)? else {
            tracing::debug!(version = expected_version, "command already satisfied");
            return Ok(None);
        };

        let encoded = encode_domain_event::<A>(&event)
            .map_err(|e| Attempt::Store(StoreError::Serialization(e)))?;
        let committed = encoded.clone();

        let version = match self
            .store
            .append(resource_id, A::RESOURCE_TYPE, expected_version, vec![encoded])
            .await
        {
            Ok(version) => version,
            Err(e) if e.is_conflict() => return Err(Attempt::Conflict(e)),
            Err(e) => return Err(Attempt::Store(e)),
        };

        tracing::info!(
            event_type = %committed.event_type,
            version,
            "event appended"
        );

        let receivers = self.bus.publish(CommittedEvent {
            event: committed.into_stored(resource_id, A::RESOURCE_TYPE, version),
            context: ctx.clone(),
        });
        tracing::debug!(receivers, "committed event published");

        Ok(Some(event))
    }

    /// Load and fold a resource's current state without deciding anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the events cannot be read or decoded.
    pub async fn state<A: Aggregate>(&self, resource_id: Uuid) -> Result<A, StoreError> {
        let stored = self.store.read(resource_id).await?;
        project(&stored)
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("bus", &self.bus)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Why a single attempt did not commit.
enum Attempt<E> {
    Domain(E),
    Conflict(StoreError),
    Store(StoreError),
}
