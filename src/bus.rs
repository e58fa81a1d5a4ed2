//! Broadcast channel of committed events.
//!
//! The [`CommandHandler`](crate::CommandHandler) publishes every event it
//! commits; reaction subscriber tasks consume them.
//!
//! # Guarantees
//!
//! - **After commit only**: nothing is published for a rejected or no-op
//!   command, or for an append that failed.
//! - **Fire-and-forget**: publishing never blocks and never fails the
//!   command. With no subscriber the event is simply dropped.
//! - **In-memory only**: a receiver that falls more than the channel
//!   capacity behind gets `RecvError::Lagged` and misses events. The event
//!   log stays the source of truth; reaction subscribers catch up from it.

use tokio::sync::broadcast;

use crate::command::CommandContext;
use crate::event::StoredEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A committed event together with the context of the command that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedEvent {
    /// The event as written to the log.
    pub event: StoredEvent,
    /// Context of the originating command.
    pub context: CommandContext,
}

/// Fan-out channel of [`CommittedEvent`]s.
///
/// `Clone` is cheap: clones publish into the same channel.
///
/// # Examples
///
/// ```
/// use reviewfold::EventBus;
///
/// let bus = EventBus::with_capacity(16);
/// let _receiver = bus.subscribe();
/// assert_eq!(bus.subscriber_count(), 1);
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CommittedEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events can be buffered before
    /// slow receivers start lagging. A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a committed event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn publish(&self, event: CommittedEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CommittedEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
