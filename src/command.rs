//! Cross-cutting command metadata.

use serde::{Deserialize, Serialize};

/// Cross-cutting metadata passed alongside a command.
///
/// Carries audit and correlation information without polluting the
/// `Command` or `Event` types of an aggregate. The context travels with the
/// committed event on the [`EventBus`](crate::EventBus), so a reaction can
/// issue its follow-up command under the same correlation id.
///
/// # Examples
///
/// ```
/// use reviewfold::CommandContext;
///
/// let ctx = CommandContext::default()
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123");
///
/// assert_eq!(ctx.actor.as_deref(), Some("user-42"));
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Identity of the actor issuing the command (e.g. a user ID).
    pub actor: Option<String>,
    /// Correlation ID for tracing a request across aggregates and reactions.
    pub correlation_id: Option<String>,
}

impl CommandContext {
    /// Set the actor identity.
    ///
    /// # Arguments
    ///
    /// * `actor` - Any value convertible to `String` identifying who issued
    ///   the command (e.g. a user ID or a reaction name).
    ///
    /// # Returns
    ///
    /// The updated `CommandContext` with the actor set.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the correlation ID.
    ///
    /// # Arguments
    ///
    /// * `id` - Any value convertible to `String` used to correlate this
    ///   command with other operations across aggregates or reactions.
    ///
    /// # Returns
    ///
    /// The updated `CommandContext` with the correlation ID set.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Derive the context for a follow-up command issued by a reaction.
    ///
    /// The correlation id is kept, the actor becomes the reaction.
    pub fn follow_up(&self, reaction: &str) -> Self {
        Self {
            actor: Some(format!("reaction:{reaction}")),
            correlation_id: self.correlation_id.clone(),
        }
    }
}
