use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::EventError;

/// Reason why a key was unlocked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnlockReason {
    /// The key authenticated successfully
    Success,
    /// Lockout period expired naturally and a new grace window was opened
    LockoutExpired,
    /// Administrator manually unlocked the key
    AdminAction,
}

/// Security events emitted by a lockout limiter
///
/// Every event names the limiter instance (`"identity"`, `"address"`, ...) and
/// the key it concerns, so a single handler can audit both limiters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// Emitted when a failed attempt is recorded.
    ///
    /// This event is useful for security monitoring and audit logging.
    AttemptFailed {
        limiter: String,
        key: String,
        /// Failures still allowed before the next lock
        attempts_remaining: u32,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a key becomes locked.
    ///
    /// This is a security-critical event that should trigger alerts.
    Locked {
        limiter: String,
        key: String,
        /// Level reached by this lock
        lockout_level: u32,
        locked_until: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when tracked state for a key is cleared or a lock lapses.
    Unlocked {
        limiter: String,
        key: String,
        reason: UnlockReason,
        timestamp: DateTime<Utc>,
    },
}

/// A trait for handling events emitted by the event bus
///
/// Implementors of this trait can be registered with the [`EventBus`] to receive and process events.
///
/// # Examples
///
/// ```rust,ignore
/// struct AlertHandler;
///
/// #[async_trait]
/// impl EventHandler for AlertHandler {
///     async fn handle_event(&self, event: &Event) -> Result<(), EventError> {
///         if let Event::Locked { key, .. } = event {
///             // page someone...
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError>;
}

/// Event bus that can emit events and register event handlers
///
/// Cloning the bus shares the handler list, so the same bus can be handed to
/// both limiters.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register an event handler with the event bus
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers
    ///
    /// Stops at the first handler error and returns it.
    pub async fn emit(&self, event: &Event) -> Result<(), EventError> {
        for handler in self.handlers.read().await.iter() {
            handler.handle_event(event).await?;
        }

        Ok(())
    }
}
