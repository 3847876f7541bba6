//! Message Bus for hive lifecycle events
//!
//! The orchestrator publishes workflow and task transitions here; the CLI
//! and tests subscribe to observe a run without reaching into the
//! orchestrator. Subscribers may listen to one event type or to
//! [`EventType::All`].
//!
//! Channels are bounded. A subscriber that falls behind loses events rather
//! than stalling the publisher, and closed subscribers are pruned on publish.

use std::collections::HashMap;
use std::sync::Arc;

use sdk::errors::ErrorKind;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be published on the message bus
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    WorkflowStarted,
    WorkflowCompleted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    AgentRegistered,
    BudgetWarning,
    /// Subscribe to all event types
    All,
}

/// Events that can be published on the message bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WorkflowStarted {
        run_id: String,
        workflow_type: String,
        tasks: usize,
    },
    WorkflowCompleted {
        run_id: String,
        success: bool,
        execution_time_ms: u64,
    },
    TaskStarted {
        run_id: String,
        task_id: String,
        capability: String,
    },
    TaskCompleted {
        run_id: String,
        task_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        run_id: String,
        task_id: String,
        kind: ErrorKind,
        error: String,
    },
    AgentRegistered {
        capability: String,
        agent_id: String,
    },
    /// Spend crossed the ledger's warning ratio
    BudgetWarning { spent_usd: f64, budget_usd: f64 },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::WorkflowStarted { .. } => EventType::WorkflowStarted,
            Event::WorkflowCompleted { .. } => EventType::WorkflowCompleted,
            Event::TaskStarted { .. } => EventType::TaskStarted,
            Event::TaskCompleted { .. } => EventType::TaskCompleted,
            Event::TaskFailed { .. } => EventType::TaskFailed,
            Event::AgentRegistered { .. } => EventType::AgentRegistered,
            Event::BudgetWarning { .. } => EventType::BudgetWarning,
        }
    }
}

/// Pub/sub hub shared by the hive's components
#[derive(Clone)]
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or EventType::All for everything
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to its type's subscribers and to All subscribers.
    ///
    /// Never waits on a slow subscriber.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("Subscriber lagging, dropped {:?}", event_type);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Number of live subscriptions across all event types
    pub async fn subscriber_count(&self) -> usize {
        self.channels
            .lock()
            .await
            .values()
            .flatten()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
