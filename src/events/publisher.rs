use crate::state_machine::UnitState;
use tokio::sync::broadcast;

/// Broadcast publisher for unit lifecycle transitions.
///
/// This is the diagnostic surface for routing-driven failures: the
/// orchestrator never throws, so hosts that care about broken units
/// subscribe here (or poll `unit_state`).
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<LifecycleEvent>,
}

/// One observed state transition.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub unit: String,
    pub from: UnitState,
    pub to: UnitState,
    pub error: Option<String>,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a transition. Having no subscribers is acceptable.
    pub fn publish(&self, unit: &str, from: UnitState, to: UnitState, error: Option<String>) {
        let event = LifecycleEvent {
            unit: unit.to_string(),
            from,
            to,
            error,
            published_at: chrono::Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
