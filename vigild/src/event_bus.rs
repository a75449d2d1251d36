//! Event bus for internal daemon communication.
//!
//! The event bus allows decoupled communication between:
//! - Supervisor → observers (admissions, closures, commissions)
//! - Health probe → observers (microservice status flips)
//! - Reconciliation → observers (out-of-band divergences)
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use vigil_domain::{CloseReason, CommissionType, Pnl, PositionId, Side, Symbol, UserId};
use vigil_exec::HealthChange;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// A new position passed admission
    PositionAdmitted {
        position_id: PositionId,
        user_id: UserId,
        symbol: Symbol,
        side: Side,
        timestamp: DateTime<Utc>,
    },

    /// A position reached CLOSED
    PositionClosed {
        position_id: PositionId,
        user_id: UserId,
        symbol: Symbol,
        reason: CloseReason,
        pnl: Pnl,
        timestamp: DateTime<Utc>,
    },

    /// A commission was recorded for an operation
    CommissionRecorded {
        operation_id: PositionId,
        user_id: UserId,
        commission_type: CommissionType,
        amount: Decimal,
    },

    /// Storage disagrees with the cache (closed or removed out of band)
    ReconciliationDivergence {
        position_id: PositionId,
        detail: String,
    },

    /// A microservice flipped online/offline
    HealthChanged(HealthChange),

    /// Shutdown signal
    Shutdown,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for daemon-wide communication.
///
/// Multiple producers can send events, and multiple consumers can receive.
/// Uses broadcast channels for fan-out pattern.
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before
    /// slow receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// Returns 0 if there are no active receivers.
    pub fn send(&self, event: DaemonEvent) -> usize {
        // send() returns Err if there are no receivers, but we don't care
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events.
    ///
    /// Returns a receiver that will receive all events sent after subscription.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for daemon events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<DaemonEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }

    /// Try to receive an event without blocking.
    ///
    /// Returns `None` if no event is immediately available.
    pub fn try_recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            },
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<DaemonEvent> {
        let mut events = Vec::new();
        while let Some(next) = self.try_recv() {
            if let Ok(event) = next {
                events.push(event);
            }
        }
        events
    }
}

// =============================================================================
// Tests
// =============================================================================
