//! In-process event bus.
//!
//! Decouples the risk components from notification delivery: the exit
//! monitor publishes trade-exit events, the circuit breaker and adaptive
//! manager consume them, and alert events flow onward to the notifier —
//! none of the publishers know who is listening.
//!
//! Dispatch is sequential in registration order. Handler ordering is a
//! contract: the risk guards must observe a stop-loss before any alert
//! handler logs it. A failing handler is isolated and logged; `emit`
//! itself never fails because of a handler.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::types::{Direction, ExitReason, StrategyId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A position was closed at its stop.
#[derive(Debug, Clone)]
pub struct StopLossHitEvent {
    pub symbol: String,
    pub strategy: StrategyId,
    pub pnl: Decimal,
    pub at: DateTime<Utc>,
}

/// A position was closed for any reason (stop, target, time, manual).
#[derive(Debug, Clone)]
pub struct TradeExitedEvent {
    pub symbol: String,
    pub strategy: StrategyId,
    pub direction: Direction,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub at: DateTime<Utc>,
}

/// Human-readable exit notice for the notification channel.
#[derive(Debug, Clone)]
pub struct ExitAlertEvent {
    pub symbol: String,
    pub strategy: StrategyId,
    pub reason: ExitReason,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Free-form alert for the notification channel.
#[derive(Debug, Clone)]
pub struct AlertMessageEvent {
    pub severity: AlertSeverity,
    pub title: String,
    pub body: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// All events the bus can carry. Immutable after construction.
#[derive(Debug, Clone)]
pub enum Event {
    StopLossHit(StopLossHitEvent),
    TradeExited(TradeExitedEvent),
    ExitAlert(ExitAlertEvent),
    AlertMessage(AlertMessageEvent),
}

/// Type tag used to key handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StopLossHit,
    TradeExited,
    ExitAlert,
    AlertMessage,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::StopLossHit(_) => EventKind::StopLossHit,
            Event::TradeExited(_) => EventKind::TradeExited,
            Event::ExitAlert(_) => EventKind::ExitAlert,
            Event::AlertMessage(_) => EventKind::AlertMessage,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// A subscriber on the bus. `name` identifies the handler for
/// unsubscription and failure logs.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Single-process publish/subscribe keyed by event type.
///
/// No persistence, no retry, no cross-process delivery.
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for an event type. Handlers fire in
    /// registration order.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut map = self.handlers.lock().unwrap();
        map.entry(kind).or_default().push(handler);
    }

    /// Remove a handler by name. Returns whether anything was removed.
    pub fn unsubscribe(&self, kind: EventKind, handler_name: &str) -> bool {
        let mut map = self.handlers.lock().unwrap();
        if let Some(list) = map.get_mut(&kind) {
            let before = list.len();
            list.retain(|h| h.name() != handler_name);
            return list.len() < before;
        }
        false
    }

    /// Number of handlers currently registered for an event type.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(&kind)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Dispatch an event to all handlers registered for its type,
    /// sequentially, in registration order. A handler failure is logged
    /// and does not stop the remaining handlers.
    pub async fn emit(&self, event: Event) {
        let kind = event.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let map = self.handlers.lock().unwrap();
            map.get(&kind).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(kind = ?kind, "Event emitted with no subscribers");
            return;
        }

        for handler in handlers {
            if let Err(e) = handler.handle(&event).await {
                warn!(
                    handler = handler.name(),
                    kind = ?kind,
                    error = %e,
                    "Event handler failed — continuing with remaining handlers"
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
