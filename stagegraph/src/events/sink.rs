//! Event sink trait and implementations.

use super::EngineEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Trait for event sinks that can receive engine events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &EngineEvent);

    /// Tries to emit an event without blocking.
    ///
    /// This method should never fail. Errors are logged but suppressed.
    fn try_emit(&self, event: &EngineEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &EngineEvent) {}

    fn try_emit(&self, _event: &EngineEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event: &EngineEvent) {
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.event_type,
                session_id = %event.session_id,
                stage = ?event.stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        } else {
            info!(
                event_type = %event.event_type,
                session_id = %event.session_id,
                stage = ?event.stage,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &EngineEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &EngineEvent) {
        self.log_event(event);
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<EngineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.read().clone()
    }

    /// Returns the event types in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<EngineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &EngineEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &EngineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SessionId;
    use crate::events::event_types;

    fn event(event_type: &str) -> EngineEvent {
        EngineEvent::new(event_type, &SessionId::new("s-1"))
    }

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(&event("test")).await;
        sink.try_emit(&event("test"));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::debug();
        sink.emit(&event(event_types::STAGE_STARTED).with_stage("a"))
            .await;
        sink.try_emit(&event(event_types::SESSION_COMPLETED));
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&event("event1")).await;
        sink.try_emit(&event("event2"));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["event1", "event2"]);
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        sink.emit(&event(event_types::STAGE_STARTED)).await;
        sink.emit(&event(event_types::STAGE_COMPLETED)).await;
        sink.emit(&event(event_types::ROUTE_SELECTED)).await;

        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.events_of_type("route.").len(), 1);
    }

    #[tokio::test]
    async fn test_collecting_sink_clear() {
        let sink = CollectingEventSink::new();
        sink.emit(&event("event")).await;
        assert_eq!(sink.len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
