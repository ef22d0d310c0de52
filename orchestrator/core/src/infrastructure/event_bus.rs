// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - in-process pub/sub for registry and context events
//
// Uses a tokio broadcast channel. Events are not persisted; a subscriber
// that falls behind loses the oldest events and is told how many.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{ContextEvent, RegistryEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Registry(RegistryEvent),
    Context(ContextEvent),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(256)
    }

    pub fn publish_registry_event(&self, event: RegistryEvent) {
        self.publish(DomainEvent::Registry(event));
    }

    pub fn publish_context_event(&self, event: ContextEvent) {
        self.publish(DomainEvent::Context(event));
    }

    fn publish(&self, event: DomainEvent) {
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Event published"),
            Err(_) => debug!("Event published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!(dropped = n, "Event subscriber fell behind");
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!(dropped = n, "Event subscriber fell behind");
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drains everything currently buffered.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus closed")]
    Closed,

    #[error("no buffered events")]
    Empty,

    #[error("subscriber fell behind; {0} events dropped")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish_registry_event(RegistryEvent::AgentDeregistered {
            name: "alpha".to_string(),
            deregistered_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Registry(RegistryEvent::AgentDeregistered { name, .. }) => {
                assert_eq!(name, "alpha")
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.publish_context_event(ContextEvent::SunriseCompleted {
            agent: "gamma".to_string(),
            restored: false,
            completed_at: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
