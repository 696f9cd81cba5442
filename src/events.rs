//! Named events with typed payloads for live updates.

use crate::error::Error;
use crate::types::{FeatureId, RoleId};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Event names subscribers can register for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A role's feature change was persisted.
    RoleUpdate,
    /// The catalog, roles and matrix were (re)loaded.
    ConfigurationLoaded,
}

impl EventKind {
    /// Wire name of the event.
    pub fn name(self) -> &'static str {
        match self {
            Self::RoleUpdate => "roleUpdate",
            Self::ConfigurationLoaded => "configurationLoaded",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "roleUpdate" => Ok(Self::RoleUpdate),
            "configurationLoaded" => Ok(Self::ConfigurationLoaded),
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }
}

/// Payload of a [`EventKind::RoleUpdate`] event.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoleUpdate {
    /// Updated role.
    pub role_id: RoleId,
    /// Updated feature.
    pub feature: FeatureId,
    /// Persisted state.
    pub enabled: bool,
}

/// Events published by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A persisted feature change.
    RoleUpdate(RoleUpdate),
    /// A completed configuration load.
    ConfigurationLoaded {
        /// Number of features in the catalog.
        features: usize,
        /// Number of roles.
        roles: usize,
    },
}

impl EngineEvent {
    /// Event name this payload is published under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RoleUpdate(_) => EventKind::RoleUpdate,
            Self::ConfigurationLoaded { .. } => EventKind::ConfigurationLoaded,
        }
    }
}

/// Subscriber callback.
pub type EventHandler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Plain in-process event emitter.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, EventKind, EventHandler)>>,
}

impl EventBus {
    /// Creates a bus without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event kind.
    pub fn subscribe<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.handlers.write().expect("poisoned lock");
        guard.push((id, kind, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.handlers.write().expect("poisoned lock");
        let before = guard.len();
        guard.retain(|(existing, _, _)| *existing != id);
        guard.len() != before
    }

    /// Calls every handler registered for the event's kind. Handlers run
    /// outside the registry lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &EngineEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = {
            let guard = self.handlers.read().expect("poisoned lock");
            guard
                .iter()
                .filter(|(_, registered, _)| *registered == kind)
                .map(|(_, _, handler)| Arc::clone(handler))
                .collect()
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of handlers registered for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let guard = self.handlers.read().expect("poisoned lock");
        guard.iter().filter(|(_, registered, _)| *registered == kind).count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.handlers.read().expect("poisoned lock");
        f.debug_struct("EventBus")
            .field("subscribers", &guard.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn role_update(enabled: bool) -> EngineEvent {
        EngineEvent::RoleUpdate(RoleUpdate {
            role_id: RoleId::try_from("viewer").unwrap(),
            feature: FeatureId::try_from("analytics").unwrap(),
            enabled,
        })
    }

    #[test]
    fn emit_should_reach_only_matching_subscribers() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(EventKind::RoleUpdate, move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        bus.subscribe(EventKind::ConfigurationLoaded, |_| panic!("wrong kind"));

        assert_eq!(bus.emit(&role_update(true)), 1);
        assert_eq!(seen.lock().unwrap().as_slice(), &[role_update(true)]);
    }

    #[test]
    fn unsubscribe_should_stop_delivery() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventKind::RoleUpdate, |_| {});
        assert_eq!(bus.subscriber_count(EventKind::RoleUpdate), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.emit(&role_update(false)), 0);
    }

    #[test]
    fn event_kind_should_parse_wire_names() {
        assert_eq!("roleUpdate".parse::<EventKind>().unwrap(), EventKind::RoleUpdate);
        assert_eq!(EventKind::ConfigurationLoaded.to_string(), "configurationLoaded");
        assert!(matches!(
            "somethingElse".parse::<EventKind>(),
            Err(Error::UnknownEvent(_))
        ));
    }
}
