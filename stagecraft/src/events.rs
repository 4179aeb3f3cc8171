//! Engine-wide event bus.
//!
//! Actors publish through a cloned sender bound when they are registered
//! with an engine. The engine (or the host) drains the receiver once per
//! frame.

use std::borrow::Cow;

use crossbeam_channel::{Receiver, Sender};

use crate::actor::ActorId;
use crate::state::StateKey;

/// Notifications published by actors and their components.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The actor was registered with an engine.
    ActorAdded { actor: ActorId },
    /// The actor was destroyed; it is purged on the next engine tick.
    ActorDestroyed { actor: ActorId },
    /// `child` was attached under `parent` in the transform hierarchy.
    ChildAdded { parent: ActorId, child: ActorId },
    /// `child` was detached from `parent` in the transform hierarchy.
    ChildRemoved { parent: ActorId, child: ActorId },
    /// Broad-phase candidates for `collider`, found by the hit detection on `detector`.
    Collision {
        detector: ActorId,
        collider: ActorId,
        hits: Vec<ActorId>,
    },
    StateExited { actor: ActorId, state: StateKey },
    StateEntered { actor: ActorId, state: StateKey },
    /// User event raised with `Actor::emit`.
    Signal {
        actor: ActorId,
        name: Cow<'static, str>,
    },
}

impl Event {
    /// Actor the event originated from.
    pub fn actor(&self) -> ActorId {
        match self {
            Event::ActorAdded { actor }
            | Event::ActorDestroyed { actor }
            | Event::StateExited { actor, .. }
            | Event::StateEntered { actor, .. }
            | Event::Signal { actor, .. } => *actor,
            Event::ChildAdded { parent, .. } | Event::ChildRemoved { parent, .. } => *parent,
            Event::Collision { detector, .. } => *detector,
        }
    }
}

/// Sending half handed to actors.
pub type EventSender = Sender<Event>;

/// Unbounded channel shared by every actor of one engine.
pub struct EventBus {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// A receiver sharing this bus. Receivers compete for events.
    pub fn receiver(&self) -> Receiver<Event> {
        self.receiver.clone()
    }

    pub fn publish(&self, event: Event) {
        // The bus owns a receiver, so the channel can never be disconnected here.
        let _ = self.sender.send(event);
    }

    /// Take every event published so far.
    pub fn drain(&self) -> Vec<Event> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_events_in_publish_order() {
        let bus = EventBus::new();
        let a = ActorId::from_raw(1);
        let b = ActorId::from_raw(2);
        bus.publish(Event::ActorAdded { actor: a });
        bus.sender()
            .send(Event::ActorDestroyed { actor: b })
            .unwrap();

        assert_eq!(bus.len(), 2);
        let events = bus.drain();
        assert_eq!(
            events,
            vec![Event::ActorAdded { actor: a }, Event::ActorDestroyed { actor: b }]
        );
        assert!(bus.is_empty());
    }
}
