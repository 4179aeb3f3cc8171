use std::collections::HashMap;

use crate::actor::{Actor, ActorId};
use crate::error::{Result, StageError};
use crate::events::{Event, EventSender};
use crate::node::NodeId;

/// Lookup of actors by id.
///
/// Implemented by [`World`] and by a component [`Context`](crate::Context),
/// where it also resolves the actor whose component is running.
pub trait Actors {
    fn find(&self, id: ActorId) -> Option<&Actor>;
    fn find_mut(&mut self, id: ActorId) -> Option<&mut Actor>;
    /// Ids of every reachable actor.
    fn ids(&self) -> Vec<ActorId>;
}

struct Entry {
    id: ActorId,
    /// `None` while the actor is checked out to run its own update.
    actor: Option<Actor>,
}

/// The live actor list of an engine.
///
/// Actors keep their insertion order until one is removed, which swaps the
/// last entry into the freed index. While an actor runs its own update it
/// is checked out of the world, so lookups for it return `None` and other
/// actors are reachable through the component context.
pub struct World {
    entries: Vec<Entry>,
    index: HashMap<ActorId, usize>,
    emitter: EventSender,
    object_layer: Option<NodeId>,
}

impl World {
    pub(crate) fn new(emitter: EventSender, object_layer: Option<NodeId>) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            emitter,
            object_layer,
        }
    }

    /// Scene node new actors are parented under.
    pub fn object_layer(&self) -> Option<NodeId> {
        self.object_layer
    }

    pub(crate) fn set_object_layer(&mut self, layer: Option<NodeId>) {
        self.object_layer = layer;
    }

    /// Number of registered actors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if the actor is registered, even while it is checked out.
    pub fn contains(&self, id: ActorId) -> bool {
        self.index.contains_key(&id)
    }

    /// Registered actors in list order, skipping any that are checked out.
    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.entries.iter().filter_map(|entry| entry.actor.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.entries.iter_mut().filter_map(|entry| entry.actor.as_mut())
    }

    /// Register an actor and run its attachment sequence.
    ///
    /// Binds the event sender, parents the scene node under the object layer
    /// when it has no parent yet, then flushes, initializes and activates the
    /// actor's components with access to the rest of the world.
    ///
    /// If a component hook fails during attachment the actor is destroyed,
    /// unregistered and its node torn down before the error is returned, so
    /// a failed add never leaves a live actor behind.
    pub fn add(&mut self, mut actor: Actor) -> anyhow::Result<ActorId> {
        let id = actor.id();
        if actor.is_destroyed() {
            log::warn!("{id}: refusing to register a destroyed actor");
            return Err(StageError::ActorDestroyed(id).into());
        }

        actor.bind_emitter(self.emitter.clone());
        if let (Some(layer), Some(node)) = (self.object_layer, actor.node_mut()) {
            if node.parent().is_none() {
                node.set_parent(Some(layer));
            }
        }

        self.index.insert(id, self.entries.len());
        self.entries.push(Entry { id, actor: None });
        let _ = self.emitter.send(Event::ActorAdded { actor: id });
        log::debug!("{id}: registered ({} live)", self.entries.len());

        if let Err(err) = actor.start_in(Some(&mut *self)) {
            log::warn!("{id}: attachment failed, unregistering: {err:#}");
            if let Err(teardown) = actor.destroy_in(Some(&mut *self)) {
                log::warn!("{id}: teardown after failed attachment also failed: {teardown:#}");
            }
            if let Some(&index) = self.index.get(&id) {
                self.swap_remove(index);
            }
            actor.finalize();
            return Err(err);
        }
        self.check_in(id, actor);
        Ok(id)
    }

    /// Unregister an actor and hand it back. Its components are untouched.
    ///
    /// Returns `None` for unknown actors and for an actor whose own hooks are
    /// running; such an actor can destroy itself instead.
    pub fn remove(&mut self, id: ActorId) -> Option<Actor> {
        let index = *self.index.get(&id)?;
        if self.entries[index].actor.is_none() {
            log::warn!("{id}: cannot remove an actor while its hooks run");
            return None;
        }
        self.swap_remove(index)
    }

    /// Run `f` with the actor checked out and the rest of the world available.
    pub fn with_actor<R>(&mut self, id: ActorId, f: impl FnOnce(&mut Actor, &mut World) -> R) -> Result<R> {
        let mut actor = self.check_out(id)?;
        let result = f(&mut actor, &mut *self);
        self.check_in(id, actor);
        Ok(result)
    }

    /// Toggle an actor's active flag with world access for its hooks.
    pub fn set_active(&mut self, id: ActorId, active: bool) -> anyhow::Result<()> {
        self.with_actor(id, |actor, world| actor.set_active_in(active, Some(world)))?
    }

    /// Destroy an actor with world access for its hooks. It is purged on the next tick.
    pub fn destroy(&mut self, id: ActorId) -> anyhow::Result<()> {
        self.with_actor(id, |actor, world| actor.destroy_in(Some(world)))?
    }

    pub(crate) fn update_actor(&mut self, id: ActorId, delta: f32) -> anyhow::Result<()> {
        self.with_actor(id, |actor, world| actor.update_in(delta, Some(world)))?
    }

    /// Ids in list order.
    pub(crate) fn id_list(&self) -> Vec<ActorId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    fn check_out(&mut self, id: ActorId) -> Result<Actor> {
        let index = *self.index.get(&id).ok_or(StageError::ActorNotFound(id))?;
        self.entries[index]
            .actor
            .take()
            .ok_or(StageError::ActorBusy(id))
    }

    fn check_in(&mut self, id: ActorId, actor: Actor) {
        if let Some(&index) = self.index.get(&id) {
            self.entries[index].actor = Some(actor);
        }
    }

    /// Overwrite `index` with the last entry and pop.
    fn swap_remove(&mut self, index: usize) -> Option<Actor> {
        let entry = self.entries.swap_remove(index);
        self.index.remove(&entry.id);
        if let Some(moved) = self.entries.get(index) {
            self.index.insert(moved.id, index);
        }
        entry.actor
    }
}

impl Actors for World {
    fn find(&self, id: ActorId) -> Option<&Actor> {
        let index = *self.index.get(&id)?;
        self.entries[index].actor.as_ref()
    }

    fn find_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        let index = *self.index.get(&id)?;
        self.entries[index].actor.as_mut()
    }

    fn ids(&self) -> Vec<ActorId> {
        self.iter().map(Actor::id).collect()
    }
}

impl Actors for Actor {
    fn find(&self, id: ActorId) -> Option<&Actor> {
        (id == self.id()).then_some(self)
    }

    fn find_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        (id == self.id()).then_some(self)
    }

    fn ids(&self) -> Vec<ActorId> {
        vec![self.id()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Context};
    use crate::events::EventBus;
    use crate::math::Vec2;
    use crate::node::{HeadlessNode, SceneNode};

    fn world(bus: &EventBus) -> World {
        World::new(bus.sender(), Some(NodeId(1)))
    }

    #[test]
    fn add_parents_unparented_nodes_under_object_layer() {
        let bus = EventBus::new();
        let mut world = world(&bus);

        let loose = world.add(Actor::with_node(HeadlessNode::new(NodeId(10)))).unwrap();
        let parented = world
            .add(Actor::with_node(HeadlessNode::new(NodeId(11)).with_parent(NodeId(7))))
            .unwrap();

        assert_eq!(world.find(loose).unwrap().node().unwrap().parent(), Some(NodeId(1)));
        assert_eq!(world.find(parented).unwrap().node().unwrap().parent(), Some(NodeId(7)));
        assert!(world.find(loose).unwrap().is_live());
        assert_eq!(
            bus.drain(),
            vec![Event::ActorAdded { actor: loose }, Event::ActorAdded { actor: parented }]
        );
    }

    #[test]
    fn remove_swaps_last_entry_into_the_gap() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let a = world.add(Actor::new()).unwrap();
        let b = world.add(Actor::new()).unwrap();
        let c = world.add(Actor::new()).unwrap();

        let removed = world.remove(a).unwrap();
        assert_eq!(removed.id(), a);
        assert_eq!(world.id_list(), vec![c, b]);
        assert!(world.find(c).is_some());
        assert!(world.remove(a).is_none());
    }

    #[test]
    fn refuses_destroyed_actor() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let mut actor = Actor::new();
        actor.destroy().unwrap();
        assert!(world.add(actor).is_err());
        assert!(world.is_empty());
    }

    #[test]
    fn checked_out_actor_is_invisible_to_lookups() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let a = world.add(Actor::new().at(Vec2::new(3.0, 4.0))).unwrap();
        let b = world.add(Actor::new()).unwrap();

        let seen = world
            .with_actor(a, |actor, world| {
                assert_eq!(actor.position(), Vec2::new(3.0, 4.0));
                (world.find(a).is_none(), world.find(b).is_some())
            })
            .unwrap();
        assert_eq!(seen, (true, true));
        assert_eq!(
            world.with_actor(ActorId::from_raw(u32::MAX), |_, _| ()),
            Err(StageError::ActorNotFound(ActorId::from_raw(u32::MAX)))
        );
    }

    struct FailingInit;

    impl Component for FailingInit {
        fn init(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
            anyhow::bail!("no spawn point")
        }
    }

    struct SelfRemover {
        removed: Option<bool>,
    }

    impl Component for SelfRemover {
        fn update(&mut self, ctx: &mut Context<'_>, _delta: f32) -> anyhow::Result<()> {
            let id = ctx.actor_id();
            if let Some(world) = ctx.world_mut() {
                self.removed = Some(world.remove(id).is_some());
            }
            Ok(())
        }
    }

    #[test]
    fn failed_attachment_leaves_nothing_registered() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let survivor = world.add(Actor::new()).unwrap();

        let actor = Actor::with_node(HeadlessNode::new(NodeId(20))).with(FailingInit);
        let id = actor.id();
        assert!(world.add(actor).is_err());

        assert!(!world.contains(id));
        assert_eq!(world.len(), 1);
        assert_eq!(world.id_list(), vec![survivor]);
        let events = bus.drain();
        assert!(events.contains(&Event::ActorAdded { actor: id }));
        assert!(events.contains(&Event::ActorDestroyed { actor: id }));
    }

    #[test]
    fn actor_cannot_remove_itself_from_inside_a_hook() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let id = world.add(Actor::new().with(SelfRemover { removed: None })).unwrap();

        world.update_actor(id, 1.0 / 60.0).unwrap();
        assert!(world.contains(id));
        let actor = world.find(id).unwrap();
        assert_eq!(actor.get::<SelfRemover>().unwrap().removed, Some(false));
        assert!(actor.is_live());
    }
}
