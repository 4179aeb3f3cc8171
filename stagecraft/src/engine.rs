use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, ActorId};
use crate::component::{Component, ComponentId, Context};
use crate::error::StageError;
use crate::events::{Event, EventBus};
use crate::group::{GroupId, Groups};
use crate::node::{NodeId, SceneNode};
use crate::world::{Actors, World};

/// Runtime configuration of an [`Engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest step a single tick may advance, in seconds.
    pub max_delta: f32,
    /// Multiplier applied to every delta before clamping.
    pub time_scale: f32,
    /// Scene node new actors are parented under when they have no parent.
    pub object_layer: Option<NodeId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delta: 0.25,
            time_scale: 1.0,
            object_layer: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, StageError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| StageError::InvalidConfig(format!("engine config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject non-positive or non-finite step settings.
    pub fn validate(&self) -> Result<(), StageError> {
        if !(self.max_delta.is_finite() && self.max_delta > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "max_delta must be positive, got {}",
                self.max_delta
            )));
        }
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "time_scale must be positive, got {}",
                self.time_scale
            )));
        }
        Ok(())
    }
}

/// A lightweight periodic task run before actors each tick.
pub trait Updater {
    fn update(&mut self, world: &mut World, delta: f32) -> Result<()>;
}

impl<F> Updater for F
where
    F: FnMut(&mut World, f32) -> Result<()>,
{
    fn update(&mut self, world: &mut World, delta: f32) -> Result<()> {
        self(world, delta)
    }
}

/// Handle returned by [`Engine::add_updater`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UpdaterId(u32);

/// Owns the live actors, the groups and the updaters, and ticks them.
pub struct Engine {
    config: EngineConfig,
    world: World,
    groups: Groups,
    updaters: Vec<(UpdaterId, Box<dyn Updater>)>,
    next_updater: u32,
    bus: EventBus,
    elapsed: Duration,
    frame: u64,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        let bus = EventBus::new();
        let config = EngineConfig::default();
        Self {
            world: World::new(bus.sender(), config.object_layer),
            groups: Groups::new(),
            updaters: Vec::new(),
            next_updater: 0,
            bus,
            elapsed: Duration::ZERO,
            frame: 0,
            config,
        }
    }

    /// Create an engine from a validated configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self, StageError> {
        config.validate()?;
        let mut engine = Self::new();
        engine.world.set_object_layer(config.object_layer);
        engine.config = config;
        Ok(engine)
    }

    /// Override the longest step a tick may advance, in seconds.
    ///
    /// Fails with [`StageError::InvalidConfig`] unless `seconds` is finite
    /// and positive.
    pub fn with_max_delta(mut self, seconds: f32) -> Result<Self, StageError> {
        let config = EngineConfig {
            max_delta: seconds,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Speed time up or slow it down. The scale must be finite and positive.
    pub fn with_time_scale(mut self, scale: f32) -> Result<Self, StageError> {
        let config = EngineConfig {
            time_scale: scale,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Parent unparented actor nodes under `layer`.
    #[must_use]
    pub fn with_object_layer(mut self, layer: NodeId) -> Self {
        self.config.object_layer = Some(layer);
        self.world.set_object_layer(Some(layer));
        self
    }

    /// Current engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The live actor store.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the live actors, e.g. for hierarchy edits.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Total scaled time simulated so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of completed ticks.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    // ---------------------------------------------------------------------
    // Actors
    // ---------------------------------------------------------------------

    /// Register an actor and run its attachment sequence.
    pub fn add(&mut self, actor: Actor) -> Result<ActorId> {
        self.world.add(actor)
    }

    /// Unregister an actor without destroying it.
    pub fn remove(&mut self, id: ActorId) -> Option<Actor> {
        let mut actor = self.world.remove(id)?;
        if let Some(group) = actor.group_membership() {
            self.groups.forget_actor(group, id);
            actor.set_group(None);
        }
        log::debug!("{id}: removed from engine");
        Some(actor)
    }

    /// True if `id` is registered with this engine.
    pub fn contains(&self, id: ActorId) -> bool {
        self.world.contains(id)
    }

    /// Look up a registered actor. `None` while the actor runs its own hooks.
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.world.find(id)
    }

    /// Mutable lookup of a registered actor.
    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.world.find_mut(id)
    }

    /// Registered actors, destroyed ones awaiting purge included.
    pub fn actor_count(&self) -> usize {
        self.world.len()
    }

    /// Ids in live-list order.
    pub fn actor_ids(&self) -> Vec<ActorId> {
        self.world.id_list()
    }

    /// Destroy an actor. It leaves the live list on the next tick.
    pub fn destroy_actor(&mut self, id: ActorId) -> Result<()> {
        self.world.destroy(id)
    }

    /// Add a component to a registered actor with access to the world.
    pub fn add_component<C: Component>(&mut self, id: ActorId, component: C) -> Result<ComponentId> {
        self.world
            .with_actor(id, |actor, world| actor.add_boxed_in(Box::new(component), Some(world)))?
    }

    /// Run `f` against component `T` of a registered actor with access to the world.
    pub fn with_component<T, R, F>(&mut self, id: ActorId, f: F) -> Result<Option<R>, StageError>
    where
        T: Component,
        F: FnOnce(&mut T, &mut Context<'_>) -> R,
    {
        self.world
            .with_actor(id, |actor, world| actor.with_component_in(Some(world), f))
    }

    // ---------------------------------------------------------------------
    // Updaters
    // ---------------------------------------------------------------------

    /// Register a per-frame updater. Updaters run before actors, newest first.
    pub fn add_updater(&mut self, updater: impl Updater + 'static) -> UpdaterId {
        self.next_updater += 1;
        let id = UpdaterId(self.next_updater);
        self.updaters.push((id, Box::new(updater)));
        id
    }

    /// Unregister an updater. Returns false if it was already gone.
    pub fn remove_updater(&mut self, id: UpdaterId) -> bool {
        let before = self.updaters.len();
        self.updaters.retain(|(existing, _)| *existing != id);
        self.updaters.len() != before
    }

    pub fn updater_count(&self) -> usize {
        self.updaters.len()
    }

    // ---------------------------------------------------------------------
    // Groups
    // ---------------------------------------------------------------------

    /// The group arena.
    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    /// Create a detached, empty group without a scene node.
    pub fn create_group(&mut self) -> GroupId {
        self.groups.create()
    }

    /// Create a layer group whose node becomes the parent of its members' nodes.
    pub fn create_layer(&mut self, node: impl SceneNode + 'static) -> GroupId {
        self.groups.create_layer(node)
    }

    /// Nest `child` under `parent`, detaching it from any previous parent.
    pub fn add_group(&mut self, parent: GroupId, child: GroupId) -> Result<()> {
        self.groups.add_group(&mut self.world, parent, child)
    }

    /// Detach `child` from `parent`. Returns false if it was not nested there.
    pub fn remove_group(&mut self, parent: GroupId, child: GroupId) -> bool {
        self.groups.remove_group(parent, child)
    }

    /// Register the group's staged actors, and those of its sub-groups.
    pub fn attach_group(&mut self, id: GroupId) -> Result<()> {
        self.groups.attach(&mut self.world, id)
    }

    /// Put an actor in a group, registering it first when the group is attached.
    pub fn add_to_group(&mut self, group: GroupId, actor: Actor) -> Result<ActorId> {
        let attached = self
            .groups
            .get(group)
            .ok_or(StageError::GroupNotFound(group))?
            .is_attached();
        if !attached {
            return self.groups.stage_actor(group, actor);
        }
        let id = self.world.add(actor)?;
        self.groups.add_actor(&mut self.world, group, id)?;
        Ok(id)
    }

    /// Move a registered actor into a group.
    pub fn join_group(&mut self, group: GroupId, actor: ActorId) -> Result<()> {
        self.groups.add_actor(&mut self.world, group, actor)
    }

    /// Remove a registered actor from a group. The actor itself stays live.
    pub fn leave_group(&mut self, group: GroupId, actor: ActorId) -> bool {
        self.groups.remove_actor(&mut self.world, group, actor)
    }

    /// Deactivate every member of the group and its sub-groups.
    pub fn pause_group(&mut self, id: GroupId) -> Result<()> {
        self.groups.pause(&mut self.world, id)
    }

    /// Reactivate every member of the group and its sub-groups.
    pub fn unpause_group(&mut self, id: GroupId) -> Result<()> {
        self.groups.unpause(&mut self.world, id)
    }

    /// Show or hide the nodes of the group, its members and sub-groups.
    pub fn set_group_visible(&mut self, id: GroupId, visible: bool) -> Result<()> {
        self.groups.set_visible(&mut self.world, id, visible)
    }

    /// Destroy the group, its sub-groups and every member actor.
    pub fn destroy_group(&mut self, id: GroupId) -> Result<()> {
        self.groups.destroy(&mut self.world, id)
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// A receiver for events published by actors of this engine.
    pub fn events(&self) -> Receiver<Event> {
        self.bus.receiver()
    }

    /// Take every pending event.
    pub fn drain_events(&self) -> Vec<Event> {
        self.bus.drain()
    }

    /// Send an event on the engine bus.
    pub fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    // ---------------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------------

    /// Advance one frame.
    ///
    /// Runs updaters newest first, then visits actors from the back of the
    /// live list: destroyed actors are finalized and dropped, active actors
    /// that are not sleeping are ticked. Actors registered during the tick are first ticked on the
    /// next one.
    pub fn update(&mut self, delta: Duration) -> Result<()> {
        let delta = self.step_seconds(delta);

        for index in (0..self.updaters.len()).rev() {
            self.updaters[index].1.update(&mut self.world, delta)?;
        }

        for id in self.world.id_list().into_iter().rev() {
            let Some(actor) = self.world.find(id) else {
                continue;
            };
            if actor.is_destroyed() {
                self.purge(id);
            } else if actor.is_active() && !actor.is_sleeping() {
                self.world.update_actor(id, delta)?;
            }
        }

        self.elapsed += Duration::try_from_secs_f32(delta).unwrap_or_default();
        self.frame += 1;
        Ok(())
    }

    fn step_seconds(&self, delta: Duration) -> f32 {
        let scaled = delta.as_secs_f32() * self.config.time_scale;
        if scaled > self.config.max_delta {
            log::warn!(
                "frame delta {scaled:.3}s exceeds max_delta {:.3}s, clamping",
                self.config.max_delta
            );
            return self.config.max_delta;
        }
        if scaled.is_finite() {
            scaled.max(0.0)
        } else {
            0.0
        }
    }

    /// Drop a destroyed actor from the live list and from its group.
    fn purge(&mut self, id: ActorId) {
        let Some(mut actor) = self.world.remove(id) else {
            return;
        };
        actor.finalize();
        if let Some(group) = actor.group_membership() {
            self.groups.forget_actor(group, id);
        }
        log::debug!("{id}: purged ({} live)", self.world.len());
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
