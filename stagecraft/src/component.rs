//! Component trait and the context handed to component hooks.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

use anyhow::Result;

use crate::actor::{Actor, ActorId};
use crate::events::Event;
use crate::group::GroupId;
use crate::math::Vec2;
use crate::world::{Actors, World};

/// Identifier of a component within its actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Lifecycle flags the owning actor keeps for each component.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComponentState {
    pub enabled: bool,
    pub destroyed: bool,
    pub sleep: bool,
    /// `init` has run; the component is attached.
    pub initialized: bool,
    pub priority: i32,
}

/// Type-erasure helpers every component gets for free.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A unit of behavior attached to one actor.
///
/// Every hook is optional. Hooks run with the component temporarily taken
/// out of its slot, so looking the component itself up through the
/// context while a hook runs finds nothing.
pub trait Component: AsAny {
    /// Called once when the component is attached to a live actor.
    fn init(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Called every tick while the component is enabled and awake.
    fn update(&mut self, _ctx: &mut Context<'_>, _delta: f32) -> Result<()> {
        Ok(())
    }

    fn on_enable(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    fn on_disable(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// The owning actor became active.
    fn on_activate(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// The owning actor became inactive.
    fn on_deactivate(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Called exactly once when the component is destroyed.
    fn on_destroy(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Update order key; lower runs first.
    fn priority(&self) -> i32 {
        0
    }
}

pub(crate) fn downcast_ref<'a, T: Component>(component: &'a (dyn Component + 'static)) -> Option<&'a T> {
    component.as_any().downcast_ref::<T>()
}

pub(crate) fn downcast_mut<'a, T: Component>(
    component: &'a mut (dyn Component + 'static),
) -> Option<&'a mut T> {
    component.as_any_mut().downcast_mut::<T>()
}

/// Access to the owning actor (and the rest of the world, inside an
/// engine) while a component hook runs.
pub struct Context<'a> {
    actor: &'a mut Actor,
    world: Option<&'a mut World>,
    component: ComponentId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(actor: &'a mut Actor, world: Option<&'a mut World>, component: ComponentId) -> Self {
        Self {
            actor,
            world,
            component,
        }
    }

    /// Id of the component whose hook is running.
    pub fn component_id(&self) -> ComponentId {
        self.component
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor.id()
    }

    pub fn actor(&self) -> &Actor {
        &*self.actor
    }

    pub fn actor_mut(&mut self) -> &mut Actor {
        &mut *self.actor
    }

    /// The other live actors, when running inside an engine.
    pub fn world(&self) -> Option<&World> {
        self.world.as_deref()
    }

    pub fn world_mut(&mut self) -> Option<&mut World> {
        self.world.as_deref_mut()
    }

    pub fn position(&self) -> Vec2 {
        self.actor.position()
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.actor.set_position(position);
    }

    pub fn rotation(&self) -> f32 {
        self.actor.rotation()
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.actor.set_rotation(rotation);
    }

    pub fn flags(&self) -> u32 {
        self.actor.flags()
    }

    pub fn group(&self) -> Option<GroupId> {
        self.actor.group()
    }

    /// Add a sibling component; see [`Actor::add`].
    pub fn add<C: Component>(&mut self, component: C) -> Result<ComponentId> {
        self.actor.add_boxed_in(Box::new(component), self.world.as_deref_mut())
    }

    pub fn add_boxed(&mut self, component: Box<dyn Component>) -> Result<ComponentId> {
        self.actor.add_boxed_in(component, self.world.as_deref_mut())
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.actor.get::<T>()
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.actor.get_mut::<T>()
    }

    /// Existing sibling of type `T`, or a default one added on the spot.
    pub fn require<T: Component + Default>(&mut self) -> Result<&mut T> {
        self.actor.require_with_in(T::default, self.world.as_deref_mut())
    }

    /// Destroy the sibling of type `T`. Returns whether one was found.
    pub fn remove<T: Component>(&mut self) -> Result<bool> {
        self.actor.remove_in::<T>(self.world.as_deref_mut())
    }

    /// Remove a sibling by id; see [`Actor::remove_component`].
    pub fn remove_component(&mut self, id: ComponentId, destroy: bool) -> Result<Option<Box<dyn Component>>> {
        self.actor.remove_component_in(id, destroy, self.world.as_deref_mut())
    }

    /// Run `f` against sibling `T` with a context of its own.
    pub fn with_component<T, R, F>(&mut self, f: F) -> Option<R>
    where
        T: Component,
        F: FnOnce(&mut T, &mut Context<'_>) -> R,
    {
        self.actor.with_component_in(self.world.as_deref_mut(), f)
    }

    pub fn set_enabled(&mut self, id: ComponentId, enabled: bool) -> Result<bool> {
        self.actor.set_enabled_in(id, enabled, self.world.as_deref_mut())
    }

    /// Destroy the component whose hook is running once the hook returns.
    pub fn destroy_self(&mut self) -> Result<()> {
        let id = self.component;
        self.actor.remove_component_in(id, true, self.world.as_deref_mut())?;
        Ok(())
    }

    /// Destroy the owning actor.
    pub fn destroy_actor(&mut self) -> Result<()> {
        self.actor.destroy_in(self.world.as_deref_mut())
    }

    pub fn emit(&self, name: impl Into<Cow<'static, str>>) {
        self.actor.emit(name);
    }

    pub fn publish(&self, event: Event) {
        self.actor.publish(event);
    }
}

impl Actors for Context<'_> {
    fn find(&self, id: ActorId) -> Option<&Actor> {
        if id == self.actor.id() {
            return Some(&*self.actor);
        }
        self.world.as_deref().and_then(|world| world.find(id))
    }

    fn find_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        if id == self.actor.id() {
            return Some(&mut *self.actor);
        }
        self.world.as_deref_mut().and_then(|world| world.find_mut(id))
    }

    fn ids(&self) -> Vec<ActorId> {
        let mut ids = self.world.as_deref().map(|world| world.ids()).unwrap_or_default();
        ids.push(self.actor.id());
        ids
    }
}
