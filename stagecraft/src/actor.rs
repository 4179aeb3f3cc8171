//! Actors: the composition root owning components and an optional scene node.
//!
//! Component storage is two lists. New components land in `pending` and are
//! moved into the priority-sorted `components` list at the start of the next
//! update, so the live list never changes shape while it is being iterated.
//! Destroyed components stay in place until the update loop finishes and are
//! then compacted in one stable pass.

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{anyhow, Result};

use crate::component::{downcast_mut, downcast_ref, Component, ComponentId, ComponentState, Context};
use crate::error::StageError;
use crate::events::{Event, EventSender};
use crate::group::GroupId;
use crate::math::{normalize_angle, Vec2};
use crate::node::{DestroyOptions, SceneNode};
use crate::world::World;

static NEXT_ACTOR_ID: AtomicU32 = AtomicU32::new(1);

/// Unique, monotonic identifier of an actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u32);

impl ActorId {
    fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id from its raw value (logging, interop, tests).
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Well-known flag masks.
pub struct Flags;

impl Flags {
    pub const NONE: u32 = 0;
    pub const ALL: u32 = u32::MAX;
}

struct Slot {
    id: ComponentId,
    type_id: TypeId,
    type_name: &'static str,
    state: ComponentState,
    /// Destroy was requested while the component was checked out for a hook.
    destroy_requested: bool,
    component: Option<Box<dyn Component>>,
}

impl Slot {
    fn is_usable(&self) -> bool {
        !self.state.destroyed && self.component.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum List {
    Live,
    Pending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SlotRef {
    list: List,
    index: usize,
}

impl SlotRef {
    fn live(index: usize) -> Self {
        Self {
            list: List::Live,
            index,
        }
    }

    fn pending(index: usize) -> Self {
        Self {
            list: List::Pending,
            index,
        }
    }
}

/// Lifecycle hook selector used by the internal dispatcher.
#[derive(Clone, Copy, Debug)]
enum Hook {
    Init,
    Enable,
    Disable,
    Activate,
    Deactivate,
    Destroy,
}

impl Hook {
    fn call(self, component: &mut dyn Component, ctx: &mut Context<'_>) -> Result<()> {
        match self {
            Hook::Init => component.init(ctx),
            Hook::Enable => component.on_enable(ctx),
            Hook::Disable => component.on_disable(ctx),
            Hook::Activate => component.on_activate(ctx),
            Hook::Deactivate => component.on_deactivate(ctx),
            Hook::Destroy => component.on_destroy(ctx),
        }
    }
}

/// A game object: position, flags and an ordered set of components.
pub struct Actor {
    id: ActorId,
    position: Vec2,
    rotation: f32,
    flags: u32,
    active: bool,
    sleep: bool,
    destroyed: bool,
    live: bool,
    group: Option<GroupId>,
    node: Option<Box<dyn SceneNode>>,
    components: Vec<Slot>,
    pending: Vec<Slot>,
    keys: HashMap<TypeId, ComponentId>,
    next_component: u32,
    emitter: Option<EventSender>,
}

impl Actor {
    /// Create an active actor at the origin with no scene node.
    pub fn new() -> Self {
        Self {
            id: ActorId::next(),
            position: Vec2::ZERO,
            rotation: 0.0,
            flags: Flags::NONE,
            active: true,
            sleep: false,
            destroyed: false,
            live: false,
            group: None,
            node: None,
            components: Vec::new(),
            pending: Vec::new(),
            keys: HashMap::new(),
            next_component: 1,
            emitter: None,
        }
    }

    /// Wrap an existing scene node; the actor adopts its position and rotation.
    pub fn with_node(node: impl SceneNode + 'static) -> Self {
        let mut actor = Self::new();
        actor.position = node.position();
        actor.rotation = normalize_angle(node.rotation());
        actor.node = Some(Box::new(node));
        actor
    }

    #[must_use]
    pub fn at(mut self, position: Vec2) -> Self {
        self.set_position(position);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Queue a component while building the actor.
    #[must_use]
    pub fn with<C: Component>(mut self, component: C) -> Self {
        if let Err(err) = self.add(component) {
            log::warn!("{}: dropped component while building: {err}", self.id);
        }
        self
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
        if let Some(node) = self.node.as_mut() {
            node.set_position(position);
        }
    }

    pub fn translate(&mut self, offset: Vec2) {
        self.set_position(self.position + offset);
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }

    /// Rotation in radians, always within `(-PI, PI]`.
    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: f32) {
        self.rotation = normalize_angle(rotation);
        if let Some(node) = self.node.as_mut() {
            node.set_rotation(self.rotation);
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleep
    }

    /// A sleeping actor stays registered but the engine skips its tick.
    pub fn set_sleep(&mut self, sleep: bool) {
        self.sleep = sleep;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// True once the actor has run its attachment sequence.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// The group this actor belongs to. Destroyed actors belong to none.
    pub fn group(&self) -> Option<GroupId> {
        if self.destroyed {
            None
        } else {
            self.group
        }
    }

    /// Last group membership, kept after destruction so the owner can be cleaned up.
    pub(crate) fn group_membership(&self) -> Option<GroupId> {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: Option<GroupId>) {
        self.group = group;
    }

    pub fn node(&self) -> Option<&dyn SceneNode> {
        self.node.as_deref()
    }

    pub fn node_mut(&mut self) -> Option<&mut (dyn SceneNode + 'static)> {
        self.node.as_deref_mut()
    }

    pub(crate) fn bind_emitter(&mut self, emitter: EventSender) {
        self.emitter = Some(emitter);
    }

    /// Publish an event on the bus of the engine this actor belongs to.
    pub fn publish(&self, event: Event) {
        match &self.emitter {
            Some(sender) => {
                let _ = sender.send(event);
            }
            None => log::trace!("{}: no event bus bound, dropped {event:?}", self.id),
        }
    }

    /// Raise a named user event.
    pub fn emit(&self, name: impl Into<Cow<'static, str>>) {
        if self.emitter.is_none() {
            log::warn!("{}: emit before the actor joined an engine", self.id);
        }
        self.publish(Event::Signal {
            actor: self.id,
            name: name.into(),
        });
    }

    // ---------------------------------------------------------------------
    // Component registry
    // ---------------------------------------------------------------------

    /// Attach a component.
    ///
    /// The component is registered under its type and queued. On a live actor
    /// it is initialized right away (and activated when the actor is active);
    /// otherwise initialization waits for the actor to join an engine. Either
    /// way it is first updated on the next call to `update`.
    pub fn add<C: Component>(&mut self, component: C) -> Result<ComponentId> {
        self.add_boxed_in(Box::new(component), None)
    }

    /// Attach an already boxed component.
    pub fn add_boxed(&mut self, component: Box<dyn Component>) -> Result<ComponentId> {
        self.add_boxed_in(component, None)
    }

    pub(crate) fn add_boxed_in(
        &mut self,
        component: Box<dyn Component>,
        mut world: Option<&mut World>,
    ) -> Result<ComponentId> {
        if self.destroyed {
            return Err(StageError::ActorDestroyed(self.id).into());
        }

        let id = ComponentId(self.next_component);
        self.next_component += 1;

        let erased: &dyn Component = &*component;
        let type_id = erased.as_any().type_id();
        let type_name = erased.type_name();
        let state = ComponentState {
            priority: erased.priority(),
            ..ComponentState::default()
        };
        self.keys.insert(type_id, id);
        self.pending.push(Slot {
            id,
            type_id,
            type_name,
            state,
            destroy_requested: false,
            component: Some(component),
        });
        log::trace!("{}: queued {type_name} as {id}", self.id);

        if self.live {
            let at = SlotRef::pending(self.pending.len() - 1);
            self.init_slot(at, world.as_deref_mut())?;
            if self.active {
                self.hook_if_ready(at, Hook::Activate, world)?;
            }
        }
        Ok(id)
    }

    /// First usable component of type `T`.
    pub fn get<T: Component>(&self) -> Option<&T> {
        let at = self.find_slot_of::<T>()?;
        self.slot(at)
            .component
            .as_deref()
            .and_then(|component| downcast_ref::<T>(component))
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let at = self.find_slot_of::<T>()?;
        self.slot_mut(at)
            .component
            .as_deref_mut()
            .and_then(|component| downcast_mut::<T>(component))
    }

    /// Every usable component of type `T`, in update order then queue order.
    pub fn get_all<T: Component>(&self) -> Vec<&T> {
        self.components
            .iter()
            .chain(self.pending.iter())
            .filter(|slot| slot.is_usable())
            .filter_map(|slot| {
                slot.component
                    .as_deref()
                    .and_then(|component| downcast_ref::<T>(component))
            })
            .collect()
    }

    pub fn has<T: Component>(&self) -> bool {
        self.find_slot_of::<T>().is_some()
    }

    /// Id of the first usable component of type `T`.
    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.find_slot_of::<T>().map(|at| self.slot(at).id)
    }

    /// Id of the first usable component whose concrete type is `type_id`.
    pub fn id_of_type(&self, type_id: TypeId) -> Option<ComponentId> {
        self.find_slot_of_type(type_id).map(|at| self.slot(at).id)
    }

    /// Look a component up by id, regardless of its type.
    pub fn component(&self, id: ComponentId) -> Option<&dyn Component> {
        let at = self.locate(id)?;
        let slot = self.slot(at);
        if slot.state.destroyed {
            return None;
        }
        slot.component.as_deref()
    }

    /// Existing `T`, or a default one added on the spot.
    pub fn require<T: Component + Default>(&mut self) -> Result<&mut T> {
        self.require_with_in(T::default, None)
    }

    /// Existing `T`, or one built by `make` and added on the spot.
    pub fn require_with<T: Component, F: FnOnce() -> T>(&mut self, make: F) -> Result<&mut T> {
        self.require_with_in(make, None)
    }

    pub(crate) fn require_with_in<T: Component, F: FnOnce() -> T>(
        &mut self,
        make: F,
        world: Option<&mut World>,
    ) -> Result<&mut T> {
        if self.find_slot_of::<T>().is_none() {
            self.add_boxed_in(Box::new(make()), world)?;
        }
        let actor = self.id;
        self.get_mut::<T>().ok_or_else(|| {
            anyhow!(
                "{actor}: required {} was destroyed during initialization",
                std::any::type_name::<T>()
            )
        })
    }

    /// Destroy the first component of type `T`. Returns whether one was found.
    pub fn remove<T: Component>(&mut self) -> Result<bool> {
        self.remove_in::<T>(None)
    }

    pub(crate) fn remove_in<T: Component>(&mut self, world: Option<&mut World>) -> Result<bool> {
        match self.find_slot_of::<T>() {
            Some(at) => self.destroy_slot(at, world),
            None => Ok(false),
        }
    }

    /// Remove a component by id.
    ///
    /// With `destroy` the component runs its destroy lifecycle and `None` is
    /// returned; without it the component is detached untouched and handed
    /// back to the caller.
    pub fn remove_component(&mut self, id: ComponentId, destroy: bool) -> Result<Option<Box<dyn Component>>> {
        self.remove_component_in(id, destroy, None)
    }

    pub(crate) fn remove_component_in(
        &mut self,
        id: ComponentId,
        destroy: bool,
        world: Option<&mut World>,
    ) -> Result<Option<Box<dyn Component>>> {
        let Some(at) = self.locate(id) else {
            return Ok(None);
        };
        if destroy {
            self.destroy_slot(at, world)?;
            return Ok(None);
        }
        Ok(self.detach_slot(at))
    }

    /// Detach the first component of type `T` without destroying it.
    pub fn take<T: Component>(&mut self) -> Option<T> {
        let at = self.find_slot_of::<T>()?;
        let component = self.detach_slot(at)?;
        component.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Enable or disable a component, firing `on_enable`/`on_disable` on change.
    pub fn set_enabled(&mut self, id: ComponentId, enabled: bool) -> Result<bool> {
        self.set_enabled_in(id, enabled, None)
    }

    pub(crate) fn set_enabled_in(&mut self, id: ComponentId, enabled: bool, world: Option<&mut World>) -> Result<bool> {
        let Some(at) = self.locate(id) else {
            return Ok(false);
        };
        let slot = self.slot_mut(at);
        if slot.state.destroyed || slot.state.enabled == enabled {
            return Ok(false);
        }
        slot.state.enabled = enabled;
        let hook = if enabled { Hook::Enable } else { Hook::Disable };
        self.hook_if_ready(at, hook, world)?;
        Ok(true)
    }

    pub fn set_component_sleep(&mut self, id: ComponentId, sleep: bool) -> bool {
        match self.locate(id) {
            Some(at) => {
                self.slot_mut(at).state.sleep = sleep;
                true
            }
            None => false,
        }
    }

    /// Lifecycle flags of a component still held by this actor.
    pub fn state(&self, id: ComponentId) -> Option<ComponentState> {
        self.locate(id).map(|at| self.slot(at).state)
    }

    pub fn is_enabled(&self, id: ComponentId) -> bool {
        self.state(id).map_or(false, |state| state.enabled && !state.destroyed)
    }

    /// Ids of usable components in update order, then queue order.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components
            .iter()
            .chain(self.pending.iter())
            .filter(|slot| !slot.state.destroyed)
            .map(|slot| slot.id)
            .collect()
    }

    /// Type names of usable components in the same order as `component_ids`.
    pub fn component_names(&self) -> Vec<&'static str> {
        self.components
            .iter()
            .chain(self.pending.iter())
            .filter(|slot| !slot.state.destroyed)
            .map(|slot| slot.type_name)
            .collect()
    }

    pub fn component_count(&self) -> usize {
        self.components
            .iter()
            .chain(self.pending.iter())
            .filter(|slot| !slot.state.destroyed)
            .count()
    }

    /// Physical length of the live list, destroyed slots included.
    pub fn slot_count(&self) -> usize {
        self.components.len()
    }

    /// Components waiting to join the live list.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run `f` against component `T` together with a context for its actor.
    ///
    /// The component is checked out of its slot for the duration of the call.
    pub fn with_component<T, R, F>(&mut self, f: F) -> Option<R>
    where
        T: Component,
        F: FnOnce(&mut T, &mut Context<'_>) -> R,
    {
        self.with_component_in(None, f)
    }

    pub(crate) fn with_component_in<T, R, F>(&mut self, mut world: Option<&mut World>, f: F) -> Option<R>
    where
        T: Component,
        F: FnOnce(&mut T, &mut Context<'_>) -> R,
    {
        let at = self.find_slot_of::<T>()?;
        let slot = self.slot_mut(at);
        let id = slot.id;
        let mut component = slot.component.take()?;

        let result = match downcast_mut::<T>(&mut *component) {
            Some(typed) => {
                let mut ctx = Context::new(self, world.as_deref_mut(), id);
                Some(f(typed, &mut ctx))
            }
            None => None,
        };

        if let Err(err) = self.restore(at, id, component, world) {
            log::error!("{}: deferred destroy of {id} failed: {err:#}", self.id);
        }
        result
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Run the attachment sequence without an engine.
    ///
    /// Flushes queued components, initializes all of them and activates them
    /// when the actor is active. `Engine::add` runs the same sequence; this
    /// entry point is for headless use. Calling it on a live actor does nothing.
    pub fn start(&mut self) -> Result<()> {
        self.start_in(None)
    }

    pub(crate) fn start_in(&mut self, mut world: Option<&mut World>) -> Result<()> {
        if self.destroyed {
            return Err(StageError::ActorDestroyed(self.id).into());
        }
        if self.live {
            return Ok(());
        }
        self.live = true;
        self.flush_pending();

        for index in 0..self.components.len() {
            self.init_slot(SlotRef::live(index), world.as_deref_mut())?;
        }
        if self.active {
            for index in 0..self.components.len() {
                self.hook_if_ready(SlotRef::live(index), Hook::Activate, world.as_deref_mut())?;
            }
        }
        log::trace!("{}: started with {} components", self.id, self.components.len());
        Ok(())
    }

    /// Tick every enabled, awake component in priority order.
    pub fn update(&mut self, delta: f32) -> Result<()> {
        self.update_in(delta, None)
    }

    pub(crate) fn update_in(&mut self, delta: f32, mut world: Option<&mut World>) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.flush_pending();

        let count = self.components.len();
        let mut destroyed = 0;
        for index in 0..count {
            if self.destroyed {
                break;
            }
            let state = self.components[index].state;
            if state.destroyed {
                destroyed += 1;
                continue;
            }
            if !state.initialized || !state.enabled || state.sleep {
                continue;
            }
            self.run_hook(SlotRef::live(index), world.as_deref_mut(), |component, ctx| {
                component.update(ctx, delta)
            })?;
        }

        // Components destroyed during the pass were not tallied above.
        if destroyed > 0 || self.components.iter().any(|slot| slot.state.destroyed) {
            self.remove_destroyed();
        }
        Ok(())
    }

    /// Toggle the active flag, firing `on_activate`/`on_deactivate` when live.
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        self.set_active_in(active, None)
    }

    pub(crate) fn set_active_in(&mut self, active: bool, mut world: Option<&mut World>) -> Result<()> {
        if self.destroyed || self.active == active {
            return Ok(());
        }
        self.active = active;
        if !self.live {
            return Ok(());
        }
        let hook = if active { Hook::Activate } else { Hook::Deactivate };
        for at in self.slot_refs() {
            if self.slot(at).state.enabled {
                self.hook_if_ready(at, hook, world.as_deref_mut())?;
            }
        }
        Ok(())
    }

    /// Destroy the actor and every component it holds.
    ///
    /// Idempotent. The engine drops the actor from its live list on the next
    /// tick; its scene node is torn down then.
    pub fn destroy(&mut self) -> Result<()> {
        self.destroy_in(None)
    }

    pub(crate) fn destroy_in(&mut self, mut world: Option<&mut World>) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        self.publish(Event::ActorDestroyed { actor: self.id });

        let mut first_error = None;
        for at in self.slot_refs() {
            if let Err(err) = self.destroy_slot(at, world.as_deref_mut()) {
                first_error.get_or_insert(err);
            }
        }
        self.keys.clear();
        log::debug!("{}: destroyed", self.id);

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Tear down the scene node once the engine purges the actor.
    pub(crate) fn finalize(&mut self) {
        if let Some(node) = self.node.as_mut() {
            node.destroy(DestroyOptions::CASCADE);
        }
        self.live = false;
        self.emitter = None;
    }

    // ---------------------------------------------------------------------
    // Slot plumbing
    // ---------------------------------------------------------------------

    fn slot(&self, at: SlotRef) -> &Slot {
        match at.list {
            List::Live => &self.components[at.index],
            List::Pending => &self.pending[at.index],
        }
    }

    fn slot_mut(&mut self, at: SlotRef) -> &mut Slot {
        match at.list {
            List::Live => &mut self.components[at.index],
            List::Pending => &mut self.pending[at.index],
        }
    }

    fn slot_refs(&self) -> Vec<SlotRef> {
        (0..self.components.len())
            .map(SlotRef::live)
            .chain((0..self.pending.len()).map(SlotRef::pending))
            .collect()
    }

    fn locate(&self, id: ComponentId) -> Option<SlotRef> {
        if let Some(index) = self.components.iter().position(|slot| slot.id == id) {
            return Some(SlotRef::live(index));
        }
        self.pending
            .iter()
            .position(|slot| slot.id == id)
            .map(SlotRef::pending)
    }

    fn find_slot_of<T: Component>(&self) -> Option<SlotRef> {
        self.find_slot_of_type(TypeId::of::<T>())
    }

    /// Keyed lookup first, then a scan in update order.
    fn find_slot_of_type(&self, type_id: TypeId) -> Option<SlotRef> {
        if let Some(at) = self.keys.get(&type_id).and_then(|id| self.locate(*id)) {
            let slot = self.slot(at);
            if slot.type_id == type_id && slot.is_usable() {
                return Some(at);
            }
        }
        let scan = |slots: &[Slot]| {
            slots
                .iter()
                .position(|slot| slot.type_id == type_id && slot.is_usable())
        };
        scan(&self.components)
            .map(SlotRef::live)
            .or_else(|| scan(&self.pending).map(SlotRef::pending))
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        self.components
            .extend(pending.into_iter().filter(|slot| !slot.state.destroyed));
        // Stable sort keeps insertion order among equal priorities.
        self.components.sort_by_key(|slot| slot.state.priority);
    }

    /// Slide survivors forward, preserving their order, and drop the tail.
    fn remove_destroyed(&mut self) {
        let before = self.components.len();
        self.components
            .retain(|slot| !slot.state.destroyed || slot.destroy_requested);
        log::trace!(
            "{}: compacted {} destroyed components",
            self.id,
            before - self.components.len()
        );
    }

    fn init_slot(&mut self, at: SlotRef, world: Option<&mut World>) -> Result<()> {
        let slot = self.slot_mut(at);
        if slot.state.initialized || slot.state.destroyed {
            return Ok(());
        }
        slot.state.initialized = true;
        slot.state.enabled = true;
        self.run_hook(at, world, |component, ctx| Hook::Init.call(component, ctx))
    }

    fn hook_if_ready(&mut self, at: SlotRef, hook: Hook, world: Option<&mut World>) -> Result<()> {
        let state = self.slot(at).state;
        if !state.initialized || state.destroyed {
            return Ok(());
        }
        self.run_hook(at, world, |component, ctx| hook.call(component, ctx))
    }

    fn destroy_slot(&mut self, at: SlotRef, world: Option<&mut World>) -> Result<bool> {
        let actor = self.id;
        let slot = self.slot_mut(at);
        if slot.state.destroyed {
            return Ok(false);
        }
        slot.state.destroyed = true;
        slot.state.enabled = false;
        let (id, type_id, initialized) = (slot.id, slot.type_id, slot.state.initialized);
        let checked_out = slot.component.is_none();
        if checked_out {
            slot.destroy_requested = true;
        }
        if self.keys.get(&type_id) == Some(&id) {
            self.keys.remove(&type_id);
        }
        log::trace!("{actor}: destroying {id}");

        if !checked_out && initialized {
            self.run_hook(at, world, |component, ctx| Hook::Destroy.call(component, ctx))?;
        }
        Ok(true)
    }

    fn detach_slot(&mut self, at: SlotRef) -> Option<Box<dyn Component>> {
        let slot = self.slot_mut(at);
        if slot.state.destroyed {
            return None;
        }
        let component = slot.component.take()?;
        slot.state.destroyed = true;
        slot.state.enabled = false;
        let (id, type_id) = (slot.id, slot.type_id);
        if self.keys.get(&type_id) == Some(&id) {
            self.keys.remove(&type_id);
        }
        Some(component)
    }

    /// Check a component out of its slot, run `f` with a context, put it back.
    fn run_hook<F>(&mut self, at: SlotRef, mut world: Option<&mut World>, f: F) -> Result<()>
    where
        F: FnOnce(&mut (dyn Component + 'static), &mut Context<'_>) -> Result<()>,
    {
        let slot = self.slot_mut(at);
        let id = slot.id;
        let Some(mut component) = slot.component.take() else {
            // Already checked out further up the stack.
            return Ok(());
        };

        let result = {
            let mut ctx = Context::new(self, world.as_deref_mut(), id);
            f(&mut *component, &mut ctx)
        };

        let restored = self.restore(at, id, component, world);
        result.and(restored)
    }

    /// Return a checked-out component and finish a destroy requested meanwhile.
    fn restore(
        &mut self,
        at: SlotRef,
        id: ComponentId,
        component: Box<dyn Component>,
        world: Option<&mut World>,
    ) -> Result<()> {
        let at = if self.slot_at_matches(at, id) {
            Some(at)
        } else {
            self.locate(id)
        };
        let Some(at) = at else {
            log::warn!("{}: slot for {id} vanished while checked out", self.id);
            return Ok(());
        };

        let slot = self.slot_mut(at);
        slot.component = Some(component);
        if !slot.destroy_requested {
            return Ok(());
        }
        slot.destroy_requested = false;
        if !slot.state.initialized {
            return Ok(());
        }
        self.run_hook(at, world, |component, ctx| Hook::Destroy.call(component, ctx))
    }

    fn slot_at_matches(&self, at: SlotRef, id: ComponentId) -> bool {
        let slots = match at.list {
            List::Live => &self.components,
            List::Pending => &self.pending,
        };
        slots.get(at.index).map_or(false, |slot| slot.id == id)
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("rotation", &self.rotation)
            .field("flags", &self.flags)
            .field("active", &self.active)
            .field("destroyed", &self.destroyed)
            .field("live", &self.live)
            .field("group", &self.group)
            .field("components", &self.component_names())
            .finish()
    }
}
