//! Logical parent/child hierarchy between actors.
//!
//! A [`Transform`] component records an actor's parent and ordered
//! children. The owning actor's position and rotation are local to its
//! parent; [`world_position`] and [`world_rotation`] compose them up the
//! chain. This hierarchy is independent of groups: an actor may sit in a
//! group without a Transform relationship, and the other way round.
//!
//! The functions here are generic over [`Actors`], so they work on a
//! [`World`](crate::World) and from inside a component hook through its
//! [`Context`](crate::Context).

use anyhow::Result;

use crate::actor::ActorId;
use crate::component::Component;
use crate::error::StageError;
use crate::events::Event;
use crate::math::{normalize_angle, Vec2};
use crate::world::Actors;

/// Structural change seen by a Transform or one of its ancestors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HierarchyChange {
    Added { parent: ActorId, child: ActorId },
    Removed { parent: ActorId, child: ActorId },
}

impl HierarchyChange {
    pub fn child(&self) -> ActorId {
        match self {
            HierarchyChange::Added { child, .. } | HierarchyChange::Removed { child, .. } => *child,
        }
    }
}

/// Hierarchy node of an actor.
#[derive(Clone, Debug, Default)]
pub struct Transform {
    /// Footprint used by hit detection.
    pub size: Vec2,
    parent: Option<ActorId>,
    children: Vec<ActorId>,
    watched: bool,
    changes: Vec<HierarchyChange>,
}

impl Transform {
    pub fn new(size: Vec2) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn parent(&self) -> Option<ActorId> {
        self.parent
    }

    pub fn children(&self) -> &[ActorId] {
        &self.children
    }

    /// Start recording structural changes below this Transform.
    ///
    /// Unwatched Transforms drop change notices, so only Transforms with a
    /// consumer accumulate them.
    pub fn watch(&mut self) {
        self.watched = true;
    }

    /// Stop recording and discard anything not yet taken.
    pub fn unwatch(&mut self) {
        self.watched = false;
        self.changes.clear();
    }

    pub fn is_watched(&self) -> bool {
        self.watched
    }

    /// Take the structural changes recorded in this subtree since the last call.
    pub fn take_changes(&mut self) -> Vec<HierarchyChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

impl Component for Transform {}

/// Attach `child` under `parent`, detaching it from any previous parent first.
///
/// Both actors get a Transform if they lack one. Fails on self-parenting and
/// when `child` is an ancestor of `parent`.
pub fn add_child<A: Actors + ?Sized>(actors: &mut A, parent: ActorId, child: ActorId) -> Result<()> {
    if parent == child {
        return Err(StageError::SelfParent(child).into());
    }
    for id in [parent, child] {
        if actors.find(id).is_none() {
            return Err(StageError::ActorNotFound(id).into());
        }
    }
    if parent_chain(&*actors, parent).contains(&child) {
        return Err(StageError::HierarchyCycle { parent, child }.into());
    }

    match parent_of(&*actors, child) {
        Some(current) if current == parent => return Ok(()),
        Some(current) => {
            remove_child(actors, current, child);
        }
        None => {}
    }

    if let Some(actor) = actors.find_mut(parent) {
        actor.require::<Transform>()?.children.push(child);
    }
    if let Some(actor) = actors.find_mut(child) {
        actor.require::<Transform>()?.parent = Some(parent);
    }
    log::trace!("{child}: attached under {parent}");
    notify(actors, parent, HierarchyChange::Added { parent, child });
    Ok(())
}

/// Detach `child` from `parent`. Returns false when it was not a child.
pub fn remove_child<A: Actors + ?Sized>(actors: &mut A, parent: ActorId, child: ActorId) -> bool {
    if parent_of(&*actors, child) != Some(parent) {
        return false;
    }
    if let Some(transform) = transform_mut(actors, child) {
        transform.parent = None;
    }
    if let Some(transform) = transform_mut(actors, parent) {
        transform.children.retain(|id| *id != child);
    }
    log::trace!("{child}: detached from {parent}");
    notify(actors, parent, HierarchyChange::Removed { parent, child });
    true
}

pub fn parent_of<A: Actors + ?Sized>(actors: &A, id: ActorId) -> Option<ActorId> {
    actors.find(id)?.get::<Transform>()?.parent
}

pub fn children_of<A: Actors + ?Sized>(actors: &A, id: ActorId) -> Vec<ActorId> {
    actors
        .find(id)
        .and_then(|actor| actor.get::<Transform>())
        .map(|transform| transform.children.clone())
        .unwrap_or_default()
}

/// Topmost reachable ancestor, or `id` itself.
pub fn root_of<A: Actors + ?Sized>(actors: &A, id: ActorId) -> ActorId {
    parent_chain(actors, id).last().copied().unwrap_or(id)
}

/// Every reachable actor below `id`, depth first, in child order.
pub fn descendants<A: Actors + ?Sized>(actors: &A, id: ActorId) -> Vec<ActorId> {
    let mut found = Vec::new();
    let mut stack: Vec<ActorId> = children_of(actors, id).into_iter().rev().collect();
    while let Some(next) = stack.pop() {
        if actors.find(next).is_none() || found.contains(&next) {
            continue;
        }
        found.push(next);
        stack.extend(children_of(actors, next).into_iter().rev());
    }
    found
}

/// First component of type `T` on `id` or, failing that, below it.
pub fn find_in_subtree<'a, T, A>(actors: &'a A, id: ActorId) -> Option<(ActorId, &'a T)>
where
    T: Component,
    A: Actors + ?Sized,
{
    std::iter::once(id)
        .chain(descendants(actors, id))
        .find_map(|candidate| {
            actors
                .find(candidate)
                .and_then(|actor| actor.get::<T>())
                .map(|component| (candidate, component))
        })
}

/// Position of `id` with every ancestor's translation and rotation applied.
pub fn world_position<A: Actors + ?Sized>(actors: &A, id: ActorId) -> Vec2 {
    let Some(actor) = actors.find(id) else {
        return Vec2::ZERO;
    };
    parent_chain(actors, id)
        .into_iter()
        .filter_map(|ancestor| actors.find(ancestor))
        .fold(actor.position(), |position, parent| {
            parent.position() + position.rotated(parent.rotation())
        })
}

pub fn world_rotation<A: Actors + ?Sized>(actors: &A, id: ActorId) -> f32 {
    let own = actors.find(id).map_or(0.0, |actor| actor.rotation());
    let total = parent_chain(actors, id)
        .into_iter()
        .filter_map(|ancestor| actors.find(ancestor))
        .fold(own, |sum, ancestor| sum + ancestor.rotation());
    normalize_angle(total)
}

/// Reachable ancestors of `id`, nearest first.
fn parent_chain<A: Actors + ?Sized>(actors: &A, id: ActorId) -> Vec<ActorId> {
    let mut chain = Vec::new();
    let mut current = id;
    while let Some(parent) = parent_of(actors, current) {
        if parent == id || chain.contains(&parent) || actors.find(parent).is_none() {
            break;
        }
        chain.push(parent);
        current = parent;
    }
    chain
}

fn transform_mut<A: Actors + ?Sized>(actors: &mut A, id: ActorId) -> Option<&mut Transform> {
    actors.find_mut(id)?.get_mut::<Transform>()
}

/// Publish the change and record it on `parent` and every watched ancestor.
fn notify<A: Actors + ?Sized>(actors: &mut A, parent: ActorId, change: HierarchyChange) {
    if let Some(actor) = actors.find(parent) {
        actor.publish(match change {
            HierarchyChange::Added { parent, child } => Event::ChildAdded { parent, child },
            HierarchyChange::Removed { parent, child } => Event::ChildRemoved { parent, child },
        });
    }
    let mut chain = parent_chain(&*actors, parent);
    chain.insert(0, parent);
    for id in chain {
        if let Some(transform) = transform_mut(actors, id).filter(|transform| transform.watched) {
            transform.changes.push(change);
        }
    }
}
