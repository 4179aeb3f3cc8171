//! Groups: the rendering and pause hierarchy over actors.
//!
//! Groups live in a [`Groups`] arena owned by the engine and refer to each
//! other and to their member actors by id. A group has at most one parent.
//! Pausing, unpausing and visibility changes cascade through members and
//! sub-groups. A layer group also owns a scene node and reparents its
//! members' nodes under it.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;

use crate::actor::{Actor, ActorId};
use crate::error::StageError;
use crate::node::{DestroyOptions, NodeId, SceneNode};
use crate::world::{Actors, World};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u32);

impl GroupId {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

pub struct Group {
    id: GroupId,
    node: Option<Box<dyn SceneNode>>,
    reparent_nodes: bool,
    actors: Vec<ActorId>,
    groups: Vec<GroupId>,
    parent: Option<GroupId>,
    paused: bool,
    visible: bool,
    attached: bool,
    /// Members held until the group is attached to an engine.
    staged: Vec<Actor>,
    destroying: bool,
}

impl Group {
    fn new(id: GroupId, node: Option<Box<dyn SceneNode>>, reparent_nodes: bool) -> Self {
        Self {
            id,
            node,
            reparent_nodes,
            actors: Vec::new(),
            groups: Vec::new(),
            parent: None,
            paused: false,
            visible: true,
            attached: false,
            staged: Vec::new(),
            destroying: false,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Member actors registered with the engine, in insertion order.
    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    /// Direct sub-groups in insertion order.
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// True once the group's actors are registered with an engine.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// True for layer groups, which reparent member nodes under their own.
    pub fn is_layer(&self) -> bool {
        self.reparent_nodes
    }

    /// Actors waiting for the group to be attached to an engine.
    pub fn staged(&self) -> impl Iterator<Item = &Actor> {
        self.staged.iter()
    }

    /// The group's scene node, if it has one.
    pub fn node(&self) -> Option<&dyn SceneNode> {
        self.node.as_deref()
    }

    pub fn node_mut(&mut self) -> Option<&mut (dyn SceneNode + 'static)> {
        self.node.as_deref_mut()
    }

    fn node_id(&self) -> Option<NodeId> {
        self.node.as_ref().map(|node| node.id())
    }

    /// Node new members are parented under, for layer groups.
    fn layer_node(&self) -> Option<NodeId> {
        if self.reparent_nodes {
            self.node_id()
        } else {
            None
        }
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("node", &self.node_id())
            .field("layer", &self.reparent_nodes)
            .field("actors", &self.actors)
            .field("groups", &self.groups)
            .field("parent", &self.parent)
            .field("paused", &self.paused)
            .field("visible", &self.visible)
            .field("attached", &self.attached)
            .field("staged", &self.staged.len())
            .finish()
    }
}

/// Arena of every group of one engine.
#[derive(Debug, Default)]
pub struct Groups {
    groups: HashMap<GroupId, Group>,
    next_id: u32,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain group: logical membership only.
    pub fn create(&mut self) -> GroupId {
        self.insert(None, false)
    }

    /// A plain group owning a scene node that follows its visibility.
    pub fn create_with_node(&mut self, node: impl SceneNode + 'static) -> GroupId {
        self.insert(Some(Box::new(node)), false)
    }

    /// A layer group: member nodes are reparented under `node`.
    pub fn create_layer(&mut self, node: impl SceneNode + 'static) -> GroupId {
        self.insert(Some(Box::new(node)), true)
    }

    fn insert(&mut self, node: Option<Box<dyn SceneNode>>, reparent_nodes: bool) -> GroupId {
        self.next_id += 1;
        let id = GroupId(self.next_id);
        self.groups.insert(id, Group::new(id, node, reparent_nodes));
        id
    }

    /// Look up a group by id.
    pub fn get(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn get_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(&id)
    }

    /// True if the group exists and has not been destroyed.
    pub fn contains(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Ids of every group in the arena, in no particular order.
    pub fn ids(&self) -> Vec<GroupId> {
        let mut ids: Vec<_> = self.groups.keys().copied().collect();
        ids.sort();
        ids
    }

    fn group(&self, id: GroupId) -> Result<&Group, StageError> {
        self.groups.get(&id).ok_or(StageError::GroupNotFound(id))
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group, StageError> {
        self.groups.get_mut(&id).ok_or(StageError::GroupNotFound(id))
    }

    // ---------------------------------------------------------------------
    // Sub-groups
    // ---------------------------------------------------------------------

    /// Make `child` a sub-group of `parent`, detaching it from its previous parent.
    ///
    /// When `parent` is attached, `child` and its staged actors are attached too.
    pub fn add_group(&mut self, world: &mut World, parent: GroupId, child: GroupId) -> Result<()> {
        self.group(parent)?;
        self.group(child)?;
        if parent == child || self.ancestors(parent).contains(&child) {
            return Err(StageError::GroupCycle { parent, child }.into());
        }

        match self.group(child)?.parent {
            Some(current) if current == parent => return Ok(()),
            Some(current) => {
                self.remove_group(current, child);
            }
            None => {}
        }

        self.group_mut(parent)?.groups.push(child);
        self.group_mut(child)?.parent = Some(parent);
        log::debug!("{child}: attached under {parent}");

        if self.group(parent)?.attached {
            self.attach(world, child)?;
        }
        Ok(())
    }

    /// Detach `child` from `parent`. Returns false when it was not a sub-group.
    pub fn remove_group(&mut self, parent: GroupId, child: GroupId) -> bool {
        let Some(group) = self.groups.get_mut(&parent) else {
            return false;
        };
        let before = group.groups.len();
        group.groups.retain(|id| *id != child);
        let removed = group.groups.len() != before;
        if let Some(sub) = self.groups.get_mut(&child) {
            if sub.parent == Some(parent) {
                sub.parent = None;
            }
        }
        removed
    }

    fn ancestors(&self, id: GroupId) -> Vec<GroupId> {
        let mut chain = Vec::new();
        let mut current = self.groups.get(&id).and_then(|group| group.parent);
        while let Some(parent) = current {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.groups.get(&parent).and_then(|group| group.parent);
        }
        chain
    }

    // ---------------------------------------------------------------------
    // Members
    // ---------------------------------------------------------------------

    /// Add a registered actor to a group, moving it out of its previous group.
    pub fn add_actor(&mut self, world: &mut World, id: GroupId, actor: ActorId) -> Result<()> {
        let (layer, paused, visible) = {
            let group = self.group(id)?;
            (group.layer_node(), group.paused, group.visible)
        };
        let member = world.find_mut(actor).ok_or(StageError::ActorNotFound(actor))?;
        if member.is_destroyed() {
            return Err(StageError::ActorDestroyed(actor).into());
        }

        let previous = member.group_membership();
        member.set_group(Some(id));
        if let Some(node) = member.node_mut() {
            if let Some(layer) = layer {
                node.set_parent(Some(layer));
            }
            if !visible {
                node.set_visible(false);
            }
        }
        if let Some(previous) = previous.filter(|previous| *previous != id) {
            self.forget_actor(previous, actor);
        }

        let group = self.group_mut(id)?;
        if !group.actors.contains(&actor) {
            group.actors.push(actor);
        }
        log::trace!("{actor}: joined {id}");

        if paused {
            world.set_active(actor, false)?;
        }
        Ok(())
    }

    /// Hold an actor in a group that is not attached to an engine yet.
    pub fn stage_actor(&mut self, id: GroupId, mut actor: Actor) -> Result<ActorId> {
        let group = self.group_mut(id)?;
        if actor.is_destroyed() {
            return Err(StageError::ActorDestroyed(actor.id()).into());
        }
        actor.set_group(Some(id));
        if let Some(node) = actor.node_mut() {
            if let Some(layer) = group.layer_node() {
                node.set_parent(Some(layer));
            }
            if !group.visible {
                node.set_visible(false);
            }
        }
        if group.paused {
            actor.set_active(false)?;
        }
        let actor_id = actor.id();
        group.staged.push(actor);
        Ok(actor_id)
    }

    /// Take a staged actor back out of a group.
    pub fn unstage_actor(&mut self, id: GroupId, actor: ActorId) -> Option<Actor> {
        let group = self.groups.get_mut(&id)?;
        let index = group.staged.iter().position(|staged| staged.id() == actor)?;
        let mut staged = group.staged.remove(index);
        staged.set_group(None);
        Some(staged)
    }

    /// Remove a registered actor from a group. Returns whether it was a member.
    pub fn remove_actor(&mut self, world: &mut World, id: GroupId, actor: ActorId) -> bool {
        if !self.forget_actor(id, actor) {
            return false;
        }
        if let Some(member) = world.find_mut(actor) {
            if member.group_membership() == Some(id) {
                member.set_group(None);
            }
        }
        true
    }

    /// Drop an actor id from a group's member list without touching the actor.
    pub(crate) fn forget_actor(&mut self, id: GroupId, actor: ActorId) -> bool {
        let Some(group) = self.groups.get_mut(&id) else {
            return false;
        };
        let before = group.actors.len();
        group.actors.retain(|member| *member != actor);
        group.actors.len() != before
    }

    // ---------------------------------------------------------------------
    // Cascades
    // ---------------------------------------------------------------------

    /// Deactivate every member and sub-group. Pausing a paused group does nothing.
    pub fn pause(&mut self, world: &mut World, id: GroupId) -> Result<()> {
        self.set_paused(world, id, true)
    }

    /// Reverse [`Groups::pause`]. Unpausing an active group does nothing.
    pub fn unpause(&mut self, world: &mut World, id: GroupId) -> Result<()> {
        self.set_paused(world, id, false)
    }

    fn set_paused(&mut self, world: &mut World, id: GroupId, paused: bool) -> Result<()> {
        let group = self.group_mut(id)?;
        if group.paused == paused {
            return Ok(());
        }
        group.paused = paused;
        for staged in group.staged.iter_mut() {
            staged.set_active(!paused)?;
        }
        let (members, subgroups) = (group.actors.clone(), group.groups.clone());
        log::debug!("{id}: {}", if paused { "paused" } else { "unpaused" });

        for actor in members {
            if world.contains(actor) {
                world.set_active(actor, !paused)?;
            }
        }
        for sub in subgroups {
            self.set_paused(world, sub, paused)?;
        }
        Ok(())
    }

    /// Show or hide the group's node, its members' nodes and every sub-group.
    pub fn set_visible(&mut self, world: &mut World, id: GroupId, visible: bool) -> Result<()> {
        let group = self.group_mut(id)?;
        if group.visible == visible {
            return Ok(());
        }
        group.visible = visible;
        if let Some(node) = group.node.as_mut() {
            node.set_visible(visible);
        }
        for staged in group.staged.iter_mut() {
            if let Some(node) = staged.node_mut() {
                node.set_visible(visible);
            }
        }
        let (members, subgroups) = (group.actors.clone(), group.groups.clone());

        for actor in members {
            if let Some(node) = world.find_mut(actor).and_then(Actor::node_mut) {
                node.set_visible(visible);
            }
        }
        for sub in subgroups {
            self.set_visible(world, sub, visible)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Engine attachment and teardown
    // ---------------------------------------------------------------------

    /// Register the staged actors of `id` and of every sub-group with the world.
    pub fn attach(&mut self, world: &mut World, id: GroupId) -> Result<()> {
        let group = self.group_mut(id)?;
        group.attached = true;
        let staged = std::mem::take(&mut group.staged);
        let subgroups = group.groups.clone();

        let mut first_error = None;
        for actor in staged {
            match world.add(actor) {
                Ok(actor_id) => {
                    let group = self.group_mut(id)?;
                    if !group.actors.contains(&actor_id) {
                        group.actors.push(actor_id);
                    }
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        log::debug!("{id}: attached with {} actors", self.group(id)?.actors.len());

        for sub in subgroups {
            if let Err(err) = self.attach(world, sub) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Destroy sub-groups, then member actors, then detach from the parent.
    ///
    /// Destroying a missing or already destroying group does nothing.
    pub fn destroy(&mut self, world: &mut World, id: GroupId) -> Result<()> {
        let Some(group) = self.groups.get_mut(&id) else {
            return Ok(());
        };
        if group.destroying {
            return Ok(());
        }
        group.destroying = true;
        let subgroups = group.groups.clone();

        let mut first_error = None;
        for sub in subgroups {
            if let Err(err) = self.destroy(world, sub) {
                first_error.get_or_insert(err);
            }
        }

        let Some(group) = self.groups.get_mut(&id) else {
            return first_error.map_or(Ok(()), Err);
        };
        let members = std::mem::take(&mut group.actors);
        for mut staged in std::mem::take(&mut group.staged) {
            if let Err(err) = staged.destroy() {
                first_error.get_or_insert(err);
            }
        }
        for actor in members {
            if !world.contains(actor) {
                continue;
            }
            if let Err(err) = world.destroy(actor) {
                first_error.get_or_insert(err);
            }
        }

        if let Some(parent) = self.groups.get(&id).and_then(|group| group.parent) {
            self.remove_group(parent, id);
        }
        if let Some(mut group) = self.groups.remove(&id) {
            group.groups.clear();
            if let Some(node) = group.node.as_mut() {
                node.destroy(DestroyOptions::CASCADE);
            }
        }
        log::debug!("{id}: destroyed");
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::component::{Component, Context};
    use crate::events::EventBus;
    use crate::node::HeadlessNode;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct Probe(Log);

    impl Component for Probe {
        fn on_activate(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
            self.0.borrow_mut().push("activate");
            Ok(())
        }

        fn on_deactivate(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
            self.0.borrow_mut().push("deactivate");
            Ok(())
        }
    }

    fn world(bus: &EventBus) -> World {
        World::new(bus.sender(), None)
    }

    #[test]
    fn sub_group_has_a_single_parent() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let mut groups = Groups::new();
        let (a, b, c) = (groups.create(), groups.create(), groups.create());

        groups.add_group(&mut world, a, b).unwrap();
        groups.add_group(&mut world, c, b).unwrap();

        assert_eq!(groups.get(b).unwrap().parent(), Some(c));
        assert!(groups.get(a).unwrap().groups().is_empty());
        assert_eq!(groups.get(c).unwrap().groups(), &[b]);

        let err = groups.add_group(&mut world, b, c).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StageError>(),
            Some(&StageError::GroupCycle { parent: b, child: c })
        );
    }

    #[test]
    fn pause_cascades_once() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let mut groups = Groups::new();
        let (outer, inner) = (groups.create(), groups.create());
        groups.add_group(&mut world, outer, inner).unwrap();

        let log: Log = Rc::default();
        let actor = world.add(Actor::new().with(Probe(log.clone()))).unwrap();
        groups.add_actor(&mut world, inner, actor).unwrap();
        log.borrow_mut().clear();

        groups.pause(&mut world, outer).unwrap();
        groups.pause(&mut world, outer).unwrap();
        assert!(!world.find(actor).unwrap().is_active());
        assert!(groups.get(inner).unwrap().is_paused());

        groups.unpause(&mut world, outer).unwrap();
        groups.unpause(&mut world, outer).unwrap();
        assert!(world.find(actor).unwrap().is_active());
        assert_eq!(*log.borrow(), vec!["deactivate", "activate"]);
    }

    #[test]
    fn actor_moves_between_groups() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let mut groups = Groups::new();
        let (first, second) = (groups.create(), groups.create());
        let actor = world.add(Actor::new()).unwrap();

        groups.add_actor(&mut world, first, actor).unwrap();
        groups.add_actor(&mut world, second, actor).unwrap();

        assert!(groups.get(first).unwrap().actors().is_empty());
        assert_eq!(groups.get(second).unwrap().actors(), &[actor]);
        assert_eq!(world.find(actor).unwrap().group(), Some(second));

        assert!(groups.remove_actor(&mut world, second, actor));
        assert_eq!(world.find(actor).unwrap().group(), None);
        assert!(!groups.remove_actor(&mut world, second, actor));
    }

    #[test]
    fn layer_reparents_nodes_and_cascades_visibility() {
        let bus = EventBus::new();
        let mut world = World::new(bus.sender(), Some(NodeId(1)));
        let mut groups = Groups::new();
        let layer = groups.create_layer(HeadlessNode::new(NodeId(50)));
        let plain = groups.create();

        let in_layer = world.add(Actor::with_node(HeadlessNode::new(NodeId(60)))).unwrap();
        let in_plain = world.add(Actor::with_node(HeadlessNode::new(NodeId(61)))).unwrap();
        groups.add_actor(&mut world, layer, in_layer).unwrap();
        groups.add_actor(&mut world, plain, in_plain).unwrap();

        let parent_of = |world: &World, id| world.find(id).unwrap().node().unwrap().parent();
        assert_eq!(parent_of(&world, in_layer), Some(NodeId(50)));
        assert_eq!(parent_of(&world, in_plain), Some(NodeId(1)));

        groups.set_visible(&mut world, layer, false).unwrap();
        assert!(!world.find(in_layer).unwrap().node().unwrap().visible());
        assert!(!groups.get(layer).unwrap().node().unwrap().visible());
        assert!(world.find(in_plain).unwrap().node().unwrap().visible());
    }

    #[test]
    fn staged_actors_join_the_world_on_attach() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let mut groups = Groups::new();
        let (root, child) = (groups.create(), groups.create());
        groups.add_group(&mut world, root, child).unwrap();

        let first = groups.stage_actor(root, Actor::new()).unwrap();
        let second = groups.stage_actor(child, Actor::new()).unwrap();
        assert!(world.is_empty());

        groups.attach(&mut world, root).unwrap();
        assert!(world.contains(first) && world.contains(second));
        assert!(world.find(second).unwrap().is_live());
        assert_eq!(groups.get(child).unwrap().actors(), &[second]);

        let late = groups.create();
        let third = groups.stage_actor(late, Actor::new()).unwrap();
        groups.add_group(&mut world, child, late).unwrap();
        assert!(groups.get(late).unwrap().is_attached());
        assert!(world.contains(third));
    }

    #[test]
    fn destroy_tears_down_recursively_and_tolerates_repeats() {
        let bus = EventBus::new();
        let mut world = world(&bus);
        let mut groups = Groups::new();
        let (parent, doomed, nested) = (groups.create(), groups.create(), groups.create());
        groups.add_group(&mut world, parent, doomed).unwrap();
        groups.add_group(&mut world, doomed, nested).unwrap();
        let a = world.add(Actor::new()).unwrap();
        let b = world.add(Actor::new()).unwrap();
        groups.add_actor(&mut world, doomed, a).unwrap();
        groups.add_actor(&mut world, nested, b).unwrap();

        groups.destroy(&mut world, doomed).unwrap();
        groups.destroy(&mut world, doomed).unwrap();

        assert!(world.find(a).unwrap().is_destroyed());
        assert!(world.find(b).unwrap().is_destroyed());
        assert!(!groups.contains(doomed) && !groups.contains(nested));
        assert!(groups.get(parent).unwrap().groups().is_empty());
    }
}
