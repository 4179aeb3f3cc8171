//! Broad-phase hit detection over an actor's Transform subtree.
//!
//! A [`HitDetection`] component tracks every descendant of its actor that
//! carries a [`Collider`], keeps them bucketed in a private [`Grid`] and
//! publishes an [`Event::Collision`] for each collider that shares cells
//! with matching candidates. Only candidate pairs are produced; exact
//! shape tests are left to the game.

use anyhow::Result;

use crate::actor::ActorId;
use crate::component::{Component, Context};
use crate::error::StageError;
use crate::events::Event;
use crate::grid::{Grid, GridConfig};
use crate::hierarchy::{descendants, world_position, HierarchyChange, Transform};
use crate::math::{Rect, Vec2};
use crate::world::Actors;

/// Marks an actor as a participant in hit detection.
///
/// The actor's `flags` are its collision categories. Its footprint is its
/// Transform size, or its scene node size when the Transform has none.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Collider {
    /// Categories this collider reports hits against; zero means all.
    pub hit_mask: u32,
    /// Static colliders are bucketed once and never moved.
    pub is_static: bool,
}

impl Collider {
    /// A moving collider that reports hits with categories in `hit_mask`.
    pub fn new(hit_mask: u32) -> Self {
        Self {
            hit_mask,
            is_static: false,
        }
    }

    /// A collider that never moves.
    pub fn fixed(hit_mask: u32) -> Self {
        Self {
            hit_mask,
            is_static: true,
        }
    }
}

impl Component for Collider {}

pub struct HitDetection {
    grid: Grid<ActorId>,
    colliders: Vec<ActorId>,
    seeded: bool,
    candidates: Vec<(ActorId, Vec<ActorId>)>,
}

impl HitDetection {
    /// A detector whose grid uses `config`. Fails on an invalid config.
    pub fn new(config: GridConfig) -> Result<Self, StageError> {
        Ok(Self {
            grid: Grid::new(config)?,
            colliders: Vec::new(),
            seeded: false,
            candidates: Vec::new(),
        })
    }

    /// The broad-phase grid, keyed by collider actor.
    pub fn grid(&self) -> &Grid<ActorId> {
        &self.grid
    }

    /// Tracked colliders in the order they were found.
    pub fn colliders(&self) -> &[ActorId] {
        &self.colliders
    }

    /// Every collider with hits on the last update, with its candidates.
    pub fn candidates(&self) -> &[(ActorId, Vec<ActorId>)] {
        &self.candidates
    }

    /// Candidates found for `collider` on the last update.
    pub fn hits_for(&self, collider: ActorId) -> Option<&[ActorId]> {
        self.candidates
            .iter()
            .find(|(id, _)| *id == collider)
            .map(|(_, hits)| hits.as_slice())
    }

    /// Track every collider currently below the owning actor.
    fn seed(&mut self, ctx: &mut Context<'_>) {
        let owner = ctx.actor_id();
        for id in descendants(&*ctx, owner) {
            self.track(ctx, id);
        }
        if let Some(transform) = ctx.get_mut::<Transform>() {
            transform.take_changes();
        }
        self.seeded = true;
        log::debug!("{owner}: hit detection seeded with {} colliders", self.colliders.len());
    }

    fn track(&mut self, ctx: &Context<'_>, id: ActorId) {
        if self.colliders.contains(&id) {
            return;
        }
        let Some((footprint, flags)) = footprint(ctx, id) else {
            return;
        };
        self.grid.add_item(id, footprint, flags);
        self.colliders.push(id);
    }

    fn untrack(&mut self, id: ActorId) {
        if let Some(index) = self.colliders.iter().position(|tracked| *tracked == id) {
            self.colliders.remove(index);
            self.grid.remove_item(id);
        }
    }

    /// Follow structural changes reported by the owner's Transform.
    fn sync_hierarchy(&mut self, ctx: &mut Context<'_>) {
        let changes = ctx
            .get_mut::<Transform>()
            .map(Transform::take_changes)
            .unwrap_or_default();
        for change in changes {
            let child = change.child();
            let mut subtree = vec![child];
            subtree.extend(descendants(&*ctx, child));
            for id in subtree {
                match change {
                    HierarchyChange::Added { .. } => self.track(ctx, id),
                    HierarchyChange::Removed { .. } => self.untrack(id),
                }
            }
        }
    }
}

impl Default for HitDetection {
    fn default() -> Self {
        Self {
            grid: Grid::default(),
            colliders: Vec::new(),
            seeded: false,
            candidates: Vec::new(),
        }
    }
}

/// Bounds and flags of a collider-bearing actor.
fn footprint(ctx: &Context<'_>, id: ActorId) -> Option<(Rect, u32)> {
    let actor = ctx.find(id)?;
    if actor.is_destroyed() || !actor.has::<Collider>() {
        return None;
    }
    let size = actor
        .get::<Transform>()
        .map(|transform| transform.size)
        .filter(|size| *size != Vec2::ZERO)
        .or_else(|| actor.node().map(|node| node.size()))
        .unwrap_or_default();
    Some((Rect::from_center(world_position(ctx, id), size), actor.flags()))
}

impl Component for HitDetection {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        ctx.require::<Transform>()?.watch();
        // Headless actors cannot see their children yet; seed on the first update.
        if ctx.world().is_some() {
            self.seed(ctx);
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut Context<'_>, _delta: f32) -> Result<()> {
        if !self.seeded {
            self.seed(ctx);
        } else {
            self.sync_hierarchy(ctx);
        }

        let mut gone = Vec::new();
        for &id in &self.colliders {
            let collider = ctx.find(id).and_then(|actor| actor.get::<Collider>().copied());
            match collider {
                Some(collider) if collider.is_static => {}
                Some(_) => match footprint(ctx, id) {
                    Some((bounds, flags)) => {
                        self.grid.add_item(id, bounds, flags);
                    }
                    None => gone.push(id),
                },
                None => gone.push(id),
            }
        }
        for id in gone {
            log::trace!("{}: dropping collider {id}", ctx.actor_id());
            self.untrack(id);
        }

        self.candidates.clear();
        let detector = ctx.actor_id();
        for &id in &self.colliders {
            let hit_mask = ctx
                .find(id)
                .and_then(|actor| actor.get::<Collider>())
                .map_or(0, |collider| collider.hit_mask);
            let mut hits = Vec::new();
            if self.grid.get_hits(id, hit_mask, &mut hits) == 0 {
                continue;
            }
            ctx.publish(Event::Collision {
                detector,
                collider: id,
                hits: hits.clone(),
            });
            self.candidates.push((id, hits));
        }
        Ok(())
    }

    fn on_destroy(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        if let Some(transform) = ctx.get_mut::<Transform>() {
            transform.unwatch();
        }
        self.grid.clear();
        self.colliders.clear();
        self.candidates.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, Flags};
    use crate::events::EventBus;
    use crate::hierarchy::{add_child, remove_child};
    use crate::world::World;

    fn collider_at(world: &mut World, x: f32, y: f32, collider: Collider) -> ActorId {
        let actor = Actor::new()
            .at(Vec2::new(x, y))
            .with_flags(Flags::ALL)
            .with(Transform::new(Vec2::splat(10.0)))
            .with(collider);
        world.add(actor).unwrap()
    }

    fn tick(world: &mut World, id: ActorId) {
        world.update_actor(id, 1.0 / 60.0).unwrap();
    }

    fn hits(world: &World, detector: ActorId, collider: ActorId) -> Vec<ActorId> {
        world
            .find(detector)
            .unwrap()
            .get::<HitDetection>()
            .unwrap()
            .hits_for(collider)
            .map(<[ActorId]>::to_vec)
            .unwrap_or_default()
    }

    #[test]
    fn seeds_from_subtree_and_reports_overlaps() {
        let bus = EventBus::new();
        let mut world = World::new(bus.sender(), None);
        let root = world.add(Actor::new().with(Transform::default())).unwrap();
        let a = collider_at(&mut world, 0.0, 0.0, Collider::new(Flags::ALL));
        let b = collider_at(&mut world, 4.0, 4.0, Collider::new(Flags::ALL));
        add_child(&mut world, root, a).unwrap();
        add_child(&mut world, root, b).unwrap();

        world.find_mut(root).unwrap().add(HitDetection::default()).unwrap();
        tick(&mut world, root);

        assert_eq!(hits(&world, root, a), vec![b]);
        assert_eq!(hits(&world, root, b), vec![a]);
        assert!(bus
            .drain()
            .contains(&Event::Collision {
                detector: root,
                collider: a,
                hits: vec![b],
            }));
    }

    #[test]
    fn follows_runtime_attach_detach_and_movement() {
        let bus = EventBus::new();
        let mut world = World::new(bus.sender(), None);
        let root = world
            .add(Actor::new().with(Transform::default()).with(HitDetection::default()))
            .unwrap();
        let a = collider_at(&mut world, 0.0, 0.0, Collider::new(Flags::ALL));
        let b = collider_at(&mut world, 4.0, 4.0, Collider::new(Flags::ALL));
        tick(&mut world, root);

        add_child(&mut world, root, a).unwrap();
        add_child(&mut world, root, b).unwrap();
        tick(&mut world, root);
        assert_eq!(hits(&world, root, a), vec![b]);

        world.find_mut(b).unwrap().set_position(Vec2::new(900.0, 900.0));
        tick(&mut world, root);
        assert!(hits(&world, root, a).is_empty());

        remove_child(&mut world, root, b);
        tick(&mut world, root);
        let detection = world.find(root).unwrap().get::<HitDetection>().unwrap();
        assert_eq!(detection.colliders(), &[a]);
        assert!(!detection.grid().contains(b));
    }

    #[test]
    fn static_colliders_stay_where_they_were_bucketed() {
        let bus = EventBus::new();
        let mut world = World::new(bus.sender(), None);
        let root = world.add(Actor::new().with(Transform::default())).unwrap();
        let wall = collider_at(&mut world, 0.0, 0.0, Collider::fixed(Flags::ALL));
        let mover = collider_at(&mut world, 2.0, 2.0, Collider::new(Flags::ALL));
        add_child(&mut world, root, wall).unwrap();
        add_child(&mut world, root, mover).unwrap();
        world.find_mut(root).unwrap().add(HitDetection::default()).unwrap();
        tick(&mut world, root);

        world.find_mut(wall).unwrap().set_position(Vec2::new(900.0, 900.0));
        tick(&mut world, root);
        assert_eq!(hits(&world, root, mover), vec![wall]);
    }

    #[test]
    fn drops_colliders_whose_actors_are_gone() {
        let bus = EventBus::new();
        let mut world = World::new(bus.sender(), None);
        let root = world.add(Actor::new().with(Transform::default())).unwrap();
        let a = collider_at(&mut world, 0.0, 0.0, Collider::new(Flags::ALL));
        let b = collider_at(&mut world, 1.0, 1.0, Collider::new(Flags::ALL));
        add_child(&mut world, root, a).unwrap();
        add_child(&mut world, root, b).unwrap();
        world.find_mut(root).unwrap().add(HitDetection::default()).unwrap();
        tick(&mut world, root);

        world.remove(b);
        tick(&mut world, root);
        let detection = world.find(root).unwrap().get::<HitDetection>().unwrap();
        assert_eq!(detection.colliders(), &[a]);
        assert!(detection.candidates().is_empty());
    }
}
