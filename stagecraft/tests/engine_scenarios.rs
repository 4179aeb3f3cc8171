use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use stagecraft::hierarchy::add_child;
use stagecraft::{
    Actor, ActorId, Actors, Collider, Component, Context, Engine, Event, Flags, Fsm, HitDetection, State, StateKey,
    Transform, Transition, Vec2,
};

const FRAME: Duration = Duration::from_micros(16_667);

type Counter = Rc<RefCell<u32>>;

/// Moves its actor on init and counts its updates.
struct Mover {
    updates: Counter,
}

impl Component for Mover {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let y = ctx.position().y;
        ctx.set_position(Vec2::new(5.0, y));
        Ok(())
    }

    fn update(&mut self, _ctx: &mut Context<'_>, _delta: f32) -> Result<()> {
        *self.updates.borrow_mut() += 1;
        Ok(())
    }
}

/// Copies another actor's position every tick.
struct Follow {
    target: ActorId,
}

impl Component for Follow {
    fn update(&mut self, ctx: &mut Context<'_>, _delta: f32) -> Result<()> {
        if let Some(position) = ctx.find(self.target).map(Actor::position) {
            ctx.set_position(position);
        }
        Ok(())
    }
}

/// Destroys its own actor on the first update.
struct Fuse;

impl Component for Fuse {
    fn update(&mut self, ctx: &mut Context<'_>, _delta: f32) -> Result<()> {
        ctx.destroy_actor()
    }
}

#[test]
fn component_added_to_live_actor_initializes_then_ticks_once() {
    let mut engine = Engine::new();
    let player = engine.add(Actor::new().at(Vec2::ZERO)).unwrap();

    let updates = Counter::default();
    engine
        .add_component(
            player,
            Mover {
                updates: updates.clone(),
            },
        )
        .unwrap();
    engine.update(FRAME).unwrap();

    assert_eq!(engine.actor(player).unwrap().x(), 5.0);
    assert_eq!(*updates.borrow(), 1);
}

#[test]
fn components_reach_other_actors_through_the_context() {
    let mut engine = Engine::new();
    let leader = engine.add(Actor::new().at(Vec2::new(3.0, 4.0))).unwrap();
    let follower = engine.add(Actor::new().with(Follow { target: leader })).unwrap();

    engine.update(FRAME).unwrap();
    assert_eq!(engine.actor(follower).unwrap().position(), Vec2::new(3.0, 4.0));
}

#[test]
fn self_destroying_actor_is_purged_on_the_following_tick() {
    let mut engine = Engine::new();
    let doomed = engine.add(Actor::new().with(Fuse)).unwrap();
    let survivor = engine.add(Actor::new()).unwrap();

    engine.update(FRAME).unwrap();
    assert!(engine.actor(doomed).unwrap().is_destroyed());

    engine.update(FRAME).unwrap();
    assert!(!engine.contains(doomed));
    assert!(engine.contains(survivor));
    assert!(engine
        .drain_events()
        .contains(&Event::ActorDestroyed { actor: doomed }));
}

#[test]
fn paused_group_stops_ticking_its_members() {
    let mut engine = Engine::new();
    let group = engine.create_group();
    engine.attach_group(group).unwrap();

    let updates = Counter::default();
    let id = engine
        .add_to_group(
            group,
            Actor::new().with(Mover {
                updates: updates.clone(),
            }),
        )
        .unwrap();

    engine.update(FRAME).unwrap();
    engine.pause_group(group).unwrap();
    engine.update(FRAME).unwrap();
    assert_eq!(*updates.borrow(), 1);
    assert!(!engine.actor(id).unwrap().is_active());

    engine.unpause_group(group).unwrap();
    engine.update(FRAME).unwrap();
    assert_eq!(*updates.borrow(), 2);
}

#[test]
fn hit_detection_reports_overlapping_children() {
    let mut engine = Engine::new();
    let arena = engine
        .add(Actor::new().with(Transform::default()).with(HitDetection::default()))
        .unwrap();

    let spawn = |engine: &mut Engine, x: f32| {
        engine
            .add(
                Actor::new()
                    .at(Vec2::new(x, 0.0))
                    .with_flags(Flags::ALL)
                    .with(Transform::new(Vec2::splat(10.0)))
                    .with(Collider::new(Flags::ALL)),
            )
            .unwrap()
    };
    let a = spawn(&mut engine, 0.0);
    let b = spawn(&mut engine, 6.0);
    let far = spawn(&mut engine, 1500.0);
    for child in [a, b, far] {
        add_child(engine.world_mut(), arena, child).unwrap();
    }
    engine.drain_events();

    engine.update(FRAME).unwrap();
    let collisions: Vec<_> = engine
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            Event::Collision { collider, hits, .. } => Some((collider, hits)),
            _ => None,
        })
        .collect();
    assert!(collisions.contains(&(a, vec![b])));
    assert!(collisions.contains(&(b, vec![a])));
    assert!(!collisions.iter().any(|(collider, _)| *collider == far));
}

#[test]
fn fsm_driven_through_the_engine_publishes_state_events() {
    #[derive(Default)]
    struct Shield;
    impl Component for Shield {}

    let mut engine = Engine::new();
    let fsm = Fsm::new("patrol")
        .with_state(State::new("patrol").edge("alert", "guard"))
        .with_state(
            State::new("guard")
                .on_enter(Transition::new().add(Shield::default))
                .on_exit(Transition::new().remove::<Shield>())
                .edge("calm", "patrol"),
        );
    let guard = engine.add(Actor::new().with(fsm)).unwrap();

    let fired = engine
        .with_component::<Fsm, _, _>(guard, |fsm, ctx| fsm.trigger(ctx, "alert"))
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(fired);
    assert!(engine.actor(guard).unwrap().has::<Shield>());

    engine
        .with_component::<Fsm, _, _>(guard, |fsm, ctx| fsm.trigger(ctx, "calm"))
        .unwrap()
        .unwrap()
        .unwrap();
    engine.update(FRAME).unwrap();
    assert!(!engine.actor(guard).unwrap().has::<Shield>());

    let states: Vec<_> = engine
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            Event::StateExited { state, .. } => Some(format!("exit {state}")),
            Event::StateEntered { state, .. } => Some(format!("enter {state}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec!["enter patrol", "exit patrol", "enter guard", "exit guard", "enter patrol"]
    );
    let current = engine
        .actor(guard)
        .unwrap()
        .get::<Fsm>()
        .unwrap()
        .current()
        .cloned();
    assert_eq!(current, Some(StateKey::from("patrol")));
}

/// Fails during attachment.
struct Broken;

impl Component for Broken {
    fn init(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        anyhow::bail!("missing sprite sheet")
    }
}

#[test]
fn failed_add_is_not_ticked_or_grouped() {
    let mut engine = Engine::new();
    let group = engine.create_group();
    engine.attach_group(group).unwrap();

    let updates = Counter::default();
    let broken = Actor::new().with(Broken).with(Mover {
        updates: updates.clone(),
    });
    let id = broken.id();
    assert!(engine.add_to_group(group, broken).is_err());

    engine.update(FRAME).unwrap();
    assert!(!engine.contains(id));
    assert_eq!(engine.actor_count(), 0);
    assert_eq!(*updates.borrow(), 0);
    assert!(engine.groups().get(group).unwrap().actors().is_empty());
}
