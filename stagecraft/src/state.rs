//! Finite-state-machine component driving declarative component changes.
//!
//! An [`Fsm`] holds keyed [`State`]s. Each state has an enter and an exit
//! [`Transition`] describing components to add, enable, remove and disable
//! on the owning actor, plus trigger edges to other states. Edges are looked
//! up on the current state only.
//!
//! ```
//! use stagecraft::{Actor, Component, Fsm, State, Transition};
//!
//! #[derive(Default)]
//! struct Walking;
//! impl Component for Walking {}
//!
//! let fsm = Fsm::new("idle")
//!     .with_state(State::new("idle").edge("walk", "walking"))
//!     .with_state(
//!         State::new("walking")
//!             .on_enter(Transition::new().add(|| Walking))
//!             .on_exit(Transition::new().remove::<Walking>()),
//!     );
//!
//! let mut actor = Actor::new().with(fsm);
//! actor.start().unwrap();
//! let moved = actor
//!     .with_component::<Fsm, _, _>(|fsm, ctx| fsm.trigger(ctx, "walk"))
//!     .unwrap()
//!     .unwrap();
//! assert!(moved);
//! assert!(actor.has::<Walking>());
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use anyhow::Result;

use crate::component::{Component, ComponentId, Context};
use crate::error::StageError;
use crate::events::Event;

/// Opaque, comparable state identifier built from a name or a number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Name(String),
    Index(i64),
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Name(name) => f.write_str(name),
            StateKey::Index(index) => write!(f, "#{index}"),
        }
    }
}

impl From<&str> for StateKey {
    fn from(name: &str) -> Self {
        StateKey::Name(name.to_owned())
    }
}

impl From<String> for StateKey {
    fn from(name: String) -> Self {
        StateKey::Name(name)
    }
}

impl From<i64> for StateKey {
    fn from(index: i64) -> Self {
        StateKey::Index(index)
    }
}

impl From<i32> for StateKey {
    fn from(index: i32) -> Self {
        StateKey::Index(index.into())
    }
}

impl From<u32> for StateKey {
    fn from(index: u32) -> Self {
        StateKey::Index(index.into())
    }
}

/// Picks a component on the owning actor, by concrete type or by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentSelector {
    Type { id: TypeId, name: &'static str },
    Id(ComponentId),
}

impl ComponentSelector {
    pub fn of<T: Component>() -> Self {
        ComponentSelector::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    fn resolve(&self, ctx: &Context<'_>) -> Option<ComponentId> {
        match *self {
            ComponentSelector::Type { id, .. } => ctx.actor().id_of_type(id),
            ComponentSelector::Id(id) => ctx.actor().component(id).map(|_| id),
        }
    }
}

impl From<ComponentId> for ComponentSelector {
    fn from(id: ComponentId) -> Self {
        ComponentSelector::Id(id)
    }
}

type Factory = Box<dyn FnMut() -> Box<dyn Component>>;
type Callback = Box<dyn FnMut(&mut Fsm, &mut Context<'_>) -> Result<()>>;

/// A batch of component changes applied on state entry or exit.
///
/// Applied in a fixed order: add, enable, remove, disable, then callbacks.
/// A component named in more than one step goes through every step in that
/// order, so one listed under both remove and disable is already gone when
/// disable runs.
#[derive(Default)]
pub struct Transition {
    add: Vec<Factory>,
    enable: Vec<ComponentSelector>,
    remove: Vec<ComponentSelector>,
    disable: Vec<ComponentSelector>,
    callbacks: Vec<Callback>,
}

impl Transition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component built by `make` each time the transition runs.
    #[must_use]
    pub fn add<C, F>(mut self, mut make: F) -> Self
    where
        C: Component,
        F: FnMut() -> C + 'static,
    {
        self.add.push(Box::new(move || Box::new(make()) as Box<dyn Component>));
        self
    }

    #[must_use]
    pub fn add_boxed(mut self, make: impl FnMut() -> Box<dyn Component> + 'static) -> Self {
        self.add.push(Box::new(make));
        self
    }

    #[must_use]
    pub fn enable<T: Component>(self) -> Self {
        self.enable_selected(ComponentSelector::of::<T>())
    }

    #[must_use]
    pub fn enable_selected(mut self, selector: impl Into<ComponentSelector>) -> Self {
        self.enable.push(selector.into());
        self
    }

    #[must_use]
    pub fn remove<T: Component>(self) -> Self {
        self.remove_selected(ComponentSelector::of::<T>())
    }

    #[must_use]
    pub fn remove_selected(mut self, selector: impl Into<ComponentSelector>) -> Self {
        self.remove.push(selector.into());
        self
    }

    #[must_use]
    pub fn disable<T: Component>(self) -> Self {
        self.disable_selected(ComponentSelector::of::<T>())
    }

    #[must_use]
    pub fn disable_selected(mut self, selector: impl Into<ComponentSelector>) -> Self {
        self.disable.push(selector.into());
        self
    }

    /// Run `callback` after the component changes.
    #[must_use]
    pub fn then(mut self, callback: impl FnMut(&mut Fsm, &mut Context<'_>) -> Result<()> + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.enable.is_empty()
            && self.remove.is_empty()
            && self.disable.is_empty()
            && self.callbacks.is_empty()
    }

    /// Apply the changes to the actor behind `ctx`. Unresolved selectors are skipped.
    pub fn apply(&mut self, fsm: &mut Fsm, ctx: &mut Context<'_>) -> Result<()> {
        for make in &mut self.add {
            ctx.add_boxed(make())?;
        }
        for selector in &self.enable {
            if let Some(id) = selector.resolve(ctx) {
                ctx.set_enabled(id, true)?;
            }
        }
        for selector in &self.remove {
            if let Some(id) = selector.resolve(ctx) {
                ctx.remove_component(id, true)?;
            }
        }
        for selector in &self.disable {
            if let Some(id) = selector.resolve(ctx) {
                ctx.set_enabled(id, false)?;
            }
        }
        for callback in &mut self.callbacks {
            callback(fsm, ctx)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("add", &self.add.len())
            .field("enable", &self.enable)
            .field("remove", &self.remove)
            .field("disable", &self.disable)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// One state of an [`Fsm`].
#[derive(Debug)]
pub struct State {
    key: StateKey,
    enter: Transition,
    exit: Transition,
    edges: HashMap<String, StateKey>,
}

impl State {
    pub fn new(key: impl Into<StateKey>) -> Self {
        Self {
            key: key.into(),
            enter: Transition::default(),
            exit: Transition::default(),
            edges: HashMap::new(),
        }
    }

    #[must_use]
    pub fn on_enter(mut self, transition: Transition) -> Self {
        self.enter = transition;
        self
    }

    #[must_use]
    pub fn on_exit(mut self, transition: Transition) -> Self {
        self.exit = transition;
        self
    }

    /// Follow `trigger` to `target` while this state is current.
    #[must_use]
    pub fn edge(mut self, trigger: impl Into<String>, target: impl Into<StateKey>) -> Self {
        self.edges.insert(trigger.into(), target.into());
        self
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn target(&self, trigger: &str) -> Option<&StateKey> {
        self.edges.get(trigger)
    }
}

/// Which transition of a state to run.
#[derive(Clone, Copy)]
enum Phase {
    Enter,
    Exit,
}

/// State machine component. Enters its start state when attached.
#[derive(Debug)]
pub struct Fsm {
    states: HashMap<StateKey, State>,
    start: StateKey,
    current: Option<StateKey>,
    changing: bool,
    attached: bool,
}

impl Fsm {
    pub fn new(start: impl Into<StateKey>) -> Self {
        Self {
            states: HashMap::new(),
            start: start.into(),
            current: None,
            changing: false,
            attached: false,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.add_state(state);
        self
    }

    /// Register a state, replacing any with the same key.
    pub fn add_state(&mut self, state: State) {
        self.states.insert(state.key.clone(), state);
    }

    pub fn state(&self, key: &StateKey) -> Option<&State> {
        self.states.get(key)
    }

    pub fn start(&self) -> &StateKey {
        &self.start
    }

    pub fn current(&self) -> Option<&StateKey> {
        self.current.as_ref()
    }

    pub fn is_in(&self, key: impl Into<StateKey>) -> bool {
        self.current.as_ref() == Some(&key.into())
    }

    /// True while a switch is running.
    pub fn is_changing(&self) -> bool {
        self.changing
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Follow the current state's edge for `trigger`. Returns false when it has none.
    pub fn trigger(&mut self, ctx: &mut Context<'_>, trigger: &str) -> Result<bool> {
        let target = self
            .current
            .as_ref()
            .and_then(|current| self.states.get(current))
            .and_then(|state| state.target(trigger))
            .cloned();
        match target {
            Some(target) => {
                self.switch_state(ctx, target)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Exit the current state and enter `key`.
    ///
    /// Fails when another switch is running, before the machine is
    /// attached, and for unknown keys.
    pub fn switch_state(&mut self, ctx: &mut Context<'_>, key: impl Into<StateKey>) -> Result<()> {
        let key = key.into();
        if self.changing {
            return Err(StageError::TransitionInProgress.into());
        }
        if !self.attached {
            return Err(StageError::NotAttached.into());
        }
        if !self.states.contains_key(&key) {
            return Err(StageError::UnknownState(key).into());
        }

        self.changing = true;
        let result = self.run_switch(ctx, key);
        self.changing = false;
        result
    }

    fn run_switch(&mut self, ctx: &mut Context<'_>, key: StateKey) -> Result<()> {
        let actor = ctx.actor_id();
        if let Some(previous) = self.current.clone() {
            self.run_transition(ctx, &previous, Phase::Exit)?;
            ctx.publish(Event::StateExited {
                actor,
                state: previous.clone(),
            });
            log::trace!("{actor}: left state {previous}");
        }

        self.current = Some(key.clone());
        self.run_transition(ctx, &key, Phase::Enter)?;
        ctx.publish(Event::StateEntered {
            actor,
            state: key.clone(),
        });
        log::trace!("{actor}: entered state {key}");
        Ok(())
    }

    /// The transition is moved out of its state while it runs so callbacks can borrow the machine.
    fn run_transition(&mut self, ctx: &mut Context<'_>, key: &StateKey, phase: Phase) -> Result<()> {
        let Some(state) = self.states.get_mut(key) else {
            return Ok(());
        };
        let slot = match phase {
            Phase::Enter => &mut state.enter,
            Phase::Exit => &mut state.exit,
        };
        let mut transition = std::mem::take(slot);
        let result = transition.apply(self, ctx);

        if let Some(state) = self.states.get_mut(key) {
            let slot = match phase {
                Phase::Enter => &mut state.enter,
                Phase::Exit => &mut state.exit,
            };
            *slot = transition;
        }
        result
    }
}

impl Component for Fsm {
    fn init(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        self.attached = true;
        let start = self.start.clone();
        self.switch_state(ctx, start)
    }

    fn on_destroy(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        self.attached = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::actor::Actor;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Noted {
        name: &'static str,
        log: Log,
    }

    impl Component for Noted {
        fn init(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("init {}", self.name));
            Ok(())
        }

        fn on_disable(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("disable {}", self.name));
            Ok(())
        }

        fn on_destroy(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
            self.log.borrow_mut().push(format!("destroy {}", self.name));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Y;
    impl Component for Y {}

    fn note(log: &Log, entry: &'static str) -> impl FnMut(&mut Fsm, &mut Context<'_>) -> Result<()> + 'static {
        let log = log.clone();
        move |_, _| {
            log.borrow_mut().push(entry.to_owned());
            Ok(())
        }
    }

    fn trigger(actor: &mut Actor, name: &str) -> Result<bool> {
        actor
            .with_component::<Fsm, _, _>(|fsm, ctx| fsm.trigger(ctx, name))
            .expect("fsm attached")
    }

    #[test]
    fn exit_runs_before_enter() {
        let log: Log = Rc::default();
        let x_log = log.clone();
        let fsm = Fsm::new("s1")
            .with_state(
                State::new("s1")
                    .edge("go", "s2")
                    .on_enter(Transition::new().add(Y::default))
                    .on_exit(Transition::new().remove::<Y>().then(note(&log, "exit s1"))),
            )
            .with_state(
                State::new("s2").on_enter(
                    Transition::new()
                        .add(move || Noted {
                            name: "x",
                            log: x_log.clone(),
                        })
                        .then(note(&log, "enter s2")),
                ),
            );

        let mut actor = Actor::new().with(fsm);
        actor.start().unwrap();
        assert!(actor.has::<Y>());

        assert!(trigger(&mut actor, "go").unwrap());
        assert!(!actor.has::<Y>());
        assert!(actor.has::<Noted>());
        assert_eq!(*log.borrow(), vec!["exit s1", "init x", "enter s2"]);
        assert!(actor.get::<Fsm>().unwrap().is_in("s2"));
        assert!(!trigger(&mut actor, "go").unwrap());
    }

    #[test]
    fn reentrant_switch_fails_without_corrupting_current() {
        let attempts: Rc<RefCell<Vec<bool>>> = Rc::default();
        let seen = attempts.clone();
        let fsm = Fsm::new(1)
            .with_state(State::new(1).edge("next", 2))
            .with_state(State::new(2).on_enter(Transition::new().then(move |fsm, ctx| {
                let err = fsm.switch_state(ctx, 1).unwrap_err();
                let in_progress = err.downcast_ref::<StageError>() == Some(&StageError::TransitionInProgress);
                seen.borrow_mut().push(in_progress);
                Ok(())
            })));

        let mut actor = Actor::new().with(fsm);
        actor.start().unwrap();
        assert!(trigger(&mut actor, "next").unwrap());

        assert_eq!(*attempts.borrow(), vec![true]);
        let fsm = actor.get::<Fsm>().unwrap();
        assert_eq!(fsm.current(), Some(&StateKey::Index(2)));
        assert!(!fsm.is_changing());
    }

    #[test]
    fn failing_transition_clears_the_changing_flag() {
        let fsm = Fsm::new("a")
            .with_state(State::new("a").edge("boom", "b"))
            .with_state(State::new("b").on_enter(Transition::new().then(|_, _| anyhow::bail!("broken"))))
            .with_state(State::new("c"));

        let mut actor = Actor::new().with(fsm);
        actor.start().unwrap();
        assert!(trigger(&mut actor, "boom").is_err());

        let fsm = actor.get::<Fsm>().unwrap();
        assert!(!fsm.is_changing());
        assert!(fsm.is_in("b"));
        assert!(actor
            .with_component::<Fsm, _, _>(|fsm, ctx| fsm.switch_state(ctx, "c"))
            .unwrap()
            .is_ok());
    }

    #[test]
    fn switch_requires_attachment_and_known_states() {
        let mut fsm = Fsm::new("idle").with_state(State::new("idle"));
        let mut actor = Actor::new();
        let mut ctx = Context::new(&mut actor, None, ComponentId(0));
        let err = fsm.switch_state(&mut ctx, "idle").unwrap_err();
        assert_eq!(err.downcast_ref::<StageError>(), Some(&StageError::NotAttached));

        let mut actor = Actor::new().with(Fsm::new("idle").with_state(State::new("idle")));
        actor.start().unwrap();
        let err = actor
            .with_component::<Fsm, _, _>(|fsm, ctx| fsm.switch_state(ctx, "missing"))
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StageError>(),
            Some(&StageError::UnknownState("missing".into()))
        );
    }

    #[test]
    fn enable_and_disable_by_type_or_id() {
        let log: Log = Rc::default();
        let mut actor = Actor::new();
        let noted = actor
            .add(Noted {
                name: "n",
                log: log.clone(),
            })
            .unwrap();
        actor
            .add(
                Fsm::new("on")
                    .with_state(State::new("on").edge("off", "off"))
                    .with_state(State::new("off").on_enter(Transition::new().disable_selected(noted))),
            )
            .unwrap();
        actor.start().unwrap();

        trigger(&mut actor, "off").unwrap();
        assert!(!actor.is_enabled(noted));
        assert_eq!(*log.borrow(), vec!["init n", "disable n"]);
    }
}
