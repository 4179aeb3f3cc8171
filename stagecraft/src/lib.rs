//! Stagecraft - an actor/component game-object framework for 2D games.
//!
//! Actors own ordered, prioritized components and optionally wrap a scene
//! node from an external renderer. The engine ticks updaters and actors
//! once per frame. Groups cascade pause and visibility; Transforms form an
//! independent logical hierarchy used by hit detection. A finite-state
//! machine component applies declarative component transitions.

pub mod actor;
pub mod component;
pub mod engine;
pub mod error;
pub mod events;
pub mod grid;
pub mod group;
pub mod hierarchy;
pub mod hit_detection;
pub mod math;
pub mod node;
pub mod state;
pub mod world;

pub use crate::actor::{Actor, ActorId, Flags};
pub use crate::component::{AsAny, Component, ComponentId, ComponentState, Context};
pub use crate::engine::{Engine, EngineConfig, Updater, UpdaterId};
pub use crate::error::{Result, StageError};
pub use crate::events::{Event, EventBus, EventSender};
pub use crate::grid::{CellSpan, Grid, GridCell, GridConfig};
pub use crate::group::{Group, GroupId, Groups};
pub use crate::hierarchy::{HierarchyChange, Transform};
pub use crate::hit_detection::{Collider, HitDetection};
pub use crate::math::{Rect, Vec2};
pub use crate::node::{DestroyOptions, HeadlessNode, NodeId, SceneNode};
pub use crate::state::{ComponentSelector, Fsm, State, StateKey, Transition};
pub use crate::world::{Actors, World};
