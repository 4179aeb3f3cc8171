//! Error types for structural invariant violations.
//!
//! Hooks and callbacks return `anyhow::Result` so game code can fail with
//! any error; the framework's own violations are `StageError` values.

use thiserror::Error;

use crate::actor::ActorId;
use crate::group::GroupId;
use crate::state::StateKey;

/// Errors raised by the framework when a structural invariant would break.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// A state switch was requested while another one is still running.
    #[error("state transition already in progress")]
    TransitionInProgress,

    /// The component has not been attached to an actor yet.
    #[error("component is not attached to an actor")]
    NotAttached,

    /// A transform was asked to parent itself.
    #[error("actor {0} cannot be its own parent")]
    SelfParent(ActorId),

    /// Parenting would create a loop in the transform hierarchy.
    #[error("parenting {child} under {parent} would create a cycle")]
    HierarchyCycle { parent: ActorId, child: ActorId },

    /// Nesting would create a loop in the group hierarchy.
    #[error("nesting group {child} under {parent} would create a cycle")]
    GroupCycle { parent: GroupId, child: GroupId },

    /// The actor has been destroyed and cannot be mutated or re-added.
    #[error("actor {0} is destroyed")]
    ActorDestroyed(ActorId),

    /// No live actor with that id.
    #[error("actor {0} not found")]
    ActorNotFound(ActorId),

    /// The actor is currently running its own update and is checked out of the world.
    #[error("actor {0} is busy updating")]
    ActorBusy(ActorId),

    /// No group with that id.
    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    /// A trigger or switch named a state the machine does not have.
    #[error("unknown state {0}")]
    UnknownState(StateKey),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = StageError> = std::result::Result<T, E>;
