//! Scene-graph capability consumed by actors and groups.
//!
//! Rendering lives outside this crate. Anything that can be positioned,
//! rotated, shown or hidden, parented under another node and destroyed can
//! back an actor by implementing [`SceneNode`]. [`HeadlessNode`] is a plain
//! in-memory implementation for tests and servers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Identifier of a node in the external scene graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// What else to tear down when a node is destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    pub children: bool,
    pub textures: bool,
}

impl DestroyOptions {
    /// Options used when the engine purges a destroyed actor.
    pub const CASCADE: Self = Self {
        children: true,
        textures: false,
    };
}

/// A display node the framework can drive.
pub trait SceneNode {
    fn id(&self) -> NodeId;

    fn position(&self) -> Vec2;
    fn set_position(&mut self, position: Vec2);

    fn rotation(&self) -> f32;
    fn set_rotation(&mut self, rotation: f32);

    fn visible(&self) -> bool;
    fn set_visible(&mut self, visible: bool);

    /// Bounds of the node's content.
    fn size(&self) -> Vec2;

    fn parent(&self) -> Option<NodeId>;
    fn set_parent(&mut self, parent: Option<NodeId>);

    fn destroy(&mut self, options: DestroyOptions);
}

/// Scene node with no renderer behind it.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessNode {
    id: NodeId,
    position: Vec2,
    rotation: f32,
    visible: bool,
    size: Vec2,
    parent: Option<NodeId>,
    destroyed: Option<DestroyOptions>,
}

impl HeadlessNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            position: Vec2::ZERO,
            rotation: 0.0,
            visible: true,
            size: Vec2::ZERO,
            parent: None,
            destroyed: None,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: Vec2) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Options the node was destroyed with, if it has been destroyed.
    pub fn destroyed(&self) -> Option<DestroyOptions> {
        self.destroyed
    }
}

impl SceneNode for HeadlessNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn position(&self) -> Vec2 {
        self.position
    }

    fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    fn rotation(&self) -> f32 {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation;
    }

    fn visible(&self) -> bool {
        self.visible
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn size(&self) -> Vec2 {
        self.size
    }

    fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    fn destroy(&mut self, options: DestroyOptions) {
        self.parent = None;
        self.visible = false;
        self.destroyed = Some(options);
    }
}
