//! # Scene Model
//!
//! The minimal scene the pipeline consumes: drawables, effects that wrap
//! subtrees, and render groups that each own one instruction set.
//!
//! ## Architecture
//!
//! ```text
//! Scene
//! ├── renderables: SlotMap<RenderableId, Renderable>
//! └── render groups (in render order)
//!     └── RenderGroup
//!         ├── instruction_set: InstructionSet
//!         ├── children: Vec<SceneNode>
//!         │   ├── Renderable(id)
//!         │   └── Effect { effect, children }
//!         ├── structure_did_change
//!         └── queued updates
//! ```
//!
//! Structural edits (attaching, detaching, visibility) mark the group for a
//! full rebuild. Property edits through [`Scene::renderable_mut`] only queue
//! the drawable; its pipe decides during validation whether the group can be
//! updated in place.
//!
//! World transforms are supplied by the host; this module does no math.

mod renderable;

use slotmap::{new_key_type, SlotMap};

use crate::instructions::InstructionSet;

pub use crate::device::{BlendMode, ColorMask, FilterId};
pub use renderable::{MeshGeometry, QuadGeometry, Renderable, RenderableGeometry};

new_key_type! {
    /// Handle to a drawable in a [`Scene`]
    pub struct RenderableId;

    /// Handle to a render group in a [`Scene`]
    pub struct RenderGroupId;
}

/// A scoped modification applied to a subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Render the subtree through a filter
    Filter(FilterId),
    /// Restrict colour writes while rendering the subtree
    ColorMask(ColorMask),
}

impl Effect {
    /// Name of the pipe that implements the effect
    pub const fn pipe_name(&self) -> &'static str {
        match self {
            Self::Filter(_) => "filter",
            Self::ColorMask(_) => "colorMask",
        }
    }
}

/// Node of a render group's tree
#[derive(Debug, Clone, PartialEq)]
pub enum SceneNode {
    /// A drawable
    Renderable(RenderableId),
    /// An effect wrapping its children
    Effect {
        /// Effect applied to `children`
        effect: Effect,
        /// Wrapped subtree
        children: Vec<SceneNode>,
    },
}

impl SceneNode {
    pub(crate) fn for_each_renderable(&self, f: &mut impl FnMut(RenderableId)) {
        match self {
            Self::Renderable(id) => f(*id),
            Self::Effect { children, .. } => {
                for child in children {
                    child.for_each_renderable(f);
                }
            }
        }
    }

    /// Remove `id` from this subtree; returns false if this node itself is `id`
    fn retain_without(&mut self, id: RenderableId) -> bool {
        match self {
            Self::Renderable(own) => *own != id,
            Self::Effect { children, .. } => {
                children.retain_mut(|child| child.retain_without(id));
                true
            }
        }
    }
}

/// A subtree rendered through one instruction set
#[derive(Debug)]
pub struct RenderGroup {
    pub(crate) instruction_set: InstructionSet,
    pub(crate) children: Vec<SceneNode>,
    pub(crate) structure_did_change: bool,
    pub(crate) to_update: Vec<RenderableId>,
    pub(crate) builds: u64,
}

impl RenderGroup {
    fn new() -> Self {
        Self {
            instruction_set: InstructionSet::new(),
            children: Vec::new(),
            structure_did_change: true,
            to_update: Vec::new(),
            builds: 0,
        }
    }

    /// Instructions produced by the last build
    pub const fn instruction_set(&self) -> &InstructionSet {
        &self.instruction_set
    }

    /// Top-level nodes
    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    /// Whether the next frame must rebuild the instruction set
    pub const fn structure_did_change(&self) -> bool {
        self.structure_did_change
    }

    /// Force a rebuild on the next frame
    pub fn mark_structure_changed(&mut self) {
        self.structure_did_change = true;
    }

    /// Drawables queued for validation
    pub fn pending_updates(&self) -> &[RenderableId] {
        &self.to_update
    }

    /// Number of full builds performed
    pub const fn builds(&self) -> u64 {
        self.builds
    }
}

/// Drawables and render groups
#[derive(Debug, Default)]
pub struct Scene {
    pub(crate) renderables: SlotMap<RenderableId, Renderable>,
    pub(crate) groups: SlotMap<RenderGroupId, RenderGroup>,
    order: Vec<RenderGroupId>,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a render group to the render order
    pub fn create_render_group(&mut self) -> RenderGroupId {
        let id = self.groups.insert(RenderGroup::new());
        self.order.push(id);
        id
    }

    /// Remove a render group; its drawables stay in the scene, detached
    ///
    /// The renderer drops the group's batching state on its next frame.
    pub fn remove_render_group(&mut self, group: RenderGroupId) -> Option<RenderGroup> {
        let removed = self.groups.remove(group)?;
        self.order.retain(|id| *id != group);
        for node in &removed.children {
            node.for_each_renderable(&mut |id| {
                if let Some(renderable) = self.renderables.get_mut(id) {
                    renderable.render_group = None;
                    renderable.did_view_update = false;
                }
            });
        }
        Some(removed)
    }

    /// Render groups in render order
    pub fn render_order(&self) -> &[RenderGroupId] {
        &self.order
    }

    /// Render group by id
    pub fn render_group(&self, group: RenderGroupId) -> Option<&RenderGroup> {
        self.groups.get(group)
    }

    /// Mutable render group by id
    pub fn render_group_mut(&mut self, group: RenderGroupId) -> Option<&mut RenderGroup> {
        self.groups.get_mut(group)
    }

    /// Add a detached drawable
    pub fn create_renderable(&mut self, renderable: Renderable) -> RenderableId {
        self.renderables.insert(Renderable {
            render_group: None,
            did_view_update: false,
            ..renderable
        })
    }

    /// Drawable by id
    pub fn renderable(&self, id: RenderableId) -> Option<&Renderable> {
        self.renderables.get(id)
    }

    /// Mutable drawable by id; queues it for validation
    pub fn renderable_mut(&mut self, id: RenderableId) -> Option<&mut Renderable> {
        let renderable = self.renderables.get_mut(id)?;
        if !renderable.did_view_update {
            if let Some(group) = renderable.render_group.and_then(|g| self.groups.get_mut(g)) {
                group.to_update.push(id);
                renderable.did_view_update = true;
            }
        }
        Some(renderable)
    }

    /// Number of drawables
    pub fn renderable_count(&self) -> usize {
        self.renderables.len()
    }

    /// Append a node to a group's top level
    pub fn add_child(&mut self, group: RenderGroupId, node: SceneNode) -> bool {
        if !self.groups.contains_key(group) {
            return false;
        }
        self.attach(&node, group);
        if let Some(target) = self.groups.get_mut(group) {
            target.children.push(node);
            target.structure_did_change = true;
        }
        true
    }

    /// Replace a group's tree
    pub fn set_children(&mut self, group: RenderGroupId, children: Vec<SceneNode>) -> bool {
        let Some(target) = self.groups.get_mut(group) else {
            return false;
        };
        let previous = std::mem::take(&mut target.children);
        target.to_update.clear();
        target.structure_did_change = true;
        for node in &previous {
            node.for_each_renderable(&mut |id| {
                if let Some(renderable) = self.renderables.get_mut(id) {
                    renderable.render_group = None;
                    renderable.did_view_update = false;
                }
            });
        }
        for node in &children {
            self.attach(node, group);
        }
        if let Some(target) = self.groups.get_mut(group) {
            target.children = children;
        }
        true
    }

    fn attach(&mut self, node: &SceneNode, group: RenderGroupId) {
        let mut ids = Vec::new();
        node.for_each_renderable(&mut |id| ids.push(id));
        for id in ids {
            let previous = self.renderables.get(id).and_then(|r| r.render_group);
            if let Some(previous) = previous.filter(|g| *g != group) {
                self.detach_from(previous, id);
            }
            if let Some(renderable) = self.renderables.get_mut(id) {
                renderable.render_group = Some(group);
                renderable.did_view_update = false;
            }
        }
    }

    fn detach_from(&mut self, group: RenderGroupId, id: RenderableId) {
        if let Some(group) = self.groups.get_mut(group) {
            group.children.retain_mut(|child| child.retain_without(id));
            group.to_update.retain(|queued| *queued != id);
            group.structure_did_change = true;
        }
    }

    /// Show or hide a drawable
    pub fn set_visible(&mut self, id: RenderableId, visible: bool) {
        let Some(renderable) = self.renderables.get_mut(id) else {
            return;
        };
        if renderable.visible == visible {
            return;
        }
        renderable.visible = visible;
        if let Some(group) = renderable.render_group.and_then(|g| self.groups.get_mut(g)) {
            group.structure_did_change = true;
        }
    }

    /// Remove a drawable from the scene and from its group's tree
    ///
    /// Pipe-side data is released by the next renderable GC sweep; use
    /// [`Renderer::destroy_renderable`](crate::Renderer::destroy_renderable)
    /// to release it immediately.
    pub fn remove_renderable(&mut self, id: RenderableId) -> Option<Renderable> {
        let renderable = self.renderables.remove(id)?;
        if let Some(group) = renderable.render_group {
            self.detach_from(group, id);
        }
        Some(renderable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::TextureId;

    fn sprite() -> Renderable {
        Renderable::sprite(TextureId(1), 4.0, 4.0)
    }

    #[test]
    fn test_add_child_attaches_and_marks_structure() {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let id = scene.create_renderable(sprite());

        scene.render_group_mut(group).unwrap().structure_did_change = false;
        assert!(scene.add_child(group, SceneNode::Renderable(id)));
        assert_eq!(scene.renderable(id).unwrap().render_group(), Some(group));
        assert!(scene.render_group(group).unwrap().structure_did_change());
    }

    #[test]
    fn test_renderable_mut_queues_once() {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let id = scene.create_renderable(sprite());
        scene.add_child(group, SceneNode::Renderable(id));

        scene.renderable_mut(id).unwrap().alpha = 0.5;
        scene.renderable_mut(id).unwrap().tint = 0xFF0000;
        assert_eq!(scene.render_group(group).unwrap().pending_updates(), &[id]);
    }

    #[test]
    fn test_detached_renderable_is_not_queued() {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let id = scene.create_renderable(sprite());
        scene.renderable_mut(id).unwrap().alpha = 0.5;
        assert!(scene.render_group(group).unwrap().pending_updates().is_empty());
    }

    #[test]
    fn test_remove_renderable_prunes_nested_nodes() {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let a = scene.create_renderable(sprite());
        let b = scene.create_renderable(sprite());
        scene.add_child(
            group,
            SceneNode::Effect {
                effect: Effect::Filter(FilterId(1)),
                children: vec![SceneNode::Renderable(a), SceneNode::Renderable(b)],
            },
        );

        assert!(scene.remove_renderable(a).is_some());
        let children = scene.render_group(group).unwrap().children();
        assert_eq!(
            children,
            &[SceneNode::Effect {
                effect: Effect::Filter(FilterId(1)),
                children: vec![SceneNode::Renderable(b)],
            }]
        );
        assert!(scene.remove_renderable(a).is_none());
    }

    #[test]
    fn test_moving_between_groups_detaches() {
        let mut scene = Scene::new();
        let first = scene.create_render_group();
        let second = scene.create_render_group();
        let id = scene.create_renderable(sprite());
        scene.add_child(first, SceneNode::Renderable(id));
        scene.add_child(second, SceneNode::Renderable(id));

        assert!(scene.render_group(first).unwrap().children().is_empty());
        assert_eq!(scene.renderable(id).unwrap().render_group(), Some(second));
        assert_eq!(scene.render_order(), &[first, second]);
    }

    #[test]
    fn test_visibility_change_is_structural() {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let id = scene.create_renderable(sprite());
        scene.add_child(group, SceneNode::Renderable(id));
        scene.render_group_mut(group).unwrap().structure_did_change = false;

        scene.set_visible(id, true);
        assert!(!scene.render_group(group).unwrap().structure_did_change());
        scene.set_visible(id, false);
        assert!(scene.render_group(group).unwrap().structure_did_change());
    }

    #[test]
    fn test_remove_render_group_detaches() {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let id = scene.create_renderable(sprite());
        scene.add_child(group, SceneNode::Renderable(id));

        assert!(scene.remove_render_group(group).is_some());
        assert!(scene.renderable(id).unwrap().render_group().is_none());
        assert!(scene.render_order().is_empty());
    }
}
