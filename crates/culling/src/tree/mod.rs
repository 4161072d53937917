//! Sparse octree over loaded render sections
//!
//! Cells live in a slab arena indexed by [`NodeId`]; children are owned by
//! their parent slot and carry a non-owning parent back-index. The tree is
//! non-uniform: a child may sit several levels below its parent, skipping
//! the intermediate cells until an insert forces a branch between them.

mod adjacency;
mod visibility;

use glam::IVec3;
use serde::{Deserialize, Serialize};

use crate::coord::{cell_contains, mask_origin, octant_index, root_level_for};
use crate::error::{Error, Result};
use crate::section::Section;

/// Largest supported world radius in cells; keeps origin and size
/// arithmetic inside i32
pub const MAX_RADIUS: i32 = 1 << 28;

/// 22 bits of cell coordinates cover a +/- 30 million block world at 16
/// blocks per cell
const DEFAULT_RADIUS: i32 = 30_000_000 >> 4;

/// Configuration for a [`SectionTree`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TreeConfig {
    /// World radius in cells; inserted coordinates must stay inside the
    /// cube of this half-extent around the origin
    pub radius: i32,
    /// Lowest cell layer used when seeding a frontier pass whose viewpoint
    /// is outside any loaded cell
    pub vertical_min: i32,
    /// Highest such cell layer
    pub vertical_max: i32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            vertical_min: -DEFAULT_RADIUS,
            vertical_max: DEFAULT_RADIUS,
        }
    }
}

/// Handle to a cell in the tree's arena.
///
/// Ids stay valid until the cell is removed; a stale id must not be used
/// again afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) struct LeafData<P> {
    pub(crate) payload: P,
    pub(crate) skippable: bool,
    /// Directions already consumed on the search path that reached this
    /// cell this frame
    pub(crate) cull_state: u8,
}

#[derive(Default)]
pub(crate) struct InnerData {
    pub(crate) children: [Option<NodeId>; 8],
    pub(crate) child_count: u8,
    /// Lowest populated child slot
    pub(crate) first_child: u8,
    /// Immediate children whose own skippable state is true
    pub(crate) skippable_children: u8,
    /// Newest frame at which any descendant was confirmed visible
    pub(crate) upper_visible: Option<u64>,
}

pub(crate) enum NodeKind<P> {
    Leaf(LeafData<P>),
    Inner(InnerData),
}

pub(crate) struct Node<P> {
    /// Masked minimum corner in internal (offset-applied) coordinates
    pub(crate) origin: IVec3,
    /// Ignored low coordinate bits; 0 for leaves
    pub(crate) level: u32,
    pub(crate) parent: Option<NodeId>,
    /// Oldest frame at which the whole subtree was confirmed visible
    pub(crate) lower_visible: Option<u64>,
    pub(crate) kind: NodeKind<P>,
}

impl<P> Node<P> {
    #[inline]
    pub(crate) fn size(&self) -> i32 {
        1 << self.level
    }

    #[inline]
    pub(crate) fn contains(&self, pos: IVec3) -> bool {
        cell_contains(self.origin, self.level, pos)
    }

    #[inline]
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub(crate) fn as_inner(&self) -> Option<&InnerData> {
        match &self.kind {
            NodeKind::Inner(inner) => Some(inner),
            NodeKind::Leaf(_) => None,
        }
    }

    pub(crate) fn as_inner_mut(&mut self) -> Option<&mut InnerData> {
        match &mut self.kind {
            NodeKind::Inner(inner) => Some(inner),
            NodeKind::Leaf(_) => None,
        }
    }

    /// A leaf is skippable when its section is empty; an inner cell is
    /// skippable when every present child is
    pub(crate) fn is_skippable(&self) -> bool {
        match &self.kind {
            NodeKind::Leaf(leaf) => leaf.skippable,
            NodeKind::Inner(inner) => inner.skippable_children == inner.child_count,
        }
    }
}

/// Sparse octree spatial index over render sections.
///
/// One exclusive mutator owns the tree; the per-frame frontier pass borrows
/// it mutably, which rules out interleaved unloads at compile time.
pub struct SectionTree<P> {
    nodes: Vec<Option<Node<P>>>,
    free: Vec<u32>,
    root: NodeId,
    /// Additive re-centering offset applied to section coordinates before
    /// masking, so the arithmetic never sees a sign bit
    offset: i32,
    config: TreeConfig,
    section_count: usize,
}

impl<P: Section> SectionTree<P> {
    pub fn new(config: TreeConfig) -> Result<Self> {
        if config.radius < 1 || config.radius > MAX_RADIUS {
            return Err(Error::InvalidRadius {
                radius: config.radius,
                max: MAX_RADIUS,
            });
        }

        let root_level = root_level_for(config.radius);
        let root = Node {
            origin: IVec3::ZERO,
            level: root_level,
            parent: None,
            lower_visible: None,
            kind: NodeKind::Inner(InnerData::default()),
        };
        tracing::info!(radius = config.radius, root_level, "created section tree");

        Ok(Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            root: NodeId(0),
            offset: config.radius,
            config,
            section_count: 0,
        })
    }

    // ------------------------------------------------------------------
    // Arena plumbing
    // ------------------------------------------------------------------

    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &Node<P> {
        self.nodes[id.index()].as_ref().expect("stale node id")
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<P> {
        self.nodes[id.index()].as_mut().expect("stale node id")
    }

    fn alloc(&mut self, node: Node<P>) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId((self.nodes.len() - 1) as u32)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.index()] = None;
        self.free.push(id.0);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of sections currently indexed
    pub fn section_count(&self) -> usize {
        self.section_count
    }

    pub fn is_empty(&self) -> bool {
        self.section_count == 0
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn level(&self, id: NodeId) -> u32 {
        self.node(id).level
    }

    /// Minimum corner of the cell in real (un-offset) coordinates
    pub fn origin_cell(&self, id: NodeId) -> IVec3 {
        self.node(id).origin - IVec3::splat(self.offset)
    }

    /// Side length of the cell in cells
    pub fn size(&self, id: NodeId) -> i32 {
        self.node(id).size()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).is_leaf()
    }

    pub fn is_skippable(&self, id: NodeId) -> bool {
        self.node(id).is_skippable()
    }

    /// Number of populated child slots; 0 for leaves
    pub fn child_count(&self, id: NodeId) -> u8 {
        self.node(id).as_inner().map_or(0, |inner| inner.child_count)
    }

    /// Number of immediate children counted as skippable; 0 for leaves
    pub fn skippable_children(&self, id: NodeId) -> u8 {
        self.node(id)
            .as_inner()
            .map_or(0, |inner| inner.skippable_children)
    }

    /// Child in the given octant slot, if any
    pub fn child(&self, id: NodeId, slot: usize) -> Option<NodeId> {
        self.node(id).as_inner().and_then(|inner| inner.children[slot])
    }

    /// Payload of a leaf cell
    pub fn payload(&self, id: NodeId) -> Option<&P> {
        match &self.node(id).kind {
            NodeKind::Leaf(leaf) => Some(&leaf.payload),
            NodeKind::Inner(_) => None,
        }
    }

    pub(crate) fn vertical_range(&self) -> (i32, i32) {
        (self.config.vertical_min, self.config.vertical_max)
    }

    #[inline]
    fn internal(&self, pos: IVec3) -> IVec3 {
        pos + IVec3::splat(self.offset)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Find the leaf cell holding the section at `pos`
    pub fn find(&self, pos: IVec3) -> Option<NodeId> {
        let internal = self.internal(pos);
        let mut current = self.root;
        loop {
            let node = self.node(current);
            if !node.contains(internal) {
                return None;
            }
            match &node.kind {
                // containment at level 0 is coordinate equality
                NodeKind::Leaf(_) => return Some(current),
                NodeKind::Inner(inner) => {
                    current = inner.children[octant_index(internal, node.level)]?;
                }
            }
        }
    }

    /// Iterate every leaf in the tree
    pub fn leaves(&self) -> impl Iterator<Item = (NodeId, &P)> {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            while let Some(id) = stack.pop() {
                match &self.node(id).kind {
                    NodeKind::Leaf(leaf) => return Some((id, &leaf.payload)),
                    NodeKind::Inner(inner) => {
                        stack.extend(inner.children.iter().rev().flatten());
                    }
                }
            }
            None
        })
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Index a section, creating the leaf and any branch cell needed to
    /// hold it. Replaces the payload in place when the coordinate is
    /// already indexed.
    pub fn insert(&mut self, payload: P) -> Result<NodeId> {
        let pos = payload.coords();
        let internal = self.internal(pos);
        if !self.node(self.root).contains(internal) {
            return Err(Error::OutOfBounds {
                pos,
                radius: self.config.radius,
            });
        }

        let skippable = payload.is_empty();
        let mut current = self.root;
        loop {
            let level = self.node(current).level;
            let slot = octant_index(internal, level);
            let existing = self
                .node(current)
                .as_inner()
                .expect("descent reached a leaf")
                .children[slot];

            match existing {
                None => {
                    // free slot: the new leaf hangs here directly, even if
                    // that skips levels
                    let leaf = self.alloc_leaf(internal, current, payload, skippable);
                    self.attach(current, slot, leaf);
                    self.section_count += 1;
                    return Ok(leaf);
                }
                Some(child) if self.node(child).contains(internal) => {
                    if self.node(child).is_leaf() {
                        // same coordinate: swap the payload in place and
                        // re-evaluate the skippable flag
                        let was = self.node(child).is_skippable();
                        if let NodeKind::Leaf(leaf) = &mut self.node_mut(child).kind {
                            leaf.payload = payload;
                            leaf.skippable = skippable;
                        }
                        self.propagate_skippable_change(child, was);
                        return Ok(child);
                    }
                    current = child;
                }
                Some(child) => {
                    // the occupant skips levels and does not contain the
                    // new coordinate: branch at the lowest level that
                    // contains both and re-parent the occupant
                    let leaf = self.branch_insert(current, slot, child, internal, payload, skippable)?;
                    self.section_count += 1;
                    return Ok(leaf);
                }
            }
        }
    }

    fn alloc_leaf(&mut self, internal: IVec3, parent: NodeId, payload: P, skippable: bool) -> NodeId {
        self.alloc(Node {
            origin: internal,
            level: 0,
            parent: Some(parent),
            lower_visible: None,
            kind: NodeKind::Leaf(LeafData {
                payload,
                skippable,
                cull_state: 0,
            }),
        })
    }

    /// Replace `existing` in `slot` of `parent` with a fresh branch cell
    /// holding both `existing` and a new leaf for `internal`
    fn branch_insert(
        &mut self,
        parent: NodeId,
        slot: usize,
        existing: NodeId,
        internal: IVec3,
        payload: P,
        skippable: bool,
    ) -> Result<NodeId> {
        let existing_origin = self.node(existing).origin;

        // walk down from the parent's level until the two coordinates
        // part ways, then step back up one level so the branch holds both
        let mut branch_level = self.node(parent).level - 1;
        while mask_origin(internal, branch_level) == mask_origin(existing_origin, branch_level) {
            branch_level -= 1;
        }
        branch_level += 1;

        let existing_slot = octant_index(existing_origin, branch_level);
        let new_slot = octant_index(internal, branch_level);
        if existing_slot == new_slot {
            debug_assert!(false, "octant collision while branching at level {branch_level}");
            tracing::error!(level = branch_level, "octant collision while branching, insert dropped");
            return Err(Error::InvariantViolation("octant collision while branching"));
        }

        let existing_skippable = self.node(existing).is_skippable();
        let branch = self.alloc(Node {
            origin: mask_origin(internal, branch_level),
            level: branch_level,
            parent: Some(parent),
            lower_visible: None,
            kind: NodeKind::Inner(InnerData::default()),
        });
        let leaf = self.alloc_leaf(internal, branch, payload, skippable);

        self.node_mut(existing).parent = Some(branch);
        {
            let inner = self
                .node_mut(branch)
                .as_inner_mut()
                .expect("branch allocated as inner");
            inner.children[existing_slot] = Some(existing);
            inner.children[new_slot] = Some(leaf);
            inner.child_count = 2;
            inner.first_child = existing_slot.min(new_slot) as u8;
            inner.skippable_children = existing_skippable as u8 + skippable as u8;
        }

        // the branch takes over the occupant's slot; the parent's child
        // count is unchanged but its skippable count may not be
        let was_parent_skippable = self.node(parent).is_skippable();
        let branch_skippable = self.node(branch).is_skippable();
        {
            let inner = self
                .node_mut(parent)
                .as_inner_mut()
                .expect("branch parent is inner");
            inner.children[slot] = Some(branch);
            if existing_skippable != branch_skippable {
                if branch_skippable {
                    inner.skippable_children += 1;
                } else {
                    inner.skippable_children -= 1;
                }
            }
        }
        self.propagate_skippable_change(parent, was_parent_skippable);

        Ok(leaf)
    }

    /// Put `child` into a free slot of `parent`, maintaining counters
    fn attach(&mut self, parent: NodeId, slot: usize, child: NodeId) {
        let child_skippable = self.node(child).is_skippable();
        let was = self.node(parent).is_skippable();

        let inner = self
            .node_mut(parent)
            .as_inner_mut()
            .expect("attach target is inner");
        debug_assert!(inner.children[slot].is_none(), "attach into occupied slot");
        inner.children[slot] = Some(child);
        inner.child_count += 1;
        if child_skippable {
            inner.skippable_children += 1;
        }
        inner.first_child = Self::lowest_slot(inner);

        self.node_mut(child).parent = Some(parent);
        self.propagate_skippable_change(parent, was);
    }

    /// Clear the slot of `parent`, maintaining counters; the child is not
    /// released
    fn detach(&mut self, parent: NodeId, slot: usize) {
        let child = self.node(parent).as_inner().and_then(|inner| inner.children[slot]);
        let Some(child) = child else {
            debug_assert!(false, "detach from empty slot {slot}");
            tracing::error!(slot, "detach from empty slot, skipped");
            return;
        };
        let child_skippable = self.node(child).is_skippable();
        let was = self.node(parent).is_skippable();

        let inner = self
            .node_mut(parent)
            .as_inner_mut()
            .expect("detach target is inner");
        inner.children[slot] = None;
        inner.child_count -= 1;
        if child_skippable {
            if inner.skippable_children == 0 {
                debug_assert!(false, "skippable counter underflow");
                tracing::error!("skippable counter underflow, aggregate left as-is");
            } else {
                inner.skippable_children -= 1;
            }
        }
        inner.first_child = Self::lowest_slot(inner);

        self.propagate_skippable_change(parent, was);
    }

    fn lowest_slot(inner: &InnerData) -> u8 {
        inner
            .children
            .iter()
            .position(Option::is_some)
            .unwrap_or(0) as u8
    }

    /// Push a flip of `id`'s skippable state into the ancestor counters.
    /// `was_skippable` is the state before the mutation; the walk stops at
    /// the first ancestor whose own state did not flip.
    pub(crate) fn propagate_skippable_change(&mut self, id: NodeId, was_skippable: bool) {
        if self.node(id).is_skippable() == was_skippable {
            return;
        }
        let became_skippable = !was_skippable;

        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            let node = self.node_mut(parent);
            let next = node.parent;
            let Some(inner) = node.as_inner_mut() else {
                debug_assert!(false, "leaf on a parent chain");
                tracing::error!("leaf on a parent chain, aggregate propagation stopped");
                return;
            };

            let was = inner.skippable_children == inner.child_count;
            if became_skippable {
                inner.skippable_children += 1;
            } else if inner.skippable_children == 0 {
                debug_assert!(false, "skippable counter underflow");
                tracing::error!("skippable counter underflow, aggregate propagation stopped");
                return;
            } else {
                inner.skippable_children -= 1;
            }

            if (inner.skippable_children == inner.child_count) == was {
                return;
            }
            current = next;
        }
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Drop the section at `pos` from the index. Unknown coordinates are a
    /// silent no-op: removal legitimately races against earlier unloads.
    pub fn remove(&mut self, pos: IVec3) {
        let internal = self.internal(pos);
        if !self.node(self.root).contains(internal) {
            return;
        }

        // descend along existing structure only
        let mut current = self.root;
        let (parent, slot, leaf) = loop {
            let node = self.node(current);
            let Some(inner) = node.as_inner() else { return };
            let slot = octant_index(internal, node.level);
            match inner.children[slot] {
                None => return,
                Some(child) => {
                    if !self.node(child).contains(internal) {
                        return;
                    }
                    if self.node(child).is_leaf() {
                        break (current, slot, child);
                    }
                    current = child;
                }
            }
        };

        self.detach(parent, slot);
        self.release(leaf);
        self.section_count -= 1;

        // collapse singleton ancestors and prune emptied ones; the root
        // always stays
        let mut current = parent;
        loop {
            let node = self.node(current);
            let Some(grandparent) = node.parent else { break };
            let inner = node.as_inner().expect("ancestor chain holds inner cells");

            match inner.child_count {
                0 => {
                    let slot = octant_index(self.node(current).origin, self.node(grandparent).level);
                    self.detach(grandparent, slot);
                    self.release(current);
                    current = grandparent;
                }
                1 => {
                    let only = inner.children[inner.first_child as usize]
                        .expect("first_child points at a populated slot");
                    let slot = octant_index(self.node(current).origin, self.node(grandparent).level);
                    // a singleton cell and its lone child share a
                    // skippable state, so the grandparent's counters are
                    // untouched by the swap
                    if let Some(gp_inner) = self.node_mut(grandparent).as_inner_mut() {
                        gp_inner.children[slot] = Some(only);
                    }
                    self.node_mut(only).parent = Some(grandparent);
                    self.release(current);
                    break;
                }
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;

    #[derive(Debug, Clone)]
    struct TestSection {
        pos: IVec3,
        empty: bool,
    }

    impl TestSection {
        fn at(x: i32, y: i32, z: i32) -> Self {
            Self {
                pos: IVec3::new(x, y, z),
                empty: false,
            }
        }
    }

    impl Section for TestSection {
        fn coords(&self) -> IVec3 {
            self.pos
        }

        fn is_empty(&self) -> bool {
            self.empty
        }

        fn visible_through(&self, _from: Axis, _to: Axis) -> bool {
            true
        }
    }

    fn small_tree() -> SectionTree<TestSection> {
        SectionTree::new(TreeConfig {
            radius: 16,
            vertical_min: -16,
            vertical_max: 16,
        })
        .unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let mut tree = small_tree();
        let id = tree.insert(TestSection::at(1, 2, 3)).unwrap();

        assert_eq!(tree.find(IVec3::new(1, 2, 3)), Some(id));
        assert_eq!(tree.payload(id).unwrap().pos, IVec3::new(1, 2, 3));
        assert_eq!(tree.level(id), 0);
        assert_eq!(tree.origin_cell(id), IVec3::new(1, 2, 3));
        assert_eq!(tree.section_count(), 1);
        assert_eq!(tree.find(IVec3::new(1, 2, 4)), None);
    }

    #[test]
    fn test_insert_out_of_bounds() {
        let mut tree = small_tree();
        let result = tree.insert(TestSection::at(40, 0, 0));
        assert_eq!(
            result,
            Err(Error::OutOfBounds {
                pos: IVec3::new(40, 0, 0),
                radius: 16
            })
        );
        assert!(tree.is_empty());
    }

    #[test]
    fn test_negative_and_boundary_coordinates() {
        let mut tree = small_tree();
        for pos in [
            IVec3::new(-1, -1, -3),
            IVec3::new(-16, -16, -16),
            IVec3::new(15, 15, 15),
            IVec3::new(-16, 15, -1),
        ] {
            tree.insert(TestSection {
                pos,
                empty: false,
            })
            .unwrap();
            assert!(tree.find(pos).is_some(), "lost section at {pos}");
        }

        for pos in [IVec3::new(16, 0, 0), IVec3::new(0, -17, 0)] {
            assert!(tree
                .insert(TestSection { pos, empty: false })
                .is_err());
        }
    }

    #[test]
    fn test_round_trip_remove() {
        let mut tree = small_tree();
        tree.insert(TestSection::at(-1, -1, -3)).unwrap();
        tree.insert(TestSection::at(5, 3, 1)).unwrap();

        tree.remove(IVec3::new(-1, -1, -3));
        assert_eq!(tree.find(IVec3::new(-1, -1, -3)), None);
        assert_eq!(tree.section_count(), 1);
        assert!(tree.find(IVec3::new(5, 3, 1)).is_some());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut tree = small_tree();
        tree.insert(TestSection::at(0, 0, 0)).unwrap();
        tree.insert(TestSection::at(1, 0, 0)).unwrap();
        tree.insert(TestSection::at(0, 2, 0)).unwrap();

        tree.remove(IVec3::new(0, 0, 0));
        let count_after_first = tree.section_count();
        let pair_parent = tree.parent(tree.find(IVec3::new(1, 0, 0)).unwrap());

        // a second removal of the same coordinate must change nothing
        tree.remove(IVec3::new(0, 0, 0));
        assert_eq!(tree.section_count(), count_after_first);
        assert_eq!(
            tree.parent(tree.find(IVec3::new(1, 0, 0)).unwrap()),
            pair_parent
        );

        // removing a coordinate that was never present is also a no-op
        tree.remove(IVec3::new(9, 9, 9));
        tree.remove(IVec3::new(400, 0, 0));
        assert_eq!(tree.section_count(), count_after_first);
    }

    #[test]
    fn test_branch_structure_and_collapse() {
        // leaves at (0,0,0), (1,0,0) and (0,2,0): the close pair shares a
        // level-1 branch, the third lives two levels up
        let mut tree = small_tree();
        let a = tree.insert(TestSection::at(0, 0, 0)).unwrap();
        let b = tree.insert(TestSection::at(1, 0, 0)).unwrap();
        let c = tree.insert(TestSection::at(0, 2, 0)).unwrap();

        let pair = tree.parent(a).unwrap();
        assert_eq!(tree.parent(b), Some(pair));
        assert_eq!(tree.level(pair), 1);
        assert_eq!(tree.child_count(pair), 2);

        let quad = tree.parent(pair).unwrap();
        assert_eq!(tree.parent(c), Some(quad));
        assert_eq!(tree.level(quad), 2);
        assert_eq!(tree.child_count(quad), 2);

        // removing one of the pair collapses the level-1 branch into a
        // direct leaf child of the quad
        tree.remove(IVec3::new(0, 0, 0));
        let b = tree.find(IVec3::new(1, 0, 0)).unwrap();
        assert!(tree.is_leaf(b));
        assert_eq!(tree.parent(b), Some(quad));
        assert_eq!(tree.child_count(quad), 2);

        // removing the rest prunes the quad entirely
        tree.remove(IVec3::new(1, 0, 0));
        tree.remove(IVec3::new(0, 2, 0));
        assert!(tree.is_empty());
        assert_eq!(tree.child_count(tree.root()), 0);
    }

    #[test]
    fn test_replace_payload_in_place() {
        let mut tree = small_tree();
        let first = tree.insert(TestSection::at(2, 2, 2)).unwrap();
        let second = tree
            .insert(TestSection {
                pos: IVec3::new(2, 2, 2),
                empty: true,
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(tree.section_count(), 1);
        assert!(tree.payload(second).unwrap().empty);
        assert!(tree.is_skippable(second));
    }

    #[test]
    fn test_aggregate_invariant_over_mutations() {
        fn check_invariant(tree: &SectionTree<TestSection>, id: NodeId) {
            if let Some(inner) = tree.node(id).as_inner() {
                let mut skippable = 0;
                let mut count = 0;
                for child in inner.children.iter().flatten() {
                    count += 1;
                    if tree.node(*child).is_skippable() {
                        skippable += 1;
                    }
                    check_invariant(tree, *child);
                }
                assert_eq!(inner.child_count, count, "child count desync");
                assert_eq!(inner.skippable_children, skippable, "skippable desync");
            }
        }

        let mut tree = small_tree();
        let positions = [
            (0, 0, 0, false),
            (1, 0, 0, true),
            (0, 2, 0, false),
            (-3, 1, 4, true),
            (-3, 1, 5, true),
            (7, -8, 2, false),
        ];
        for (x, y, z, empty) in positions {
            tree.insert(TestSection {
                pos: IVec3::new(x, y, z),
                empty,
            })
            .unwrap();
            check_invariant(&tree, tree.root());
        }

        tree.set_leaf_skippable(tree.find(IVec3::new(0, 0, 0)).unwrap(), true);
        check_invariant(&tree, tree.root());
        tree.set_leaf_skippable(tree.find(IVec3::new(1, 0, 0)).unwrap(), false);
        check_invariant(&tree, tree.root());

        for (x, y, z, _) in positions {
            tree.remove(IVec3::new(x, y, z));
            check_invariant(&tree, tree.root());
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn test_leaves_iterator() {
        let mut tree = small_tree();
        let mut expected = Vec::new();
        for x in -2..3 {
            for z in -2..3 {
                tree.insert(TestSection::at(x, 0, z)).unwrap();
                expected.push(IVec3::new(x, 0, z));
            }
        }

        let mut seen: Vec<IVec3> = tree.leaves().map(|(_, p)| p.pos).collect();
        seen.sort_by_key(|p| (p.x, p.z));
        expected.sort_by_key(|p| (p.x, p.z));
        assert_eq!(seen, expected);
    }
}
