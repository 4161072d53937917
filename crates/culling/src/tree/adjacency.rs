//! Face adjacency between same-size cells
//!
//! The navigator jumps from a cell to its neighbor across a face without
//! touching the cells in between: offset the origin by one cell size,
//! climb the parent chain to the first ancestor containing the mirrored
//! origin, then descend back toward it by octant.

use crate::axis::Axis;
use crate::coord::octant_index;
use crate::section::Section;

use super::{NodeId, NodeKind, SectionTree};

/// Child slots touching each face, indexed by [`Axis`] order. Slots use
/// the x | y << 1 | z << 2 layout.
const FACE_OCTANTS: [[usize; 4]; 6] = [
    [1, 3, 5, 7], // +x
    [0, 2, 4, 6], // -x
    [2, 3, 6, 7], // +y
    [0, 1, 4, 5], // -y
    [4, 5, 6, 7], // +z
    [0, 1, 2, 3], // -z
];

impl<P: Section> SectionTree<P> {
    /// The cell of the same size sharing the given face, or `None` at the
    /// edge of the indexed volume and across unpopulated space.
    ///
    /// With `largest_skippable` set, a skippable inner cell found on the
    /// way down is returned at its own, larger size instead.
    ///
    /// The climb starts from the parent, never the cell itself, so the
    /// result can never be the cell or one of its ancestors.
    pub fn face_adjacent(&self, id: NodeId, axis: Axis, largest_skippable: bool) -> Option<NodeId> {
        let node = self.node(id);
        let own_level = node.level;

        // origin of the equal-size volume mirrored across the face; if a
        // cell with this origin exists at our size it is the neighbor, and
        // nothing larger can hold the origin without overlapping us
        let target = node.origin + axis.offset() * node.size();

        // climb to the lowest ancestor containing the mirrored origin;
        // running past the root means the face is on the world edge
        let mut common = node.parent?;
        while !self.node(common).contains(target) {
            common = self.node(common).parent?;
        }

        // descend toward the target origin
        let mut current = common;
        while self.node(current).level > own_level {
            let inner = self
                .node(current)
                .as_inner()
                .expect("cells above leaf level are inner");
            let slot = octant_index(target, self.node(current).level);
            match inner.children[slot] {
                // unpopulated space where the neighbor would be
                None => return None,
                Some(child) => {
                    if self.node(child).is_leaf() {
                        // a leaf here occupies the mirrored origin, at our
                        // size or below it when levels were skipped
                        return Some(child);
                    }
                    current = child;
                    if largest_skippable && self.node(current).is_skippable() {
                        break;
                    }
                }
            }
        }
        Some(current)
    }

    /// Visit every leaf (or, when accepted, maximal skippable inner cell)
    /// of the subtree under `id` that touches the given face of `id`
    pub fn face_nodes(
        &self,
        id: NodeId,
        axis: Axis,
        accept_skippable: bool,
        visit: &mut dyn FnMut(NodeId),
    ) {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Leaf(_) => visit(id),
            NodeKind::Inner(inner) => {
                if accept_skippable && node.is_skippable() {
                    // the whole cell stands in for its subtree
                    visit(id);
                    return;
                }
                for &slot in &FACE_OCTANTS[axis as usize] {
                    let Some(child) = inner.children[slot] else {
                        continue;
                    };
                    // a level-skipping child sits somewhere inside its
                    // octant and only counts when it reaches the face
                    if self.node(child).level + 1 < node.level && !self.touches_face(child, id, axis)
                    {
                        continue;
                    }
                    self.face_nodes(child, axis, accept_skippable, visit);
                }
            }
        }
    }

    /// Visit the nodes on the far side of the given face: the touching
    /// leaves (or maximal skippable cells) of the same-size neighbor
    pub fn face_adjacent_nodes(
        &self,
        id: NodeId,
        axis: Axis,
        accept_skippable: bool,
        visit: &mut dyn FnMut(NodeId),
    ) {
        if let Some(adjacent) = self.face_adjacent(id, axis, accept_skippable) {
            self.face_nodes(adjacent, axis.opposite(), accept_skippable, visit);
        }
    }

    fn touches_face(&self, child: NodeId, ancestor: NodeId, axis: Axis) -> bool {
        let child_node = self.node(child);
        let ancestor_node = self.node(ancestor);
        let component = axis.axis_index();
        if axis.sign() > 0 {
            child_node.origin[component] + child_node.size()
                == ancestor_node.origin[component] + ancestor_node.size()
        } else {
            child_node.origin[component] == ancestor_node.origin[component]
        }
    }
}
