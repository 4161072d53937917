//! Frame-stamped visibility cache and the skippable aggregate
//!
//! Each cell carries two frame stamps. The lower bound on a cell says its
//! whole subtree was confirmed visible at that frame; the upper bound on an
//! inner cell says some descendant was. Marking a cell stamps its lower
//! bound and pushes the upper bound toward the root; queries walk upward
//! and copy a matching lower bound back down along the path, so repeated
//! queries on overlapping paths settle into amortized constant time.

use glam::IVec3;

use super::{NodeId, NodeKind, SectionTree};
use crate::section::Section;

impl<P: Section> SectionTree<P> {
    /// Mark the whole subtree under `id` as visible at `frame`.
    ///
    /// Only ancestors get their upper bound stamped here; descendants pick
    /// the lower bound up lazily in [`Self::is_whole_subtree_visible_at`].
    pub fn set_subtree_visible_now(&mut self, id: NodeId, frame: u64) {
        self.node_mut(id).lower_visible = Some(frame);

        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            let node = self.node_mut(parent);
            let next = node.parent;
            let NodeKind::Inner(inner) = &mut node.kind else { break };
            if inner.upper_visible == Some(frame) {
                // an already-stamped ancestor implies the rest of the
                // chain is stamped too
                break;
            }
            inner.upper_visible = Some(frame);
            current = next;
        }
    }

    /// Whether every leaf under `id` was confirmed visible at `frame`.
    ///
    /// A matching lower bound found on an ancestor is copied down the
    /// query path before returning.
    pub fn is_whole_subtree_visible_at(&mut self, id: NodeId, frame: u64) -> bool {
        let mut current = id;
        let hit = loop {
            if self.node(current).lower_visible == Some(frame) {
                break current;
            }
            match self.node(current).parent {
                Some(parent) => current = parent,
                None => return false,
            }
        };

        let mut current = id;
        while current != hit {
            self.node_mut(current).lower_visible = Some(frame);
            current = self.node(current).parent.expect("hit cell left the path");
        }
        true
    }

    /// Whether any section inside the real-coordinate box (inclusive of
    /// both corners) was confirmed visible at `frame`. Read-only; usable
    /// outside the frontier pass, e.g. for entity culling.
    pub fn is_region_visible(&self, frame: u64, min: IVec3, max: IVec3) -> bool {
        self.region_visible_in(self.root(), frame, min, max)
    }

    fn region_visible_in(&self, id: NodeId, frame: u64, min: IVec3, max: IVec3) -> bool {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Leaf(_) => {
                node.lower_visible == Some(frame) && self.intersects_region(id, min, max)
            }
            NodeKind::Inner(inner) => {
                // no descendant can match if the newest stamp below this
                // cell is older than the queried frame
                if inner.upper_visible != Some(frame) || !self.intersects_region(id, min, max) {
                    return false;
                }
                inner
                    .children
                    .iter()
                    .flatten()
                    .any(|&child| self.region_visible_in(child, frame, min, max))
            }
        }
    }

    fn intersects_region(&self, id: NodeId, min: IVec3, max: IVec3) -> bool {
        let lo = self.origin_cell(id);
        let hi = lo + IVec3::splat(self.size(id));
        lo.x <= max.x
            && hi.x > min.x
            && lo.y <= max.y
            && hi.y > min.y
            && lo.z <= max.z
            && hi.z > min.z
    }

    /// Iterate the payloads confirmed visible at `frame`, re-walking the
    /// cached stamps. Restartable: each call walks the same state again.
    pub fn visible_leaves(&self, frame: u64) -> impl Iterator<Item = &P> {
        let mut stack = vec![(self.root(), false)];
        std::iter::from_fn(move || {
            while let Some((id, covered_above)) = stack.pop() {
                let node = self.node(id);
                let covered = covered_above || node.lower_visible == Some(frame);
                match &node.kind {
                    NodeKind::Leaf(leaf) => {
                        if covered {
                            return Some(&leaf.payload);
                        }
                    }
                    NodeKind::Inner(inner) => {
                        if covered || inner.upper_visible == Some(frame) {
                            stack.extend(inner.children.iter().rev().flatten().map(|&c| (c, covered)));
                        }
                    }
                }
            }
            None
        })
    }

    // ------------------------------------------------------------------
    // Skippable aggregate
    // ------------------------------------------------------------------

    /// Set a leaf's skippable flag, pushing any flip into the ancestor
    /// counters. No-op when the flag is unchanged.
    pub fn set_leaf_skippable(&mut self, id: NodeId, skippable: bool) {
        let NodeKind::Leaf(leaf) = &mut self.node_mut(id).kind else {
            return;
        };
        if leaf.skippable == skippable {
            return;
        }
        leaf.skippable = skippable;
        self.propagate_skippable_change(id, !skippable);
    }

    /// Re-read the payload's emptiness at `pos` and update the skippable
    /// flag. Called when section data arrives or changes.
    pub fn refresh_skippable(&mut self, pos: IVec3) {
        let Some(id) = self.find(pos) else { return };
        let empty = match &self.node(id).kind {
            NodeKind::Leaf(leaf) => leaf.payload.is_empty(),
            NodeKind::Inner(_) => return,
        };
        self.set_leaf_skippable(id, empty);
    }

    // ------------------------------------------------------------------
    // Directional culling state (frontier support)
    // ------------------------------------------------------------------

    pub(crate) fn cull_state(&self, id: NodeId) -> u8 {
        match &self.node(id).kind {
            NodeKind::Leaf(leaf) => leaf.cull_state,
            NodeKind::Inner(_) => 0,
        }
    }

    pub(crate) fn set_cull_state(&mut self, id: NodeId, state: u8) {
        if let NodeKind::Leaf(leaf) = &mut self.node_mut(id).kind {
            leaf.cull_state = state;
        }
    }

    pub(crate) fn reset_cull_state(&mut self, id: NodeId) {
        self.set_cull_state(id, 0);
    }
}
