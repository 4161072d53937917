//! Per-frame breadth-first visibility pass
//!
//! Starting from the cell holding the viewpoint, the frontier walks the
//! tree face by face in increasing Manhattan distance, marking every cell
//! it accepts with the current frame stamp. Skippable cells are traversed
//! as whole units, so large empty regions cost a handful of steps instead
//! of one per cell.

use std::collections::BTreeMap;

use glam::{IVec3, Vec3};

use crate::axis::Axis;
use crate::frustum::{Frustum, FrustumCache};
use crate::section::{RenderDistance, Section};
use crate::tree::{NodeId, SectionTree};

struct Enqueued {
    node: NodeId,
    /// Face through which the search entered the cell, pointing back
    /// toward where it came from; `None` for seeds
    flow: Option<Axis>,
}

/// Breadth-first search engine over a [`SectionTree`].
///
/// Owns the distance buckets and the frustum accept-cache so their
/// allocations carry over between frames. One pass runs to completion per
/// call; the next frame supersedes it purely through the frame number.
pub struct Frontier {
    queues: BTreeMap<i32, Vec<Enqueued>>,
    accept_cache: FrustumCache,
    scratch: Vec<NodeId>,
    use_occlusion: bool,
    marked: u32,
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            queues: BTreeMap::new(),
            accept_cache: FrustumCache::new(),
            scratch: Vec::new(),
            use_occlusion: true,
            marked: 0,
        }
    }

    /// Accept-cache statistics of the last pass
    pub fn accept_cache(&self) -> &FrustumCache {
        &self.accept_cache
    }

    /// Cells marked visible by the last pass
    pub fn marked_count(&self) -> u32 {
        self.marked
    }

    /// Run the visibility pass for one frame.
    ///
    /// `spectator_inside_opaque` disables directional occlusion culling,
    /// for viewpoints buried inside solid geometry that should still see
    /// their surroundings.
    pub fn run<P: Section, F: Frustum>(
        &mut self,
        tree: &mut SectionTree<P>,
        frame: u64,
        viewpoint: Vec3,
        frustum: &F,
        render_distance: RenderDistance,
        spectator_inside_opaque: bool,
    ) {
        self.queues.clear();
        self.marked = 0;
        self.use_occlusion = !spectator_inside_opaque;
        self.accept_cache.begin_frame(frustum);

        let origin_cell = viewpoint.floor().as_ivec3();
        self.seed(tree, frame, origin_cell, frustum, &render_distance);

        // drain buckets in increasing distance; expansion may refill a
        // lower bucket, which the ordered map resumes from automatically
        while let Some((&distance, _)) = self.queues.first_key_value() {
            let batch = self.queues.remove(&distance).expect("bucket just observed");
            for entry in batch {
                self.expand(tree, frame, origin_cell, frustum, &render_distance, &entry);
            }
        }

        tracing::debug!(frame, marked = self.marked, "frontier pass complete");
    }

    /// Enqueue the starting cells: the cell holding the viewpoint, or a
    /// whole layer of candidates when the viewpoint is outside any cell
    fn seed<P: Section, F: Frustum>(
        &mut self,
        tree: &mut SectionTree<P>,
        frame: u64,
        origin_cell: IVec3,
        frustum: &F,
        render_distance: &RenderDistance,
    ) {
        if let Some(leaf) = tree.find(origin_cell) {
            tree.reset_cull_state(leaf);
            self.add_visible(tree, frame, origin_cell, leaf, None);
            return;
        }

        // the viewpoint is above or below the loaded world; seed every
        // cell of the clamped layer that passes distance and frustum
        let (vertical_min, vertical_max) = tree.vertical_range();
        let seed_y = origin_cell.y.clamp(vertical_min, vertical_max);
        let radius = render_distance.radius;

        for dx in -radius..=radius {
            for dz in -radius..=radius {
                let pos = IVec3::new(origin_cell.x + dx, seed_y, origin_cell.z + dz);
                let Some(leaf) = tree.find(pos) else { continue };

                let min = pos.as_vec3();
                if !self
                    .accept_cache
                    .is_box_visible(frustum, min, min + Vec3::ONE)
                {
                    continue;
                }
                tree.reset_cull_state(leaf);
                self.add_visible(tree, frame, origin_cell, leaf, None);
            }
        }
    }

    /// Expand one dequeued cell across all six faces
    fn expand<P: Section, F: Frustum>(
        &mut self,
        tree: &mut SectionTree<P>,
        frame: u64,
        origin_cell: IVec3,
        frustum: &F,
        render_distance: &RenderDistance,
        entry: &Enqueued,
    ) {
        for dir in Axis::ALL {
            if tree.is_leaf(entry.node) {
                // never exit back through a face the path already consumed
                if tree.cull_state(entry.node) & dir.bit() != 0 {
                    continue;
                }
                // the section's own occlusion data can rule the exit out
                if self.use_occlusion {
                    if let (Some(flow), Some(payload)) = (entry.flow, tree.payload(entry.node)) {
                        if !payload.visible_through(flow, dir) {
                            continue;
                        }
                    }
                }
            }

            let mut scratch = std::mem::take(&mut self.scratch);
            tree.face_adjacent_nodes(entry.node, dir, true, &mut |n| scratch.push(n));
            for node in scratch.drain(..) {
                self.enqueue(
                    tree,
                    frame,
                    origin_cell,
                    frustum,
                    render_distance,
                    entry.node,
                    node,
                    dir.opposite(),
                );
            }
            self.scratch = scratch;
        }
    }

    /// Gate one neighboring cell on distance, the frame cache and the
    /// frustum, then mark and enqueue it
    #[allow(clippy::too_many_arguments)]
    fn enqueue<P: Section, F: Frustum>(
        &mut self,
        tree: &mut SectionTree<P>,
        frame: u64,
        origin_cell: IVec3,
        frustum: &F,
        render_distance: &RenderDistance,
        from: NodeId,
        node: NodeId,
        flow: Axis,
    ) {
        let min = tree.origin_cell(node);
        let max = min + IVec3::splat(tree.size(node));
        if !render_distance.contains_column(min, max) {
            return;
        }
        if tree.is_whole_subtree_visible_at(node, frame) {
            return;
        }
        if !self
            .accept_cache
            .is_box_visible(frustum, min.as_vec3(), max.as_vec3())
        {
            return;
        }

        // carry the directional culling state across leaf-to-leaf steps
        if tree.is_leaf(from) && tree.is_leaf(node) {
            let state = tree.cull_state(from) | flow.bit();
            tree.set_cull_state(node, state);
        }

        self.add_visible(tree, frame, origin_cell, node, Some(flow));
    }

    /// Stamp the cell visible for this frame and queue it at its Manhattan
    /// distance from the viewpoint
    fn add_visible<P: Section>(
        &mut self,
        tree: &mut SectionTree<P>,
        frame: u64,
        origin_cell: IVec3,
        node: NodeId,
        flow: Option<Axis>,
    ) {
        let distance = Self::center_distance(tree, node, origin_cell);
        self.queues
            .entry(distance)
            .or_default()
            .push(Enqueued { node, flow });

        // marking happens on enqueue so re-discoveries of the same cell
        // within the frame short-circuit in the frame cache
        tree.set_subtree_visible_now(node, frame);
        self.marked += 1;
    }

    /// Manhattan distance from the viewpoint cell to the cell's center
    fn center_distance<P: Section>(tree: &SectionTree<P>, node: NodeId, origin_cell: IVec3) -> i32 {
        let half = tree.size(node) / 2;
        let center = tree.origin_cell(node) + IVec3::splat(half);
        (center - origin_cell).abs().element_sum()
    }
}
