//! Sparse octree visibility index for voxel render sections.
//!
//! Loaded sections are indexed in a dynamically maintained octree over a
//! bounded signed coordinate space. Once per frame a breadth-first
//! "frontier" pass walks the tree from the viewpoint outward, skipping
//! empty regions wholesale and amortizing frustum tests through a small
//! cache of boxes known to be fully visible. Mesh building, GPU uploads
//! and world data loading live elsewhere; this crate only reads the
//! section query surface it is given.

mod axis;
mod coord;
mod error;
mod frontier;
mod frustum;
mod section;
mod tree;

pub use axis::Axis;
pub use error::{Error, Result};
pub use frontier::Frontier;
pub use frustum::{Frustum, FrustumCache, FrustumCacheStats, Visibility};
pub use section::{RenderDistance, Section};
pub use tree::{NodeId, SectionTree, TreeConfig, MAX_RADIUS};

// Re-export glam for convenience
pub use glam;
