use glam::{IVec3, Vec3};

use crate::axis::Axis;

/// Capability surface of the externally owned renderable payload held by
/// each leaf cell.
///
/// The tree stores a handle implementing this trait and only ever reads
/// through it; meshing, upload and data loading happen elsewhere.
pub trait Section {
    /// Cell coordinate this section occupies
    fn coords(&self) -> IVec3;

    /// True when the section contains no renderable geometry
    fn is_empty(&self) -> bool;

    /// Whether sight lines can pass through this section entering at the
    /// `from` face and leaving at the `to` face
    fn visible_through(&self, from: Axis, to: Axis) -> bool;
}

/// Maximum traversal distance around a world-space center
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderDistance {
    /// Radius in cell units
    pub radius: i32,
    /// World-space position the radius is measured from
    pub center: Vec3,
}

impl RenderDistance {
    pub fn new(radius: i32, center: Vec3) -> Self {
        Self { radius, center }
    }

    /// Cell coordinate of the center
    pub(crate) fn center_cell(&self) -> IVec3 {
        self.center.floor().as_ivec3()
    }

    /// True when the cell column `[min, max)` overlaps the radius square
    /// around the center. Vertical distance is unlimited, matching the
    /// column shape of loaded worlds.
    pub(crate) fn contains_column(&self, min: IVec3, max: IVec3) -> bool {
        let center = self.center_cell();
        center.x + self.radius >= min.x
            && center.x - self.radius < max.x
            && center.z + self.radius >= min.z
            && center.z - self.radius < max.z
    }
}
