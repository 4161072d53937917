// Bit-mask coordinate arithmetic for the section tree
//
// A cell at `level` spans 2^level cells per axis and its origin has the low
// `level` bits of every coordinate masked off. Level 0 is a leaf.

use glam::IVec3;

/// Bit mask selecting the origin bits of a cell at the given level.
///
/// Level 32 would shift past the word width, so it is special-cased to an
/// all-ignored mask instead of relying on the shift behavior.
#[inline]
pub fn level_mask(level: u32) -> i32 {
    if level >= 32 {
        0
    } else {
        -1 << level
    }
}

/// Mask a coordinate down to the origin of its containing cell at `level`
#[inline]
pub fn mask_origin(pos: IVec3, level: u32) -> IVec3 {
    let mask = level_mask(level);
    IVec3::new(pos.x & mask, pos.y & mask, pos.z & mask)
}

/// Child slot of `pos` inside a cell at `level`, from bit `level - 1` of
/// each axis. Slots use the x | y << 1 | z << 2 layout.
///
/// Level 0 cells are leaves and have no slots; callers never ask.
#[inline]
pub fn octant_index(pos: IVec3, level: u32) -> usize {
    debug_assert!((1..=32).contains(&level), "no octants at level {level}");
    let selector = 1i32 << (level - 1);
    ((pos.x & selector != 0) as usize)
        | (((pos.y & selector != 0) as usize) << 1)
        | (((pos.z & selector != 0) as usize) << 2)
}

/// True when the cell with the given origin and level contains `pos`.
///
/// Works for leaves too: the level-0 mask keeps every bit, so containment
/// degenerates to coordinate equality.
#[inline]
pub fn cell_contains(origin: IVec3, level: u32, pos: IVec3) -> bool {
    mask_origin(pos, level) == origin
}

/// Smallest level whose cell covers the full world diameter for `radius`
#[inline]
pub fn root_level_for(radius: i32) -> u32 {
    (2 * radius as u32).next_power_of_two().trailing_zeros()
}
