//! Frustum oracle interface and the box accept-cache that amortizes it
//!
//! Exact frustum tests are comparatively expensive, so the cache keeps a
//! small set of boxes known to lie fully inside the frustum. A query that
//! lands in a cached box skips the oracle entirely; boxes are grown
//! opportunistically and re-validated at a regular interval.

use glam::Vec3;
use rand::Rng;

/// Result of testing an axis-aligned box against the view frustum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The box is entirely inside the frustum
    Inside,
    /// The box crosses a frustum plane
    Intersecting,
    /// The box is entirely outside the frustum
    Outside,
}

/// Box-visibility oracle implemented by the camera owner.
///
/// The plane math itself lives with the renderer; this crate only consumes
/// the classification.
pub trait Frustum {
    fn box_visibility(&self, min: Vec3, max: Vec3) -> Visibility;
}

/// Cached boxes are shrunk by one cell per side before being accepted, so
/// growing them stays conservative: a box that still tests `Inside` after
/// shrinking can only admit cells that at worst touch the frustum.
const ACCEPT_MARGIN: f32 = 1.0;

/// Exact tests between two box-growth attempts
const EXPAND_WAIT: u32 = 1000;

/// Frames between purges of low-contribution boxes
const PURGE_INTERVAL: u32 = 30;

/// Purge boxes contributing fewer hits than this fraction of the best
/// boxes' average
const PURGE_THRESHOLD: f32 = 0.05;

const DEFAULT_MAX_BOXES: usize = 5;

#[derive(Debug, Clone, Copy)]
struct CachedBox {
    min: Vec3,
    max: Vec3,
    hits: u32,
}

/// Per-pass test counters, reset by [`FrustumCache::begin_frame`]
#[derive(Debug, Default, Clone, Copy)]
pub struct FrustumCacheStats {
    /// Queries answered either way
    pub potential_checks: u32,
    /// Queries that fell through to the exact oracle
    pub exact_checks: u32,
    /// Oracle calls spent validating grown boxes
    pub grow_checks: u32,
    /// Individual cached-box membership tests
    pub box_tests: u32,
    /// Boxes dropped by the last purge
    pub purged_boxes: u32,
}

/// Bounded set of boxes known to lie fully inside the frustum
pub struct FrustumCache {
    boxes: Vec<CachedBox>,
    max_boxes: usize,
    expand_wait: u32,
    frames_since_purge: u32,
    stats: FrustumCacheStats,
}

impl Default for FrustumCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FrustumCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_BOXES)
    }

    pub fn with_capacity(max_boxes: usize) -> Self {
        Self {
            boxes: Vec::with_capacity(max_boxes),
            max_boxes,
            expand_wait: 0,
            frames_since_purge: 0,
            stats: FrustumCacheStats::default(),
        }
    }

    pub fn stats(&self) -> FrustumCacheStats {
        self.stats
    }

    #[cfg(test)]
    pub(crate) fn cached_box_count(&self) -> usize {
        self.boxes.len()
    }

    /// Re-validate the cached boxes against this frame's frustum and reset
    /// the per-pass counters. Must be called once before a batch of
    /// queries; the frustum may have moved since the boxes were recorded.
    pub fn begin_frame<F: Frustum>(&mut self, frustum: &F) {
        self.boxes
            .retain(|b| Self::acceptable(frustum, b.min, b.max));
        self.boxes.sort_by(|a, b| b.hits.cmp(&a.hits));
        self.boxes.truncate(self.max_boxes);

        self.stats = FrustumCacheStats::default();
        self.frames_since_purge += 1;
        if self.boxes.len() >= 2 && self.frames_since_purge >= PURGE_INTERVAL {
            self.purge();
            self.frames_since_purge = 0;
        }

        // start the expansion countdown at a random phase so roughly
        // random cells get considered for box growth each frame
        self.expand_wait = rand::rng().random_range(0..EXPAND_WAIT);
    }

    /// Clear boxes that contribute too few hits relative to the best ones,
    /// then reset all hit counters for the next sampling window
    fn purge(&mut self) {
        let average = if self.boxes.len() >= 3 {
            (self.boxes[0].hits + self.boxes[1].hits) / 2
        } else {
            self.boxes[0].hits
        };
        let threshold = (PURGE_THRESHOLD * average as f32) as u32;

        let before = self.boxes.len();
        while let Some(last) = self.boxes.last() {
            if last.hits >= threshold || self.boxes.len() == 1 {
                break;
            }
            self.boxes.pop();
        }
        self.stats.purged_boxes = (before - self.boxes.len()) as u32;

        for cached in &mut self.boxes {
            cached.hits = 0;
        }
    }

    /// Whether a box may be cached: it must remain fully inside the
    /// frustum after shrinking by the safety margin
    fn acceptable<F: Frustum>(frustum: &F, min: Vec3, max: Vec3) -> bool {
        frustum.box_visibility(
            min + Vec3::splat(ACCEPT_MARGIN),
            max - Vec3::splat(ACCEPT_MARGIN),
        ) == Visibility::Inside
    }

    /// Test a cell box against the frustum, preferring cached boxes over
    /// the exact oracle. Returns false only when the box is certainly
    /// outside the frustum.
    pub fn is_box_visible<F: Frustum>(&mut self, frustum: &F, min: Vec3, max: Vec3) -> bool {
        self.stats.potential_checks += 1;

        if self.contains_point(min) || self.contains_point(max) {
            return true;
        }

        self.stats.exact_checks += 1;
        if frustum.box_visibility(min, max) == Visibility::Outside {
            return false;
        }

        self.expand_wait += 1;
        if self.expand_wait > EXPAND_WAIT {
            self.expand_wait = 0;
            self.grow(frustum, min, max);
        }
        true
    }

    fn contains_point(&mut self, point: Vec3) -> bool {
        for cached in &mut self.boxes {
            self.stats.box_tests += 1;
            if cached.min.x <= point.x
                && point.x < cached.max.x
                && cached.min.y <= point.y
                && point.y < cached.max.y
                && cached.min.z <= point.z
                && point.z < cached.max.z
            {
                cached.hits += 1;
                return true;
            }
        }
        false
    }

    /// Try to fold a freshly frustum-tested box into a cached one, or
    /// record it as a new box while there is room.
    ///
    /// A new box enters unvalidated: shrinking a single-cell box by the
    /// margin inverts it, so fresh entries can never pass the acceptance
    /// test on their own. They earn their keep through unions during the
    /// frame and are re-validated (and dropped if unacceptable) by the
    /// next `begin_frame`.
    fn grow<F: Frustum>(&mut self, frustum: &F, min: Vec3, max: Vec3) {
        for cached in &mut self.boxes {
            let grown_min = cached.min.min(min);
            let grown_max = cached.max.max(max);

            self.stats.grow_checks += 1;
            if Self::acceptable(frustum, grown_min, grown_max) {
                cached.min = grown_min;
                cached.max = grown_max;
                cached.hits += 1;
                return;
            }
        }

        if self.boxes.len() < self.max_boxes {
            self.boxes.push(CachedBox { min, max, hits: 1 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frustum stub bounded by an axis-aligned box
    struct BoxFrustum {
        min: Vec3,
        max: Vec3,
    }

    impl Frustum for BoxFrustum {
        fn box_visibility(&self, min: Vec3, max: Vec3) -> Visibility {
            if min.cmpge(self.min).all() && max.cmple(self.max).all() {
                Visibility::Inside
            } else if min.cmplt(self.max).all() && max.cmpgt(self.min).all() {
                Visibility::Intersecting
            } else {
                Visibility::Outside
            }
        }
    }

    fn wide_frustum() -> BoxFrustum {
        BoxFrustum {
            min: Vec3::splat(-100.0),
            max: Vec3::splat(100.0),
        }
    }

    #[test]
    fn test_exact_results_pass_through() {
        let frustum = wide_frustum();
        let mut cache = FrustumCache::new();
        cache.begin_frame(&frustum);

        assert!(cache.is_box_visible(&frustum, Vec3::ZERO, Vec3::ONE));
        assert!(!cache.is_box_visible(&frustum, Vec3::splat(200.0), Vec3::splat(201.0)));
        assert_eq!(cache.stats().exact_checks, 2);
    }

    #[test]
    fn test_cached_box_skips_oracle() {
        let frustum = wide_frustum();
        let mut cache = FrustumCache::new();
        cache.begin_frame(&frustum);

        // force a box into the cache, then query inside it
        cache.grow(&frustum, Vec3::splat(-50.0), Vec3::splat(50.0));
        let exact_before = cache.stats().exact_checks;
        assert!(cache.is_box_visible(&frustum, Vec3::ZERO, Vec3::ONE));
        assert_eq!(cache.stats().exact_checks, exact_before);
    }

    #[test]
    fn test_growth_is_conservative() {
        // a cached box may never grow past what the oracle accepts with
        // the margin applied
        let frustum = BoxFrustum {
            min: Vec3::splat(0.0),
            max: Vec3::splat(10.0),
        };
        let mut cache = FrustumCache::new();

        cache.grow(&frustum, Vec3::splat(1.5), Vec3::splat(8.0));
        assert_eq!(cache.cached_box_count(), 1);

        // the union with a box poking past the frustum fails the shrunk
        // test, so the first box must stay at its old extent
        cache.grow(&frustum, Vec3::splat(11.0), Vec3::splat(12.0));
        assert_eq!(cache.cached_box_count(), 2);

        let exact_before = cache.stats().exact_checks;
        assert!(cache.is_box_visible(&frustum, Vec3::splat(8.5), Vec3::splat(9.0)));
        // the query fell between the two boxes, proving neither absorbed
        // the rejected union
        assert_eq!(cache.stats().exact_checks, exact_before + 1);
    }

    #[test]
    fn test_begin_frame_drops_stale_boxes() {
        let frustum = wide_frustum();
        let mut cache = FrustumCache::new();
        cache.grow(&frustum, Vec3::splat(-50.0), Vec3::splat(50.0));
        assert_eq!(cache.cached_box_count(), 1);

        // the frustum moved away; the cached box is no longer acceptable
        let moved = BoxFrustum {
            min: Vec3::splat(1000.0),
            max: Vec3::splat(1200.0),
        };
        cache.begin_frame(&moved);
        assert_eq!(cache.cached_box_count(), 0);
    }

    #[test]
    fn test_box_count_is_bounded() {
        let frustum = BoxFrustum {
            min: Vec3::splat(-1000.0),
            max: Vec3::splat(1000.0),
        };
        // degenerate frustum stub that rejects every union: disjoint slabs
        // cannot merge, so each grow attempt wants a fresh slot
        let mut cache = FrustumCache::with_capacity(3);
        for i in 0..10 {
            let offset = Vec3::new(i as f32 * 500.0 - 900.0, 0.0, 0.0);
            cache.grow(&frustum, offset, offset + Vec3::splat(2.0));
        }
        assert!(cache.cached_box_count() <= 3);
    }
}
