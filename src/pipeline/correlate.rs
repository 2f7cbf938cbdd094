//! Reply correlation: map an in-reply-to target back to its record id.
//!
//! Two indices are kept. The object-id index is exact and survives
//! rectangles that two unrelated annotations happen to share. The rectangle
//! index covers replies whose `/IRT` is a direct dictionary (no object id)
//! and matches the behaviour of tools that key threads by geometry.
//!
//! Rectangles are compared through [`RectKey`]: each coordinate rounded to
//! 1/1000 of a PDF unit, so `Integer(100)` and `Real(100.0)` agree while
//! genuinely different rectangles do not.

use crate::output::Rect;
use crate::pipeline::walk::ReplyTarget;
use lopdf::ObjectId;
use std::collections::HashMap;

/// Lookup precision for rectangles: 1/1000 of a PDF unit.
pub const RECT_KEY_SCALE: f64 = 1000.0;

/// A rectangle canonicalised for hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RectKey([i64; 4]);

impl From<Rect> for RectKey {
    fn from(r: Rect) -> Self {
        let q = |v: f64| (v * RECT_KEY_SCALE).round() as i64;
        RectKey([q(r.x0), q(r.y0), q(r.x1), q(r.y1)])
    }
}

/// Registry from annotation identity / geometry to the owning record id.
#[derive(Debug, Default)]
pub struct ReplyCorrelator {
    by_object: HashMap<ObjectId, u32>,
    by_rect: HashMap<RectKey, u32>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an annotation as belonging to `record_id`.
    ///
    /// The first registration of a rectangle wins; later annotations with
    /// the same rectangle do not steal it.
    pub fn register(&mut self, object_id: Option<ObjectId>, rect: Rect, record_id: u32) {
        if let Some(id) = object_id {
            self.by_object.entry(id).or_insert(record_id);
        }
        self.by_rect.entry(RectKey::from(rect)).or_insert(record_id);
    }

    /// Find the record a reply belongs to: object id first, then rectangle.
    pub fn resolve(&self, target: &ReplyTarget) -> Option<u32> {
        target
            .object_id
            .and_then(|id| self.by_object.get(&id).copied())
            .or_else(|| {
                target
                    .rect
                    .and_then(|r| self.by_rect.get(&RectKey::from(r)).copied())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(object_id: Option<ObjectId>, rect: Option<Rect>) -> ReplyTarget {
        ReplyTarget { object_id, rect }
    }

    #[test]
    fn resolves_by_rect() {
        let mut c = ReplyCorrelator::new();
        let r = Rect::new(100.0, 200.0, 300.0, 250.0);
        c.register(None, r, 1);
        assert_eq!(c.resolve(&target(None, Some(r))), Some(1));
        assert_eq!(
            c.resolve(&target(None, Some(Rect::new(100.0, 200.0, 300.0, 251.0)))),
            None
        );
    }

    #[test]
    fn object_id_beats_shared_rect() {
        let mut c = ReplyCorrelator::new();
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        c.register(Some((5, 0)), r, 1);
        c.register(Some((9, 0)), r, 2);
        assert_eq!(c.resolve(&target(Some((9, 0)), Some(r))), Some(2));
        // Without identity the first registration of the rectangle wins.
        assert_eq!(c.resolve(&target(None, Some(r))), Some(1));
    }

    #[test]
    fn unknown_object_falls_back_to_rect() {
        let mut c = ReplyCorrelator::new();
        let r = Rect::new(1.0, 2.0, 3.0, 4.0);
        c.register(Some((5, 0)), r, 3);
        assert_eq!(c.resolve(&target(Some((42, 0)), Some(r))), Some(3));
        assert_eq!(c.resolve(&target(Some((42, 0)), None)), None);
    }

    #[test]
    fn rect_key_tolerates_representation_noise() {
        let a = RectKey::from(Rect::new(100.0, 200.0, 300.0, 250.0));
        let b = RectKey::from(Rect::new(100.0002, 199.9999, 300.0, 250.0004));
        let c = RectKey::from(Rect::new(100.01, 200.0, 300.0, 250.0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
