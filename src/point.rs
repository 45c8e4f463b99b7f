//! Two-dimensional points and their canonical fingerprint
//!
//! A [`Point`] owns its coordinates plus a derived [`PointKey`]: the pair of
//! fixed-width decimal renderings that every identity decision (in-process
//! dedup, store uniqueness, sort order) is keyed on. Coordinates within ε of
//! zero are snapped to exact zero *before* rendering so `-0` and `+0` can
//! never produce distinct keys. Points are immutable after construction,
//! which keeps key and coordinates consistent by construction.

use std::cmp::Ordering;
use std::fmt;

use rug::Float;

use crate::scalar::{Ctx, ScalarError};

/// Canonical fingerprint of a point: the fixed-width decimal renderings of
/// `x` and `y`. Lexicographic ordering of the pair is the stable `(x, y)`
/// ordering used by the stores and the working list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointKey {
    /// Rendering of the x coordinate.
    pub x: String,
    /// Rendering of the y coordinate.
    pub y: String,
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// A point in the plane with its fingerprint and store bookkeeping.
#[derive(Debug, Clone)]
pub struct Point {
    x: Float,
    y: Float,
    key: PointKey,
    /// Persistent id assigned by the work store, if any.
    pub id: Option<i64>,
    /// Whether this point is already persisted in the known set.
    pub in_store: bool,
}

impl Point {
    /// Builds a point from two scalars, snapping near-zero coordinates and
    /// deriving the fingerprint.
    pub fn new(ctx: &Ctx, x: Float, y: Float) -> Self {
        let x = snap_zero(ctx, x);
        let y = snap_zero(ctx, y);
        let key = PointKey { x: render(ctx, &x), y: render(ctx, &y) };
        Self { x, y, key, id: None, in_store: false }
    }

    /// Point from signed integer coordinates.
    pub fn from_i64(ctx: &Ctx, x: i64, y: i64) -> Self {
        Self::new(ctx, ctx.from_i64(x), ctx.from_i64(y))
    }

    /// Point from two decimal strings.
    pub fn parse(ctx: &Ctx, x: &str, y: &str) -> Result<Self, ScalarError> {
        Ok(Self::new(ctx, ctx.parse(x)?, ctx.parse(y)?))
    }

    /// Point reconstructed from a store row: coordinate text plus the
    /// persistent id. Rows are always already persisted.
    pub fn from_row(ctx: &Ctx, x: &str, y: &str, id: i64) -> Result<Self, ScalarError> {
        let mut p = Self::parse(ctx, x, y)?;
        p.id = Some(id);
        p.in_store = true;
        Ok(p)
    }

    /// The x coordinate.
    pub fn x(&self) -> &Float {
        &self.x
    }

    /// The y coordinate.
    pub fn y(&self) -> &Float {
        &self.y
    }

    /// The canonical fingerprint.
    pub fn key(&self) -> &PointKey {
        &self.key
    }

    /// Rendering for status output at the given digit count.
    pub fn display(&self, digits: usize) -> String {
        format!("{{{:.*}, {:.*}}}", digits, self.x, digits, self.y)
    }
}

/// Identity is the fingerprint, nothing else.
impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Point {}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The stable `(x, y)` ordering shared with the stores.
impl Ord for Point {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Exact (unrounded) Euclidean distance between two points.
pub fn distance(ctx: &Ctx, a: &Point, b: &Point) -> Float {
    let prec = ctx.precision();
    let dx = Float::with_val(prec, a.x() - b.x());
    let dy = Float::with_val(prec, a.y() - b.y());
    let mut sum = Float::with_val(prec, &dx * &dx);
    sum += Float::with_val(prec, &dy * &dy);
    sum.sqrt()
}

fn snap_zero(ctx: &Ctx, f: Float) -> Float {
    if ctx.is_zero(&f) {
        ctx.zero()
    } else {
        f
    }
}

/// Locale-independent fixed-point rendering with `D` fractional digits,
/// capped at `D` bytes (the stored column width).
fn render(ctx: &Ctx, f: &Float) -> String {
    let digits = ctx.key_digits();
    let mut text = format!("{:.*}", digits, f);
    text.truncate(digits);
    text
}

// ============================================================================
// Intersection results
// ============================================================================

/// Result of one intersection predicate: zero, one, or two fresh points.
#[derive(Debug)]
pub enum Intersections {
    /// The primitives do not intersect (or coincide).
    None,
    /// A single intersection point.
    One(Point),
    /// Two distinct intersection points.
    Two(Point, Point),
}

impl Intersections {
    /// Number of points found.
    pub fn count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::One(_) => 1,
            Self::Two(_, _) => 2,
        }
    }
}

/// Owning iterator over up to two intersection points.
#[derive(Debug)]
pub struct IntersectionsIter(Option<Point>, Option<Point>);

impl Iterator for IntersectionsIter {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        self.0.take().or_else(|| self.1.take())
    }
}

impl IntoIterator for Intersections {
    type Item = Point;
    type IntoIter = IntersectionsIter;

    fn into_iter(self) -> IntersectionsIter {
        match self {
            Self::None => IntersectionsIter(None, None),
            Self::One(p) => IntersectionsIter(Some(p), None),
            Self::Two(a, b) => IntersectionsIter(Some(a), Some(b)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::new(200, "1e-20", 60).unwrap()
    }

    #[test]
    fn fingerprints_snap_negative_zero() {
        let c = ctx();
        let zero = Point::from_i64(&c, 0, 0);
        let tiny = Point::parse(&c, "-0.0000000000000000000000005", "1e-25").unwrap();
        assert_eq!(zero.key(), tiny.key());
        assert_eq!(tiny.key().x, zero.key().x);
        // The snapped coordinate really is exact zero, not just close.
        assert_eq!(tiny.x().cmp0(), Some(std::cmp::Ordering::Equal));
    }

    #[test]
    fn equal_coordinates_share_a_key() {
        let c = ctx();
        let a = Point::parse(&c, "0.5", "0.25").unwrap();
        // Differs only beyond the rendered digit count.
        let offset = c.parse("1e-70").unwrap();
        let x = rug::Float::with_val(c.precision(), a.x() + &offset);
        let b = Point::new(&c, x, a.y().clone());
        assert_eq!(a, b);
    }

    #[test]
    fn keys_are_width_capped() {
        let c = Ctx::new(200, "1e-20", 12).unwrap();
        let p = Point::parse(&c, "-0.333333333333333333", "2").unwrap();
        assert!(p.key().x.len() <= 12);
        assert!(p.key().y.len() <= 12);
        assert!(p.key().x.starts_with("-0.33333"));
    }

    #[test]
    fn row_round_trip_preserves_identity() {
        let c = ctx();
        let p = Point::parse(&c, "1.25", "-3.5").unwrap();
        let q = Point::from_row(&c, &p.key().x, &p.key().y, 7).unwrap();
        assert_eq!(p, q);
        assert_eq!(q.id, Some(7));
        assert!(q.in_store);
    }

    #[test]
    fn distance_is_exact_euclidean() {
        let c = ctx();
        let a = Point::from_i64(&c, 0, 0);
        let b = Point::from_i64(&c, 3, 4);
        let d = distance(&c, &a, &b);
        assert_eq!(c.cmp(&d, &c.from_i64(5)), std::cmp::Ordering::Equal);
        assert!(c.is_zero(&distance(&c, &a, &a)));
    }

    #[test]
    fn ordering_follows_the_key_pair() {
        let c = ctx();
        let mut pts = vec![
            Point::from_i64(&c, 1, 0),
            Point::from_i64(&c, 0, 1),
            Point::from_i64(&c, 0, 0),
        ];
        pts.sort();
        assert_eq!(pts[0].key().y, Point::from_i64(&c, 0, 0).key().y);
        assert_eq!(pts[1], Point::from_i64(&c, 0, 1));
        assert_eq!(pts[2], Point::from_i64(&c, 1, 0));
    }

    #[test]
    fn intersections_iterate_in_order() {
        let c = ctx();
        let a = Point::from_i64(&c, 1, 1);
        let b = Point::from_i64(&c, 2, 2);
        let two = Intersections::Two(a.clone(), b.clone());
        assert_eq!(two.count(), 2);
        let got: Vec<Point> = two.into_iter().collect();
        assert_eq!(got, vec![a, b]);
        assert_eq!(Intersections::None.count(), 0);
        assert_eq!(Intersections::None.into_iter().count(), 0);
    }
}
