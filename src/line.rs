//! Infinite lines and the line × line intersection predicate

use rug::Float;

use crate::point::{Intersections, Point};
use crate::scalar::Ctx;

/// An infinite line through two distinct points. The points are borrowed
/// from the working set; a line lives for one comparison only.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    /// First defining point.
    pub p1: &'a Point,
    /// Second defining point.
    pub p2: &'a Point,
}

impl<'a> Line<'a> {
    /// The line through `p1` and `p2`. Callers guarantee the points are
    /// distinct (the expansion driver skips zero-distance pairs).
    pub fn through(p1: &'a Point, p2: &'a Point) -> Self {
        Self { p1, p2 }
    }
}

/// Intersection of two infinite lines.
///
/// Determinant form (Wolfram line-line): the lines `a₁x + b₁y = c₁` and
/// `a₂x + b₂y = c₂` meet at a single point unless `det = a₁b₂ − a₂b₁` is
/// zero within ε, which covers both parallel and coincident lines.
pub fn line_line(ctx: &Ctx, n1: &Line<'_>, n2: &Line<'_>) -> Intersections {
    let prec = ctx.precision();

    // a1 = p2.y - p1.y; b1 = p1.x - p2.x; c1 = a1*p1.x + b1*p1.y
    let a1 = Float::with_val(prec, n1.p2.y() - n1.p1.y());
    let b1 = Float::with_val(prec, n1.p1.x() - n1.p2.x());
    let mut c1 = Float::with_val(prec, &a1 * n1.p1.x());
    c1 += Float::with_val(prec, &b1 * n1.p1.y());

    let a2 = Float::with_val(prec, n2.p2.y() - n2.p1.y());
    let b2 = Float::with_val(prec, n2.p1.x() - n2.p2.x());
    let mut c2 = Float::with_val(prec, &a2 * n2.p1.x());
    c2 += Float::with_val(prec, &b2 * n2.p1.y());

    // det = a1*b2 - a2*b1
    let mut det = Float::with_val(prec, &a1 * &b2);
    det -= Float::with_val(prec, &a2 * &b1);

    if ctx.is_zero(&det) {
        return Intersections::None;
    }

    // x = (b2*c1 - b1*c2) / det
    let mut x = Float::with_val(prec, &b2 * &c1);
    x -= Float::with_val(prec, &b1 * &c2);
    x /= &det;

    // y = (a1*c2 - a2*c1) / det
    let mut y = Float::with_val(prec, &a1 * &c2);
    y -= Float::with_val(prec, &a2 * &c1);
    y /= &det;

    Intersections::One(Point::new(ctx, x, y))
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
    fn crossing_lines_meet_once() {
        // (0,0)-(1,1) x (0,10)-(10,0) -> (5,5)
        let c = ctx();
        let a = Point::from_i64(&c, 0, 0);
        let b = Point::from_i64(&c, 1, 1);
        let d = Point::from_i64(&c, 0, 10);
        let e = Point::from_i64(&c, 10, 0);

        let found = line_line(&c, &Line::through(&a, &b), &Line::through(&d, &e));
        match found {
            Intersections::One(p) => assert_eq!(p, Point::from_i64(&c, 5, 5)),
            other => panic!("expected one intersection, got {other:?}"),
        }
    }

    #[test]
    fn parallel_lines_do_not_meet() {
        let c = ctx();
        let a = Point::from_i64(&c, 0, 0);
        let b = Point::from_i64(&c, 1, 0);
        let d = Point::from_i64(&c, 0, 1);
        let e = Point::from_i64(&c, 1, 1);

        let found = line_line(&c, &Line::through(&a, &b), &Line::through(&d, &e));
        assert_eq!(found.count(), 0);
    }

    #[test]
    fn coincident_lines_do_not_meet() {
        let c = ctx();
        let a = Point::from_i64(&c, 0, 0);
        let b = Point::from_i64(&c, 1, 1);
        let d = Point::from_i64(&c, 2, 2);

        let found = line_line(&c, &Line::through(&a, &b), &Line::through(&a, &d));
        assert_eq!(found.count(), 0);
    }

    #[test]
    fn intersection_is_symmetric() {
        let c = ctx();
        let a = Point::from_i64(&c, -3, 2);
        let b = Point::from_i64(&c, 4, 5);
        let d = Point::from_i64(&c, 0, -7);
        let e = Point::from_i64(&c, 1, 6);
        let l1 = Line::through(&a, &b);
        let l2 = Line::through(&d, &e);

        let forward = line_line(&c, &l1, &l2);
        let backward = line_line(&c, &l2, &l1);
        let fw: Vec<Point> = forward.into_iter().collect();
        let bw: Vec<Point> = backward.into_iter().collect();
        assert_eq!(fw, bw);
    }
}
