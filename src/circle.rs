//! Circles and the circle × line / circle × circle intersection predicates
//!
//! Both predicates classify the configuration with the ε-tolerant
//! comparators before any division or square root, so every quotient has a
//! guarded non-zero denominator and every radicand is non-negative on the
//! branch that reaches it.

use rug::Float;

use crate::line::Line;
use crate::point::{self, Intersections, Point};
use crate::scalar::Ctx;

/// A circle: borrowed center plus owned non-negative radius.
#[derive(Debug)]
pub struct Circle<'a> {
    /// Center point, borrowed from the working set.
    pub center: &'a Point,
    /// Radius scalar.
    pub radius: Float,
}

impl<'a> Circle<'a> {
    /// Circle with the given center and radius.
    pub fn new(center: &'a Point, radius: Float) -> Self {
        Self { center, radius }
    }
}

/// Intersection of a circle and an infinite line.
///
/// Quadratic in the line parameter μ (Bourke circle-sphere form):
/// `A·μ² + B·μ + C₀ = 0`, with the discriminant Δ classified by
/// `cmp_zero`. Each solution maps to `(p₁ + μ·d)` on the line.
pub fn circle_line(ctx: &Ctx, c: &Circle<'_>, n: &Line<'_>) -> Intersections {
    let prec = ctx.precision();
    let o = c.center;

    let dx = Float::with_val(prec, n.p2.x() - n.p1.x());
    let dy = Float::with_val(prec, n.p2.y() - n.p1.y());

    // A = dx^2 + dy^2
    let mut big_a = Float::with_val(prec, &dx * &dx);
    big_a += Float::with_val(prec, &dy * &dy);

    // B = 2*(dx*(p1.x - o.x) + dy*(p1.y - o.y))
    let ox = Float::with_val(prec, n.p1.x() - o.x());
    let oy = Float::with_val(prec, n.p1.y() - o.y());
    let mut big_b = Float::with_val(prec, &dx * &ox);
    big_b += Float::with_val(prec, &dy * &oy);
    big_b *= 2;

    // C0 = o.x^2 + o.y^2 + p1.x^2 + p1.y^2 - 2*(o.x*p1.x + o.y*p1.y) - r^2
    let mut c0 = Float::with_val(prec, o.x() * o.x());
    c0 += Float::with_val(prec, o.y() * o.y());
    c0 += Float::with_val(prec, n.p1.x() * n.p1.x());
    c0 += Float::with_val(prec, n.p1.y() * n.p1.y());
    let mut cross = Float::with_val(prec, o.x() * n.p1.x());
    cross += Float::with_val(prec, o.y() * n.p1.y());
    cross *= 2;
    c0 -= &cross;
    c0 -= Float::with_val(prec, &c.radius * &c.radius);

    // delta = B^2 - 4*A*C0
    let mut delta = Float::with_val(prec, &big_b * &big_b);
    let mut four_ac = Float::with_val(prec, &big_a * &c0);
    four_ac *= 4;
    delta -= &four_ac;

    // The line's defining points are distinct, so A > 0.
    debug_assert!(!ctx.is_zero(&big_a), "degenerate line in circle intersection");

    let two_a = Float::with_val(prec, &big_a * 2u32);
    match ctx.cmp_zero(&delta) {
        std::cmp::Ordering::Less => Intersections::None,
        std::cmp::Ordering::Equal => {
            // mu = -B / (2A)
            let mut mu = Float::with_val(prec, -&big_b);
            mu /= &two_a;
            Intersections::One(point_at(ctx, n, &mu, &dx, &dy))
        }
        std::cmp::Ordering::Greater => {
            let root = delta.sqrt();
            // mu1 = (-B + sqrt(delta)) / (2A)
            let mut mu1 = Float::with_val(prec, &root - &big_b);
            mu1 /= &two_a;
            // mu2 = (-B - sqrt(delta)) / (2A)
            let mut mu2 = Float::with_val(prec, &big_b + &root);
            mu2 = -mu2;
            mu2 /= &two_a;
            Intersections::Two(
                point_at(ctx, n, &mu1, &dx, &dy),
                point_at(ctx, n, &mu2, &dx, &dy),
            )
        }
    }
}

/// The point `p1 + mu*(dx, dy)` on a line.
fn point_at(ctx: &Ctx, n: &Line<'_>, mu: &Float, dx: &Float, dy: &Float) -> Point {
    let prec = ctx.precision();
    let mut x = Float::with_val(prec, mu * dx);
    x += n.p1.x();
    let mut y = Float::with_val(prec, mu * dy);
    y += n.p1.y();
    Point::new(ctx, x, y)
}

/// Intersection of two circles.
///
/// Classifies by the center distance `d` against the radius sum and the
/// radius difference: concentric, separate, or nested configurations yield
/// nothing; a tangent configuration yields the radical-line midpoint; the
/// general case yields that midpoint offset by `(−Δy·h/d, Δx·h/d)`.
pub fn circle_circle(ctx: &Ctx, c1: &Circle<'_>, c2: &Circle<'_>) -> Intersections {
    let prec = ctx.precision();

    let radius_sum = Float::with_val(prec, &c1.radius + &c2.radius);
    let mut radius_diff = Float::with_val(prec, &c1.radius - &c2.radius);
    radius_diff.abs_mut();

    let dx = Float::with_val(prec, c2.center.x() - c1.center.x());
    let dy = Float::with_val(prec, c2.center.y() - c1.center.y());
    let d = point::distance(ctx, c1.center, c2.center);

    // Concentric circles never produce a point.
    if ctx.is_zero(&d) {
        return Intersections::None;
    }

    let sum_cmp = ctx.cmp(&d, &radius_sum);
    if sum_cmp == std::cmp::Ordering::Greater {
        // One circle entirely outside the other.
        return Intersections::None;
    }

    let diff_cmp = ctx.cmp(&d, &radius_diff);
    if diff_cmp == std::cmp::Ordering::Less {
        // One circle entirely inside the other.
        return Intersections::None;
    }

    // a = (r1^2 - r2^2 + d^2) / (2d): distance from c1's center to the
    // foot of the radical line on the center line.
    let r1_sq = Float::with_val(prec, &c1.radius * &c1.radius);
    let mut a = r1_sq.clone();
    a -= Float::with_val(prec, &c2.radius * &c2.radius);
    a += Float::with_val(prec, &d * &d);
    let two_d = Float::with_val(prec, &d * 2u32);
    a /= &two_d;

    // Midpoint p0 = c1 + (a/d)*(dx, dy)
    let mut x3 = Float::with_val(prec, &dx * &a);
    x3 /= &d;
    x3 += c1.center.x();
    let mut y3 = Float::with_val(prec, &dy * &a);
    y3 /= &d;
    y3 += c1.center.y();

    if sum_cmp == std::cmp::Ordering::Equal || diff_cmp == std::cmp::Ordering::Equal {
        // Tangent circles, a single point of contact.
        return Intersections::One(Point::new(ctx, x3, y3));
    }

    // h = sqrt(r1^2 - a^2), offset from the midpoint to each intersection.
    let mut h = r1_sq;
    h -= Float::with_val(prec, &a * &a);
    let h = h.sqrt();

    // rx = -dy*h/d; ry = dx*h/d
    let mut rx = Float::with_val(prec, &dy * &h);
    rx = -rx;
    rx /= &d;
    let mut ry = Float::with_val(prec, &dx * &h);
    ry /= &d;

    let mut x_plus = x3.clone();
    x_plus += &rx;
    let mut y_plus = y3.clone();
    y_plus += &ry;
    let mut x_minus = x3;
    x_minus -= &rx;
    let mut y_minus = y3;
    y_minus -= &ry;

    Intersections::Two(
        Point::new(ctx, x_plus, y_plus),
        Point::new(ctx, x_minus, y_minus),
    )
}

// ============================================================================
// Tests
// ============================================================================
