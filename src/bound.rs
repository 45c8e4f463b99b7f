//! Combinatorial upper bound on a generation's point count
//!
//! A working set of `n` points yields `n(n−1)/2` pairs, each pair three
//! objects (one line, two circles), so `b = 3n(n−1)/2` objects in total.
//! Every object pair meets in at most two points, giving `b(b−1)` as the
//! bound for the next generation.

use rug::Integer;

/// The upper bound for the generation following one with `n` points.
pub fn next_upper_bound(n: &Integer) -> Integer {
    // b = 3n(n-1)/2; n(n-1) is even so the division is exact.
    let mut b = Integer::from(n - 1u32);
    b *= n;
    b *= 3u32;
    b /= 2u32;

    let out = Integer::from(&b - 1u32);
    out * b
}

/// The first `generations` values of the bound sequence from `start`
/// points: the starting count itself, then each successive bound.
pub fn bound_sequence(start: Integer, generations: usize) -> Vec<Integer> {
    let mut out = Vec::with_capacity(generations);
    let mut current = start;
    for _ in 0..generations {
        let next = next_upper_bound(&current);
        out.push(current);
        current = next;
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
