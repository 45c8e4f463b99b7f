//! High-precision scalar arithmetic context
//!
//! Every scalar in a run is a [`rug::Float`] carrying the mantissa width
//! configured at startup, and every equality decision is ε-thresholded:
//! two scalars are equal iff the absolute difference is at most ε. The
//! [`Ctx`] value owns both knobs (plus the fingerprint digit count used by
//! [`crate::point`]) and is passed by reference to every computation, so
//! there is no hidden process-wide state and contexts with different
//! settings can coexist in tests.
//!
//! ## Invariants
//!
//! - A `Ctx` is immutable after construction.
//! - All temporaries produced through a `Ctx` carry its precision.
//! - `is_zero`, `cmp_zero`, and `cmp` agree: `cmp(a, b) == Equal` iff
//!   `is_zero(a - b)`.

use std::cmp::Ordering;

use rug::Float;

/// Errors raised while building a [`Ctx`] or parsing a scalar.
#[derive(Debug, thiserror::Error)]
pub enum ScalarError {
    /// The mantissa width must be at least one bit.
    #[error("precision must be positive")]
    ZeroPrecision,
    /// The fingerprint digit count must be at least one.
    #[error("fingerprint digit count must be positive")]
    ZeroDigits,
    /// A value that should have been a decimal number was not.
    #[error("not a decimal number: `{0}`")]
    Parse(String),
}

/// Shared arithmetic context: mantissa width, ε, and fingerprint digits.
#[derive(Debug, Clone)]
pub struct Ctx {
    prec: u32,
    eps: Float,
    key_digits: usize,
}

impl Ctx {
    /// Builds a context from the configured mantissa width, the ε decimal
    /// string, and the fingerprint digit count `D`.
    pub fn new(precision_bits: u32, epsilon: &str, key_digits: usize) -> Result<Self, ScalarError> {
        if precision_bits == 0 {
            return Err(ScalarError::ZeroPrecision);
        }
        if key_digits == 0 {
            return Err(ScalarError::ZeroDigits);
        }
        let parsed =
            Float::parse(epsilon).map_err(|_| ScalarError::Parse(epsilon.to_owned()))?;
        let mut eps = Float::with_val(precision_bits, parsed);
        eps.abs_mut();
        Ok(Self { prec: precision_bits, eps, key_digits })
    }

    /// Mantissa width in bits.
    pub fn precision(&self) -> u32 {
        self.prec
    }

    /// The absolute tolerance ε.
    pub fn epsilon(&self) -> &Float {
        &self.eps
    }

    /// Fingerprint digit count `D`.
    pub fn key_digits(&self) -> usize {
        self.key_digits
    }

    /// A fresh zero scalar at context precision.
    pub fn zero(&self) -> Float {
        Float::new(self.prec)
    }

    /// Scalar from a signed integer.
    pub fn from_i64(&self, value: i64) -> Float {
        Float::with_val(self.prec, value)
    }

    /// Scalar from a decimal string.
    pub fn parse(&self, text: &str) -> Result<Float, ScalarError> {
        let parsed = Float::parse(text).map_err(|_| ScalarError::Parse(text.to_owned()))?;
        Ok(Float::with_val(self.prec, parsed))
    }

    /// Whether `|f| ≤ ε`.
    pub fn is_zero(&self, f: &Float) -> bool {
        let mut mag = f.clone();
        mag.abs_mut();
        mag <= self.eps
    }

    /// Three-way comparison of `f` against zero, within ε.
    pub fn cmp_zero(&self, f: &Float) -> Ordering {
        if self.is_zero(f) {
            return Ordering::Equal;
        }
        match f.cmp0() {
            Some(Ordering::Less) => Ordering::Less,
            _ => Ordering::Greater,
        }
    }

    /// Three-way comparison of two scalars, within ε.
    pub fn cmp(&self, a: &Float, b: &Float) -> Ordering {
        let diff = Float::with_val(self.prec, a - b);
        self.cmp_zero(&diff)
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
    fn epsilon_is_parsed_and_positive() {
        let c = ctx();
        assert!(*c.epsilon() > 0);
        assert_eq!(c.precision(), 200);
        assert_eq!(c.key_digits(), 60);

        // A negative ε string is folded to its magnitude.
        let c2 = Ctx::new(64, "-0.5", 10).unwrap();
        assert!(*c2.epsilon() > 0);
    }

    #[test]
    fn rejects_bad_construction() {
        assert!(matches!(Ctx::new(0, "1e-20", 60), Err(ScalarError::ZeroPrecision)));
        assert!(matches!(Ctx::new(200, "1e-20", 0), Err(ScalarError::ZeroDigits)));
        assert!(matches!(Ctx::new(200, "not-a-number", 60), Err(ScalarError::Parse(_))));
    }

    #[test]
    fn zero_test_is_tolerant() {
        let c = ctx();
        assert!(c.is_zero(&c.zero()));
        assert!(c.is_zero(&c.parse("1e-21").unwrap()));
        assert!(c.is_zero(&c.parse("-1e-21").unwrap()));
        assert!(!c.is_zero(&c.parse("1e-19").unwrap()));
    }

    #[test]
    fn three_way_comparisons() {
        let c = ctx();
        let one = c.from_i64(1);
        let two = c.from_i64(2);
        assert_eq!(c.cmp(&one, &two), Ordering::Less);
        assert_eq!(c.cmp(&two, &one), Ordering::Greater);
        assert_eq!(c.cmp(&one, &one), Ordering::Equal);

        // Values closer than ε compare equal.
        let near = c.parse("1.000000000000000000000001").unwrap();
        assert_eq!(c.cmp(&one, &near), Ordering::Equal);

        assert_eq!(c.cmp_zero(&c.parse("-3").unwrap()), Ordering::Less);
        assert_eq!(c.cmp_zero(&c.parse("3").unwrap()), Ordering::Greater);
        assert_eq!(c.cmp_zero(&c.parse("-1e-30").unwrap()), Ordering::Equal);
    }

    #[test]
    fn parse_reports_offending_text() {
        let c = ctx();
        match c.parse("12,5") {
            Err(ScalarError::Parse(s)) => assert_eq!(s, "12,5"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
