//! Wrap-aware arithmetic over a bounded integer space.
//!
//! TCP sequence and acknowledgment numbers live in a modular space: a
//! long-lived connection wraps past the top of the counter and keeps
//! going. All comparisons between absolute sequence numbers must therefore
//! use the short-arc rule rather than plain integer ordering.
//!
//! [`Modulo`] operates over `[0, max]`. For TCP sequence numbers the space
//! is [`TCP_SEQ_MAX`] (`2^33 - 1`): the headroom above the 32-bit wire
//! counter keeps `nxtseq` values that cross the wire wrap comparable.

use std::cmp::Ordering;

/// Upper bound of the TCP sequence space used by the engine.
pub const TCP_SEQ_MAX: i64 = (1 << 33) - 1;

/// Modular arithmetic over `[0, max]`.
#[derive(Debug, Clone, Copy)]
pub struct Modulo {
    max: i64,
}

impl Modulo {
    pub fn new(max: i64) -> Self {
        Modulo { max }
    }

    /// One past `max`: the period of the space.
    #[inline]
    fn period(&self) -> i64 {
        self.max + 1
    }

    /// Half the period. Values exactly this far apart are on the wrap
    /// boundary of the short-arc rule.
    #[inline]
    fn half(&self) -> i64 {
        self.period() >> 1
    }

    /// Returns the canonical representative of `x` in `[0, max]`.
    ///
    /// Correct for arbitrarily negative inputs and inputs many periods
    /// above the space.
    #[inline]
    pub fn wrap(&self, x: i64) -> i64 {
        ((x % self.period()) + self.period()) % self.period()
    }

    /// Returns `x + y` wrapped into `[0, max]`.
    #[inline]
    pub fn add(&self, x: i64, y: i64) -> i64 {
        self.wrap(x + y)
    }

    /// Returns the non-negative wrap of `x - y`, in `[0, max]`.
    ///
    /// When the caller knows `x` is the later value in the modular sense,
    /// this is the number of units covered from `y` up to `x`.
    #[inline]
    pub fn diff(&self, x: i64, y: i64) -> i64 {
        self.wrap(x - y)
    }

    /// Returns the signed short-arc distance `x - y`.
    #[inline]
    pub fn sub(&self, x: i64, y: i64) -> i64 {
        let diff = self.wrap(x - y);
        if diff > self.half() {
            diff - self.period()
        } else {
            diff
        }
    }

    /// Compares `x` and `y` under the short-arc rule.
    ///
    /// Values exactly half the period apart compare as `x < y`.
    pub fn cmp(&self, x: i64, y: i64) -> Ordering {
        let diff = self.wrap(y - x);
        if diff == 0 {
            Ordering::Equal
        } else if diff > self.half() {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Returns the later of two optional values per [`Modulo::cmp`].
    ///
    /// A missing operand yields the other one.
    pub fn max(&self, x: Option<i64>, y: Option<i64>) -> Option<i64> {
        match (x, y) {
            (None, y) => y,
            (x, None) => x,
            (Some(x), Some(y)) => {
                if self.cmp(x, y) == Ordering::Less {
                    Some(y)
                } else {
                    Some(x)
                }
            }
        }
    }

    /// Whether the closed ranges `[x1, x2]` and `[y1, y2]` overlap at all.
    pub fn range_overlap(&self, x1: i64, x2: i64, y1: i64, y2: i64) -> bool {
        !(self.cmp(y2, x1) == Ordering::Less || self.cmp(y1, x2) == Ordering::Greater)
    }

    /// Maps `x` onto the same timeline as `ref_value`.
    ///
    /// A timeline is one run from 0 to `max`; two values separated by a
    /// wrap point cannot be compared directly. The mapped value may be
    /// negative or exceed `max`. Values more than half the period apart
    /// cannot be mapped correctly (aliasing).
    pub fn map_into_same_timeline(&self, x: i64, ref_value: i64) -> i64 {
        if x > ref_value + self.half() {
            // x -> wrap point -> ref
            x - self.period()
        } else if ref_value > x + self.half() {
            // ref -> wrap point -> x
            x + self.period()
        } else {
            x
        }
    }
}
