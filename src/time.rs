//! Virtual time for the deterministic simulation.
//!
//! Represents a logical timestamp with no dependency on `std::time`.
//! Time advances only when the kernel pops the next event, never from
//! wall-clock observation.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A point on the simulated clock, in simulated seconds.
///
/// Backed by an `f64` but totally ordered (`f64::total_cmp`) so that it can
/// key ordered collections. Negative zero is normalised to zero on
/// construction so equal instants always compare and hash equal.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtualTime(f64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0.0);

    /// Create a new `VirtualTime` from a raw value.
    #[inline]
    pub fn new(secs: f64) -> Self {
        VirtualTime(secs + 0.0)
    }

    /// Return the raw value.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Compute the absolute time that is `delay` after `self`.
    ///
    /// Returns `None` when `delay` is negative or not finite, or when the
    /// sum overflows to infinity.
    #[inline]
    pub fn plus(self, delay: f64) -> Option<VirtualTime> {
        if !delay.is_finite() || delay < 0.0 {
            return None;
        }
        let at = self.0 + delay;
        at.is_finite().then(|| VirtualTime::new(at))
    }

    /// Returns `true` if `self` is strictly before `other`.
    #[inline]
    pub fn is_before(self, other: VirtualTime) -> bool {
        self < other
    }

    /// Returns the elapsed time between two points.
    /// Returns `None` if `other` is after `self`.
    #[inline]
    pub fn duration_since(self, other: VirtualTime) -> Option<f64> {
        (self >= other).then(|| self.0 - other.0)
    }
}

impl Default for VirtualTime {
    fn default() -> Self {
        VirtualTime::ZERO
    }
}

impl PartialEq for VirtualTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VirtualTime {}

impl Ord for VirtualTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for VirtualTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for VirtualTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(VirtualTime::ZERO.as_f64(), 0.0);
        assert_eq!(VirtualTime::default(), VirtualTime::ZERO);
    }

    #[test]
    fn test_ordering() {
        let t1 = VirtualTime::new(1.5);
        let t2 = VirtualTime::new(2.0);
        assert!(t1 < t2);
        assert!(t1.is_before(t2));
        assert!(!t2.is_before(t1));
    }

    #[test]
    fn test_plus() {
        let t = VirtualTime::new(10.0);
        assert_eq!(t.plus(2.5), Some(VirtualTime::new(12.5)));
        assert_eq!(t.plus(0.0), Some(t));
    }

    #[test]
    fn test_plus_rejects_bad_delays() {
        let t = VirtualTime::new(10.0);
        assert!(t.plus(-1.0).is_none());
        assert!(t.plus(f64::NAN).is_none());
        assert!(t.plus(f64::INFINITY).is_none());
        assert!(VirtualTime::new(f64::MAX).plus(f64::MAX).is_none());
    }

    #[test]
    fn test_negative_zero_normalised() {
        let a = VirtualTime::new(-0.0);
        assert_eq!(a, VirtualTime::ZERO);
        assert_eq!(a.as_f64().to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn test_duration_since() {
        let t1 = VirtualTime::new(10.0);
        let t2 = VirtualTime::new(30.0);
        assert_eq!(t2.duration_since(t1), Some(20.0));
        assert_eq!(t1.duration_since(t2), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", VirtualTime::new(42.0)), "T=42");
        assert_eq!(format!("{}", VirtualTime::new(0.5)), "T=0.5");
    }
}
