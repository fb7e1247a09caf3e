//! Axis-aligned bounding-box math.
//!
//! All operations are pure and total on valid boxes. A box is an ordered
//! sequence of per-dimension `(min, max)` ranges with `min <= max`. The
//! distinguished zero box `[(0, 0), ...]` stands for "unknown" and is only
//! ever carried by an empty root node.

use crate::error::{GroveError, Result};
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box with a fixed dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    ranges: Vec<(f64, f64)>,
}

impl BoundingBox {
    /// Create a box from per-dimension `(min, max)` ranges.
    ///
    /// Rejects empty range lists and any range with `min > max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use grove::BoundingBox;
    ///
    /// let b = BoundingBox::new(vec![(4.0, 5.0), (6.0, 7.0)]).unwrap();
    /// assert_eq!(b.dims(), 2);
    /// ```
    pub fn new(ranges: Vec<(f64, f64)>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(GroveError::InvalidBox("box has no dimensions".to_string()));
        }
        for (i, (min, max)) in ranges.iter().enumerate() {
            if !min.is_finite() || !max.is_finite() {
                return Err(GroveError::InvalidBox(format!(
                    "non-finite coordinate in dimension {i}"
                )));
            }
            if min > max {
                return Err(GroveError::InvalidBox(format!(
                    "min {min} > max {max} in dimension {i}"
                )));
            }
        }
        Ok(Self { ranges })
    }

    /// The zero box for `dims` dimensions.
    pub fn zero(dims: usize) -> Self {
        Self {
            ranges: vec![(0.0, 0.0); dims.max(1)],
        }
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.ranges.len()
    }

    /// Whether this is the distinguished zero box.
    pub fn is_zero(&self) -> bool {
        self.ranges.iter().all(|&(min, max)| min == 0.0 && max == 0.0)
    }

    /// The per-dimension ranges.
    pub fn ranges(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    /// Product of the per-dimension spans. Zero if any span is zero.
    pub fn area(&self) -> f64 {
        self.ranges.iter().map(|&(min, max)| max - min).product()
    }

    /// Element-wise union: the smallest box enclosing both inputs.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        debug_assert_eq!(self.dims(), other.dims());
        let ranges = self
            .ranges
            .iter()
            .zip(other.ranges.iter())
            .map(|(&(a_min, a_max), &(b_min, b_max))| (a_min.min(b_min), a_max.max(b_max)))
            .collect();
        BoundingBox { ranges }
    }

    /// How much this box's area grows if it must also enclose `candidate`.
    pub fn enlargement(&self, candidate: &BoundingBox) -> f64 {
        self.union(candidate).area() - self.area()
    }

    /// Closed-interval overlap test: true when the boxes share at least a
    /// boundary point in every dimension.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        debug_assert_eq!(self.dims(), other.dims());
        self.ranges
            .iter()
            .zip(other.ranges.iter())
            .all(|(&(a_min, a_max), &(b_min, b_max))| a_min <= b_max && b_min <= a_max)
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        debug_assert_eq!(self.dims(), other.dims());
        self.ranges
            .iter()
            .zip(other.ranges.iter())
            .all(|(&(a_min, a_max), &(b_min, b_max))| a_min <= b_min && a_max >= b_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(ranges: &[(f64, f64)]) -> BoundingBox {
        BoundingBox::new(ranges.to_vec()).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        assert!(BoundingBox::new(vec![(5.0, 4.0)]).is_err());
        assert!(BoundingBox::new(vec![(0.0, 1.0), (3.0, 2.0)]).is_err());
    }

    #[test]
    fn test_new_rejects_empty_and_non_finite() {
        assert!(BoundingBox::new(vec![]).is_err());
        assert!(BoundingBox::new(vec![(f64::NAN, 1.0)]).is_err());
        assert!(BoundingBox::new(vec![(0.0, f64::INFINITY)]).is_err());
    }

    #[test]
    fn test_area() {
        assert_eq!(boxed(&[(0.0, 2.0), (0.0, 3.0)]).area(), 6.0);
        // Degenerate span collapses the whole product.
        assert_eq!(boxed(&[(1.0, 1.0), (0.0, 3.0)]).area(), 0.0);
        assert_eq!(boxed(&[(0.0, 2.0), (0.0, 3.0), (0.0, 4.0)]).area(), 24.0);
    }

    #[test]
    fn test_union() {
        let a = boxed(&[(0.0, 2.0), (0.0, 2.0)]);
        let b = boxed(&[(1.0, 5.0), (-3.0, 1.0)]);
        assert_eq!(a.union(&b), boxed(&[(0.0, 5.0), (-3.0, 2.0)]));
        assert_eq!(a.union(&a), a);
    }

    #[test]
    fn test_enlargement() {
        let a = boxed(&[(0.0, 2.0), (0.0, 2.0)]);
        let inside = boxed(&[(0.5, 1.0), (0.5, 1.0)]);
        assert_eq!(a.enlargement(&inside), 0.0);

        let right = boxed(&[(2.0, 4.0), (0.0, 2.0)]);
        assert_eq!(a.enlargement(&right), 4.0);
    }

    #[test]
    fn test_overlaps() {
        let a = boxed(&[(0.0, 2.0), (0.0, 2.0)]);
        assert!(a.overlaps(&boxed(&[(1.0, 3.0), (1.0, 3.0)])));
        // Touching edges count as overlap.
        assert!(a.overlaps(&boxed(&[(2.0, 3.0), (0.0, 2.0)])));
        assert!(!a.overlaps(&boxed(&[(2.1, 3.0), (0.0, 2.0)])));
        assert!(!a.overlaps(&boxed(&[(0.0, 2.0), (3.0, 4.0)])));
    }

    #[test]
    fn test_contains() {
        let a = boxed(&[(0.0, 4.0), (0.0, 4.0)]);
        assert!(a.contains(&boxed(&[(1.0, 2.0), (1.0, 3.0)])));
        assert!(a.contains(&a));
        assert!(!a.contains(&boxed(&[(1.0, 5.0), (1.0, 3.0)])));
    }

    #[test]
    fn test_zero_box() {
        let z = BoundingBox::zero(2);
        assert!(z.is_zero());
        assert_eq!(z.area(), 0.0);
        assert!(!boxed(&[(0.0, 0.0), (0.0, 1.0)]).is_zero());
    }
}
