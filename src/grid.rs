//! Dense (location, facility) tables.
//!
//! Every per-pair quantity in the crate (assignment variables, LAP bounds,
//! reduced costs) is stored in a `PairGrid` indexed by dense location and
//! facility indices. Iteration order is location-major.

use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairGrid<T> {
    locations: usize,
    facilities: usize,
    cells: Vec<T>,
}

impl<T: Clone> PairGrid<T> {
    pub fn new(locations: usize, facilities: usize, fill: T) -> Self {
        PairGrid {
            locations,
            facilities,
            cells: vec![fill; locations * facilities],
        }
    }
}

impl<T> PairGrid<T> {
    pub fn from_fn(locations: usize, facilities: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut cells = Vec::with_capacity(locations * facilities);
        for l in 0..locations {
            for fac in 0..facilities {
                cells.push(f(l, fac));
            }
        }
        PairGrid { locations, facilities, cells }
    }

    /// Build a grid from cells already laid out in location-major order.
    pub fn from_cells(locations: usize, facilities: usize, cells: Vec<T>) -> Self {
        assert_eq!(cells.len(), locations * facilities, "cell count does not match grid shape");
        PairGrid { locations, facilities, cells }
    }

    #[inline]
    pub fn locations(&self) -> usize {
        self.locations
    }

    #[inline]
    pub fn facilities(&self) -> usize {
        self.facilities
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    fn offset(&self, l: usize, f: usize) -> usize {
        debug_assert!(l < self.locations && f < self.facilities);
        l * self.facilities + f
    }

    /// All (location, facility) pairs in location-major order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> {
        let facilities = self.facilities;
        (0..self.locations).flat_map(move |l| (0..facilities).map(move |f| (l, f)))
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &T)> {
        self.pairs().zip(self.cells.iter())
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PairGrid<U> {
        PairGrid {
            locations: self.locations,
            facilities: self.facilities,
            cells: self.cells.iter().map(&mut f).collect(),
        }
    }
}

impl<T> Index<(usize, usize)> for PairGrid<T> {
    type Output = T;

    fn index(&self, (l, f): (usize, usize)) -> &T {
        &self.cells[self.offset(l, f)]
    }
}

impl<T> IndexMut<(usize, usize)> for PairGrid<T> {
    fn index_mut(&mut self, (l, f): (usize, usize)) -> &mut T {
        let offset = self.offset(l, f);
        &mut self.cells[offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_major_layout() {
        let grid = PairGrid::from_fn(2, 3, |l, f| l * 10 + f);
        assert_eq!(grid[(1, 2)], 12);
        let pairs: Vec<_> = grid.pairs().collect();
        assert_eq!(pairs[0], (0, 0));
        assert_eq!(pairs[3], (1, 0));
        assert_eq!(grid.len(), 6);
    }
}
