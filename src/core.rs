// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{EikonalError, Result};

/// Row-major linear index of `x` in an array of the given shape.
#[inline]
pub fn row_major_index<const N: usize>(x: [usize; N], shape: [usize; N]) -> usize {
    let mut n = 0;
    for d in 0..N {
        n = n * shape[d] + x[d];
    }
    n
}

/// Inverse of [`row_major_index`].
#[inline]
pub fn row_major_position<const N: usize>(mut n: usize, shape: [usize; N]) -> [usize; N] {
    let mut x = [0usize; N];
    for d in (0..N).rev() {
        x[d] = n % shape[d];
        n /= shape[d];
    }
    x
}

/// Core grid data access: values, costs and seeds, addressed by the blocked
/// linear index `n = n_o * size_i + n_i` shared by every kernel.
pub trait GridData<const N: usize> {
    /// Current value at linear index `n`.
    fn get_u(&self, n: usize) -> f64;

    /// Cost at linear index `n`, already multiplied by the grid scale.
    fn cost(&self, n: usize) -> f64;

    /// Whether the cell at `n` is a seed (frozen value).
    fn is_seed(&self, n: usize) -> bool;

    /// Atomically lower the value at `n` if `val` is smaller.
    /// Returns true if the stored value changed.
    fn update_u(&self, n: usize, val: f64) -> bool;

    /// Grid shape (number of cells along each axis).
    fn shape(&self) -> [usize; N];

    /// Total number of cells.
    fn num_cells(&self) -> usize;

    /// Blocked linear index of a cell position.
    fn index(&self, x: [usize; N]) -> usize;

    /// Cell position of a blocked linear index.
    fn position(&self, n: usize) -> [usize; N];
}

/// Partition of the grid into equally sized tiles.
pub trait TilingScheme<const N: usize> {
    /// Extent of one tile along each axis.
    fn tile_shape(&self) -> [usize; N];

    /// Number of tiles along each axis (the outer grid shape).
    fn tile_counts(&self) -> [usize; N];

    /// Number of cells in one tile.
    fn tile_size(&self) -> usize;

    /// Total number of tiles.
    fn num_tiles(&self) -> usize;

    /// Convert a tile ID to outer-grid coordinates.
    fn tile_id_to_nd(&self, tile_id: usize) -> [usize; N];

    /// Convert outer-grid coordinates to a tile ID.
    fn nd_to_tile_id(&self, tile_idx: [usize; N]) -> usize;
}

/// A regular grid partitioned into tiles, holding the value field, the
/// cost field and the bit-packed seed mask.
///
/// All per-cell arrays use the blocked layout: the cells of one tile are
/// contiguous, tiles are ordered row-major in the outer grid, and cells are
/// ordered row-major inside a tile. Values are stored as atomic `f64` bit
/// patterns so that tiles can be relaxed in parallel.
pub struct BlockGrid<const N: usize> {
    shape: [usize; N],
    tile_shape: [usize; N],
    tile_counts: [usize; N],
    tile_size: usize,
    h: f64,
    periodic: [bool; N],
    values: Box<[AtomicU64]>,
    cost: Box<[f64]>,
    seeds: Box<[u8]>,
}

fn default_tile_extent(size: usize, preferred: usize) -> usize {
    (1..=preferred.min(size))
        .rev()
        .find(|t| size % t == 0)
        .unwrap_or(1)
}

impl<const N: usize> BlockGrid<N> {
    /// Create a new grid with the given shape, spacing and cost field.
    ///
    /// # Parameters
    /// - `shape`: Number of cells along each axis (each must be >= 1)
    /// - `h`: Uniform grid spacing (must be positive and finite); costs are scaled by it
    /// - `cost`: Cost values in row-major order; `+inf` marks obstacles
    ///
    /// The default tile extent along each axis is the largest divisor of the
    /// axis size not exceeding 8 (2D) or 4 (3D and above).
    ///
    /// # Errors
    /// Returns an error if any parameter is invalid or if the cost vector length
    /// does not match the product of the shape dimensions.
    pub fn new(shape: [usize; N], h: f64, cost: Vec<f64>) -> Result<Self> {
        assert!(N >= 1, "BlockGrid needs at least one dimension");

        if !h.is_finite() || h <= 0.0 {
            return Err(EikonalError::InvalidGridSpacing(h));
        }

        for (axis, &size) in shape.iter().enumerate() {
            if size == 0 {
                return Err(EikonalError::InvalidGridShape { axis, size });
            }
        }

        let num_cells: usize = shape.iter().product();
        if cost.len() != num_cells {
            return Err(EikonalError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![cost.len()],
            });
        }

        for (index, &value) in cost.iter().enumerate() {
            if value.is_nan() || value < 0.0 {
                return Err(EikonalError::InvalidCost { index, value });
            }
        }

        let preferred = if N <= 2 { 8 } else { 4 };
        let mut tile_shape = [1usize; N];
        for d in 0..N {
            tile_shape[d] = default_tile_extent(shape[d], preferred);
        }

        let mut grid = BlockGrid {
            shape,
            tile_shape,
            tile_counts: [1; N],
            tile_size: 1,
            h,
            periodic: [false; N],
            values: Box::new([]),
            cost: Box::new([]),
            seeds: Box::new([]),
        };
        grid.relayout(tile_shape, &cost, &vec![f64::INFINITY; num_cells], &vec![false; num_cells]);
        Ok(grid)
    }

    /// Set the tile shape (builder method).
    ///
    /// Existing values, costs and seeds are carried over to the new layout.
    ///
    /// # Errors
    /// Returns an error if a tile extent is zero or does not divide the grid size.
    pub fn with_tile_shape(mut self, tile_shape: [usize; N]) -> Result<Self> {
        for (axis, (&tile, &grid)) in tile_shape.iter().zip(self.shape.iter()).enumerate() {
            if tile == 0 || grid % tile != 0 {
                return Err(EikonalError::InvalidTileShape { axis, tile, grid });
            }
        }
        let cost = self.to_row_major(&self.cost);
        let values = self.values_row_major();
        let seeds: Vec<bool> = (0..self.num_cells())
            .map(|r| self.is_seed(self.index(row_major_position(r, self.shape))))
            .collect();
        self.relayout(tile_shape, &cost, &values, &seeds);
        Ok(self)
    }

    /// Mark axes as periodic (builder method). Neighbors across a periodic
    /// boundary wrap around instead of reading `+inf`.
    pub fn with_periodic(mut self, periodic: [bool; N]) -> Self {
        self.periodic = periodic;
        self
    }

    fn relayout(&mut self, tile_shape: [usize; N], cost: &[f64], values: &[f64], seeds: &[bool]) {
        self.tile_shape = tile_shape;
        for d in 0..N {
            self.tile_counts[d] = self.shape[d] / tile_shape[d];
        }
        self.tile_size = tile_shape.iter().product();

        let num_cells = self.num_cells();
        let mut blocked_cost = vec![0.0; num_cells];
        let mut packed = vec![0u8; num_cells.div_ceil(8)];
        let values_blocked: Box<[AtomicU64]> = (0..num_cells)
            .map(|_| AtomicU64::new(f64::INFINITY.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        for r in 0..num_cells {
            let n = self.index(row_major_position(r, self.shape));
            blocked_cost[n] = cost[r];
            values_blocked[n].store(values[r].to_bits(), Ordering::Relaxed);
            if seeds[r] {
                packed[n / 8] |= 1 << (n % 8);
            }
        }
        self.cost = blocked_cost.into_boxed_slice();
        self.values = values_blocked;
        self.seeds = packed.into_boxed_slice();
    }

    /// Fix the value of a cell and exclude it from relaxation.
    pub fn set_seed(&mut self, n: usize, value: f64) {
        self.values[n].store(value.to_bits(), Ordering::Relaxed);
        self.seeds[n / 8] |= 1 << (n % 8);
    }

    /// Reset every non-seed value to `+inf`.
    pub fn reset_values(&self) {
        for n in 0..self.num_cells() {
            if !self.is_seed(n) {
                self.values[n].store(f64::INFINITY.to_bits(), Ordering::Relaxed);
            }
        }
    }

    /// Uniform grid spacing.
    pub fn grid_spacing(&self) -> f64 {
        self.h
    }

    /// Periodic axes.
    pub fn periodic(&self) -> [bool; N] {
        self.periodic
    }

    /// Raw cost before grid scaling, at a cell position.
    pub fn raw_cost_at(&self, x: [usize; N]) -> f64 {
        self.cost[self.index(x)]
    }

    /// Value at a cell position.
    pub fn value_at(&self, x: [usize; N]) -> f64 {
        self.get_u(self.index(x))
    }

    /// Bit-packed seed mask in blocked layout (little bit order).
    pub fn seed_mask(&self) -> &[u8] {
        &self.seeds
    }

    /// Copy of the value field in blocked layout.
    pub fn values_snapshot(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|a| f64::from_bits(a.load(Ordering::Relaxed)))
            .collect()
    }

    /// Copy of the value field in row-major layout.
    pub fn values_row_major(&self) -> Vec<f64> {
        self.to_row_major(&self.values_snapshot())
    }

    /// Convert a blocked-layout array to row-major order.
    pub fn to_row_major<T: Copy>(&self, blocked: &[T]) -> Vec<T> {
        (0..self.num_cells())
            .map(|r| blocked[self.index(row_major_position(r, self.shape))])
            .collect()
    }

    /// Neighbor of `x` at `offset`, wrapping on periodic axes.
    /// Returns `None` outside the grid.
    #[inline]
    pub fn neighbor(&self, x: [usize; N], offset: [i32; N]) -> Option<[usize; N]> {
        let mut y = [0usize; N];
        for d in 0..N {
            let size = self.shape[d] as i64;
            let mut c = x[d] as i64 + offset[d] as i64;
            if self.periodic[d] {
                c = c.rem_euclid(size);
            } else if c < 0 || c >= size {
                return None;
            }
            y[d] = c as usize;
        }
        Some(y)
    }

    /// Tile containing a cell position.
    #[inline]
    pub fn tile_of(&self, x: [usize; N]) -> usize {
        let mut x_o = [0usize; N];
        for d in 0..N {
            x_o[d] = x[d] / self.tile_shape[d];
        }
        self.nd_to_tile_id(x_o)
    }
}

impl<const N: usize> GridData<N> for BlockGrid<N> {
    fn get_u(&self, n: usize) -> f64 {
        f64::from_bits(self.values[n].load(Ordering::Relaxed))
    }

    fn cost(&self, n: usize) -> f64 {
        self.cost[n] * self.h
    }

    fn is_seed(&self, n: usize) -> bool {
        (self.seeds[n / 8] >> (n % 8)) & 1 == 1
    }

    fn update_u(&self, n: usize, val: f64) -> bool {
        let atom = &self.values[n];
        let mut current = atom.load(Ordering::Relaxed);
        loop {
            if f64::from_bits(current) <= val {
                return false;
            }
            match atom.compare_exchange_weak(
                current,
                val.to_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn shape(&self) -> [usize; N] {
        self.shape
    }

    fn num_cells(&self) -> usize {
        self.shape.iter().product()
    }

    fn index(&self, x: [usize; N]) -> usize {
        let mut x_o = [0usize; N];
        let mut x_i = [0usize; N];
        for d in 0..N {
            x_o[d] = x[d] / self.tile_shape[d];
            x_i[d] = x[d] % self.tile_shape[d];
        }
        row_major_index(x_o, self.tile_counts) * self.tile_size
            + row_major_index(x_i, self.tile_shape)
    }

    fn position(&self, n: usize) -> [usize; N] {
        let x_o = row_major_position(n / self.tile_size, self.tile_counts);
        let x_i = row_major_position(n % self.tile_size, self.tile_shape);
        let mut x = [0usize; N];
        for d in 0..N {
            x[d] = x_o[d] * self.tile_shape[d] + x_i[d];
        }
        x
    }
}

impl<const N: usize> TilingScheme<N> for BlockGrid<N> {
    fn tile_shape(&self) -> [usize; N] {
        self.tile_shape
    }

    fn tile_counts(&self) -> [usize; N] {
        self.tile_counts
    }

    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn num_tiles(&self) -> usize {
        self.tile_counts.iter().product()
    }

    fn tile_id_to_nd(&self, tile_id: usize) -> [usize; N] {
        row_major_position(tile_id, self.tile_counts)
    }

    fn nd_to_tile_id(&self, tile_idx: [usize; N]) -> usize {
        row_major_index(tile_idx, self.tile_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn index_position_roundtrip_2d() {
        let grid = BlockGrid::<2>::new([12, 8], 1.0, vec![1.0; 96])
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap();
        for n in 0..96 {
            let x = grid.position(n);
            assert_eq!(grid.index(x), n, "n={} x={:?}", n, x);
        }
    }

    #[test]
    fn index_position_roundtrip_3d() {
        let grid = BlockGrid::<3>::new([4, 6, 8], 1.0, vec![1.0; 192])
            .unwrap()
            .with_tile_shape([2, 3, 4])
            .unwrap();
        for n in 0..192 {
            assert_eq!(grid.index(grid.position(n)), n);
        }
    }

    #[test]
    fn tile_cells_are_contiguous() {
        let grid = BlockGrid::<2>::new([8, 8], 1.0, vec![1.0; 64])
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap();
        // Cell (5, 2) lives in tile (1, 0) at inner position (1, 2).
        assert_eq!(grid.tile_of([5, 2]), 2);
        assert_eq!(grid.index([5, 2]), 2 * 16 + 6);
        for n in 0..64 {
            assert_eq!(grid.tile_of(grid.position(n)), n / 16);
        }
    }

    #[test]
    fn tile_id_nd_roundtrip() {
        let grid = BlockGrid::<3>::new([12, 12, 12], 1.0, vec![1.0; 1728]).unwrap();
        assert_eq!(grid.tile_shape(), [4, 4, 4]);
        for id in 0..grid.num_tiles() {
            assert_eq!(grid.nd_to_tile_id(grid.tile_id_to_nd(id)), id);
        }
    }

    #[test]
    fn default_tile_shape_divides_grid() {
        let grid = BlockGrid::<2>::new([20, 7], 1.0, vec![1.0; 140]).unwrap();
        assert_eq!(grid.tile_shape(), [5, 7]);
        assert_eq!(grid.tile_counts(), [4, 1]);
    }

    #[test]
    fn tile_shape_must_divide() {
        let grid = BlockGrid::<2>::new([8, 8], 1.0, vec![1.0; 64]).unwrap();
        let result = grid.with_tile_shape([4, 3]);
        assert!(matches!(
            result,
            Err(EikonalError::InvalidTileShape { axis: 1, tile: 3, grid: 8 })
        ));
    }

    #[test]
    fn zero_tile_extent_rejected() {
        let grid = BlockGrid::<2>::new([8, 8], 1.0, vec![1.0; 64]).unwrap();
        assert!(matches!(
            grid.with_tile_shape([0, 4]),
            Err(EikonalError::InvalidTileShape { axis: 0, .. })
        ));
    }

    #[test]
    fn relayout_preserves_data() {
        let cost: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let mut grid = BlockGrid::<2>::new([8, 8], 1.0, cost.clone()).unwrap();
        let n = grid.index([3, 5]);
        grid.set_seed(n, 0.25);
        let grid = grid.with_tile_shape([2, 4]).unwrap();
        assert_eq!(grid.to_row_major(&(0..64).map(|n| grid.raw_cost_at(grid.position(n))).collect::<Vec<_>>()), cost);
        assert_eq!(grid.value_at([3, 5]), 0.25);
        assert!(grid.is_seed(grid.index([3, 5])));
        assert_eq!(grid.values_row_major()[3 * 8 + 5], 0.25);
    }

    #[test]
    fn seeds_are_bit_packed() {
        let mut grid = BlockGrid::<2>::new([4, 4], 1.0, vec![1.0; 16])
            .unwrap()
            .with_tile_shape([2, 2])
            .unwrap();
        let n = grid.index([1, 1]);
        assert_eq!(n, 3);
        grid.set_seed(n, 0.0);
        assert_eq!(grid.seed_mask(), &[0b0000_1000, 0]);
        assert!(grid.is_seed(n));
        assert!(!grid.is_seed(0));
    }

    #[test]
    fn neighbor_boundary_and_periodic() {
        let grid = BlockGrid::<2>::new([4, 6], 1.0, vec![1.0; 24]).unwrap();
        assert_eq!(grid.neighbor([0, 0], [-1, 0]), None);
        assert_eq!(grid.neighbor([3, 5], [0, 1]), None);
        assert_eq!(grid.neighbor([1, 1], [1, -1]), Some([2, 0]));

        let grid = grid.with_periodic([false, true]);
        assert_eq!(grid.neighbor([0, 0], [0, -1]), Some([0, 5]));
        assert_eq!(grid.neighbor([0, 5], [0, 2]), Some([0, 1]));
        assert_eq!(grid.neighbor([0, 0], [-1, 0]), None);
    }

    #[test]
    fn cost_scaled_by_spacing() {
        let grid = BlockGrid::<2>::new([4, 4], 0.5, vec![3.0; 16]).unwrap();
        assert_eq!(grid.cost(0), 1.5);
        assert_eq!(grid.raw_cost_at([0, 0]), 3.0);
    }

    #[test]
    fn infinite_cost_allowed() {
        let mut cost = vec![1.0; 16];
        cost[3] = f64::INFINITY;
        assert!(BlockGrid::<2>::new([4, 4], 1.0, cost).is_ok());
    }

    #[test]
    fn update_u_monotonicity() {
        let grid = BlockGrid::<2>::new([4, 4], 1.0, vec![1.0; 16]).unwrap();
        let n = grid.index([1, 1]);

        assert!(grid.update_u(n, 10.0));
        assert_eq!(grid.get_u(n), 10.0);

        assert!(grid.update_u(n, 5.0));
        assert!(!grid.update_u(n, 7.0));
        assert!(!grid.update_u(n, 5.0));
        assert_eq!(grid.get_u(n), 5.0);
    }

    #[test]
    fn cas_concurrent_monotonicity() {
        let grid = Arc::new(BlockGrid::<2>::new([4, 4], 1.0, vec![1.0; 16]).unwrap());
        let n = grid.index([1, 1]);

        let mut handles = Vec::new();
        for i in 0..10 {
            let grid = Arc::clone(&grid);
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    let val = 1000.0 - (i * 100 + j) as f64;
                    grid.update_u(n, val);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(grid.get_u(n), 1.0);
    }

    #[test]
    fn invalid_grid_shape() {
        let result = BlockGrid::<2>::new([0, 10], 1.0, vec![]);
        assert!(matches!(
            result,
            Err(EikonalError::InvalidGridShape { axis: 0, size: 0 })
        ));
    }

    #[test]
    fn invalid_grid_spacing() {
        let result = BlockGrid::<2>::new([4, 4], 0.0, vec![1.0; 16]);
        assert!(matches!(result, Err(EikonalError::InvalidGridSpacing(_))));
    }

    #[test]
    fn invalid_cost_value() {
        let mut cost = vec![1.0; 16];
        cost[5] = -1.0;
        let result = BlockGrid::<2>::new([4, 4], 1.0, cost);
        assert!(matches!(
            result,
            Err(EikonalError::InvalidCost { index: 5, .. })
        ));

        let mut cost = vec![1.0; 16];
        cost[2] = f64::NAN;
        let result = BlockGrid::<2>::new([4, 4], 1.0, cost);
        assert!(matches!(
            result,
            Err(EikonalError::InvalidCost { index: 2, .. })
        ));
    }

    #[test]
    fn shape_mismatch() {
        let result = BlockGrid::<2>::new([4, 4], 1.0, vec![1.0; 10]);
        assert!(matches!(result, Err(EikonalError::ShapeMismatch { .. })));
    }
}
