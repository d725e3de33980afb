// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::core::{BlockGrid, GridData};

/// Owner tags produced by [`tag_neighbors`].
pub struct NeighborTags {
    // 0 means untagged, otherwise position in the settled list plus one.
    owners: Box<[AtomicUsize]>,
    settled: Vec<usize>,
}

impl NeighborTags {
    /// Settled cell that tagged `n`, if any.
    pub fn owner(&self, n: usize) -> Option<usize> {
        match self.owners[n].load(Ordering::Relaxed) {
            0 => None,
            p => Some(self.settled[p - 1]),
        }
    }

    /// Whether `n` was tagged.
    pub fn is_tagged(&self, n: usize) -> bool {
        self.owners[n].load(Ordering::Relaxed) != 0
    }

    /// Cells tagged by at least one settled cell, in increasing order.
    pub fn tagged(&self) -> Vec<usize> {
        (0..self.owners.len()).filter(|&n| self.is_tagged(n)).collect()
    }
}

/// Tag every settled cell and its axis-aligned `±1` neighbors.
///
/// Cell indices use the grid's blocked linearization. When two settled cells
/// tag the same cell, the one later in `settled` wins.
pub fn tag_neighbors<const N: usize>(grid: &BlockGrid<N>, settled: &[usize]) -> NeighborTags {
    let owners: Box<[AtomicUsize]> = (0..grid.num_cells())
        .map(|_| AtomicUsize::new(0))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    settled.par_iter().enumerate().for_each(|(p, &n)| {
        let tag = p + 1;
        owners[n].fetch_max(tag, Ordering::Relaxed);
        let x = grid.position(n);
        for d in 0..N {
            for delta in [-1, 1] {
                let mut offset = [0i32; N];
                offset[d] = delta;
                if let Some(y) = grid.neighbor(x, offset) {
                    owners[grid.index(y)].fetch_max(tag, Ordering::Relaxed);
                }
            }
        }
    });

    NeighborTags {
        owners,
        settled: settled.to_vec(),
    }
}
