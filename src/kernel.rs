// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Block update kernel.
//!
//! One call relaxes one tile: the tile's values are loaded into a
//! [`TileBuffer`], the halo is resolved once, the local iterator runs a fixed
//! number of Gauss-Seidel sweeps over the buffer, and the results are
//! committed back to the grid. A tile with at least one changed cell raises
//! its own flag and the flags of the tiles its stencil can reach.

use std::sync::atomic::{AtomicBool, Ordering};

use smallvec::SmallVec;

use crate::core::{BlockGrid, GridData, TilingScheme};
use crate::scheme::{SchemeProvider, Stencil, StencilLayout, MAX_NEIGHBORS};
use crate::update_kernels::{hfm_update, neighbor_offsets};

/// Per-tile "needs revisit" flags, raised concurrently during a pass.
pub struct TileFlags {
    flags: Box<[AtomicBool]>,
}

impl TileFlags {
    /// All flags lowered.
    pub fn new(num_tiles: usize) -> Self {
        TileFlags {
            flags: (0..num_tiles)
                .map(|_| AtomicBool::new(false))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Raise the flag of `tile`.
    #[inline]
    pub fn raise(&self, tile: usize) {
        self.flags[tile].store(true, Ordering::Release);
    }

    /// Whether `tile` is flagged.
    pub fn is_raised(&self, tile: usize) -> bool {
        self.flags[tile].load(Ordering::Acquire)
    }

    /// Lower every flag.
    pub fn clear(&self) {
        for f in self.flags.iter() {
            f.store(false, Ordering::Relaxed);
        }
    }

    /// Whether any flag is raised.
    pub fn any(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::Acquire))
    }

    /// Plain copy of the flags.
    pub fn snapshot(&self) -> Vec<bool> {
        self.flags.iter().map(|f| f.load(Ordering::Acquire)).collect()
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// True if there are no tiles.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Where halo values outside the tile are read from.
#[derive(Clone, Copy)]
pub enum HaloSource<'a> {
    /// The live value field, possibly already updated this pass.
    Live,
    /// A copy of the value field taken at the start of the pass, in blocked layout.
    Snapshot(&'a [f64]),
}

impl HaloSource<'_> {
    #[inline]
    fn fetch<const N: usize>(&self, grid: &BlockGrid<N>, n: usize) -> f64 {
        match self {
            HaloSource::Live => grid.get_u(n),
            HaloSource::Snapshot(values) => values[n],
        }
    }
}

/// Kernel settings shared by every tile of a pass.
#[derive(Debug, Clone, Copy)]
pub struct KernelParams {
    /// Gauss-Seidel sweeps over the tile per launch.
    pub iterations: usize,
    /// A cell changed if its value moved by more than this.
    pub tolerance: f64,
}

#[derive(Debug, Clone, Copy)]
enum Neighbor {
    Inner(usize),
    Outer(f64),
}

/// Scratch space for one tile, reused across launches by a worker.
pub struct TileBuffer<const N: usize> {
    u: Vec<f64>,
    u_old: Vec<f64>,
    cost: Vec<f64>,
    seed: Vec<bool>,
    stencils: Vec<Stencil<N>>,
    halo: Vec<SmallVec<[Neighbor; MAX_NEIGHBORS]>>,
}

impl<const N: usize> TileBuffer<N> {
    /// Buffer for tiles of `tile_size` cells.
    pub fn new(tile_size: usize) -> Self {
        TileBuffer {
            u: vec![f64::INFINITY; tile_size],
            u_old: vec![f64::INFINITY; tile_size],
            cost: vec![0.0; tile_size],
            seed: vec![false; tile_size],
            stencils: vec![Stencil::new(); tile_size],
            halo: vec![SmallVec::new(); tile_size],
        }
    }
}

/// Result of one tile launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileOutcome {
    /// Cells whose value moved by more than the tolerance.
    pub changed_cells: usize,
    /// Smallest new value among changed cells, `+inf` if none changed.
    pub min_changed: f64,
}

impl TileOutcome {
    /// Whether any cell of the tile changed.
    pub fn changed(&self) -> bool {
        self.min_changed < f64::INFINITY
    }
}

/// Relax one tile and raise the flags of the tiles that need a revisit.
#[allow(clippy::too_many_arguments)]
pub fn update_tile<const N: usize>(
    grid: &BlockGrid<N>,
    scheme: &dyn SchemeProvider<N>,
    layout: StencilLayout,
    source: HaloSource<'_>,
    params: KernelParams,
    tile_id: usize,
    flags: &TileFlags,
    buf: &mut TileBuffer<N>,
) -> TileOutcome {
    let size_i = grid.tile_size();
    let tile_shape = grid.tile_shape();
    let x_o = grid.tile_id_to_nd(tile_id);
    let base = tile_id * size_i;

    // Load.
    for n_i in 0..size_i {
        let n = base + n_i;
        buf.u[n_i] = grid.get_u(n);
        buf.u_old[n_i] = buf.u[n_i];
        buf.cost[n_i] = grid.cost(n);
        buf.seed[n_i] = grid.is_seed(n);
    }

    // Halo.
    for n_i in 0..size_i {
        let x = grid.position(base + n_i);
        let stencil = scheme.scheme(x);
        debug_assert_eq!(stencil.weights.len(), layout.total_offsets());
        debug_assert_eq!(stencil.offsets.len(), layout.total_offsets());
        let halo = &mut buf.halo[n_i];
        halo.clear();
        for offset in neighbor_offsets(layout, &stencil) {
            let slot = match grid.neighbor(x, offset) {
                None => Neighbor::Outer(f64::INFINITY),
                Some(y) => {
                    let inside = (0..N).all(|d| y[d] / tile_shape[d] == x_o[d]);
                    let m = grid.index(y);
                    if inside {
                        Neighbor::Inner(m - base)
                    } else {
                        Neighbor::Outer(source.fetch(grid, m))
                    }
                }
            };
            halo.push(slot);
        }
        buf.stencils[n_i] = stencil;
    }

    // Relax.
    let mut values: SmallVec<[f64; MAX_NEIGHBORS]> = SmallVec::new();
    for _ in 0..params.iterations {
        for n_i in 0..size_i {
            if buf.seed[n_i] {
                continue;
            }
            values.clear();
            values.extend(buf.halo[n_i].iter().map(|nb| match *nb {
                Neighbor::Inner(j) => buf.u[j],
                Neighbor::Outer(v) => v,
            }));
            let stencil = &buf.stencils[n_i];
            buf.u[n_i] = hfm_update(
                buf.u[n_i],
                false,
                buf.cost[n_i],
                layout,
                &stencil.weights,
                stencil.mix_is_min,
                &values,
            );
        }
    }

    // Commit, detect changes, reduce.
    let mut outcome = TileOutcome {
        changed_cells: 0,
        min_changed: f64::INFINITY,
    };
    for n_i in 0..size_i {
        let new = buf.u[n_i];
        let old = buf.u_old[n_i];
        if !buf.seed[n_i] && new < old {
            grid.update_u(base + n_i, new);
        }
        if (old - new).abs() > params.tolerance {
            outcome.changed_cells += 1;
            outcome.min_changed = outcome.min_changed.min(new);
        }
    }

    if outcome.changed() {
        raise_neighborhood(grid, scheme, x_o, flags);
    }
    outcome
}

/// Flag the tile at `x_o` and the tiles a changed value can influence:
/// the face neighbors for axis-aligned stencils, otherwise every tile within
/// the stencil reach.
pub(crate) fn raise_neighborhood<const N: usize>(
    grid: &BlockGrid<N>,
    scheme: &dyn SchemeProvider<N>,
    x_o: [usize; N],
    flags: &TileFlags,
) {
    let counts = grid.tile_counts();
    let periodic = grid.periodic();
    flags.raise(grid.nd_to_tile_id(x_o));

    let shift = |d: usize, delta: i64| -> Option<usize> {
        let size = counts[d] as i64;
        let c = x_o[d] as i64 + delta;
        if periodic[d] {
            Some(c.rem_euclid(size) as usize)
        } else if c < 0 || c >= size {
            None
        } else {
            Some(c as usize)
        }
    };

    if scheme.axis_aligned() {
        for d in 0..N {
            for delta in [-1i64, 1] {
                if let Some(c) = shift(d, delta) {
                    let mut y_o = x_o;
                    y_o[d] = c;
                    flags.raise(grid.nd_to_tile_id(y_o));
                }
            }
        }
        return;
    }

    let tile_shape = grid.tile_shape();
    let reach = scheme.reach();
    let mut radius = [0i64; N];
    for d in 0..N {
        radius[d] = reach.div_ceil(tile_shape[d]) as i64;
    }
    let mut delta = radius.map(|r| -r);
    loop {
        let mut y_o = x_o;
        let mut in_range = true;
        for d in 0..N {
            match shift(d, delta[d]) {
                Some(c) => y_o[d] = c,
                None => {
                    in_range = false;
                    break;
                }
            }
        }
        if in_range {
            flags.raise(grid.nd_to_tile_id(y_o));
        }
        // Odometer increment over the box [-radius, radius]^N.
        let mut d = 0;
        loop {
            if d == N {
                return;
            }
            if delta[d] < radius[d] {
                delta[d] += 1;
                break;
            }
            delta[d] = -radius[d];
            d += 1;
        }
    }
}
