// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::active_set::{lookup, ActiveList};
use crate::config::{SolverSection, Strategy};
use crate::core::{BlockGrid, GridData, TilingScheme};
use crate::error::{EikonalError, Result};
use crate::kernel::{raise_neighborhood, update_tile, HaloSource, KernelParams, TileBuffer, TileFlags};
use crate::scheme::{SchemeProvider, StencilLayout};

/// Progress information passed to the optional callback, once per pass.
#[derive(Debug, Clone, Copy)]
pub struct ProgressInfo {
    /// Passes completed so far.
    pub pass: usize,
    /// Tile launches so far.
    pub tiles_processed: u64,
    /// Size of the worklist for the next pass.
    pub active_list_size: usize,
    /// Elapsed time since the solve started.
    pub elapsed: Duration,
}

/// Summary of a finished solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// True if the worklist emptied within the pass budget.
    pub converged: bool,
    /// Passes performed.
    pub passes: usize,
    /// Tile launches over all passes.
    pub tiles_processed: u64,
    /// Wall-clock time of the solve.
    pub elapsed: Duration,
}

/// Block-parallel fast marching solver.
///
/// Each pass relaxes the tiles of the current worklist in parallel. A tile
/// whose values change flags itself and the tiles its stencil can reach, and
/// the flagged tiles form the next worklist. The solve ends when a pass
/// flags nothing or the pass budget is spent.
///
/// Unless strict iteration is enabled, tiles of one pass read each other's
/// freshly written values, so intermediate states depend on scheduling; the
/// converged field is the same up to the tolerance.
pub struct HfmSolver<const N: usize> {
    grid: BlockGrid<N>,
    scheme: Arc<dyn SchemeProvider<N>>,
    layout: StencilLayout,
    tolerance: f64,
    iterations: usize,
    max_passes: usize,
    strategy: Strategy,
    strict: bool,
    raise_on_non_convergence: bool,
    num_threads: Option<usize>,
    progress_callback: Option<Box<dyn Fn(ProgressInfo) + Send + Sync>>,
}

impl<const N: usize> HfmSolver<N> {
    /// Create a solver for `grid` with the given stencil provider.
    ///
    /// Axes the provider declares periodic are made periodic on the grid.
    ///
    /// # Errors
    /// Returns an error if the tolerance is not positive and finite, if the
    /// provider's parameters do not fit the grid, or if its stencil is wider
    /// than the kernel capacity.
    pub fn new(grid: BlockGrid<N>, scheme: Arc<dyn SchemeProvider<N>>, tolerance: f64) -> Result<Self> {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(EikonalError::InvalidTolerance(tolerance));
        }
        scheme.validate(grid.shape())?;
        let layout = scheme.layout();
        layout.check_capacity()?;

        let mut periodic = grid.periodic();
        for (p, s) in periodic.iter_mut().zip(scheme.periodic_axes()) {
            *p |= s;
        }
        let grid = grid.with_periodic(periodic);

        Ok(HfmSolver {
            grid,
            scheme,
            layout,
            tolerance,
            iterations: 8,
            max_passes: 2000,
            strategy: Strategy::Adaptive,
            strict: false,
            raise_on_non_convergence: false,
            num_threads: None,
            progress_callback: None,
        })
    }

    /// Create a solver with the pass loop settings of a configuration section.
    ///
    /// # Errors
    /// Same as [`HfmSolver::new`].
    pub fn from_config(
        grid: BlockGrid<N>,
        scheme: Arc<dyn SchemeProvider<N>>,
        section: &SolverSection,
    ) -> Result<Self> {
        let mut solver = Self::new(grid, scheme, section.tolerance)?
            .with_iterations(section.iterations)
            .with_max_passes(section.max_passes)
            .with_strategy(section.strategy)
            .with_strict_iteration(section.strict_iteration)
            .with_raise_on_non_convergence(section.raise_on_non_convergence);
        if let Some(threads) = section.threads {
            solver = solver.with_threads(threads);
        }
        Ok(solver)
    }

    /// Set a custom tile shape (builder method).
    ///
    /// # Errors
    /// Returns an error if any tile extent is zero or does not divide the grid.
    pub fn with_tile_shape(mut self, tile_shape: [usize; N]) -> Result<Self> {
        self.grid = self.grid.with_tile_shape(tile_shape)?;
        Ok(self)
    }

    /// Set the number of Gauss-Seidel sweeps per tile launch (builder method).
    /// Default is 8.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Set the number of worker threads (builder method).
    /// If not specified, defaults to the number of available CPU cores.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set the pass budget (builder method). Default is 2000.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Set the tile scheduling strategy (builder method).
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Read halo values from a snapshot taken at the start of each pass
    /// (builder method). Results then no longer depend on thread count.
    pub fn with_strict_iteration(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Return an error instead of a report when the pass budget runs out
    /// (builder method).
    pub fn with_raise_on_non_convergence(mut self, raise: bool) -> Self {
        self.raise_on_non_convergence = raise;
        self
    }

    /// Set a progress callback invoked after every pass (builder method).
    pub fn with_progress(mut self, callback: Box<dyn Fn(ProgressInfo) + Send + Sync>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Get a reference to the grid.
    pub fn grid(&self) -> &BlockGrid<N> {
        &self.grid
    }

    /// Consume the solver and return the grid with computed values.
    pub fn into_grid(self) -> BlockGrid<N> {
        self.grid
    }

    /// Value field in row-major order.
    pub fn values(&self) -> Vec<f64> {
        self.grid.values_row_major()
    }

    /// Save the value field to a `.npy` file.
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        crate::io::save_values(&self.grid, path.as_ref())
    }

    /// Fix the value of the cell at `index`.
    ///
    /// # Errors
    /// Returns an error if the index is outside the grid or the value is not finite.
    pub fn add_seed(&mut self, index: [usize; N], value: f64) -> Result<()> {
        let shape = self.grid.shape();
        for d in 0..N {
            if index[d] >= shape[d] {
                return Err(EikonalError::InvalidSeed {
                    coord: index.iter().map(|&i| i as f64).collect(),
                    reason: format!(
                        "index {} on axis {} is outside [0, {})",
                        index[d], d, shape[d]
                    ),
                });
            }
        }
        if !value.is_finite() {
            return Err(EikonalError::InvalidSeed {
                coord: index.iter().map(|&i| i as f64).collect(),
                reason: format!("value {} is not finite", value),
            });
        }
        let n = self.grid.index(index);
        self.grid.set_seed(n, value);
        Ok(())
    }

    /// Seed every cell strictly within `radius` of the physical point `coord`.
    ///
    /// A cell `y` gets the average of `cost · |y - coord|` measured at the
    /// cell nearest to `coord` and at `y`, where `|·|` is the provider's
    /// [`seed_norm`](SchemeProvider::seed_norm) or the Euclidean norm when
    /// the provider has none. Cells with an infinite cost are skipped.
    ///
    /// # Errors
    /// Returns an error if the point is outside the grid, the radius is
    /// negative or not finite, or no cell within the radius gets a finite value.
    pub fn add_seed_radius(&mut self, coord: [f64; N], radius: f64) -> Result<()> {
        let shape = self.grid.shape();
        let h = self.grid.grid_spacing();

        if !radius.is_finite() || radius < 0.0 {
            return Err(EikonalError::InvalidSeed {
                coord: coord.to_vec(),
                reason: format!("radius {} must be nonnegative and finite", radius),
            });
        }
        for d in 0..N {
            let max_coord = (shape[d] - 1) as f64 * h;
            if !(coord[d] >= 0.0 && coord[d] <= max_coord) {
                return Err(EikonalError::InvalidSeed {
                    coord: coord.to_vec(),
                    reason: format!(
                        "coordinate {} on axis {} is outside domain [0, {}]",
                        coord[d], d, max_coord
                    ),
                });
            }
        }

        let mut lo = [0usize; N];
        let mut hi = [0usize; N];
        let mut nearest = [0usize; N];
        for d in 0..N {
            lo[d] = ((coord[d] - radius) / h).floor().max(0.0) as usize;
            hi[d] = ((coord[d] + radius) / h).ceil().min((shape[d] - 1) as f64) as usize;
            nearest[d] = ((coord[d] / h).round() as usize).min(shape[d] - 1);
        }
        let seed_cost = self.grid.raw_cost_at(nearest);

        let mut seeded = 0;
        let mut x = lo;
        loop {
            let mut diff = [0.0; N];
            for d in 0..N {
                diff[d] = x[d] as f64 * h - coord[d];
            }
            let dist = diff.iter().map(|c| c * c).sum::<f64>().sqrt();
            let norm_at = |y: [usize; N]| self.scheme.seed_norm(y, diff).unwrap_or(dist);
            let value =
                0.5 * (seed_cost * norm_at(nearest) + self.grid.raw_cost_at(x) * norm_at(x));
            if dist < radius && value.is_finite() {
                let n = self.grid.index(x);
                let value = if self.grid.is_seed(n) {
                    value.min(self.grid.get_u(n))
                } else {
                    value
                };
                self.grid.set_seed(n, value);
                seeded += 1;
            }

            let mut d = 0;
            loop {
                if d == N {
                    if seeded == 0 {
                        return Err(EikonalError::InvalidSeed {
                            coord: coord.to_vec(),
                            reason: "no grid cell with finite cost within radius".to_string(),
                        });
                    }
                    return Ok(());
                }
                if x[d] < hi[d] {
                    x[d] += 1;
                    break;
                }
                x[d] = lo[d];
                d += 1;
            }
        }
    }

    /// Tiles that hold a seed, plus every tile a seed tile can influence.
    pub fn initial_worklist(&self) -> Vec<usize> {
        let flags = TileFlags::new(self.grid.num_tiles());
        let tile_size = self.grid.tile_size();
        for tile in 0..self.grid.num_tiles() {
            let base = tile * tile_size;
            if (base..base + tile_size).any(|n| self.grid.is_seed(n)) {
                let x_o = self.grid.tile_id_to_nd(tile);
                raise_neighborhood(&self.grid, self.scheme.as_ref(), x_o, &flags);
            }
        }
        lookup(&flags.snapshot()).indices
    }

    /// Run one pass over `worklist` in the current rayon context and return
    /// the compacted list of flagged tiles.
    pub fn run_pass(&self, worklist: &[usize]) -> ActiveList {
        let flags = TileFlags::new(self.grid.num_tiles());
        self.launch(worklist, &flags);
        lookup(&flags.snapshot())
    }

    fn launch(&self, worklist: &[usize], flags: &TileFlags) {
        flags.clear();
        let snapshot = if self.strict {
            Some(self.grid.values_snapshot())
        } else {
            None
        };
        let source = match &snapshot {
            Some(values) => HaloSource::Snapshot(values),
            None => HaloSource::Live,
        };
        let params = KernelParams {
            iterations: self.iterations,
            tolerance: self.tolerance,
        };
        let grid = &self.grid;
        let scheme = self.scheme.as_ref();
        let layout = self.layout;
        let tile_size = grid.tile_size();

        worklist.par_iter().for_each_init(
            || TileBuffer::new(tile_size),
            |buf, &tile| {
                update_tile(grid, scheme, layout, source, params, tile, flags, buf);
            },
        );
    }

    fn get_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Run passes until no tile is flagged or the pass budget is spent.
    ///
    /// # Parameters
    /// - `progress_cb`: Optional callback for progress updates (overrides builder-set callback)
    ///
    /// # Errors
    /// Returns an error if the thread pool cannot be built, or if the solve
    /// did not converge and raising on non-convergence is enabled.
    pub fn solve(&self, progress_cb: Option<&(dyn Fn(ProgressInfo) + Sync)>) -> Result<SolveReport> {
        let start_time = Instant::now();
        let num_tiles = self.grid.num_tiles();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.get_num_threads())
            .build()
            .map_err(|e| EikonalError::Other(e.to_string()))?;

        let all_tiles: Vec<usize> = (0..num_tiles).collect();
        let mut worklist = match self.strategy {
            Strategy::Adaptive => self.initial_worklist(),
            Strategy::Global => all_tiles.clone(),
        };
        if worklist.is_empty() {
            warn!("no seeds: nothing to propagate");
        }

        debug!(
            "solving with {} scheme on {:?} grid, {} tiles of {:?}, {:?} strategy",
            self.scheme.name(),
            self.grid.shape(),
            num_tiles,
            self.grid.tile_shape(),
            self.strategy
        );

        let flags = TileFlags::new(num_tiles);
        let mut passes = 0;
        let mut tiles_processed = 0u64;

        while !worklist.is_empty() && passes < self.max_passes {
            let active = pool.install(|| {
                self.launch(&worklist, &flags);
                lookup(&flags.snapshot())
            });
            passes += 1;
            tiles_processed += worklist.len() as u64;

            debug!(
                "pass {}: {} tiles processed, {} flagged",
                passes,
                worklist.len(),
                active.len()
            );

            worklist = match self.strategy {
                Strategy::Adaptive => active.indices,
                Strategy::Global if active.is_empty() => Vec::new(),
                Strategy::Global => all_tiles.clone(),
            };

            let info = ProgressInfo {
                pass: passes,
                tiles_processed,
                active_list_size: worklist.len(),
                elapsed: start_time.elapsed(),
            };
            if let Some(cb) = progress_cb {
                cb(info);
            } else if let Some(cb) = &self.progress_callback {
                cb(info);
            }
        }

        let report = SolveReport {
            converged: worklist.is_empty(),
            passes,
            tiles_processed,
            elapsed: start_time.elapsed(),
        };

        if report.converged {
            info!(
                "converged after {} passes ({} tile launches) in {:.3?}",
                report.passes, report.tiles_processed, report.elapsed
            );
        } else {
            warn!(
                "not converged after {} passes, {} tiles still active",
                report.passes,
                worklist.len()
            );
            if self.raise_on_non_convergence {
                return Err(EikonalError::NotConverged {
                    passes: report.passes,
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{GridGraph, Isotropic};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn uniform(shape: [usize; 2]) -> BlockGrid<2> {
        BlockGrid::<2>::new(shape, 1.0, vec![1.0; shape[0] * shape[1]]).unwrap()
    }

    fn manhattan_solver() -> HfmSolver<2> {
        let mut solver = HfmSolver::new(uniform([8, 8]), Arc::new(GridGraph::<2>::new()), 1e-10)
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap()
            .with_threads(2);
        solver.add_seed([0, 0], 0.0).unwrap();
        solver
    }

    #[test]
    fn manhattan_distance_exact() {
        let solver = manhattan_solver();
        let report = solver.solve(None).unwrap();
        assert!(report.converged);
        for x in 0..8 {
            for y in 0..8 {
                assert_eq!(solver.grid().value_at([x, y]), (x + y) as f64);
            }
        }
    }

    #[test]
    fn initial_worklist_covers_seed_neighbors() {
        let solver = manhattan_solver();
        assert_eq!(solver.initial_worklist(), vec![0, 1, 2]);
    }

    #[test]
    fn passes_are_monotone() {
        let solver = manhattan_solver();
        let mut worklist = solver.initial_worklist();
        while !worklist.is_empty() {
            let before = solver.values();
            worklist = solver.run_pass(&worklist).indices;
            let after = solver.values();
            for (b, a) in before.iter().zip(after.iter()) {
                assert!(a <= b);
            }
            assert_eq!(solver.grid().value_at([0, 0]), 0.0);
        }
    }

    #[test]
    fn converged_state_is_idempotent() {
        let solver = manhattan_solver();
        solver.solve(None).unwrap();
        let all: Vec<usize> = (0..solver.grid().num_tiles()).collect();
        assert!(solver.run_pass(&all).is_empty());
    }

    #[test]
    fn global_strategy_matches_adaptive() {
        let mut adaptive = HfmSolver::new(uniform([16, 16]), Arc::new(Isotropic::<2>::new()), 1e-12)
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap();
        adaptive.add_seed([5, 9], 0.0).unwrap();
        let mut global = HfmSolver::new(uniform([16, 16]), Arc::new(Isotropic::<2>::new()), 1e-12)
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap()
            .with_strategy(Strategy::Global);
        global.add_seed([5, 9], 0.0).unwrap();

        let ra = adaptive.solve(None).unwrap();
        let rg = global.solve(None).unwrap();
        assert!(ra.converged && rg.converged);
        for (a, g) in adaptive.values().iter().zip(global.values().iter()) {
            assert!((a - g).abs() < 1e-9);
        }
    }

    #[test]
    fn non_convergence_is_reported() {
        let mut solver = HfmSolver::new(uniform([32, 32]), Arc::new(Isotropic::<2>::new()), 1e-10)
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap()
            .with_max_passes(2);
        solver.add_seed([0, 0], 0.0).unwrap();
        let report = solver.solve(None).unwrap();
        assert!(!report.converged);
        assert_eq!(report.passes, 2);
        assert!(solver.grid().value_at([31, 31]).is_infinite());
        assert_eq!(solver.grid().value_at([1, 0]), 1.0);
    }

    #[test]
    fn non_convergence_can_raise() {
        let mut solver = HfmSolver::new(uniform([32, 32]), Arc::new(Isotropic::<2>::new()), 1e-10)
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap()
            .with_max_passes(2)
            .with_raise_on_non_convergence(true);
        solver.add_seed([0, 0], 0.0).unwrap();
        assert!(matches!(
            solver.solve(None),
            Err(EikonalError::NotConverged { passes: 2 })
        ));
    }

    #[test]
    fn no_seeds_converges_immediately() {
        let solver = HfmSolver::new(uniform([8, 8]), Arc::new(Isotropic::<2>::new()), 1e-8).unwrap();
        let report = solver.solve(None).unwrap();
        assert!(report.converged);
        assert_eq!(report.passes, 0);
    }

    #[test]
    fn progress_called_every_pass() {
        let solver = manhattan_solver();
        let calls = AtomicUsize::new(0);
        let cb = |info: ProgressInfo| {
            calls.fetch_add(1, Ordering::Relaxed);
            assert!(info.pass >= 1);
        };
        let report = solver.solve(Some(&cb)).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), report.passes);
    }

    #[test]
    fn seed_validation() {
        let mut solver = HfmSolver::new(uniform([8, 8]), Arc::new(Isotropic::<2>::new()), 1e-8).unwrap();
        assert!(matches!(
            solver.add_seed([8, 0], 0.0),
            Err(EikonalError::InvalidSeed { .. })
        ));
        assert!(matches!(
            solver.add_seed([0, 0], f64::NAN),
            Err(EikonalError::InvalidSeed { .. })
        ));
        assert!(solver.add_seed_radius([-1.0, 0.0], 2.0).is_err());
        assert!(solver.add_seed_radius([1.0, 1.0], -2.0).is_err());
    }

    #[test]
    fn seed_radius_values() {
        let grid = BlockGrid::<2>::new([9, 9], 0.5, vec![2.0; 81]).unwrap();
        let mut solver = HfmSolver::new(grid, Arc::new(Isotropic::<2>::new()), 1e-8).unwrap();
        solver.add_seed_radius([2.0, 2.0], 1.2).unwrap();
        let g = solver.grid();
        assert_eq!(g.value_at([4, 4]), 0.0);
        assert!((g.value_at([5, 4]) - 1.0).abs() < 1e-12);
        assert!((g.value_at([5, 5]) - 2.0 * 0.5 * 2f64.sqrt()).abs() < 1e-12);
        assert!((g.value_at([6, 4]) - 2.0).abs() < 1e-12);
        assert!(g.is_seed(g.index([6, 4])));
        assert!(!g.is_seed(g.index([7, 4])));
    }

    #[test]
    fn seed_radius_excludes_boundary_and_obstacles() {
        let mut cost = vec![1.0; 64];
        cost[3 * 8 + 4] = f64::INFINITY;
        let grid = BlockGrid::<2>::new([8, 8], 1.0, cost).unwrap();
        let mut solver = HfmSolver::new(grid, Arc::new(Isotropic::<2>::new()), 1e-8).unwrap();
        solver.add_seed_radius([4.0, 4.0], 2.0).unwrap();
        let g = solver.grid();
        assert!(g.is_seed(g.index([4, 4])));
        assert!(g.is_seed(g.index([5, 4])));
        assert!(g.is_seed(g.index([5, 5])));
        assert!(!g.is_seed(g.index([3, 4])));
        assert!(g.value_at([3, 4]).is_infinite());
        assert!(!g.is_seed(g.index([6, 4])));
    }

    #[test]
    fn seed_radius_uses_metric_norm() {
        let scheme = Arc::new(crate::scheme::Riemann2::constant([4.0, 0.0, 1.0]).unwrap());
        let mut solver = HfmSolver::new(uniform([16, 16]), scheme, 1e-10)
            .unwrap()
            .with_tile_shape([4, 4])
            .unwrap();
        solver.add_seed_radius([8.0, 8.0], 1.5).unwrap();
        {
            let g = solver.grid();
            assert_eq!(g.value_at([9, 8]), 0.5);
            assert_eq!(g.value_at([7, 8]), 0.5);
            assert_eq!(g.value_at([8, 9]), 1.0);
            assert!((g.value_at([9, 9]) - 1.25f64.sqrt()).abs() < 1e-12);
        }
        assert!(solver.solve(None).unwrap().converged);
        for k in 1..=3 {
            let u = solver.grid().value_at([8 + k, 8]);
            assert!((u - 0.5 * k as f64).abs() < 1e-9, "u[{}, 8] = {}", 8 + k, u);
        }
    }

    #[test]
    fn invalid_tolerance() {
        let result = HfmSolver::new(uniform([4, 4]), Arc::new(Isotropic::<2>::new()), 0.0);
        assert!(matches!(result, Err(EikonalError::InvalidTolerance(_))));
    }
}
