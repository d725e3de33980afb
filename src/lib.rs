// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! A block-parallel eikonal solver in the style of the Hamiltonian Fast
//! Marching (HFM) method.
//!
//! The grid is partitioned into tiles. Each pass updates the active tiles
//! independently with a few Gauss-Seidel sweeps of an upwind quadratic local
//! solver, then activates the tiles (and their neighbors) whose values changed.
//! Passes repeat until no tile is active. Metrics are supplied by a
//! [`SchemeProvider`](crate::scheme::SchemeProvider): isotropic, Riemannian
//! (via Selling decomposition), and the curvature-penalized Reeds-Shepp and
//! Dubins models on `(x, y, θ)` grids.

#![warn(missing_docs)]

/// Active-tile compaction.
pub mod active_set;
/// TOML configuration.
pub mod config;
/// Blocked grid storage and indexing traits.
pub mod core;
/// Error types for the library.
pub mod error;
/// Loading cost fields and saving values as .npy.
pub mod io;
/// Per-tile update kernel.
pub mod kernel;
/// Pass-based solver driver.
pub mod scheduler;
/// Stencil providers for the supported metric models.
pub mod scheme;
/// Neighbor tagging around settled cells.
pub mod tagging;
/// Upwind quadratic local solver.
pub mod update_kernels;

pub use crate::config::{SolverConfig, Strategy};
pub use crate::core::BlockGrid;
pub use crate::error::{EikonalError, Result};
pub use crate::scheduler::{HfmSolver, ProgressInfo, SolveReport};
pub use crate::scheme::{
    Dubins2, GridGraph, Isotropic, ReedsShepp2, Riemann2, Riemann3, SchemeProvider,
};
