// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Stencil providers.
//!
//! A provider maps a grid point to the weighted finite-difference terms the
//! local iterator consumes. Offsets come in two kinds: a symmetric offset `e`
//! reads both `x + e` and `x - e` and keeps the smaller value, a forward
//! offset reads only `x + e`. Providers describing a family of metrics stack
//! the terms of every member and say whether members combine by min or max.

use smallvec::SmallVec;

use crate::error::{EikonalError, Result};

mod curvature;
mod isotropic;
mod riemann;
pub mod selling;

pub use curvature::{CurvatureFields, Dubins2, ReedsShepp2, DEFAULT_COSMIN2, DEFAULT_RELAX};
pub use isotropic::{GridGraph, Isotropic};
pub use riemann::{Riemann2, Riemann3};

/// Largest number of weighted offsets (all family members together) one
/// stencil may carry.
pub const MAX_ACT: usize = 12;

/// Number of halo slots a stencil may need: every symmetric offset takes two.
pub const MAX_NEIGHBORS: usize = 2 * MAX_ACT;

/// Shape of a provider's stencil, identical for every grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilLayout {
    /// Symmetric offsets per family member.
    pub nsym: usize,
    /// Forward offsets per family member.
    pub nfwd: usize,
    /// Number of family members.
    pub nmix: usize,
}

impl StencilLayout {
    /// Weighted offsets per family member.
    pub fn nact(&self) -> usize {
        self.nsym + self.nfwd
    }

    /// Neighbor slots per family member.
    pub fn ntot(&self) -> usize {
        2 * self.nsym + self.nfwd
    }

    /// Weighted offsets over all family members.
    pub fn total_offsets(&self) -> usize {
        self.nact() * self.nmix
    }

    /// Neighbor slots over all family members.
    pub fn total_neighbors(&self) -> usize {
        self.ntot() * self.nmix
    }

    /// Reject layouts the kernel buffers cannot hold.
    pub fn check_capacity(&self) -> Result<()> {
        let requested = self.total_offsets();
        if requested > MAX_ACT || self.nmix == 0 {
            return Err(EikonalError::StencilTooWide {
                requested,
                capacity: MAX_ACT,
            });
        }
        Ok(())
    }
}

/// Stencil at one grid point.
///
/// Member `r` occupies entries `r * nact .. (r + 1) * nact`, symmetric
/// offsets first. A weight of exactly zero marks a pruned offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil<const N: usize> {
    /// Nonnegative weights.
    pub weights: SmallVec<[f64; MAX_ACT]>,
    /// Integer offsets, in grid cells.
    pub offsets: SmallVec<[[i32; N]; MAX_ACT]>,
    /// Members combine by min when true, by max otherwise.
    pub mix_is_min: bool,
}

impl<const N: usize> Stencil<N> {
    /// An empty stencil, combined by min.
    pub fn new() -> Self {
        Stencil {
            weights: SmallVec::new(),
            offsets: SmallVec::new(),
            mix_is_min: true,
        }
    }

    /// Append a weighted offset. Negative or non-finite weights become 0.
    pub fn push(&mut self, weight: f64, offset: [i32; N]) {
        let weight = if weight.is_finite() && weight > 0.0 {
            weight
        } else {
            0.0
        };
        self.weights.push(weight);
        self.offsets.push(offset);
    }

    /// Largest absolute offset component over the unpruned offsets.
    pub fn reach(&self) -> usize {
        self.weights
            .iter()
            .zip(self.offsets.iter())
            .filter(|(w, _)| **w > 0.0)
            .flat_map(|(_, e)| e.iter().map(|c| c.unsigned_abs() as usize))
            .max()
            .unwrap_or(0)
    }
}

impl<const N: usize> Default for Stencil<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of the stencil at every grid point.
///
/// Implementations must be pure: the stencil depends only on the provider's
/// parameters and the grid position.
pub trait SchemeProvider<const N: usize>: Send + Sync {
    /// Short model name, used in logs.
    fn name(&self) -> &'static str;

    /// Stencil shape shared by all grid points.
    fn layout(&self) -> StencilLayout;

    /// Stencil at grid position `x`.
    fn scheme(&self, x: [usize; N]) -> Stencil<N>;

    /// Axes that must wrap around (e.g. the angular axis of curvature models).
    fn periodic_axes(&self) -> [bool; N] {
        [false; N]
    }

    /// True if every offset is a unit axis vector. Changed tiles then only
    /// need to flag their face neighbors.
    fn axis_aligned(&self) -> bool {
        false
    }

    /// Upper bound on the absolute value of any offset component.
    fn reach(&self) -> usize;

    /// Check the provider's parameter fields against the grid shape.
    fn validate(&self, _shape: [usize; N]) -> Result<()> {
        Ok(())
    }

    /// Length of the physical displacement `diff` in the metric at `x`,
    /// before scaling by the cost. `None` means the Euclidean norm applies.
    fn seed_norm(&self, _x: [usize; N], _diff: [f64; N]) -> Option<f64> {
        None
    }
}

/// Symmetric matrix in packed lower-triangular order
/// `(00, 10, 11, 20, 21, 22, ...)`.
#[inline]
pub(crate) fn sym_index(i: usize, j: usize) -> usize {
    let (i, j) = if i >= j { (i, j) } else { (j, i) };
    i * (i + 1) / 2 + j
}

/// Packed relaxed outer product `v vᵀ + relax² (|v|² I - v vᵀ)`.
///
/// Positive definite for `v != 0` and `relax > 0`, tending to `v vᵀ`.
pub fn relaxed_outer<const N: usize, const S: usize>(v: [f64; N], relax: f64) -> [f64; S] {
    debug_assert_eq!(S, N * (N + 1) / 2);
    let r2 = relax * relax;
    let norm2: f64 = v.iter().map(|c| c * c).sum();
    let mut m = [0.0; S];
    for i in 0..N {
        for j in 0..=i {
            let mut mij = v[i] * v[j] * (1.0 - r2);
            if i == j {
                mij += r2 * norm2;
            }
            m[sym_index(i, j)] = mij;
        }
    }
    m
}
