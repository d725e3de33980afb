// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use super::{SchemeProvider, Stencil, StencilLayout};

/// Isotropic metric: one symmetric unit offset per axis with weight 1.
///
/// The local update is the classical upwind (Godunov) discretization of
/// `|∇u| = cost`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Isotropic<const N: usize>;

impl<const N: usize> Isotropic<N> {
    /// Create the isotropic provider.
    pub fn new() -> Self {
        Isotropic
    }
}

fn unit<const N: usize>(axis: usize, sign: i32) -> [i32; N] {
    let mut e = [0i32; N];
    e[axis] = sign;
    e
}

impl<const N: usize> SchemeProvider<N> for Isotropic<N> {
    fn name(&self) -> &'static str {
        "isotropic"
    }

    fn layout(&self) -> StencilLayout {
        StencilLayout {
            nsym: N,
            nfwd: 0,
            nmix: 1,
        }
    }

    fn scheme(&self, _x: [usize; N]) -> Stencil<N> {
        let mut s = Stencil::new();
        for d in 0..N {
            s.push(1.0, unit(d, 1));
        }
        s
    }

    fn axis_aligned(&self) -> bool {
        true
    }

    fn reach(&self) -> usize {
        1
    }
}

/// Shortest paths on the `2N`-connected grid graph.
///
/// Each of the `2N` family members holds a single forward unit offset; the
/// member minimum reproduces `u(x) = min_e u(x + e) + cost`, which for a
/// uniform cost is the Manhattan distance to the seeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridGraph<const N: usize>;

impl<const N: usize> GridGraph<N> {
    /// Create the grid-graph provider.
    pub fn new() -> Self {
        GridGraph
    }
}

impl<const N: usize> SchemeProvider<N> for GridGraph<N> {
    fn name(&self) -> &'static str {
        "grid-graph"
    }

    fn layout(&self) -> StencilLayout {
        StencilLayout {
            nsym: 0,
            nfwd: 1,
            nmix: 2 * N,
        }
    }

    fn scheme(&self, _x: [usize; N]) -> Stencil<N> {
        let mut s = Stencil::new();
        for d in 0..N {
            s.push(1.0, unit(d, -1));
            s.push(1.0, unit(d, 1));
        }
        s.mix_is_min = true;
        s
    }

    fn axis_aligned(&self) -> bool {
        true
    }

    fn reach(&self) -> usize {
        1
    }
}
