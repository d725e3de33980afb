// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use smallvec::SmallVec;

use crate::scheme::{Stencil, StencilLayout, MAX_ACT, MAX_NEIGHBORS};

/// Solve `Σ_k w_k · max(0, u - v_k)² = cost²` for the smallest admissible `u`.
///
/// `terms` holds `(v_k, w_k)` pairs and is sorted in place. Terms with an
/// infinite value or a non-positive weight are ignored. Values are added in
/// increasing order and the accumulation stops as soon as the current
/// solution no longer exceeds the next value, so that every retained term
/// satisfies `u > v_k`.
///
/// Returns `+inf` if no term is usable or if `cost` is infinite. With a zero
/// cost the result is the smallest usable value.
pub fn solve_weighted(cost: f64, terms: &mut [(f64, f64)]) -> f64 {
    if !cost.is_finite() {
        return f64::INFINITY;
    }
    terms.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

    let (mut a, mut b, mut c) = (0.0, 0.0, -cost * cost);
    let mut u = f64::INFINITY;
    for &(v, w) in terms.iter() {
        if !v.is_finite() || u <= v {
            break;
        }
        if !(w > 0.0) {
            continue;
        }
        a += w;
        b += w * v;
        c += w * v * v;
        let disc = (b * b - a * c).max(0.0);
        u = (b + disc.sqrt()) / a;
    }
    u
}

/// Halo offsets of a stencil in neighbor-slot order.
///
/// For member `r` the slots are `r * ntot ..`: two per symmetric offset
/// (`x - e` then `x + e`), followed by one per forward offset (`x + e`).
pub fn neighbor_offsets<const N: usize>(
    layout: StencilLayout,
    stencil: &Stencil<N>,
) -> SmallVec<[[i32; N]; MAX_NEIGHBORS]> {
    let nact = layout.nact();
    let mut out = SmallVec::new();
    for r in 0..layout.nmix {
        for k in 0..layout.nsym {
            let e = stencil.offsets[r * nact + k];
            out.push(e.map(|c| -c));
            out.push(e);
        }
        for k in 0..layout.nfwd {
            out.push(stencil.offsets[r * nact + layout.nsym + k]);
        }
    }
    out
}

/// Solve one family member from its neighbor values.
fn solve_member(
    cost: f64,
    layout: StencilLayout,
    weights: &[f64],
    neighbors: &[f64],
) -> f64 {
    let mut terms: SmallVec<[(f64, f64); MAX_ACT]> = SmallVec::new();
    for k in 0..layout.nsym {
        let v = neighbors[2 * k].min(neighbors[2 * k + 1]);
        terms.push((v, weights[k]));
    }
    for k in 0..layout.nfwd {
        terms.push((neighbors[2 * layout.nsym + k], weights[layout.nsym + k]));
    }
    solve_weighted(cost, &mut terms)
}

/// Solve the local equation at one point, combining family members.
///
/// `neighbors` holds one value per halo slot, in the order given by
/// [`neighbor_offsets`]. Members combine by min if `mix_is_min`, by max
/// otherwise.
pub fn hfm_solve(
    cost: f64,
    layout: StencilLayout,
    weights: &[f64],
    mix_is_min: bool,
    neighbors: &[f64],
) -> f64 {
    let nact = layout.nact();
    let ntot = layout.ntot();
    let mut combined = if mix_is_min {
        f64::INFINITY
    } else {
        f64::NEG_INFINITY
    };
    for r in 0..layout.nmix {
        let u = solve_member(
            cost,
            layout,
            &weights[r * nact..(r + 1) * nact],
            &neighbors[r * ntot..(r + 1) * ntot],
        );
        combined = if mix_is_min {
            combined.min(u)
        } else {
            combined.max(u)
        };
    }
    if combined == f64::NEG_INFINITY {
        f64::INFINITY
    } else {
        combined
    }
}

/// One Gauss-Seidel update: `min(u_old, solution)`, seeds keep `u_old`.
pub fn hfm_update(
    u_old: f64,
    is_seed: bool,
    cost: f64,
    layout: StencilLayout,
    weights: &[f64],
    mix_is_min: bool,
    neighbors: &[f64],
) -> f64 {
    if is_seed {
        return u_old;
    }
    u_old.min(hfm_solve(cost, layout, weights, mix_is_min, neighbors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{GridGraph, Isotropic, SchemeProvider};

    const INF: f64 = f64::INFINITY;

    fn iso(n: usize) -> StencilLayout {
        StencilLayout {
            nsym: n,
            nfwd: 0,
            nmix: 1,
        }
    }

    #[test]
    fn isotropic_2d_known_case() {
        // Both upwind neighbors at 0, cost 1: 2u² = 1.
        let u = hfm_solve(1.0, iso(2), &[1.0, 1.0], true, &[0.0, INF, INF, 0.0]);
        assert!((u - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-10);
    }

    #[test]
    fn isotropic_2d_one_sided() {
        // a=0, b=100: the second term is never reached.
        let u = hfm_solve(1.0, iso(2), &[1.0, 1.0], true, &[0.0, 0.0, 100.0, 100.0]);
        assert!((u - 1.0).abs() < 1e-10);
    }

    #[test]
    fn isotropic_2d_one_infinite() {
        let u = hfm_solve(1.0, iso(2), &[1.0, 1.0], true, &[INF, INF, 5.0, INF]);
        assert!((u - 6.0).abs() < 1e-10);
    }

    #[test]
    fn isotropic_3d_known_case() {
        let u = hfm_solve(1.0, iso(3), &[1.0; 3], true, &[0.0; 6]);
        assert!((u - 1.0 / 3.0_f64.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn isotropic_3d_partial() {
        // a=0, b=0, c=100 behaves like the 2D case.
        let u = hfm_solve(1.0, iso(3), &[1.0; 3], true, &[0.0, 0.0, 0.0, 0.0, 100.0, 100.0]);
        assert!((u - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-10);
    }

    #[test]
    fn all_neighbors_infinite() {
        let u = hfm_solve(1.0, iso(3), &[1.0; 3], true, &[INF; 6]);
        assert!(u.is_infinite());
    }

    #[test]
    fn zero_weights_are_dropped() {
        let u = hfm_solve(1.0, iso(2), &[0.0, 1.0], true, &[0.0, 0.0, 3.0, 3.0]);
        assert!((u - 4.0).abs() < 1e-10);
    }

    #[test]
    fn zero_cost_returns_smallest_neighbor() {
        let u = hfm_solve(0.0, iso(2), &[1.0, 1.0], true, &[2.0, 7.0, 3.0, 1.5]);
        assert_eq!(u, 1.5);
    }

    #[test]
    fn infinite_cost_is_obstacle() {
        let u = hfm_solve(INF, iso(2), &[1.0, 1.0], true, &[0.0; 4]);
        assert!(u.is_infinite());
    }

    #[test]
    fn weighted_terms() {
        // 4 (u - 1)² = 4 → u = 2
        let mut terms = [(1.0, 4.0)];
        assert!((solve_weighted(2.0, &mut terms) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn family_minimum() {
        let p = GridGraph::<2>::new();
        let layout = p.layout();
        let s = p.scheme([1, 1]);
        let neighbors = [4.0, 2.0, INF, 7.0];
        let u = hfm_solve(1.0, layout, &s.weights, s.mix_is_min, &neighbors);
        assert_eq!(u, 3.0);

        let u_max = hfm_solve(1.0, layout, &s.weights, false, &neighbors);
        assert!(u_max.is_infinite());
    }

    #[test]
    fn seeds_keep_their_value() {
        let u = hfm_update(0.25, true, 1.0, iso(2), &[1.0, 1.0], true, &[0.0; 4]);
        assert_eq!(u, 0.25);
    }

    #[test]
    fn update_never_increases() {
        let u = hfm_update(0.5, false, 1.0, iso(2), &[1.0, 1.0], true, &[0.0, 0.0, INF, INF]);
        assert_eq!(u, 0.5);
        let u = hfm_update(INF, false, 1.0, iso(2), &[1.0, 1.0], true, &[0.0, 0.0, INF, INF]);
        assert_eq!(u, 1.0);
    }

    #[test]
    fn neighbor_slot_order() {
        let p = Isotropic::<2>::new();
        let offsets = neighbor_offsets(p.layout(), &p.scheme([0, 0]));
        assert_eq!(offsets.as_slice(), &[[-1, 0], [1, 0], [0, -1], [0, 1]]);

        let g = GridGraph::<2>::new();
        let offsets = neighbor_offsets(g.layout(), &g.scheme([0, 0]));
        assert_eq!(offsets.as_slice(), &[[-1, 0], [1, 0], [0, -1], [0, 1]]);
    }

    #[test]
    fn no_nan_produced() {
        let cases: [[f64; 4]; 6] = [
            [0.0, 0.0, 0.0, 0.0],
            [1.0, 1.0, 1.0, 1.0],
            [INF, 0.0, INF, INF],
            [INF, INF, INF, INF],
            [0.0, 0.0, 1e300, 1e300],
            [1e-300, 0.0, 0.0, 1e-300],
        ];
        for cost in [0.0, 1e-3, 1.0, 1e3] {
            for neighbors in cases.iter() {
                let u = hfm_solve(cost, iso(2), &[1.0, 1.0], true, neighbors);
                assert!(!u.is_nan(), "NaN for cost {} neighbors {:?}", cost, neighbors);
            }
        }
    }
}
