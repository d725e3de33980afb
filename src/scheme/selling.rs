// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Selling's decomposition of symmetric positive definite matrices.
//!
//! A matrix `M` is reduced to an obtuse superbase `(b_0, ..., b_d)`, i.e. one
//! with `<b_i, M b_j> <= 0` for all `i != j`, and then written as
//! `M = Σ ρ_ij e_ij e_ijᵀ` with `ρ_ij = -<b_i, M b_j> >= 0` and integer
//! offsets `e_ij` orthogonal to the remaining superbase vectors.
//!
//! Matrices use the packed lower-triangular order `(00, 10, 11, 20, 21, 22)`.

use log::trace;

/// Superbase updates attempted before giving up on a degenerate matrix.
pub const MAX_SELLING_STEPS: usize = 256;

#[inline]
fn scal_2(m: &[f64; 3], a: [i32; 2], b: [i32; 2]) -> f64 {
    let (a0, a1) = (a[0] as f64, a[1] as f64);
    let (b0, b1) = (b[0] as f64, b[1] as f64);
    m[0] * a0 * b0 + m[1] * (a0 * b1 + a1 * b0) + m[2] * a1 * b1
}

#[inline]
fn scal_3(m: &[f64; 6], a: [i32; 3], b: [i32; 3]) -> f64 {
    let a = [a[0] as f64, a[1] as f64, a[2] as f64];
    let b = [b[0] as f64, b[1] as f64, b[2] as f64];
    m[0] * a[0] * b[0]
        + m[2] * a[1] * b[1]
        + m[5] * a[2] * b[2]
        + m[1] * (a[1] * b[0] + a[0] * b[1])
        + m[3] * (a[2] * b[0] + a[0] * b[2])
        + m[4] * (a[2] * b[1] + a[1] * b[2])
}

#[inline]
fn neg<const N: usize>(a: [i32; N]) -> [i32; N] {
    a.map(|c| -c)
}

#[inline]
fn add<const N: usize>(a: [i32; N], b: [i32; N]) -> [i32; N] {
    let mut c = a;
    for d in 0..N {
        c[d] += b[d];
    }
    c
}

#[inline]
fn cross(a: [i32; 3], b: [i32; 3]) -> [i32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

const PAIRS_2: [(usize, usize, usize); 3] = [(0, 1, 2), (0, 2, 1), (1, 2, 0)];

const PAIRS_3: [(usize, usize, usize, usize); 6] = [
    (0, 1, 2, 3),
    (0, 2, 1, 3),
    (0, 3, 1, 2),
    (1, 2, 0, 3),
    (1, 3, 0, 2),
    (2, 3, 0, 1),
];

/// Obtuse superbase of a 2x2 matrix, or `None` if the reduction stalls.
pub fn obtuse_superbase_2(m: &[f64; 3]) -> Option<[[i32; 2]; 3]> {
    let mut b = [[1, 0], [0, 1], [-1, -1]];
    let mut clean = 0;
    let mut pair = 0;
    for _ in 0..MAX_SELLING_STEPS {
        let (i, j, k) = PAIRS_2[pair];
        if scal_2(m, b[i], b[j]) > 0.0 {
            let (bi, bj) = (b[i], b[j]);
            b[i] = neg(bi);
            b[k] = add(bi, neg(bj));
            clean = 0;
        } else {
            clean += 1;
            if clean == PAIRS_2.len() {
                return Some(b);
            }
        }
        pair = (pair + 1) % PAIRS_2.len();
    }
    None
}

/// Obtuse superbase of a 3x3 matrix, or `None` if the reduction stalls.
pub fn obtuse_superbase_3(m: &[f64; 6]) -> Option<[[i32; 3]; 4]> {
    let mut b = [[1, 0, 0], [0, 1, 0], [0, 0, 1], [-1, -1, -1]];
    let mut clean = 0;
    let mut pair = 0;
    for _ in 0..MAX_SELLING_STEPS {
        let (i, j, k, l) = PAIRS_3[pair];
        if scal_3(m, b[i], b[j]) > 0.0 {
            let bi = b[i];
            b[i] = neg(bi);
            b[k] = add(b[k], bi);
            b[l] = add(b[l], bi);
            clean = 0;
        } else {
            clean += 1;
            if clean == PAIRS_3.len() {
                return Some(b);
            }
        }
        pair = (pair + 1) % PAIRS_3.len();
    }
    None
}

/// Decompose a 2x2 symmetric matrix as `Σ ρ_k e_k e_kᵀ`.
///
/// Negative or non-finite weights, which only arise for matrices that are
/// not positive definite, are set to zero.
pub fn decompose_2(m: [f64; 3]) -> ([f64; 3], [[i32; 2]; 3]) {
    if m.iter().any(|c| !c.is_finite()) {
        trace!("selling: non-finite matrix {:?}", m);
        return ([0.0; 3], [[1, 0], [0, 1], [1, 1]]);
    }
    let b = match obtuse_superbase_2(&m) {
        Some(b) => b,
        None => {
            trace!("selling: no obtuse superbase for {:?}", m);
            return ([0.0; 3], [[1, 0], [0, 1], [1, 1]]);
        }
    };
    let mut weights = [0.0; 3];
    let mut offsets = [[0i32; 2]; 3];
    for (slot, &(i, j, k)) in PAIRS_2.iter().enumerate() {
        let rho = -scal_2(&m, b[i], b[j]);
        weights[slot] = if rho.is_finite() { rho.max(0.0) } else { 0.0 };
        offsets[slot] = [-b[k][1], b[k][0]];
    }
    (weights, offsets)
}

/// Decompose a 3x3 symmetric matrix as `Σ ρ_k e_k e_kᵀ`.
pub fn decompose_3(m: [f64; 6]) -> ([f64; 6], [[i32; 3]; 6]) {
    let fallback = [
        [1, 0, 0],
        [0, 1, 0],
        [0, 0, 1],
        [1, 1, 0],
        [1, 0, 1],
        [0, 1, 1],
    ];
    if m.iter().any(|c| !c.is_finite()) {
        trace!("selling: non-finite matrix {:?}", m);
        return ([0.0; 6], fallback);
    }
    let b = match obtuse_superbase_3(&m) {
        Some(b) => b,
        None => {
            trace!("selling: no obtuse superbase for {:?}", m);
            return ([0.0; 6], fallback);
        }
    };
    let mut weights = [0.0; 6];
    let mut offsets = [[0i32; 3]; 6];
    for (slot, &(i, j, k, l)) in PAIRS_3.iter().enumerate() {
        let rho = -scal_3(&m, b[i], b[j]);
        weights[slot] = if rho.is_finite() { rho.max(0.0) } else { 0.0 };
        offsets[slot] = cross(b[k], b[l]);
    }
    (weights, offsets)
}

#[cfg(test)]
pub(crate) fn reconstruct<const N: usize, const S: usize, const K: usize>(
    weights: &[f64; K],
    offsets: &[[i32; N]; K],
) -> [f64; S] {
    let mut m = [0.0; S];
    for (w, e) in weights.iter().zip(offsets.iter()) {
        for i in 0..N {
            for j in 0..=i {
                m[super::sym_index(i, j)] += w * (e[i] * e[j]) as f64;
            }
        }
    }
    m
}
