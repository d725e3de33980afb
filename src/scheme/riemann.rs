// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Riemannian metrics in two and three dimensions.
//!
//! The provider stores the dual metric `D = M⁻¹` of the Riemannian metric
//! `M`, either constant or one packed symmetric matrix per cell in row-major
//! order. The equation solved is `<∇u, D ∇u> = cost²`, discretized with the
//! Selling decomposition of `D`.

use super::selling::{decompose_2, decompose_3};
use super::{sym_index, SchemeProvider, Stencil, StencilLayout};
use crate::core::row_major_index;
use crate::error::{EikonalError, Result};

#[derive(Debug, Clone)]
enum Field<const S: usize> {
    Constant([f64; S]),
    PerCell(Vec<[f64; S]>),
}

fn check_spd(name: &str, m: &[f64]) -> Result<()> {
    let ok = m.iter().all(|c| c.is_finite())
        && match m.len() {
            3 => m[0] > 0.0 && m[0] * m[2] - m[1] * m[1] > 0.0,
            6 => {
                let det = m[0] * (m[2] * m[5] - m[4] * m[4]) - m[1] * (m[1] * m[5] - m[4] * m[3])
                    + m[3] * (m[1] * m[4] - m[2] * m[3]);
                m[0] > 0.0 && m[0] * m[2] - m[1] * m[1] > 0.0 && det > 0.0
            }
            _ => false,
        };
    if ok {
        Ok(())
    } else {
        Err(EikonalError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{:?} is not symmetric positive definite", m),
        })
    }
}

fn chunk<const S: usize>(name: &str, flat: &[f64]) -> Result<Vec<[f64; S]>> {
    if flat.len() % S != 0 {
        return Err(EikonalError::ParamsMismatch {
            name: name.to_string(),
            expected: (flat.len() / S + 1) * S,
            got: flat.len(),
        });
    }
    let mut out = Vec::with_capacity(flat.len() / S);
    for c in flat.chunks_exact(S) {
        let mut m = [0.0; S];
        m.copy_from_slice(c);
        check_spd(name, &m)?;
        out.push(m);
    }
    Ok(out)
}

macro_rules! riemann_provider {
    ($name:ident, $dim:literal, $sym:literal, $decompose:ident, $invert:ident) => {
        impl $name {
            /// Constant dual metric, packed as `(00, 10, 11, ...)`.
            ///
            /// # Errors
            /// Returns an error if the matrix is not symmetric positive definite.
            pub fn constant(dual_metric: [f64; $sym]) -> Result<Self> {
                check_spd("dual_metric", &dual_metric)?;
                Ok(Self::from_field(Field::Constant(dual_metric)))
            }

            /// Constant Riemannian metric `M`; the dual metric is its inverse.
            ///
            /// # Errors
            /// Returns an error if the matrix is not symmetric positive definite.
            pub fn from_metric(metric: [f64; $sym]) -> Result<Self> {
                check_spd("metric", &metric)?;
                Self::constant($invert(metric))
            }

            /// One packed dual metric per cell, in row-major cell order.
            ///
            /// # Errors
            /// Returns an error if the flat array is not a whole number of
            /// matrices or if any matrix is not symmetric positive definite.
            pub fn field(dual_metric: &[f64]) -> Result<Self> {
                let cells = chunk::<$sym>("dual_metric", dual_metric)?;
                Ok(Self::from_field(Field::PerCell(cells)))
            }

            fn from_field(field: Field<$sym>) -> Self {
                let reach = match &field {
                    Field::Constant(m) => stencil_reach($decompose(*m)),
                    Field::PerCell(ms) => ms
                        .iter()
                        .map(|m| stencil_reach($decompose(*m)))
                        .max()
                        .unwrap_or(1),
                };
                $name {
                    field,
                    shape: None,
                    reach: reach.max(1),
                }
            }

            /// Bind the provider to a grid shape, required for per-cell fields.
            pub fn with_shape(mut self, shape: [usize; $dim]) -> Self {
                self.shape = Some(shape);
                self
            }

            fn dual_metric_at(&self, x: [usize; $dim]) -> [f64; $sym] {
                match (&self.field, self.shape) {
                    (Field::Constant(m), _) => *m,
                    (Field::PerCell(ms), Some(shape)) => ms[row_major_index(x, shape)],
                    (Field::PerCell(ms), None) => ms[0],
                }
            }
        }

        impl SchemeProvider<$dim> for $name {
            fn name(&self) -> &'static str {
                "riemann"
            }

            fn layout(&self) -> StencilLayout {
                StencilLayout {
                    nsym: $sym,
                    nfwd: 0,
                    nmix: 1,
                }
            }

            fn scheme(&self, x: [usize; $dim]) -> Stencil<$dim> {
                let (weights, offsets) = $decompose(self.dual_metric_at(x));
                let mut s = Stencil::new();
                for (w, e) in weights.iter().zip(offsets.iter()) {
                    s.push(*w, *e);
                }
                s
            }

            fn reach(&self) -> usize {
                self.reach
            }

            fn validate(&self, shape: [usize; $dim]) -> Result<()> {
                if let Field::PerCell(ms) = &self.field {
                    let expected: usize = shape.iter().product();
                    if ms.len() != expected {
                        return Err(EikonalError::ParamsMismatch {
                            name: "dual_metric".to_string(),
                            expected: expected * $sym,
                            got: ms.len() * $sym,
                        });
                    }
                    if self.shape != Some(shape) {
                        return Err(EikonalError::InvalidParameter {
                            name: "dual_metric".to_string(),
                            reason: format!(
                                "field bound to shape {:?}, grid is {:?}",
                                self.shape, shape
                            ),
                        });
                    }
                }
                Ok(())
            }

            fn seed_norm(&self, x: [usize; $dim], diff: [f64; $dim]) -> Option<f64> {
                let metric = $invert(self.dual_metric_at(x));
                let mut q = 0.0;
                for i in 0..$dim {
                    for j in 0..$dim {
                        q += metric[sym_index(i, j)] * diff[i] * diff[j];
                    }
                }
                Some(q.max(0.0).sqrt())
            }
        }
    };
}

fn stencil_reach<const N: usize, const K: usize>(decomp: ([f64; K], [[i32; N]; K])) -> usize {
    let (weights, offsets) = decomp;
    weights
        .iter()
        .zip(offsets.iter())
        .filter(|(w, _)| **w > 0.0)
        .flat_map(|(_, e)| e.iter().map(|c| c.unsigned_abs() as usize))
        .max()
        .unwrap_or(1)
}

fn invert_2(m: [f64; 3]) -> [f64; 3] {
    let det = m[0] * m[2] - m[1] * m[1];
    [m[2] / det, -m[1] / det, m[0] / det]
}

fn invert_3(m: [f64; 6]) -> [f64; 6] {
    // Packed (00, 10, 11, 20, 21, 22); cofactors of the full symmetric matrix.
    let (a, b, c, d, e, f) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let c00 = c * f - e * e;
    let c10 = -(b * f - e * d);
    let c11 = a * f - d * d;
    let c20 = b * e - c * d;
    let c21 = -(a * e - b * d);
    let c22 = a * c - b * b;
    let det = a * c00 + b * c10 + d * c20;
    [c00 / det, c10 / det, c11 / det, c20 / det, c21 / det, c22 / det]
}

/// Two-dimensional Riemannian metric.
#[derive(Debug, Clone)]
pub struct Riemann2 {
    field: Field<3>,
    shape: Option<[usize; 2]>,
    reach: usize,
}

/// Three-dimensional Riemannian metric.
#[derive(Debug, Clone)]
pub struct Riemann3 {
    field: Field<6>,
    shape: Option<[usize; 3]>,
    reach: usize,
}

riemann_provider!(Riemann2, 2, 3, decompose_2, invert_2);
riemann_provider!(Riemann3, 3, 6, decompose_3, invert_3);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_axes() {
        let p = Riemann2::constant([1.0, 0.0, 1.0]).unwrap();
        let s = p.scheme([3, 4]);
        assert_eq!(s.weights.len(), 3);
        let mut active: Vec<[i32; 2]> = s
            .weights
            .iter()
            .zip(s.offsets.iter())
            .filter(|(w, _)| **w > 0.0)
            .map(|(_, e)| e.map(i32::abs))
            .collect();
        active.sort();
        assert_eq!(active, vec![[0, 1], [1, 0]]);
        assert_eq!(p.reach(), 1);
    }

    #[test]
    fn metric_inverse() {
        let m = [4.0, 1.0, 2.0];
        let p = Riemann2::from_metric(m).unwrap();
        let d = p.dual_metric_at([0, 0]);
        // M D = I
        assert!((m[0] * d[0] + m[1] * d[1] - 1.0).abs() < 1e-12);
        assert!((m[0] * d[1] + m[1] * d[2]).abs() < 1e-12);
        assert!((m[1] * d[1] + m[2] * d[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn metric_inverse_3d() {
        let m = [4.0, 1.5, 3.0, -1.0, 0.5, 2.0];
        let d = invert_3(m);
        let full = |p: &[f64; 6], i: usize, j: usize| p[crate::scheme::sym_index(i, j)];
        for i in 0..3 {
            for j in 0..3 {
                let mut acc = 0.0;
                for k in 0..3 {
                    acc += full(&m, i, k) * full(&d, k, j);
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((acc - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn rejects_indefinite() {
        assert!(matches!(
            Riemann2::constant([1.0, 2.0, 1.0]),
            Err(EikonalError::InvalidParameter { .. })
        ));
        assert!(Riemann3::constant([1.0, 0.0, 1.0, 0.0, 0.0, -1.0]).is_err());
    }

    #[test]
    fn field_size_checked() {
        let flat: Vec<f64> = [1.0, 0.0, 1.0].repeat(6);
        let p = Riemann2::field(&flat).unwrap().with_shape([2, 3]);
        assert!(p.validate([2, 3]).is_ok());
        assert!(matches!(
            p.validate([3, 3]),
            Err(EikonalError::ParamsMismatch {
                expected: 27,
                got: 18,
                ..
            })
        ));
        assert!(matches!(
            Riemann2::field(&flat[..5]),
            Err(EikonalError::ParamsMismatch { .. })
        ));
    }

    #[test]
    fn seed_norm_uses_metric() {
        // Dual metric diag(4, 1): the metric is diag(1/4, 1).
        let p = Riemann2::constant([4.0, 0.0, 1.0]).unwrap();
        assert_eq!(p.seed_norm([0, 0], [1.0, 0.0]), Some(0.5));
        assert_eq!(p.seed_norm([0, 0], [0.0, 2.0]), Some(2.0));
        let q = Riemann3::constant([1.0, 0.0, 1.0, 0.0, 0.0, 1.0]).unwrap();
        let n = q.seed_norm([0, 0, 0], [1.0, 2.0, 2.0]).unwrap();
        assert!((n - 3.0).abs() < 1e-12);
    }

    #[test]
    fn field_varies_per_cell() {
        let mut flat = vec![];
        flat.extend_from_slice(&[1.0, 0.0, 1.0]);
        flat.extend_from_slice(&[9.0, 0.0, 1.0]);
        let p = Riemann2::field(&flat).unwrap().with_shape([1, 2]);
        let w0: f64 = p.scheme([0, 0]).weights.iter().sum();
        let w1: f64 = p.scheme([0, 1]).weights.iter().sum();
        assert!((w0 - 2.0).abs() < 1e-12);
        assert!((w1 - 10.0).abs() < 1e-12);
    }
}
