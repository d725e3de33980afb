// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Curvature penalized models on `(x, y, θ)` grids.
//!
//! The third axis samples the orientation `θ = x[2] · 2π / nθ` and is
//! periodic. With constant parameters the stencils depend on `θ` only and
//! are computed once per angular slice at construction. Per-cell parameter
//! fields ([`CurvatureFields`]) make them vary in space, and they are then
//! computed on the fly.
//!
//! Parameters are physical: `xi` is the radius of curvature scale and
//! `kappa` the rotation bias. They are converted to grid units using the
//! spatial spacing `h` and the angular spacing `2π / nθ`.

use std::f64::consts::PI;

use super::selling::decompose_3;
use super::{relaxed_outer, SchemeProvider, Stencil, StencilLayout};
use crate::core::row_major_index;
use crate::error::{EikonalError, Result};

/// Default relaxation of the outer product `v vᵀ`.
pub const DEFAULT_RELAX: f64 = 0.1;

/// Default angular pruning tolerance: an offset is dropped when its squared
/// cosine with the lateral direction is at least `1 - cosmin2`.
pub const DEFAULT_COSMIN2: f64 = 0.5;

/// Per-cell values for the curvature model parameters.
///
/// Each field holds physical values in row-major order, either one per
/// spatial cell (`nx · ny` entries, shared by every orientation) or one per
/// grid cell (`nx · ny · nθ` entries). A missing field keeps the constant
/// passed to the constructor. `theta` replaces the slice angle
/// `x[2] · 2π / nθ` as the heading of each cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurvatureFields {
    /// Curvature scale per cell.
    pub xi: Option<Vec<f64>>,
    /// Rotation bias per cell.
    pub kappa: Option<Vec<f64>>,
    /// Heading per cell, in radians.
    pub theta: Option<Vec<f64>>,
}

impl CurvatureFields {
    /// True if no field is given.
    pub fn is_empty(&self) -> bool {
        self.xi.is_none() && self.kappa.is_none() && self.theta.is_none()
    }
}

#[derive(Debug, Clone)]
enum Field {
    Constant(f64),
    PerCell(Vec<f64>),
}

impl Field {
    fn at(&self, x: [usize; 3], shape: [usize; 3]) -> f64 {
        match self {
            Field::Constant(v) => *v,
            Field::PerCell(vs) if vs.len() == shape[0] * shape[1] => vs[x[0] * shape[1] + x[1]],
            Field::PerCell(vs) => vs[row_major_index(x, shape)],
        }
    }
}

/// Heading and parameters at one cell, in grid units.
#[derive(Debug, Clone, Copy)]
struct Local {
    cos: f64,
    sin: f64,
    xi: f64,
    kappa: f64,
}

#[derive(Debug, Clone)]
struct Geometry {
    n_theta: usize,
    /// Angular spacing over spatial spacing.
    h_ratio: f64,
    xi: Field,
    kappa: Field,
    theta: Option<Field>,
    /// Grid shape the per-cell fields are bound to.
    shape: Option<[usize; 3]>,
}

fn check_xi(xi: f64) -> Result<()> {
    if !xi.is_finite() || xi <= 0.0 {
        return Err(EikonalError::InvalidParameter {
            name: "xi".to_string(),
            reason: format!("{} (must be positive and finite)", xi),
        });
    }
    Ok(())
}

fn check_finite(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(EikonalError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{} (must be finite)", v),
        });
    }
    Ok(())
}

/// Accept `values` if it has one entry per spatial cell or per grid cell.
fn per_cell(
    name: &str,
    values: Vec<f64>,
    sizes: [usize; 2],
    check: impl Fn(f64) -> Result<()>,
) -> Result<Field> {
    if !sizes.contains(&values.len()) {
        return Err(EikonalError::ParamsMismatch {
            name: name.to_string(),
            expected: sizes[1],
            got: values.len(),
        });
    }
    values.iter().try_for_each(|&v| check(v))?;
    Ok(Field::PerCell(values))
}

impl Geometry {
    fn new(xi: f64, kappa: f64, n_theta: usize, h: f64) -> Result<Self> {
        check_xi(xi)?;
        check_finite("kappa", kappa)?;
        if n_theta == 0 {
            return Err(EikonalError::InvalidParameter {
                name: "n_theta".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if !h.is_finite() || h <= 0.0 {
            return Err(EikonalError::InvalidGridSpacing(h));
        }
        Ok(Geometry {
            n_theta,
            h_ratio: 2.0 * PI / n_theta as f64 / h,
            xi: Field::Constant(xi),
            kappa: Field::Constant(kappa),
            theta: None,
            shape: None,
        })
    }

    fn angle(&self, slice: usize) -> f64 {
        slice as f64 * 2.0 * PI / self.n_theta as f64
    }

    fn is_uniform(&self) -> bool {
        matches!(self.xi, Field::Constant(_))
            && matches!(self.kappa, Field::Constant(_))
            && self.theta.is_none()
    }

    fn local(&self, x: [usize; 3]) -> Local {
        let shape = self.shape.unwrap_or([1, 1, self.n_theta]);
        let theta = match &self.theta {
            Some(field) => field.at(x, shape),
            None => self.angle(x[2] % self.n_theta),
        };
        Local {
            cos: theta.cos(),
            sin: theta.sin(),
            xi: self.xi.at(x, shape) * self.h_ratio,
            kappa: self.kappa.at(x, shape) / self.h_ratio,
        }
    }

    fn bind(&mut self, fields: CurvatureFields, shape: [usize; 3]) -> Result<()> {
        self.check_angles(shape)?;
        let sizes = [shape[0] * shape[1], shape[0] * shape[1] * shape[2]];
        if let Some(xi) = fields.xi {
            self.xi = per_cell("xi", xi, sizes, check_xi)?;
        }
        if let Some(kappa) = fields.kappa {
            self.kappa = per_cell("kappa", kappa, sizes, |v| check_finite("kappa", v))?;
        }
        if let Some(theta) = fields.theta {
            self.theta = Some(per_cell("theta", theta, sizes, |v| check_finite("theta", v))?);
        }
        self.shape = Some(shape);
        Ok(())
    }

    fn check_angles(&self, shape: [usize; 3]) -> Result<()> {
        if shape[2] != self.n_theta {
            return Err(EikonalError::InvalidParameter {
                name: "n_theta".to_string(),
                reason: format!(
                    "provider built for {} orientations, grid has {}",
                    self.n_theta, shape[2]
                ),
            });
        }
        Ok(())
    }

    fn check_shape(&self, shape: [usize; 3]) -> Result<()> {
        self.check_angles(shape)?;
        match self.shape {
            Some(bound) if bound != shape => Err(EikonalError::InvalidParameter {
                name: "curvature fields".to_string(),
                reason: format!("bound to shape {:?}, grid is {:?}", bound, shape),
            }),
            _ => Ok(()),
        }
    }

    /// Stencil reach over every cell the geometry distinguishes.
    fn reach(&self, stencil_at: impl Fn(&Local) -> Stencil<3>) -> usize {
        let reach = match self.shape {
            Some(shape) if !self.is_uniform() => {
                let mut reach = 0;
                for i in 0..shape[0] {
                    for j in 0..shape[1] {
                        for k in 0..shape[2] {
                            reach = reach.max(stencil_at(&self.local([i, j, k])).reach());
                        }
                    }
                }
                reach
            }
            _ => (0..self.n_theta)
                .map(|k| stencil_at(&self.local([0, 0, k])).reach())
                .max()
                .unwrap_or(1),
        };
        reach.max(1)
    }
}

/// Reeds-Shepp car: forward and reverse motion, rotation cost `1/ξ`.
///
/// Six symmetric offsets from the Selling decomposition of the relaxed
/// outer product of `v = (cos θ, sin θ, κ)`, with the angular entry raised
/// to at least `v₂² + 1/ξ²`. Offsets too close to the lateral direction are
/// pruned.
#[derive(Debug, Clone)]
pub struct ReedsShepp2 {
    geometry: Geometry,
    relax: f64,
    cosmin2: f64,
    table: Vec<Stencil<3>>,
    reach: usize,
}

impl ReedsShepp2 {
    /// Build the provider with the default relaxation and pruning tolerance.
    ///
    /// # Errors
    /// Returns an error if `xi`, `kappa`, `n_theta` or `h` is out of range.
    pub fn new(xi: f64, kappa: f64, n_theta: usize, h: f64) -> Result<Self> {
        Self::with_tolerances(xi, kappa, n_theta, h, DEFAULT_RELAX, DEFAULT_COSMIN2)
    }

    /// Build the provider with explicit relaxation and pruning tolerance.
    ///
    /// # Errors
    /// Returns an error if a parameter is out of range. `relax` must lie in
    /// `(0, 1)` and `cosmin2` in `[0, 1]`.
    pub fn with_tolerances(
        xi: f64,
        kappa: f64,
        n_theta: usize,
        h: f64,
        relax: f64,
        cosmin2: f64,
    ) -> Result<Self> {
        let geometry = Geometry::new(xi, kappa, n_theta, h)?;
        check_relax(relax)?;
        if !(0.0..=1.0).contains(&cosmin2) {
            return Err(EikonalError::InvalidParameter {
                name: "cosmin2".to_string(),
                reason: format!("{} (must lie in [0, 1])", cosmin2),
            });
        }
        let table: Vec<Stencil<3>> = (0..n_theta)
            .map(|slice| reeds_shepp_stencil(&geometry.local([0, 0, slice]), relax, cosmin2))
            .collect();
        let reach = geometry.reach(|l| reeds_shepp_stencil(l, relax, cosmin2));
        Ok(ReedsShepp2 {
            geometry,
            relax,
            cosmin2,
            table,
            reach,
        })
    }

    /// Replace the constant parameters by per-cell fields on a grid of
    /// `shape` (builder method).
    ///
    /// # Errors
    /// Returns an error if `shape` does not match the angular resolution, a
    /// field has the wrong number of entries, or a value is out of range.
    pub fn with_fields(mut self, fields: CurvatureFields, shape: [usize; 3]) -> Result<Self> {
        self.geometry.bind(fields, shape)?;
        let (relax, cosmin2) = (self.relax, self.cosmin2);
        self.reach = self.geometry.reach(|l| reeds_shepp_stencil(l, relax, cosmin2));
        Ok(self)
    }
}

fn check_relax(relax: f64) -> Result<()> {
    if !(relax > 0.0 && relax < 1.0) {
        return Err(EikonalError::InvalidParameter {
            name: "relax".to_string(),
            reason: format!("{} (must lie in (0, 1))", relax),
        });
    }
    Ok(())
}

fn reeds_shepp_stencil(l: &Local, relax: f64, cosmin2: f64) -> Stencil<3> {
    let v = [l.cos, l.sin, l.kappa];
    let mut m: [f64; 6] = relaxed_outer(v, relax);
    m[5] = m[5].max(v[2] * v[2] + 1.0 / (l.xi * l.xi));
    let (weights, offsets) = decompose_3(m);

    // Lateral direction in the physical plane.
    let w = [v[1], -v[0], 0.0];
    let ww = w[0] * w[0] + w[1] * w[1];

    let mut stencil = Stencil::new();
    for (&rho, e) in weights.iter().zip(offsets.iter()) {
        let ef = [e[0] as f64, e[1] as f64, e[2] as f64];
        let we = w[0] * ef[0] + w[1] * ef[1];
        let ee = ef[0] * ef[0] + ef[1] * ef[1] + ef[2] * ef[2];
        let pruned = we * we >= ee * ww * (1.0 - cosmin2);
        stencil.push(if pruned { 0.0 } else { rho }, *e);
    }
    stencil
}

impl SchemeProvider<3> for ReedsShepp2 {
    fn name(&self) -> &'static str {
        "reeds-shepp"
    }

    fn layout(&self) -> StencilLayout {
        StencilLayout {
            nsym: 6,
            nfwd: 0,
            nmix: 1,
        }
    }

    fn scheme(&self, x: [usize; 3]) -> Stencil<3> {
        if self.geometry.is_uniform() {
            self.table[x[2] % self.geometry.n_theta].clone()
        } else {
            reeds_shepp_stencil(&self.geometry.local(x), self.relax, self.cosmin2)
        }
    }

    fn periodic_axes(&self) -> [bool; 3] {
        [false, false, true]
    }

    fn reach(&self) -> usize {
        self.reach
    }

    fn validate(&self, shape: [usize; 3]) -> Result<()> {
        self.geometry.check_shape(shape)
    }
}

/// Dubins car: forward motion only, turning radius bounded by `ξ`.
///
/// Two family members, steering left `(cos θ, sin θ, κ + 1/ξ)` and right
/// `(cos θ, sin θ, κ - 1/ξ)`. Each vector is decomposed into six forward
/// offsets pointing upwind, and the local update keeps the smaller of the
/// two member solutions.
#[derive(Debug, Clone)]
pub struct Dubins2 {
    geometry: Geometry,
    relax: f64,
    table: Vec<Stencil<3>>,
    reach: usize,
}

impl Dubins2 {
    /// Build the provider with the default relaxation.
    ///
    /// # Errors
    /// Returns an error if `xi`, `kappa`, `n_theta` or `h` is out of range.
    pub fn new(xi: f64, kappa: f64, n_theta: usize, h: f64) -> Result<Self> {
        Self::with_relax(xi, kappa, n_theta, h, DEFAULT_RELAX)
    }

    /// Build the provider with an explicit relaxation.
    ///
    /// # Errors
    /// Returns an error if a parameter is out of range.
    pub fn with_relax(xi: f64, kappa: f64, n_theta: usize, h: f64, relax: f64) -> Result<Self> {
        let geometry = Geometry::new(xi, kappa, n_theta, h)?;
        check_relax(relax)?;
        let table: Vec<Stencil<3>> = (0..n_theta)
            .map(|slice| dubins_stencil(&geometry.local([0, 0, slice]), relax))
            .collect();
        let reach = geometry.reach(|l| dubins_stencil(l, relax));
        Ok(Dubins2 {
            geometry,
            relax,
            table,
            reach,
        })
    }

    /// Replace the constant parameters by per-cell fields on a grid of
    /// `shape` (builder method).
    ///
    /// # Errors
    /// Same as [`ReedsShepp2::with_fields`].
    pub fn with_fields(mut self, fields: CurvatureFields, shape: [usize; 3]) -> Result<Self> {
        self.geometry.bind(fields, shape)?;
        let relax = self.relax;
        self.reach = self.geometry.reach(|l| dubins_stencil(l, relax));
        Ok(self)
    }
}

fn dubins_stencil(l: &Local, relax: f64) -> Stencil<3> {
    let ixi = 1.0 / l.xi;
    let mut stencil = Stencil::new();
    forward_decomposition(&mut stencil, [l.cos, l.sin, l.kappa + ixi], relax);
    forward_decomposition(&mut stencil, [l.cos, l.sin, l.kappa - ixi], relax);
    stencil.mix_is_min = true;
    stencil
}

/// Append the forward offsets approximating `v vᵀ`, oriented so that
/// `offset · v <= 0` (the neighbor lies behind the direction of motion).
fn forward_decomposition(stencil: &mut Stencil<3>, v: [f64; 3], relax: f64) {
    let m: [f64; 6] = relaxed_outer(v, relax);
    let (weights, offsets) = decompose_3(m);
    for (&rho, e) in weights.iter().zip(offsets.iter()) {
        let ev = e[0] as f64 * v[0] + e[1] as f64 * v[1] + e[2] as f64 * v[2];
        let o = if ev > 0.0 { e.map(|c| -c) } else { *e };
        stencil.push(rho, o);
    }
}

impl SchemeProvider<3> for Dubins2 {
    fn name(&self) -> &'static str {
        "dubins"
    }

    fn layout(&self) -> StencilLayout {
        StencilLayout {
            nsym: 0,
            nfwd: 6,
            nmix: 2,
        }
    }

    fn scheme(&self, x: [usize; 3]) -> Stencil<3> {
        if self.geometry.is_uniform() {
            self.table[x[2] % self.geometry.n_theta].clone()
        } else {
            dubins_stencil(&self.geometry.local(x), self.relax)
        }
    }

    fn periodic_axes(&self) -> [bool; 3] {
        [false, false, true]
    }

    fn reach(&self) -> usize {
        self.reach
    }

    fn validate(&self, shape: [usize; 3]) -> Result<()> {
        self.geometry.check_shape(shape)
    }
}
