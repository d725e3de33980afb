// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Solver configuration, loadable from TOML.
//!
//! ```toml
//! [solver]
//! iterations = 8
//! tolerance = 1e-8
//! strategy = "adaptive"
//!
//! [grid]
//! shape = [64, 64]
//! tile_shape = [8, 8]
//! spacing = 0.01
//!
//! [model]
//! kind = "riemann"
//! dual_metric = [1.0, 0.5, 2.0]
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EikonalError, Result};
use crate::scheme::{
    CurvatureFields, Dubins2, GridGraph, Isotropic, ReedsShepp2, Riemann2, Riemann3, SchemeProvider,
    DEFAULT_COSMIN2, DEFAULT_RELAX,
};

/// Order in which tiles are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Process only the tiles flagged by the previous pass.
    #[default]
    Adaptive,
    /// Process every tile on every pass until nothing changes.
    Global,
}

/// Settings of the pass loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSection {
    /// Gauss-Seidel sweeps over a tile per launch.
    /// Default: 8
    pub iterations: usize,

    /// Change threshold below which a cell counts as settled.
    /// Default: 1e-8
    pub tolerance: f64,

    /// Pass budget.
    /// Default: 2000
    pub max_passes: usize,

    /// Tile scheduling strategy.
    /// Default: adaptive
    pub strategy: Strategy,

    /// Read halo values from a snapshot taken at the start of each pass.
    /// Default: false
    pub strict_iteration: bool,

    /// Worker threads; all available cores when unset.
    pub threads: Option<usize>,

    /// Turn a non-converged solve into an error.
    /// Default: false
    pub raise_on_non_convergence: bool,
}

impl Default for SolverSection {
    fn default() -> Self {
        Self {
            iterations: 8,
            tolerance: 1e-8,
            max_passes: 2000,
            strategy: Strategy::Adaptive,
            strict_iteration: false,
            threads: None,
            raise_on_non_convergence: false,
        }
    }
}

/// Grid geometry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSection {
    /// Cells along each axis.
    pub shape: Vec<usize>,

    /// Tile extent along each axis; a divisor-based default when unset.
    pub tile_shape: Option<Vec<usize>>,

    /// Spatial grid spacing.
    /// Default: 1.0
    pub spacing: f64,

    /// Periodic axes; curvature models force the angular axis periodic.
    pub periodic: Option<Vec<bool>>,
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            shape: vec![64, 64],
            tile_shape: None,
            spacing: 1.0,
            periodic: None,
        }
    }
}

fn default_relax() -> f64 {
    DEFAULT_RELAX
}

fn default_cosmin2() -> f64 {
    DEFAULT_COSMIN2
}

/// Metric model and its parameters.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelConfig {
    /// Isotropic metric.
    #[default]
    Isotropic,
    /// Shortest paths on the axis-connected grid graph.
    GridGraph,
    /// Riemannian metric given by its dual, packed `(00, 10, 11, ...)`:
    /// one matrix for a constant metric or one per cell in row-major order.
    Riemann {
        /// Packed dual metric entries.
        dual_metric: Vec<f64>,
    },
    /// Reeds-Shepp car on an `(x, y, θ)` grid.
    ReedsShepp {
        /// Curvature scale.
        xi: f64,
        /// Rotation bias.
        #[serde(default)]
        kappa: f64,
        /// Outer product relaxation.
        #[serde(default = "default_relax")]
        relax: f64,
        /// Angular pruning tolerance.
        #[serde(default = "default_cosmin2")]
        cosmin2: f64,
        /// Curvature scale per cell, physical units (`nx·ny` or `nx·ny·nθ` entries).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        xi_field: Option<Vec<f64>>,
        /// Rotation bias per cell.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kappa_field: Option<Vec<f64>>,
        /// Heading per cell, in radians.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        theta_field: Option<Vec<f64>>,
    },
    /// Dubins car on an `(x, y, θ)` grid.
    Dubins {
        /// Minimal turning radius.
        xi: f64,
        /// Rotation bias.
        #[serde(default)]
        kappa: f64,
        /// Outer product relaxation.
        #[serde(default = "default_relax")]
        relax: f64,

        /// Curvature scale per cell, physical units (`nx·ny` or `nx·ny·nθ` entries).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        xi_field: Option<Vec<f64>>,
        /// Rotation bias per cell.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kappa_field: Option<Vec<f64>>,
        /// Heading per cell, in radians.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        theta_field: Option<Vec<f64>>,
    },
}

impl ModelConfig {
    /// Whether the model lives on an `(x, y, θ)` grid.
    pub fn is_curvature(&self) -> bool {
        matches!(
            self,
            ModelConfig::ReedsShepp { .. } | ModelConfig::Dubins { .. }
        )
    }
}

/// Full solver configuration.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Pass loop settings.
    #[serde(default)]
    pub solver: SolverSection,

    /// Grid geometry.
    #[serde(default)]
    pub grid: GridSection,

    /// Metric model.
    #[serde(default)]
    pub model: ModelConfig,
}

fn to_array<T: Copy, const N: usize>(name: &str, v: &[T]) -> Result<[T; N]> {
    <[T; N]>::try_from(v).map_err(|_| {
        EikonalError::InvalidConfig(format!("{} has {} entries, expected {}", name, v.len(), N))
    })
}

impl SolverConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SolverConfig =
            toml::from_str(s).map_err(|e| EikonalError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| EikonalError::InvalidConfig(e.to_string()))
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        let s = &self.solver;
        if !s.tolerance.is_finite() || s.tolerance <= 0.0 {
            return Err(EikonalError::InvalidTolerance(s.tolerance));
        }
        if s.iterations == 0 {
            return Err(EikonalError::InvalidConfig(
                "solver.iterations must be >= 1".to_string(),
            ));
        }
        if s.max_passes == 0 {
            return Err(EikonalError::InvalidConfig(
                "solver.max_passes must be >= 1".to_string(),
            ));
        }
        if s.threads == Some(0) {
            return Err(EikonalError::InvalidConfig(
                "solver.threads must be >= 1".to_string(),
            ));
        }

        let g = &self.grid;
        let dim = g.shape.len();
        if dim != 2 && dim != 3 {
            return Err(EikonalError::InvalidConfig(format!(
                "grid.shape must have 2 or 3 entries, got {}",
                dim
            )));
        }
        for (axis, &size) in g.shape.iter().enumerate() {
            if size == 0 {
                return Err(EikonalError::InvalidGridShape { axis, size });
            }
        }
        if let Some(tile) = &g.tile_shape {
            if tile.len() != dim {
                return Err(EikonalError::InvalidConfig(format!(
                    "grid.tile_shape has {} entries, grid has {} axes",
                    tile.len(),
                    dim
                )));
            }
            for (axis, (&t, &size)) in tile.iter().zip(g.shape.iter()).enumerate() {
                if t == 0 || size % t != 0 {
                    return Err(EikonalError::InvalidTileShape {
                        axis,
                        tile: t,
                        grid: size,
                    });
                }
            }
        }
        if let Some(periodic) = &g.periodic {
            if periodic.len() != dim {
                return Err(EikonalError::InvalidConfig(format!(
                    "grid.periodic has {} entries, grid has {} axes",
                    periodic.len(),
                    dim
                )));
            }
        }
        if !g.spacing.is_finite() || g.spacing <= 0.0 {
            return Err(EikonalError::InvalidGridSpacing(g.spacing));
        }

        match &self.model {
            m if m.is_curvature() && dim != 3 => Err(EikonalError::SchemeDimension {
                scheme: 3,
                grid: dim,
            }),
            ModelConfig::Riemann { dual_metric } => {
                let sym = dim * (dim + 1) / 2;
                let cells: usize = g.shape.iter().product();
                if dual_metric.len() != sym && dual_metric.len() != sym * cells {
                    return Err(EikonalError::ParamsMismatch {
                        name: "dual_metric".to_string(),
                        expected: sym * cells,
                        got: dual_metric.len(),
                    });
                }
                Ok(())
            }
            ModelConfig::ReedsShepp {
                xi_field,
                kappa_field,
                theta_field,
                ..
            }
            | ModelConfig::Dubins {
                xi_field,
                kappa_field,
                theta_field,
                ..
            } => {
                let spatial = g.shape[0] * g.shape[1];
                let cells = spatial * g.shape[2];
                for (name, field) in [
                    ("xi_field", xi_field),
                    ("kappa_field", kappa_field),
                    ("theta_field", theta_field),
                ] {
                    if let Some(values) = field {
                        if values.len() != spatial && values.len() != cells {
                            return Err(EikonalError::ParamsMismatch {
                                name: name.to_string(),
                                expected: cells,
                                got: values.len(),
                            });
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Grid shape as a fixed-size array.
    pub fn shape<const N: usize>(&self) -> Result<[usize; N]> {
        to_array("grid.shape", &self.grid.shape)
    }

    /// Tile shape as a fixed-size array, if configured.
    pub fn tile_shape<const N: usize>(&self) -> Result<Option<[usize; N]>> {
        self.grid
            .tile_shape
            .as_deref()
            .map(|t| to_array("grid.tile_shape", t))
            .transpose()
    }

    /// Periodic axes as a fixed-size array.
    pub fn periodic<const N: usize>(&self) -> Result<[bool; N]> {
        match &self.grid.periodic {
            Some(p) => to_array("grid.periodic", p),
            None => Ok([false; N]),
        }
    }

    /// Scheme provider for a two-dimensional grid.
    pub fn scheme_2d(&self) -> Result<Arc<dyn SchemeProvider<2>>> {
        let shape: [usize; 2] = self.shape()?;
        match &self.model {
            ModelConfig::Isotropic => Ok(Arc::new(Isotropic::<2>::new())),
            ModelConfig::GridGraph => Ok(Arc::new(GridGraph::<2>::new())),
            ModelConfig::Riemann { dual_metric } => {
                let provider = match <[f64; 3]>::try_from(dual_metric.as_slice()) {
                    Ok(m) => Riemann2::constant(m)?,
                    Err(_) => Riemann2::field(dual_metric)?.with_shape(shape),
                };
                Ok(Arc::new(provider))
            }
            _ => Err(EikonalError::SchemeDimension { scheme: 3, grid: 2 }),
        }
    }

    /// Scheme provider for a three-dimensional grid.
    pub fn scheme_3d(&self) -> Result<Arc<dyn SchemeProvider<3>>> {
        let shape: [usize; 3] = self.shape()?;
        let h = self.grid.spacing;
        match &self.model {
            ModelConfig::Isotropic => Ok(Arc::new(Isotropic::<3>::new())),
            ModelConfig::GridGraph => Ok(Arc::new(GridGraph::<3>::new())),
            ModelConfig::Riemann { dual_metric } => {
                let provider = match <[f64; 6]>::try_from(dual_metric.as_slice()) {
                    Ok(m) => Riemann3::constant(m)?,
                    Err(_) => Riemann3::field(dual_metric)?.with_shape(shape),
                };
                Ok(Arc::new(provider))
            }
            ModelConfig::ReedsShepp {
                xi,
                kappa,
                relax,
                cosmin2,
                xi_field,
                kappa_field,
                theta_field,
            } => {
                let mut provider =
                    ReedsShepp2::with_tolerances(*xi, *kappa, shape[2], h, *relax, *cosmin2)?;
                let fields = curvature_fields(xi_field, kappa_field, theta_field);
                if !fields.is_empty() {
                    provider = provider.with_fields(fields, shape)?;
                }
                Ok(Arc::new(provider))
            }
            ModelConfig::Dubins {
                xi,
                kappa,
                relax,
                xi_field,
                kappa_field,
                theta_field,
            } => {
                let mut provider = Dubins2::with_relax(*xi, *kappa, shape[2], h, *relax)?;
                let fields = curvature_fields(xi_field, kappa_field, theta_field);
                if !fields.is_empty() {
                    provider = provider.with_fields(fields, shape)?;
                }
                Ok(Arc::new(provider))
            }
        }
    }
}

fn curvature_fields(
    xi: &Option<Vec<f64>>,
    kappa: &Option<Vec<f64>>,
    theta: &Option<Vec<f64>>,
) -> CurvatureFields {
    CurvatureFields {
        xi: xi.clone(),
        kappa: kappa.clone(),
        theta: theta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SolverConfig::default();
        assert_eq!(config.solver.iterations, 8);
        assert_eq!(config.solver.tolerance, 1e-8);
        assert_eq!(config.solver.max_passes, 2000);
        assert_eq!(config.solver.strategy, Strategy::Adaptive);
        assert_eq!(config.model, ModelConfig::Isotropic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_riemann() {
        let config = SolverConfig::from_toml_str(
            r#"
            [solver]
            iterations = 4
            strategy = "global"
            strict_iteration = true

            [grid]
            shape = [16, 8]
            tile_shape = [4, 4]

            [model]
            kind = "riemann"
            dual_metric = [1.0, 0.5, 2.0]
            "#,
        )
        .unwrap();
        assert_eq!(config.solver.iterations, 4);
        assert_eq!(config.solver.tolerance, 1e-8);
        assert_eq!(config.solver.strategy, Strategy::Global);
        assert!(config.solver.strict_iteration);
        assert_eq!(config.tile_shape::<2>().unwrap(), Some([4, 4]));
        let scheme = config.scheme_2d().unwrap();
        assert_eq!(scheme.name(), "riemann");
        assert_eq!(scheme.layout().nsym, 3);
    }

    #[test]
    fn parse_curvature_defaults() {
        let config = SolverConfig::from_toml_str(
            r#"
            [grid]
            shape = [20, 20, 16]
            spacing = 0.1

            [model]
            kind = "reeds-shepp"
            xi = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(
            config.model,
            ModelConfig::ReedsShepp {
                xi: 0.5,
                kappa: 0.0,
                relax: DEFAULT_RELAX,
                cosmin2: DEFAULT_COSMIN2,
                xi_field: None,
                kappa_field: None,
                theta_field: None,
            }
        );
        let scheme = config.scheme_3d().unwrap();
        assert_eq!(scheme.periodic_axes(), [false, false, true]);
        assert!(config.scheme_2d().is_err());
    }

    #[test]
    fn parse_curvature_fields() {
        let config = SolverConfig::from_toml_str(
            r#"
            [grid]
            shape = [2, 2, 8]

            [model]
            kind = "dubins"
            xi = 1.0
            xi_field = [1.0, 1.0, 3.0, 3.0]
            "#,
        )
        .unwrap();
        let scheme = config.scheme_3d().unwrap();
        assert_ne!(scheme.scheme([0, 0, 1]), scheme.scheme([1, 0, 1]));

        let short = r#"
            [grid]
            shape = [2, 2, 8]

            [model]
            kind = "reeds-shepp"
            xi = 1.0
            theta_field = [0.0, 0.0, 0.0]
            "#;
        assert!(matches!(
            SolverConfig::from_toml_str(short),
            Err(EikonalError::ParamsMismatch { .. })
        ));
    }

    #[test]
    fn curvature_needs_three_axes() {
        let result = SolverConfig::from_toml_str(
            r#"
            [grid]
            shape = [20, 20]

            [model]
            kind = "dubins"
            xi = 1.0
            "#,
        );
        assert!(matches!(
            result,
            Err(EikonalError::SchemeDimension { scheme: 3, grid: 2 })
        ));
    }

    #[test]
    fn rejects_bad_values() {
        let bad_tol = "[solver]\ntolerance = -1.0\n";
        assert!(matches!(
            SolverConfig::from_toml_str(bad_tol),
            Err(EikonalError::InvalidTolerance(_))
        ));

        let bad_tile = "[grid]\nshape = [10, 10]\ntile_shape = [4, 5]\n";
        assert!(matches!(
            SolverConfig::from_toml_str(bad_tile),
            Err(EikonalError::InvalidTileShape { axis: 0, .. })
        ));

        let bad_metric = "[model]\nkind = \"riemann\"\ndual_metric = [1.0, 0.0]\n";
        assert!(matches!(
            SolverConfig::from_toml_str(bad_metric),
            Err(EikonalError::ParamsMismatch { .. })
        ));

        let unknown = "[model]\nkind = \"randers\"\n";
        assert!(matches!(
            SolverConfig::from_toml_str(unknown),
            Err(EikonalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = SolverConfig::default();
        config.model = ModelConfig::Dubins {
            xi: 2.0,
            kappa: 0.1,
            relax: 0.2,
            xi_field: Some(vec![1.0; 64]),
            kappa_field: None,
            theta_field: None,
        };
        config.grid.shape = vec![8, 8, 12];
        let text = config.to_toml_string().unwrap();
        assert_eq!(SolverConfig::from_toml_str(&text).unwrap(), config);
    }
}
