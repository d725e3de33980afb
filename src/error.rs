// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur during solver setup, I/O, or execution.
#[derive(Debug)]
pub enum EikonalError {
    /// Grid shape is invalid (an axis has no cells).
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Tile shape is invalid (zero, or does not divide the grid shape).
    InvalidTileShape {
        /// The axis index.
        axis: usize,
        /// The tile extent provided.
        tile: usize,
        /// The grid size on that axis.
        grid: usize,
    },
    /// Grid spacing is not positive and finite.
    InvalidGridSpacing(f64),
    /// Cost value is negative or NaN.
    InvalidCost {
        /// The row-major index of the invalid value.
        index: usize,
        /// The invalid value.
        value: f64,
    },
    /// Seed location or value is invalid.
    InvalidSeed {
        /// The seed coordinates.
        coord: Vec<f64>,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Solver tolerance is not positive and finite.
    InvalidTolerance(f64),
    /// Array shape does not match expected shape.
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// Metric parameter array has the wrong number of entries.
    ParamsMismatch {
        /// Name of the parameter field.
        name: String,
        /// Expected number of entries.
        expected: usize,
        /// Number of entries provided.
        got: usize,
    },
    /// Metric parameter value is out of its admissible range.
    InvalidParameter {
        /// Name of the parameter.
        name: String,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// The stencil needs more offsets than the kernel buffers can hold.
    StencilTooWide {
        /// Offsets requested by the scheme provider.
        requested: usize,
        /// Maximum supported number of offsets.
        capacity: usize,
    },
    /// Scheme provider dimension does not fit the grid.
    SchemeDimension {
        /// Dimension the scheme was built for.
        scheme: usize,
        /// Dimension of the grid.
        grid: usize,
    },
    /// Invalid configuration value.
    InvalidConfig(String),
    /// Unsupported data type in file.
    UnsupportedDtype(String),
    /// Unsupported file format (unrecognized extension).
    UnsupportedFileFormat(String),
    /// The worklist was still non-empty after the pass budget was spent.
    NotConverged {
        /// Number of passes performed.
        passes: usize,
    },
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl fmt::Display for EikonalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EikonalError::InvalidGridShape { axis, size } => {
                write!(
                    f,
                    "invalid grid shape: axis {} has size {} (must be >= 1)",
                    axis, size
                )
            }
            EikonalError::InvalidTileShape { axis, tile, grid } => {
                write!(
                    f,
                    "invalid tile shape: axis {} tile extent {} does not divide grid size {}",
                    axis, tile, grid
                )
            }
            EikonalError::InvalidGridSpacing(h) => {
                write!(
                    f,
                    "invalid grid spacing: {} (must be positive and finite)",
                    h
                )
            }
            EikonalError::InvalidCost { index, value } => {
                write!(
                    f,
                    "invalid cost at index {}: {} (must be nonnegative, not NaN)",
                    index, value
                )
            }
            EikonalError::InvalidSeed { coord, reason } => {
                write!(f, "invalid seed at {:?}: {}", coord, reason)
            }
            EikonalError::InvalidTolerance(tol) => {
                write!(
                    f,
                    "invalid tolerance: {} (must be positive and finite)",
                    tol
                )
            }
            EikonalError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            EikonalError::ParamsMismatch {
                name,
                expected,
                got,
            } => {
                write!(
                    f,
                    "parameter field '{}' has {} entries, expected {}",
                    name, got, expected
                )
            }
            EikonalError::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter '{}': {}", name, reason)
            }
            EikonalError::StencilTooWide {
                requested,
                capacity,
            } => {
                write!(
                    f,
                    "stencil needs {} offsets, kernel capacity is {}",
                    requested, capacity
                )
            }
            EikonalError::SchemeDimension { scheme, grid } => {
                write!(
                    f,
                    "scheme is {}-dimensional but the grid is {}-dimensional",
                    scheme, grid
                )
            }
            EikonalError::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            EikonalError::UnsupportedDtype(dtype) => {
                write!(f, "unsupported dtype: {}", dtype)
            }
            EikonalError::UnsupportedFileFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            EikonalError::NotConverged { passes } => {
                write!(f, "solver did not converge after {} passes", passes)
            }
            EikonalError::IoError(e) => write!(f, "I/O error: {}", e),
            EikonalError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EikonalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EikonalError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EikonalError {
    fn from(e: std::io::Error) -> Self {
        EikonalError::IoError(e)
    }
}

/// Convenience type alias for Results with EikonalError.
pub type Result<T> = std::result::Result<T, EikonalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_grid_shape() {
        let e = EikonalError::InvalidGridShape { axis: 0, size: 0 };
        assert_eq!(
            e.to_string(),
            "invalid grid shape: axis 0 has size 0 (must be >= 1)"
        );
    }

    #[test]
    fn display_invalid_tile_shape() {
        let e = EikonalError::InvalidTileShape {
            axis: 1,
            tile: 3,
            grid: 8,
        };
        assert_eq!(
            e.to_string(),
            "invalid tile shape: axis 1 tile extent 3 does not divide grid size 8"
        );
    }

    #[test]
    fn display_invalid_cost() {
        let e = EikonalError::InvalidCost {
            index: 5,
            value: -0.5,
        };
        assert_eq!(
            e.to_string(),
            "invalid cost at index 5: -0.5 (must be nonnegative, not NaN)"
        );
    }

    #[test]
    fn display_params_mismatch() {
        let e = EikonalError::ParamsMismatch {
            name: "dual_metric".to_string(),
            expected: 48,
            got: 47,
        };
        assert_eq!(
            e.to_string(),
            "parameter field 'dual_metric' has 47 entries, expected 48"
        );
    }

    #[test]
    fn display_not_converged() {
        let e = EikonalError::NotConverged { passes: 2000 };
        assert_eq!(e.to_string(), "solver did not converge after 2000 passes");
    }

    #[test]
    fn display_stencil_too_wide() {
        let e = EikonalError::StencilTooWide {
            requested: 14,
            capacity: 12,
        };
        assert!(e.to_string().contains("14"));
        assert!(e.to_string().contains("12"));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let e: EikonalError = io_err.into();
        assert!(matches!(e, EikonalError::IoError(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
