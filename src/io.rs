// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::Path;

use ndarray::{ArrayD, IxDyn};

use crate::core::{BlockGrid, GridData};
use crate::error::{EikonalError, Result};

/// Reject paths without a `.npy` extension.
pub fn check_npy(path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => Ok(()),
        Some(ext) => Err(EikonalError::UnsupportedFileFormat(ext.to_string())),
        None => Err(EikonalError::UnsupportedFileFormat(
            "(no extension)".to_string(),
        )),
    }
}

/// Load a row-major `f64` field from a .npy file (`f32` is promoted).
pub fn load_npy_field(path: &Path, expected_shape: &[usize]) -> Result<Vec<f64>> {
    check_npy(path)?;
    let arr: ArrayD<f64> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(_) => {
            let arr32: ArrayD<f32> = ndarray_npy::read_npy(path)
                .map_err(|e| EikonalError::UnsupportedDtype(format!("{}", e)))?;
            arr32.mapv(|v| v as f64)
        }
    };

    let got_shape: Vec<usize> = arr.shape().to_vec();
    if got_shape != expected_shape {
        return Err(EikonalError::ShapeMismatch {
            expected: expected_shape.to_vec(),
            got: got_shape,
        });
    }

    // Fortran-order files would otherwise give column-major data.
    Ok(arr.as_standard_layout().to_owned().into_raw_vec())
}

/// Write a row-major `f64` field to a .npy file.
pub fn save_npy_field(path: &Path, shape: &[usize], data: Vec<f64>) -> Result<()> {
    check_npy(path)?;
    let arr = ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| EikonalError::Other(format!("shape error: {}", e)))?;
    ndarray_npy::write_npy(path, &arr)
        .map_err(|e| EikonalError::Other(format!("npy write error: {}", e)))?;
    Ok(())
}

/// Save the value field of a grid, in row-major order.
pub fn save_values<const N: usize>(grid: &BlockGrid<N>, path: &Path) -> Result<()> {
    save_npy_field(path, &grid.shape(), grid.values_row_major())
}

/// Convert a speed field to a cost field (element-wise `1/speed`).
/// Zero speed becomes an obstacle.
pub fn speed_to_cost(speed: &[f64]) -> Result<Vec<f64>> {
    let mut cost = Vec::with_capacity(speed.len());
    for (index, &v) in speed.iter().enumerate() {
        if v.is_nan() || v < 0.0 {
            return Err(EikonalError::InvalidCost { index, value: v });
        }
        cost.push(if v == 0.0 { f64::INFINITY } else { 1.0 / v });
    }
    Ok(cost)
}

/// Load a cost field.
pub fn load_cost(path: &Path, expected_shape: &[usize]) -> Result<Vec<f64>> {
    load_npy_field(path, expected_shape)
}

/// Load a speed field and convert it to a cost field.
pub fn load_speed_as_cost(path: &Path, expected_shape: &[usize]) -> Result<Vec<f64>> {
    speed_to_cost(&load_npy_field(path, expected_shape)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_grid_2d() -> BlockGrid<2> {
        let n = 4;
        let mut grid = BlockGrid::<2>::new([n, n], 1.0, vec![1.0; n * n])
            .unwrap()
            .with_tile_shape([2, 2])
            .unwrap();
        for i in 0..n {
            for j in 0..n {
                let idx = grid.index([i, j]);
                grid.set_seed(idx, (i * n + j) as f64);
            }
        }
        grid
    }

    #[test]
    fn npy_roundtrip_is_row_major() {
        let grid = make_test_grid_2d();
        let tmp = std::env::temp_dir().join("hfm_blocks_test_roundtrip.npy");
        save_values(&grid, &tmp).unwrap();

        let loaded = load_npy_field(&tmp, &[4, 4]).unwrap();
        for (i, v) in loaded.iter().enumerate() {
            assert!((v - i as f64).abs() < 1e-10, "mismatch at {}: {}", i, v);
        }
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn npy_shape_mismatch() {
        let grid = make_test_grid_2d();
        let tmp = std::env::temp_dir().join("hfm_blocks_test_shape_mismatch.npy");
        save_values(&grid, &tmp).unwrap();

        let result = load_cost(&tmp, &[3, 3]);
        assert!(matches!(result, Err(EikonalError::ShapeMismatch { .. })));
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn speed_to_cost_valid() {
        let cost = speed_to_cost(&[1.0, 2.0, 4.0, 0.0]).unwrap();
        assert!((cost[1] - 0.5).abs() < 1e-10);
        assert!((cost[2] - 0.25).abs() < 1e-10);
        assert!(cost[3].is_infinite());
    }

    #[test]
    fn speed_to_cost_invalid() {
        assert!(matches!(
            speed_to_cost(&[1.0, -1.0, 2.0]),
            Err(EikonalError::InvalidCost { index: 1, .. })
        ));
        assert!(matches!(
            speed_to_cost(&[f64::NAN]),
            Err(EikonalError::InvalidCost { index: 0, .. })
        ));
    }

    #[test]
    fn unsupported_format() {
        let result = load_cost(Path::new("test.mat"), &[4, 4]);
        assert!(matches!(
            result,
            Err(EikonalError::UnsupportedFileFormat(_))
        ));
        assert!(check_npy(Path::new("noext")).is_err());
    }
}
