use log::warn;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{LdaError, Result};
use crate::linalg::sorted_eigh;

/// Whitening transform of a covariance matrix.
#[derive(Debug, Clone)]
pub struct NormalizingTransform {
    /// `T` such that `T * C * T^T` is (close to) the identity.
    pub transform: Array2<f64>,
    /// Eigenvalues of `C` after flooring, largest first. These are the values
    /// `T` was built from.
    pub eigenvalues: Array1<f64>,
    /// How many eigenvalues were raised to the floor.
    pub num_floored: usize,
    /// Absolute floor, i.e. the floor fraction times the largest eigenvalue.
    pub floor: f64,
}

/// Computes `T = diag(s)^(-1/2) * U^T` from the eigendecomposition
/// `covar = U * diag(s) * U^T`.
///
/// Eigenvalues below `floor * s_max` are raised to that value first, so
/// `T * covar * T^T` is the identity only if nothing was floored; otherwise
/// its eigenvalues are at most 1.
pub fn compute_normalizing_transform(
    covar: ArrayView2<f64>,
    floor: f64,
) -> Result<NormalizingTransform> {
    if !(0.0..1.0).contains(&floor) {
        return Err(LdaError::InvalidConfiguration(format!(
            "covariance floor {floor} must be in [0, 1)"
        )));
    }
    let (mut s, u) = sorted_eigh(covar);

    let largest = s.first().copied().unwrap_or(0.0);
    if !(largest > 0.0) {
        return Err(LdaError::SingularMatrix(format!(
            "cannot normalize a matrix whose largest eigenvalue is {largest}"
        )));
    }

    // Floor relative to the largest eigenvalue.
    let floor = floor * largest;
    let mut num_floored = 0;
    s.mapv_inplace(|v| {
        if v < floor {
            num_floored += 1;
            floor
        } else {
            v
        }
    });
    if num_floored > 0 {
        warn!("Floored {num_floored} eigenvalues of covariance to {floor}");
    }
    if s.iter().any(|&v| v <= 0.0) {
        return Err(LdaError::SingularMatrix(
            "covariance has non-positive eigenvalues and no floor was applied".to_owned(),
        ));
    }

    let scale = s.mapv(|v| v.powf(-0.5));
    let transform = &u.t() * &scale.view().insert_axis(Axis(1));

    Ok(NormalizingTransform {
        transform,
        eigenvalues: s,
        num_floored,
        floor,
    })
}
