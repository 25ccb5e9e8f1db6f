use log::info;
use ndarray::{Array1, ArrayViewMut2, Axis};

use crate::error::{LdaError, Result};

/// Subtracts the global mean from every row of `vectors` and returns it.
///
/// Speaker grouping plays no role: every utterance counts once.
pub fn compute_and_subtract_mean(mut vectors: ArrayViewMut2<f64>) -> Result<Array1<f64>> {
    let mean = vectors.mean_axis(Axis(0)).ok_or(LdaError::NoUtterances)?;
    vectors -= &mean;
    info!("2-norm of iVector mean is {}", mean.dot(&mean).sqrt());
    Ok(mean)
}
