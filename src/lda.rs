use std::io::Write;
use std::path::Path;

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::config::{LdaConfig, LdaVariant, SolverSettings, DEFAULT_WLDA_N};
use crate::error::{LdaError, Result};
use crate::linalg::sorted_eigh;
use crate::mean::compute_and_subtract_mean;
use crate::normalize::compute_normalizing_transform;
use crate::stats::{CovarianceStats, DistanceWeighting};
use crate::store::VectorStore;

/// Affine LDA transform `y = A * x + b` for speaker embeddings.
///
/// Stored as one `k x (D + 1)` matrix: the first `D` columns are `A`, the
/// last one is `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LdaTransform {
    matrix: Array2<f64>,
}

impl LdaTransform {
    pub fn from_matrix(matrix: Array2<f64>) -> Result<Self> {
        if matrix.nrows() == 0 || matrix.ncols() < 2 {
            return Err(LdaError::InvalidConfiguration(format!(
                "an LDA matrix needs at least one row and two columns, got {:?}",
                matrix.shape()
            )));
        }
        Ok(Self { matrix })
    }

    /// Load a transform written by [`LdaTransform::write_npy`].
    pub fn read_npy<P: AsRef<Path>>(path: P) -> Result<Self> {
        let matrix: Array2<f64> = ndarray_npy::read_npy(path)?;
        Self::from_matrix(matrix)
    }

    pub fn write_npy<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ndarray_npy::write_npy(path, &self.matrix)?;
        Ok(())
    }

    /// Writes the matrix as text, one row per line, enclosed in brackets.
    pub fn write_text<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, " [")?;
        let last = self.matrix.nrows() - 1;
        for (i, row) in self.matrix.rows().into_iter().enumerate() {
            write!(writer, " ")?;
            for v in row {
                write!(writer, " {v}")?;
            }
            if i == last {
                writeln!(writer, " ]")?;
            } else {
                writeln!(writer)?;
            }
        }
        Ok(())
    }

    /// Writes to `path` as npy if `binary`, as text otherwise.
    pub fn write<P: AsRef<Path>>(&self, path: P, binary: bool) -> Result<()> {
        if binary {
            self.write_npy(path)
        } else {
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            self.write_text(file)
        }
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn into_matrix(self) -> Array2<f64> {
        self.matrix
    }

    /// Dimension `k` of the projected embeddings.
    pub fn output_dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Dimension `D` of the input embeddings.
    pub fn input_dim(&self) -> usize {
        self.matrix.ncols() - 1
    }

    pub fn linear_part(&self) -> ArrayView2<'_, f64> {
        self.matrix.slice(s![.., ..self.input_dim()])
    }

    pub fn offset(&self) -> ArrayView1<'_, f64> {
        self.matrix.column(self.input_dim())
    }

    /// Project an embedding.
    ///
    /// # Arguments
    /// * `embedding` - Raw embedding of dimension [`Self::input_dim`]
    ///
    /// # Returns
    /// Projected embedding of dimension [`Self::output_dim`]
    pub fn transform(&self, embedding: ArrayView1<f64>) -> Array1<f64> {
        self.linear_part().dot(&embedding) + self.offset()
    }
}

/// Estimates the full affine transform from the embeddings in `store`.
///
/// For standard LDA the mean is removed from a copy of the vectors and folded
/// into the offset column. Weighted variants produce a zero offset. `store`
/// itself is never modified, so repeated solves give the same transform.
pub fn compute_lda(store: &VectorStore, config: &LdaConfig) -> Result<LdaTransform> {
    compute_lda_with_rng(store, config, &mut rand::thread_rng())
}

/// Same as [`compute_lda`], drawing the test-variant placeholder from `rng`.
pub fn compute_lda_with_rng<R: Rng>(
    store: &VectorStore,
    config: &LdaConfig,
    rng: &mut R,
) -> Result<LdaTransform> {
    if store.is_empty() {
        return Err(LdaError::NoUtterances);
    }
    let dim = store.dim();
    let settings = config.resolve(dim)?;

    if settings.variant == LdaVariant::Test {
        info!("LDA test case, replacing LDA mat");
        return placeholder_transform(settings.lda_dim, dim, settings.wlda_n, rng);
    }

    info!("Computing within-class covariance.");
    let (speakers, mean) = if settings.variant.is_weighted() {
        (store.speaker_matrices(), None)
    } else {
        let mut vectors = store.vectors().to_owned();
        let mean = compute_and_subtract_mean(vectors.view_mut())?;
        (store.speaker_matrices_from(vectors.view()), Some(mean))
    };

    let linear_part = solve_linear_part(&speakers, dim, &settings)?;
    let offset = match &mean {
        Some(mean) => -linear_part.dot(mean),
        None => Array1::zeros(settings.lda_dim),
    };
    debug!(
        "2-norm of transformed iVector mean is {}",
        offset.dot(&offset).sqrt()
    );

    let mut matrix = Array2::zeros((settings.lda_dim, dim + 1));
    matrix.slice_mut(s![.., ..dim]).assign(&linear_part);
    matrix.column_mut(dim).assign(&offset);
    LdaTransform::from_matrix(matrix)
}

/// Computes the `k x D` linear part of the LDA transform from per-speaker
/// embedding matrices.
///
/// The result first applies the transform `T` that normalizes the within-class
/// (or interpolated, or weighted within-class) covariance, then projects onto
/// the top `k` eigenvectors of the between-class covariance in that space.
pub fn compute_lda_transform(
    speakers: &[Array2<f64>],
    dim: usize,
    config: &LdaConfig,
) -> Result<Array2<f64>> {
    let settings = config.resolve(dim)?;
    solve_linear_part(speakers, dim, &settings)
}

fn solve_linear_part(
    speakers: &[Array2<f64>],
    dim: usize,
    settings: &SolverSettings,
) -> Result<Array2<f64>> {
    let total_covariance_factor = settings.total_covariance_factor;

    let mut stats = accumulate_stats(speakers, dim)?;
    info!("Stats have {stats}.");
    stats.validate()?;

    let weighting = settings.variant.weighting();
    if let Some(weighting) = weighting {
        info!("Running WLDA variation: {weighting:?}");
        accumulate_weighted_stats(&mut stats, speakers, weighting, settings.wlda_n)?;
    }

    let total_covar = stats.total_covar()?;
    let within_covar = stats.within_covar()?;

    let mat_to_normalize = match weighting {
        None => {
            &total_covar * total_covariance_factor
                + &within_covar * (1.0 - total_covariance_factor)
        }
        Some(_) => stats.within_covar_weighted()?,
    };
    let normalizer =
        compute_normalizing_transform(mat_to_normalize.view(), settings.covariance_floor)?;
    let t = &normalizer.transform;

    let between_covar = match weighting {
        None => &total_covar - &within_covar,
        Some(_) => stats.between_covar_weighted()?,
    };
    let between_covar_proj = t.dot(&between_covar).dot(&t.t());

    // Negative eigenvalues sort last; they shouldn't exist anyway.
    let (eigenvalues, u) = sorted_eigh(between_covar_proj.view());
    info!(
        "Singular values of between-class covariance after projecting with interpolated \
         [total/within] covariance with a weight of {total_covariance_factor} on the total \
         covariance, are: {eigenvalues}"
    );

    // Transform by T first, then by the kept columns of U transposed.
    let u_part = u.slice(s![.., ..settings.lda_dim]);
    Ok(u_part.t().dot(t))
}

#[cfg(not(feature = "par"))]
fn accumulate_stats(speakers: &[Array2<f64>], dim: usize) -> Result<CovarianceStats> {
    let mut stats = CovarianceStats::new(dim);
    for utts in speakers {
        stats.acc_stats(utts.view())?;
    }
    Ok(stats)
}

#[cfg(feature = "par")]
fn accumulate_stats(speakers: &[Array2<f64>], dim: usize) -> Result<CovarianceStats> {
    use rayon::prelude::*;

    speakers
        .par_iter()
        .try_fold(
            || CovarianceStats::new(dim),
            |mut stats, utts| {
                stats.acc_stats(utts.view())?;
                Ok::<_, LdaError>(stats)
            },
        )
        .try_reduce(
            || CovarianceStats::new(dim),
            |mut a, b| {
                a.add_stats(&b)?;
                Ok::<_, LdaError>(a)
            },
        )
}

/// Runs the WLDA passes. The pair pass starts only after the within pass has
/// seen every speaker, since Mahalanobis weighting reads its result.
fn accumulate_weighted_stats(
    stats: &mut CovarianceStats,
    speakers: &[Array2<f64>],
    weighting: DistanceWeighting,
    exponent: i32,
) -> Result<()> {
    for (i, utts) in speakers.iter().enumerate() {
        debug!("Calculating within scatter: {i}");
        stats.acc_weighted_stats_within(utts.view())?;
    }

    for (i, utts_i) in speakers.iter().enumerate() {
        debug!("Calculating between scatter: {i}");
        for utts_j in &speakers[i + 1..] {
            stats.acc_weighted_stats(utts_i.view(), utts_j.view(), weighting, exponent)?;
        }
    }
    Ok(())
}

/// Output of the test variant. It is NOT an LDA transform: it only has the
/// right shape, `lda_dim x (dim + 1)`.
///
/// Entries are drawn uniformly from `[0, 1)` when `wlda_n` is the default
/// exponent and are all zero otherwise.
pub fn placeholder_transform<R: Rng>(
    lda_dim: usize,
    dim: usize,
    wlda_n: i32,
    rng: &mut R,
) -> Result<LdaTransform> {
    let shape = (lda_dim, dim + 1);
    let matrix = if wlda_n == DEFAULT_WLDA_N {
        Array2::from_shape_fn(shape, |_| rng.gen::<f64>())
    } else {
        Array2::zeros(shape)
    };
    LdaTransform::from_matrix(matrix)
}
