//! Covariance statistics for (weighted) LDA.
//!
//! Each speaker is passed in as a matrix whose rows are that speaker's
//! embeddings. Standard LDA needs only [`CovarianceStats::acc_stats`]; the
//! weighted variants additionally run [`CovarianceStats::acc_weighted_stats_within`]
//! over every speaker and then [`CovarianceStats::acc_weighted_stats`] over
//! every pair of speakers, in that order.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{LdaError, Result};
use crate::linalg::{add_rows_outer, add_vec2, SpdFactor};

/// Distance function used to down-weight speaker pairs in WLDA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceWeighting {
    /// `w(d) = (d^T d)^-n`
    Euclidean,
    /// `w(d) = (d^T S_w^-1 d)^-n` with `S_w` the weighted within-class scatter.
    Mahalanobis,
}

#[derive(Debug, Clone)]
pub struct CovarianceStats {
    tot_covar: Array2<f64>,
    between_covar: Array2<f64>,
    between_covar_weighted: Array2<f64>,
    within_covar_weighted: Array2<f64>,
    num_spk: usize,
    num_utt: usize,
    /// Factor of `within_covar_weighted`, valid until the next within update.
    within_factor: Option<SpdFactor>,
}

impl CovarianceStats {
    pub fn new(dim: usize) -> Self {
        Self {
            tot_covar: Array2::zeros((dim, dim)),
            between_covar: Array2::zeros((dim, dim)),
            between_covar_weighted: Array2::zeros((dim, dim)),
            within_covar_weighted: Array2::zeros((dim, dim)),
            num_spk: 0,
            num_utt: 0,
            within_factor: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.tot_covar.nrows()
    }

    pub fn num_spk(&self) -> usize {
        self.num_spk
    }

    pub fn num_utt(&self) -> usize {
        self.num_utt
    }

    /// Total covariance, normalized by the number of utterances.
    pub fn total_covar(&self) -> Result<Array2<f64>> {
        self.check_dof()?;
        Ok(&self.tot_covar / self.num_utt as f64)
    }

    /// Within-class covariance, normalized by the number of utterances.
    pub fn within_covar(&self) -> Result<Array2<f64>> {
        self.check_dof()?;
        Ok((&self.tot_covar - &self.between_covar) / self.num_utt as f64)
    }

    /// Weighted within-class scatter, unnormalized.
    pub fn within_covar_weighted(&self) -> Result<Array2<f64>> {
        self.check_dof()?;
        Ok(self.within_covar_weighted.clone())
    }

    /// Weighted between-class scatter, normalized by the number of utterances.
    pub fn between_covar_weighted(&self) -> Result<Array2<f64>> {
        self.check_dof()?;
        Ok(&self.between_covar_weighted / self.num_utt as f64)
    }

    /// Adds the utterances of one speaker.
    pub fn acc_stats(&mut self, utts: ArrayView2<f64>) -> Result<()> {
        let mean = self.speaker_mean(utts)?;
        let num_utts = utts.nrows();
        add_rows_outer(self.tot_covar.view_mut(), utts);
        add_vec2(self.between_covar.view_mut(), num_utts as f64, mean.view());
        self.num_utt += num_utts;
        self.num_spk += 1;
        Ok(())
    }

    /// Adds `sum_i (x_i - mean)(x_i - mean)^T` of one speaker to the weighted
    /// within-class scatter.
    pub fn acc_weighted_stats_within(&mut self, utts: ArrayView2<f64>) -> Result<()> {
        let mean = self.speaker_mean(utts)?;
        let centered = &utts - &mean;
        add_rows_outer(self.within_covar_weighted.view_mut(), centered.view());
        self.within_factor = None;
        Ok(())
    }

    /// Adds `w(d) * n_i * n_j * d d^T` for the speaker pair `(i, j)`, where `d`
    /// is the difference of their means and `w(d) = dist(d)^-exponent`.
    ///
    /// With [`DistanceWeighting::Mahalanobis`], this reads the weighted
    /// within-class scatter, so every speaker must have gone through
    /// [`Self::acc_weighted_stats_within`] first. Before that the scatter is
    /// singular and this fails with [`LdaError::SingularMatrix`].
    pub fn acc_weighted_stats(
        &mut self,
        utts_i: ArrayView2<f64>,
        utts_j: ArrayView2<f64>,
        weighting: DistanceWeighting,
        exponent: i32,
    ) -> Result<()> {
        let diff = self.speaker_mean(utts_i)? - self.speaker_mean(utts_j)?;

        let distance = match weighting {
            DistanceWeighting::Euclidean => diff.dot(&diff),
            DistanceWeighting::Mahalanobis => {
                self.within_factor()?.inv_quad_form(diff.view())
            }
        };
        let neg_exponent = exponent.checked_neg().ok_or_else(|| {
            LdaError::InvalidConfiguration(format!("WLDA exponent {exponent} cannot be negated"))
        })?;
        let w = distance.powi(neg_exponent);
        if !w.is_finite() {
            return Err(LdaError::DegenerateWeight { distance, exponent });
        }

        let weight = w * utts_i.nrows() as f64 * utts_j.nrows() as f64;
        add_vec2(self.between_covar_weighted.view_mut(), weight, diff.view());
        Ok(())
    }

    /// Merges statistics accumulated over a disjoint set of speakers.
    ///
    /// Only the standard statistics are merged; the weighted ones depend on
    /// all speakers at once.
    pub fn add_stats(&mut self, other: &CovarianceStats) -> Result<()> {
        if other.dim() != self.dim() {
            return Err(LdaError::DimensionMismatch {
                key: "merged statistics".to_owned(),
                expected: self.dim(),
                got: other.dim(),
            });
        }
        self.tot_covar += &other.tot_covar;
        self.between_covar += &other.between_covar;
        self.num_spk += other.num_spk;
        self.num_utt += other.num_utt;
        Ok(())
    }

    /// True if there are fewer utterances than dimensions, in which case the
    /// total covariance is singular.
    pub fn singular_tot_covar(&self) -> bool {
        self.num_utt < self.dim()
    }

    /// True if no speaker has more than one utterance, i.e. there is no
    /// within-class variation at all.
    pub fn is_empty(&self) -> bool {
        self.num_utt == self.num_spk
    }

    /// Fails with [`LdaError::InsufficientData`] if the statistics cannot
    /// support an LDA estimate.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LdaError::InsufficientData(format!(
                "{self}: no speaker has more than one utterance"
            )));
        }
        if self.singular_tot_covar() {
            return Err(LdaError::InsufficientData(format!(
                "{self}: too little data for dimension {}",
                self.dim()
            )));
        }
        Ok(())
    }

    fn check_dof(&self) -> Result<()> {
        if self.num_utt <= self.num_spk {
            return Err(LdaError::InsufficientData(format!(
                "{self}: within-class degrees of freedom must be positive"
            )));
        }
        Ok(())
    }

    fn speaker_mean(&self, utts: ArrayView2<f64>) -> Result<Array1<f64>> {
        if utts.ncols() != self.dim() {
            return Err(LdaError::DimensionMismatch {
                key: "speaker".to_owned(),
                expected: self.dim(),
                got: utts.ncols(),
            });
        }
        utts.mean_axis(Axis(0))
            .ok_or_else(|| LdaError::InsufficientData("speaker has no utterances".to_owned()))
    }

    fn within_factor(&mut self) -> Result<&SpdFactor> {
        let factor = match self.within_factor.take() {
            Some(factor) => factor,
            None => SpdFactor::new(self.within_covar_weighted.view()).ok_or_else(|| {
                LdaError::SingularMatrix(
                    "weighted within-class scatter is not invertible".to_owned(),
                )
            })?,
        };
        Ok(self.within_factor.insert(factor))
    }
}

impl fmt::Display for CovarianceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} speakers, {} utterances", self.num_spk, self.num_utt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{asymmetry, sorted_eigh};
    use ndarray::{array, s, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_speakers(
        num_spk: usize,
        num_utt: usize,
        dim: usize,
        seed: u64,
    ) -> Vec<Array2<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..num_spk)
            .map(|_| {
                let center: Vec<f64> = (0..dim).map(|_| rng.gen_range(-3.0..3.0)).collect();
                Array2::from_shape_fn((num_utt, dim), |(_, d)| {
                    center[d] + rng.gen_range(-1.0..1.0)
                })
            })
            .collect()
    }

    fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
        (a - b).iter().fold(0.0f64, |acc, d| acc.max(d.abs()))
    }

    #[test]
    fn counts_and_flags() {
        let mut stats = CovarianceStats::new(3);
        assert!(stats.is_empty());
        stats.acc_stats(array![[1.0, 2.0, 3.0]].view()).unwrap();
        assert!(stats.is_empty());
        assert!(stats.singular_tot_covar());
        assert!(stats.total_covar().is_err());

        stats
            .acc_stats(array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]].view())
            .unwrap();
        assert_eq!((stats.num_spk(), stats.num_utt()), (2, 4));
        assert!(!stats.is_empty());
        assert!(!stats.singular_tot_covar());
        assert!(stats.validate().is_ok());
        assert_eq!(stats.to_string(), "2 speakers, 4 utterances");
    }

    #[test]
    fn within_covar_matches_direct_computation() {
        let speakers = random_speakers(3, 4, 2, 11);
        let mut stats = CovarianceStats::new(2);
        let mut expected = Array2::<f64>::zeros((2, 2));
        for utts in &speakers {
            stats.acc_stats(utts.view()).unwrap();
            let mean = utts.mean_axis(Axis(0)).unwrap();
            for row in utts.rows() {
                let d = &row - &mean;
                add_vec2(expected.view_mut(), 1.0, d.view());
            }
        }
        expected /= 12.0;
        assert!(max_abs_diff(&stats.within_covar().unwrap(), &expected) < 1e-12);
    }

    #[test]
    fn total_covar_is_symmetric_psd() {
        let mut stats = CovarianceStats::new(6);
        for utts in random_speakers(4, 3, 6, 5) {
            stats.acc_stats(utts.view()).unwrap();
        }
        let total = stats.total_covar().unwrap();
        assert_eq!(asymmetry(total.view()), 0.0);
        let (s, _) = sorted_eigh(total.view());
        assert!(s.iter().all(|&v| v > -1e-10));
    }

    #[test]
    fn all_covariances_exactly_symmetric() {
        let speakers = random_speakers(4, 3, 3, 31);
        let mut stats = CovarianceStats::new(3);
        for utts in &speakers {
            stats.acc_stats(utts.view()).unwrap();
            stats.acc_weighted_stats_within(utts.view()).unwrap();
        }
        for i in 0..speakers.len() {
            for j in i + 1..speakers.len() {
                stats
                    .acc_weighted_stats(
                        speakers[i].view(),
                        speakers[j].view(),
                        DistanceWeighting::Euclidean,
                        4,
                    )
                    .unwrap();
            }
        }
        assert_eq!(asymmetry(stats.total_covar().unwrap().view()), 0.0);
        assert_eq!(asymmetry(stats.within_covar().unwrap().view()), 0.0);
        assert_eq!(asymmetry(stats.within_covar_weighted().unwrap().view()), 0.0);
        assert_eq!(asymmetry(stats.between_covar_weighted().unwrap().view()), 0.0);
    }

    #[test]
    fn add_stats_matches_single_pass() {
        let speakers = random_speakers(5, 3, 4, 21);
        let mut full = CovarianceStats::new(4);
        for utts in &speakers {
            full.acc_stats(utts.view()).unwrap();
        }

        let mut left = CovarianceStats::new(4);
        let mut right = CovarianceStats::new(4);
        for utts in &speakers[..2] {
            left.acc_stats(utts.view()).unwrap();
        }
        for utts in &speakers[2..] {
            right.acc_stats(utts.view()).unwrap();
        }
        left.add_stats(&right).unwrap();

        assert_eq!((left.num_spk(), left.num_utt()), (full.num_spk(), full.num_utt()));
        assert!(max_abs_diff(&left.total_covar().unwrap(), &full.total_covar().unwrap()) < 1e-12);
        assert!(max_abs_diff(&left.within_covar().unwrap(), &full.within_covar().unwrap()) < 1e-12);

        assert!(left.add_stats(&CovarianceStats::new(3)).is_err());
    }

    #[test]
    fn mahalanobis_before_within_is_singular() {
        let speakers = random_speakers(2, 3, 3, 8);
        let mut stats = CovarianceStats::new(3);
        let result = stats.acc_weighted_stats(
            speakers[0].view(),
            speakers[1].view(),
            DistanceWeighting::Mahalanobis,
            4,
        );
        assert!(matches!(result, Err(LdaError::SingularMatrix(_))));
    }

    #[test]
    fn mahalanobis_after_within_succeeds() {
        let speakers = random_speakers(3, 5, 3, 9);
        let mut stats = CovarianceStats::new(3);
        for utts in &speakers {
            stats.acc_stats(utts.view()).unwrap();
            stats.acc_weighted_stats_within(utts.view()).unwrap();
        }
        for i in 0..speakers.len() {
            for j in i + 1..speakers.len() {
                stats
                    .acc_weighted_stats(
                        speakers[i].view(),
                        speakers[j].view(),
                        DistanceWeighting::Mahalanobis,
                        2,
                    )
                    .unwrap();
            }
        }
        let between = stats.between_covar_weighted().unwrap();
        assert!(between.iter().all(|v| v.is_finite()));
        assert_eq!(asymmetry(between.view()), 0.0);
        assert!(between[[0, 0]] > 0.0);
    }

    #[test]
    fn euclidean_weight() {
        // means differ by (2, 0): distance 4, weight 4^-1, times n_i * n_j = 2
        let a = array![[0.0, 1.0], [0.0, -1.0]];
        let b = array![[2.0, 0.0]];
        let mut stats = CovarianceStats::new(2);
        stats.acc_stats(a.view()).unwrap();
        stats.acc_stats(b.view()).unwrap();
        stats
            .acc_weighted_stats(a.view(), b.view(), DistanceWeighting::Euclidean, 1)
            .unwrap();
        let between = stats.between_covar_weighted().unwrap();
        // 0.25 * 2 * [4 0; 0 0] / 3 utterances
        assert!((between[[0, 0]] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(between.slice(s![.., 1]).sum(), 0.0);
    }

    #[test]
    fn coincident_means_are_rejected() {
        let a = array![[1.0, 0.0], [-1.0, 0.0]];
        let b = array![[0.0, 1.0], [0.0, -1.0]];
        let mut stats = CovarianceStats::new(2);
        let result = stats.acc_weighted_stats(a.view(), b.view(), DistanceWeighting::Euclidean, 4);
        assert!(matches!(result, Err(LdaError::DegenerateWeight { .. })));
    }

    #[test]
    fn unnegatable_exponent_is_rejected() {
        let a = array![[0.0, 1.0], [0.0, -1.0]];
        let b = array![[2.0, 0.0]];
        let mut stats = CovarianceStats::new(2);
        let result =
            stats.acc_weighted_stats(a.view(), b.view(), DistanceWeighting::Euclidean, i32::MIN);
        assert!(matches!(result, Err(LdaError::InvalidConfiguration(_))));
    }

    #[test]
    fn within_weighted_is_centered_scatter() {
        let a = array![[1.0, 0.0], [3.0, 0.0]];
        let mut stats = CovarianceStats::new(2);
        stats.acc_stats(a.view()).unwrap();
        stats.acc_weighted_stats_within(a.view()).unwrap();
        assert_eq!(
            stats.within_covar_weighted().unwrap(),
            array![[2.0, 0.0], [0.0, 0.0]]
        );
    }

    #[test]
    fn rejects_wrong_dimension_and_empty_speaker() {
        let mut stats = CovarianceStats::new(2);
        assert!(matches!(
            stats.acc_stats(array![[1.0, 2.0, 3.0]].view()),
            Err(LdaError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            stats.acc_stats(Array2::<f64>::zeros((0, 2)).view()),
            Err(LdaError::InsufficientData(_))
        ));
    }
}
