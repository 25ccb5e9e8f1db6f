//! Solver configuration.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{LdaError, Result};
use crate::stats::DistanceWeighting;

pub const DEFAULT_LDA_DIM: usize = 100;
pub const DEFAULT_COVARIANCE_FLOOR: f64 = 1.0e-6;
pub const DEFAULT_WLDA_N: i32 = 4;

/// Which flavour of LDA to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdaVariant {
    /// Emits a placeholder matrix instead of a transform. Only for testing
    /// the surrounding pipeline.
    Test,
    /// Plain LDA.
    Standard,
    /// Weighted LDA with Euclidean distance weighting.
    Euclidean,
    /// Weighted LDA with Mahalanobis distance weighting.
    Mahalanobis,
}

impl LdaVariant {
    /// Maps the integer code used on the command line to a variant.
    ///
    /// Negative codes select [`LdaVariant::Test`]; codes above 2 fall back to
    /// [`LdaVariant::Standard`].
    pub fn from_code(code: i32) -> Self {
        match code {
            c if c < 0 => Self::Test,
            1 => Self::Euclidean,
            2 => Self::Mahalanobis,
            _ => Self::Standard,
        }
    }

    pub fn is_weighted(self) -> bool {
        self.weighting().is_some()
    }

    pub fn weighting(self) -> Option<DistanceWeighting> {
        match self {
            Self::Euclidean => Some(DistanceWeighting::Euclidean),
            Self::Mahalanobis => Some(DistanceWeighting::Mahalanobis),
            Self::Standard | Self::Test => None,
        }
    }
}

/// Parameters of an LDA estimation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LdaConfig {
    /// Output dimension of the transform.
    pub dim: usize,
    /// If 0.0 the within-class covariance is normalized to unit; if 1.0 the
    /// total covariance; values in between normalize an interpolation.
    pub total_covariance_factor: f64,
    /// Eigenvalues of the matrix being normalized are floored to this
    /// fraction of the largest one.
    pub covariance_floor: f64,
    /// -1: test placeholder, 0: LDA, 1: WLDA (Euclidean), 2: WLDA (Mahalanobis).
    pub lda_variation: i32,
    /// Exponent of the WLDA distance weighting function. 0 means default.
    pub wlda_n: i32,
    /// Write the output in binary (npy) rather than text.
    pub binary: bool,
}

impl Default for LdaConfig {
    fn default() -> Self {
        Self {
            dim: DEFAULT_LDA_DIM,
            total_covariance_factor: 0.0,
            covariance_floor: DEFAULT_COVARIANCE_FLOOR,
            lda_variation: 0,
            wlda_n: DEFAULT_WLDA_N,
            binary: true,
        }
    }
}

/// Settings of one solve, resolved from an [`LdaConfig`] for a known input
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub variant: LdaVariant,
    /// Output dimension `k`.
    pub lda_dim: usize,
    /// Always 0 for the weighted variants.
    pub total_covariance_factor: f64,
    pub covariance_floor: f64,
    /// WLDA exponent with 0 replaced by the default.
    pub wlda_n: i32,
}

impl LdaConfig {
    pub fn variant(&self) -> LdaVariant {
        LdaVariant::from_code(self.lda_variation)
    }

    /// Checks the ranges that do not correct themselves, given the input
    /// dimension `input_dim`.
    pub fn validate(&self, input_dim: usize) -> Result<()> {
        if self.dim == 0 || self.dim > input_dim {
            return Err(LdaError::InvalidConfiguration(format!(
                "output dimension {} must be in [1, {input_dim}]",
                self.dim
            )));
        }
        if !(0.0..=1.0).contains(&self.total_covariance_factor) {
            return Err(LdaError::InvalidConfiguration(format!(
                "total-covariance-factor {} must be in [0, 1]",
                self.total_covariance_factor
            )));
        }
        if !(0.0..1.0).contains(&self.covariance_floor) {
            return Err(LdaError::InvalidConfiguration(format!(
                "covariance-floor {} must be in [0, 1)",
                self.covariance_floor
            )));
        }
        Ok(())
    }

    /// Validates against `input_dim` and applies the corrections that only
    /// warn. Warnings are logged here and nowhere else, once per call.
    pub fn resolve(&self, input_dim: usize) -> Result<SolverSettings> {
        self.validate(input_dim)?;

        let variant = self.variant();
        if self.lda_variation > 2 {
            warn!(
                "Invalid LDA variant {} chosen, using standard LDA.",
                self.lda_variation
            );
        }

        let wlda_n = if self.wlda_n == 0 {
            DEFAULT_WLDA_N
        } else {
            self.wlda_n
        };
        if variant.is_weighted() && wlda_n.checked_neg().is_none() {
            return Err(LdaError::InvalidConfiguration(format!(
                "wlda-n {wlda_n} is out of range"
            )));
        }

        let total_covariance_factor =
            if variant.is_weighted() && self.total_covariance_factor != 0.0 {
                warn!("total-covariance-factor forced to 0.0 for weighted LDA.");
                0.0
            } else {
                self.total_covariance_factor
            };

        Ok(SolverSettings {
            variant,
            lda_dim: self.dim,
            total_covariance_factor,
            covariance_floor: self.covariance_floor,
            wlda_n,
        })
    }
}
