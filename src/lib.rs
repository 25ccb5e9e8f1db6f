mod config;
mod error;
mod lda;
mod linalg;
mod mean;
mod normalize;
mod source;
mod stats;
mod store;

pub use config::{
    LdaConfig, LdaVariant, SolverSettings, DEFAULT_COVARIANCE_FLOOR, DEFAULT_LDA_DIM, DEFAULT_WLDA_N,
};
pub use error::{LdaError, Result};
pub use lda::{
    compute_lda, compute_lda_transform, compute_lda_with_rng, placeholder_transform, LdaTransform,
};
pub use linalg::sorted_eigh;
pub use mean::compute_and_subtract_mean;
pub use normalize::{compute_normalizing_transform, NormalizingTransform};
pub use source::{read_utt2spk, PreloadedVectors, SpeakerLookup, TextVectorReader, VectorSource};
pub use stats::{CovarianceStats, DistanceWeighting};
pub use store::{ReadSummary, VectorStore};
