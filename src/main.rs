use std::fs::File;
use std::io::BufReader;

use clap::Parser;
use eyre::{bail, Context, Result};
use log::info;

use ivector_lda::{compute_lda, read_utt2spk, LdaConfig, TextVectorReader, VectorStore};

/// Compute an LDA matrix for an iVector system.
///
/// Reads iVectors per utterance and an utt2spk table, which it uses to work
/// out the within-speaker and between-speaker covariance matrices, and writes
/// an LDA projection to the requested dimension. The output is an affine
/// transform that also sets the global mean to zero.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Text archive of iVectors, one `<utt> [ v1 v2 ... ]` per line.
    ivectors: String,
    /// Table of `<utt> <spk>` lines.
    utt2spk: String,
    /// Path for the LDA matrix.
    output: String,
    /// Dimension we keep with the LDA transform.
    #[clap(long)]
    dim: Option<usize>,
    /// If 0.0 the within-class covariance is normalized to unit; if 1.0 the
    /// total covariance; in between, an interpolated matrix.
    #[clap(long)]
    total_covariance_factor: Option<f64>,
    /// Floor the eigenvalues of the interpolated covariance matrix to the
    /// product of its largest eigenvalue and this number.
    #[clap(long)]
    covariance_floor: Option<f64>,
    /// LDA type: -1 test placeholder only, 0 LDA, 1 WLDA with Euclidean
    /// distance weighting, 2 WLDA with Mahalanobis distance weighting.
    #[clap(long, allow_hyphen_values = true)]
    lda_variation: Option<i32>,
    /// Exponent of the WLDA weighting function.
    #[clap(long, allow_hyphen_values = true)]
    wlda_n: Option<i32>,
    /// Write output in binary (npy) mode.
    #[clap(long)]
    binary: Option<bool>,
    /// If set, load config from the specified TOML file.
    #[clap(short, long)]
    config: Option<String>,
    /// If set, dump the config used to the specified path.
    #[clap(long)]
    dump_config: Option<String>,
}

impl Args {
    fn lda_config(&self) -> Result<LdaConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {path}"))?;
                toml::from_str::<LdaConfig>(&text)
                    .with_context(|| format!("Config file syntax error in {path}"))?
            }
            None => LdaConfig::default(),
        };
        if let Some(dim) = self.dim {
            config.dim = dim;
        }
        if let Some(factor) = self.total_covariance_factor {
            config.total_covariance_factor = factor;
        }
        if let Some(floor) = self.covariance_floor {
            config.covariance_floor = floor;
        }
        if let Some(variation) = self.lda_variation {
            config.lda_variation = variation;
        }
        if let Some(n) = self.wlda_n {
            config.wlda_n = n;
        }
        if let Some(binary) = self.binary {
            config.binary = binary;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("IVECTOR_LDA_LOG", "info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let config = args.lda_config()?;

    if let Some(path) = &args.dump_config {
        let text = toml::to_string(&config).context("Failed to serialize config")?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config to {path}"))?;
    }

    let utt2spk = read_utt2spk(BufReader::new(
        File::open(&args.utt2spk).with_context(|| format!("Failed to open {}", args.utt2spk))?,
    ))
    .with_context(|| format!("Failed to read utt2spk from {}", args.utt2spk))?;

    let mut ivectors = TextVectorReader::new(BufReader::new(
        File::open(&args.ivectors).with_context(|| format!("Failed to open {}", args.ivectors))?,
    ));
    let (store, summary) = VectorStore::read(&mut ivectors, &utt2spk)
        .with_context(|| format!("Failed to read iVectors from {}", args.ivectors))?;
    if summary.num_done == 0 {
        bail!("Did not read any utterances.");
    }

    let lda = compute_lda(&store, &config).context("Failed to compute LDA transform")?;
    info!("lda_mat computed as {}", lda.matrix());

    lda.write(&args.output, config.binary)
        .with_context(|| format!("Failed to write LDA transform to {}", args.output))?;
    info!("Wrote LDA transform to {}", args.output);

    Ok(())
}
