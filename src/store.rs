//! Index-based storage of the embeddings of one run, grouped by speaker.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{LdaError, Result};
use crate::source::{SpeakerLookup, VectorSource};

/// Counts of what happened while reading the input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    pub num_done: usize,
    /// Utterances seen a second time; the first value was kept.
    pub num_duplicate: usize,
    /// Utterances without a speaker.
    pub num_missing: usize,
}

impl ReadSummary {
    pub fn num_err(&self) -> usize {
        self.num_duplicate + self.num_missing
    }
}

/// All embeddings of a run in one contiguous matrix (one row per utterance),
/// plus the id→row map and the speaker→rows map.
///
/// Speakers are iterated in sorted order and each speaker keeps its
/// utterances in insertion order, so pairwise passes are reproducible.
#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    vectors: Array2<f64>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    spk2utt: BTreeMap<String, Vec<usize>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains `source`, resolving each utterance's speaker through `lookup`.
    ///
    /// Duplicates and unmapped utterances are dropped and counted; a vector
    /// whose dimension differs from the first one aborts the read.
    pub fn read<S, L>(source: &mut S, lookup: &L) -> Result<(Self, ReadSummary)>
    where
        S: VectorSource + ?Sized,
        L: SpeakerLookup + ?Sized,
    {
        let mut store = Self::new();
        let mut summary = ReadSummary::default();

        while let Some((utt, vector)) = source.next_vector()? {
            if store.index.contains_key(&utt) {
                warn!("Duplicate iVector found for utterance {utt}, ignoring it.");
                summary.num_duplicate += 1;
                continue;
            }
            let Some(spk) = lookup.speaker_of(&utt) else {
                warn!("utt2spk has no entry for utterance {utt}, skipping it.");
                summary.num_missing += 1;
                continue;
            };
            store.insert(&utt, &spk, vector.view())?;
            summary.num_done += 1;
        }

        info!(
            "Read {} utterances, {} with errors.",
            summary.num_done,
            summary.num_err()
        );
        Ok((store, summary))
    }

    /// Adds one utterance. Returns `Ok(false)` without touching the store if
    /// `utt` is already present.
    pub fn insert(&mut self, utt: &str, spk: &str, vector: ArrayView1<f64>) -> Result<bool> {
        if self.index.contains_key(utt) {
            return Ok(false);
        }
        if self.ids.is_empty() {
            self.vectors = Array2::zeros((0, vector.len()));
        } else if vector.len() != self.dim() {
            return Err(LdaError::DimensionMismatch {
                key: utt.to_owned(),
                expected: self.dim(),
                got: vector.len(),
            });
        }
        self.vectors
            .push_row(vector)
            .map_err(|_| LdaError::DimensionMismatch {
                key: utt.to_owned(),
                expected: self.vectors.ncols(),
                got: vector.len(),
            })?;

        let row = self.ids.len();
        self.ids.push(utt.to_owned());
        self.index.insert(utt.to_owned(), row);
        self.spk2utt.entry(spk.to_owned()).or_default().push(row);
        Ok(true)
    }

    /// Dimension of the stored vectors, 0 while empty.
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn num_speakers(&self) -> usize {
        self.spk2utt.len()
    }

    pub fn vector(&self, utt: &str) -> Option<ArrayView1<'_, f64>> {
        self.index.get(utt).map(|&row| self.vectors.row(row))
    }

    pub fn vectors(&self) -> ArrayView2<'_, f64> {
        self.vectors.view()
    }

    /// Speaker ids with the rows of their utterances, in sorted speaker order.
    pub fn speakers(&self) -> impl Iterator<Item = (&str, &[usize])> + '_ {
        self.spk2utt
            .iter()
            .map(|(spk, rows)| (spk.as_str(), rows.as_slice()))
    }

    /// One matrix per speaker (rows = utterances), in sorted speaker order.
    pub fn speaker_matrices(&self) -> Vec<Array2<f64>> {
        self.speaker_matrices_from(self.vectors.view())
    }

    /// Same grouping as [`Self::speaker_matrices`], taking rows from
    /// `vectors` instead, e.g. a centered copy of [`Self::vectors`].
    pub(crate) fn speaker_matrices_from(&self, vectors: ArrayView2<f64>) -> Vec<Array2<f64>> {
        self.spk2utt
            .values()
            .map(|rows| vectors.select(Axis(0), rows))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PreloadedVectors;
    use ndarray::array;

    fn utt2spk(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(u, s)| (u.to_string(), s.to_string()))
            .collect()
    }

    #[test]
    fn groups_by_speaker_in_sorted_order() {
        let mut source = PreloadedVectors::new([
            ("u1", array![1.0, 0.0]),
            ("u2", array![2.0, 0.0]),
            ("u3", array![3.0, 0.0]),
        ]);
        let lookup = utt2spk(&[("u1", "zed"), ("u2", "amy"), ("u3", "zed")]);
        let (store, summary) = VectorStore::read(&mut source, &lookup).unwrap();

        assert_eq!(summary.num_done, 3);
        assert_eq!(store.dim(), 2);
        let speakers: Vec<_> = store.speakers().collect();
        assert_eq!(speakers, vec![("amy", &[1usize][..]), ("zed", &[0usize, 2][..])]);
        let mats = store.speaker_matrices();
        assert_eq!(mats[1], array![[1.0, 0.0], [3.0, 0.0]]);
    }

    #[test]
    fn duplicate_keeps_first_value() {
        let mut source = PreloadedVectors::new([
            ("u1", array![1.0, 1.0]),
            ("u1", array![9.0, 9.0]),
        ]);
        let lookup = utt2spk(&[("u1", "s")]);
        let (store, summary) = VectorStore::read(&mut source, &lookup).unwrap();

        assert_eq!(summary.num_duplicate, 1);
        assert_eq!(summary.num_done, 1);
        assert_eq!(store.vector("u1").unwrap(), array![1.0, 1.0]);
    }

    #[test]
    fn unmapped_utterance_is_counted() {
        let mut source = PreloadedVectors::new([("u1", array![1.0]), ("u2", array![2.0])]);
        let lookup = utt2spk(&[("u2", "s")]);
        let (store, summary) = VectorStore::read(&mut source, &lookup).unwrap();

        assert_eq!(summary.num_missing, 1);
        assert_eq!(summary.num_err(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.vector("u1").is_none());
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let mut source = PreloadedVectors::new([("u1", array![1.0, 2.0]), ("u2", array![1.0])]);
        let lookup = utt2spk(&[("u1", "s"), ("u2", "s")]);
        match VectorStore::read(&mut source, &lookup) {
            Err(LdaError::DimensionMismatch { key, expected, got }) => {
                assert_eq!((key.as_str(), expected, got), ("u2", 2, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
