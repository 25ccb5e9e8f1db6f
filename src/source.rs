//! Input capabilities: a sequential producer of embeddings and a lookup from
//! utterance id to speaker id.

use std::collections::{HashMap, VecDeque};
use std::io::BufRead;

use ndarray::Array1;

use crate::error::{LdaError, Result};

/// Sequential producer of `(utterance id, embedding)` pairs.
pub trait VectorSource {
    /// Returns the next pair, or `None` once the source is exhausted.
    fn next_vector(&mut self) -> Result<Option<(String, Array1<f64>)>>;
}

/// Keyed lookup from utterance id to speaker id.
pub trait SpeakerLookup {
    fn speaker_of(&self, utt: &str) -> Option<String>;
}

impl SpeakerLookup for HashMap<String, String> {
    fn speaker_of(&self, utt: &str) -> Option<String> {
        self.get(utt).cloned()
    }
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct PreloadedVectors {
    items: VecDeque<(String, Array1<f64>)>,
}

impl PreloadedVectors {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = (S, Array1<f64>)>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl VectorSource for PreloadedVectors {
    fn next_vector(&mut self) -> Result<Option<(String, Array1<f64>)>> {
        Ok(self.items.pop_front())
    }
}

/// Reads a text archive of vectors, one per line:
///
/// ```text
/// utt-001  [ 0.1 -0.4 2.3 ]
/// utt-002  0.3 0.0 1.1
/// ```
pub struct TextVectorReader<R> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> TextVectorReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }

    fn parse_line(&self, line: &str) -> Result<(String, Array1<f64>)> {
        let mut tokens = line.split_whitespace();
        let key = tokens.next().ok_or_else(|| self.parse_error("missing key"))?;

        let mut values = Vec::new();
        let mut opened = false;
        let mut closed = false;
        for (i, token) in tokens.enumerate() {
            if closed {
                return Err(self.parse_error(format!("trailing token {token:?} after ']'")));
            }
            match token {
                "[" if i == 0 => opened = true,
                "]" if opened => closed = true,
                _ => {
                    let value = token
                        .parse::<f64>()
                        .map_err(|e| self.parse_error(format!("bad value {token:?}: {e}")))?;
                    if !value.is_finite() {
                        return Err(self.parse_error(format!("non-finite value {token:?}")));
                    }
                    values.push(value);
                }
            }
        }
        if opened && !closed {
            return Err(self.parse_error("missing ']'"));
        }
        Ok((key.to_owned(), Array1::from_vec(values)))
    }

    fn parse_error(&self, message: impl Into<String>) -> LdaError {
        LdaError::Parse {
            line: self.line_no,
            message: message.into(),
        }
    }
}

impl<R: BufRead> VectorSource for TextVectorReader<R> {
    fn next_vector(&mut self) -> Result<Option<(String, Array1<f64>)>> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return self.parse_line(line).map(Some);
        }
    }
}

/// Reads an `utt2spk` table: lines of `<utterance> <speaker>`.
pub fn read_utt2spk<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_whitespace();
        let (Some(utt), Some(spk)) = (tokens.next(), tokens.next()) else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(LdaError::Parse {
                line: i + 1,
                message: "expected '<utterance> <speaker>'".to_owned(),
            });
        };
        if tokens.next().is_some() {
            return Err(LdaError::Parse {
                line: i + 1,
                message: "too many fields".to_owned(),
            });
        }
        map.insert(utt.to_owned(), spk.to_owned());
    }
    Ok(map)
}
