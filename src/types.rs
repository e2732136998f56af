use std::cmp::Ordering;

use crate::error::RestoreError;

/// A tokenized input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedQuery {
    pub token_ids: Vec<u32>,
    pub words: Vec<String>,
    /// For each word, the index of the token whose label decorates it.
    pub label_positions: Vec<usize>,
}

impl TokenizedQuery {
    pub fn new(
        token_ids: Vec<u32>,
        words: Vec<String>,
        label_positions: Vec<usize>,
    ) -> Result<Self, RestoreError> {
        if words.len() != label_positions.len() {
            return Err(RestoreError::invalid_input(format!(
                "{} words but {} label positions",
                words.len(),
                label_positions.len()
            )));
        }
        if let Some(&pos) = label_positions.iter().find(|&&p| p >= token_ids.len()) {
            return Err(RestoreError::invalid_input(format!(
                "label position {pos} out of range for {} tokens",
                token_ids.len()
            )));
        }
        Ok(Self {
            token_ids,
            words,
            label_positions,
        })
    }

    pub fn empty() -> Self {
        Self {
            token_ids: Vec::new(),
            words: Vec::new(),
            label_positions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

/// Window `[start_offset, start_offset + length)` over a query's tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start_offset: usize,
    pub length: usize,
    pub is_first: bool,
    pub is_last: bool,
}

impl Segment {
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.length
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_offset..self.end_offset()
    }
}

/// Leading/trailing segment positions whose outputs are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margin {
    pub left: usize,
    pub right: usize,
}

/// Class probabilities for one token, in label-set order.
///
/// Entries are finite and non-negative. They are expected to sum to one but
/// this is not enforced; aggregation re-normalizes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    pub fn new(values: Vec<f32>) -> Result<Self, RestoreError> {
        if values.is_empty() {
            return Err(RestoreError::model_output("empty probability vector"));
        }
        if let Some(bad) = values.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(RestoreError::model_output(format!(
                "probability {bad} is not a finite non-negative number"
            )));
        }
        Ok(Self(values))
    }

    /// Builds a normalized vector from unnormalized log scores using
    /// log-sum-exp, so long products of small probabilities never underflow.
    pub(crate) fn from_log_scores(scores: &[f64]) -> Self {
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = scores.iter().map(|&s| (s - max).exp()).sum();
        let log_norm = max + sum.ln();
        Self(scores.iter().map(|&s| (s - log_norm).exp() as f32).collect())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index of the largest probability; ties resolve to the smallest index.
    pub fn argmax(&self) -> usize {
        argmax_first(self.0.iter().copied())
    }
}

pub(crate) fn argmax_first<T: PartialOrd + Copy>(values: impl IntoIterator<Item = T>) -> usize {
    let mut best: Option<(usize, T)> = None;
    for (idx, value) in values.into_iter().enumerate() {
        match best {
            Some((_, current)) if value.partial_cmp(&current) != Some(Ordering::Greater) => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_vector_rejects_negative_and_nan() {
        assert!(ProbabilityVector::new(vec![0.5, -0.1]).is_err());
        assert!(ProbabilityVector::new(vec![f32::NAN, 1.0]).is_err());
        assert!(ProbabilityVector::new(Vec::new()).is_err());
        assert!(ProbabilityVector::new(vec![0.0, 1.0]).is_ok());
    }

    #[test]
    fn argmax_prefers_smallest_index_on_ties() {
        let v = ProbabilityVector::new(vec![0.2, 0.4, 0.4]).unwrap();
        assert_eq!(v.argmax(), 1);
        let flat = ProbabilityVector::new(vec![0.25; 4]).unwrap();
        assert_eq!(flat.argmax(), 0);
    }

    #[test]
    fn log_scores_are_normalized_without_underflow() {
        let v = ProbabilityVector::from_log_scores(&[-2000.0, -2000.0 + 2f64.ln()]);
        let p = v.as_slice();
        assert!((p[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!((p[1] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn segment_range_is_half_open() {
        let s = Segment {
            start_offset: 2,
            length: 3,
            is_first: false,
            is_last: true,
        };
        assert_eq!(s.range(), 2..5);
        assert_eq!(s.end_offset(), 5);
    }

    #[test]
    fn tokenized_query_validates_label_positions() {
        assert!(TokenizedQuery::new(vec![1, 2], vec!["a".into()], vec![2]).is_err());
        assert!(TokenizedQuery::new(vec![1, 2], vec!["a".into()], vec![]).is_err());
        let q = TokenizedQuery::new(vec![1, 2], vec!["ab".into()], vec![0]).unwrap();
        assert_eq!(q.len(), 2);
        assert!(TokenizedQuery::empty().is_empty());
    }
}
