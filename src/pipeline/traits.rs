use crate::error::RestoreError;
use crate::labels::{Label, LabelSet};
use crate::types::{ProbabilityVector, TokenizedQuery};
use crate::windowing::Framing;

/// Per-token classifier with a bounded context window.
pub trait TokenClassifier: Send + Sync {
    /// Returns one output sequence per input sequence, in order, with one
    /// probability vector per input token.
    fn predict(&self, batch: &[&[u32]]) -> Result<Vec<Vec<ProbabilityVector>>, RestoreError>;

    fn num_labels(&self) -> usize;
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Result<TokenizedQuery, RestoreError>;

    /// Ids wrapped around each segment when framing is enabled.
    fn framing_tokens(&self) -> Option<Framing>;

    /// Rebuilds text from `query.words`, decorating each word with the label
    /// predicted at its label position.
    fn detokenize(
        &self,
        query: &TokenizedQuery,
        labels: &[usize],
        label_set: &LabelSet,
    ) -> Result<String, RestoreError> {
        let mut words = Vec::with_capacity(query.words.len());
        for (word, label) in word_labels(query, labels, label_set)? {
            words.push(label.decorate(word));
        }
        Ok(words.join(" "))
    }
}

/// Pairs every word of `query` with the label found at its label position.
pub(crate) fn word_labels<'q, 'l>(
    query: &'q TokenizedQuery,
    labels: &[usize],
    label_set: &'l LabelSet,
) -> Result<Vec<(&'q str, &'l Label)>, RestoreError> {
    if labels.len() != query.len() {
        return Err(RestoreError::invalid_input(format!(
            "{} labels for a query of {} tokens",
            labels.len(),
            query.len()
        )));
    }
    if query.words.len() != query.label_positions.len() {
        return Err(RestoreError::invalid_input(format!(
            "{} words but {} label positions",
            query.words.len(),
            query.label_positions.len()
        )));
    }
    query
        .words
        .iter()
        .zip(&query.label_positions)
        .map(|(word, &pos)| -> Result<_, RestoreError> {
            let label = labels.get(pos).ok_or_else(|| {
                RestoreError::invalid_input(format!(
                    "label position {pos} out of range for {} tokens",
                    labels.len()
                ))
            })?;
            Ok((word.as_str(), label_set.get(*label)?))
        })
        .collect()
}
