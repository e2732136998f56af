use crate::config::RestoreConfig;
use crate::error::RestoreError;
use crate::labels::LabelSet;
use crate::pipeline::traits::{word_labels, TokenClassifier, Tokenizer};
use crate::types::TokenizedQuery;
use crate::windowing::{
    aggregate, mask, run_batches, segment, AggregatedQuery, Contribution, Framing, SegmentOutput,
    SegmentRequest,
};

/// Restores punctuation and capitalization in texts of any length.
pub struct Punctuator {
    tokenizer: Box<dyn Tokenizer>,
    classifier: Box<dyn TokenClassifier>,
    label_set: LabelSet,
    restore_config: RestoreConfig,
}

pub(crate) struct PunctuatorParts {
    pub tokenizer: Box<dyn Tokenizer>,
    pub classifier: Box<dyn TokenClassifier>,
    pub label_set: LabelSet,
    pub restore_config: RestoreConfig,
}

impl Punctuator {
    pub(crate) fn from_parts(parts: PunctuatorParts) -> Self {
        Self {
            tokenizer: parts.tokenizer,
            classifier: parts.classifier,
            label_set: parts.label_set,
            restore_config: parts.restore_config,
        }
    }

    pub fn restore_config(&self) -> &RestoreConfig {
        &self.restore_config
    }

    pub fn label_set(&self) -> &LabelSet {
        &self.label_set
    }

    /// One restored string per input text, in input order.
    pub fn restore<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<String>, RestoreError> {
        let queries = self.tokenize_all(texts)?;
        let aggregated = self.predict_labels(&queries)?;
        queries
            .iter()
            .zip(&aggregated)
            .map(|(query, agg)| {
                self.tokenizer
                    .detokenize(query, &agg.labels, &self.label_set)
            })
            .collect()
    }

    /// Like [`Punctuator::restore`] but returns each word's label name,
    /// space-separated, instead of decorated text.
    pub fn restore_labels<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<String>, RestoreError> {
        let queries = self.tokenize_all(texts)?;
        let aggregated = self.predict_labels(&queries)?;
        queries
            .iter()
            .zip(&aggregated)
            .map(|(query, agg)| -> Result<String, RestoreError> {
                let names: Vec<&str> = word_labels(query, &agg.labels, &self.label_set)?
                    .into_iter()
                    .map(|(_, label)| label.name.as_str())
                    .collect();
                Ok(names.join(" "))
            })
            .collect()
    }

    pub fn tokenize_all<S: AsRef<str>>(
        &self,
        texts: &[S],
    ) -> Result<Vec<TokenizedQuery>, RestoreError> {
        texts
            .iter()
            .map(|t| self.tokenizer.tokenize(t.as_ref()))
            .collect()
    }

    /// Per-token labels for already tokenized queries.
    pub fn predict_labels(
        &self,
        queries: &[TokenizedQuery],
    ) -> Result<Vec<AggregatedQuery>, RestoreError> {
        predict_labels(
            queries,
            &self.restore_config,
            self.tokenizer.framing_tokens(),
            self.classifier.as_ref(),
        )
    }
}

/// Segments every query, runs the classifier over all segments in batches
/// and merges the overlapping outputs back into one label per token.
///
/// The configuration is fully validated before the classifier is called.
pub fn predict_labels(
    queries: &[TokenizedQuery],
    config: &RestoreConfig,
    framing: Option<Framing>,
    classifier: &dyn TokenClassifier,
) -> Result<Vec<AggregatedQuery>, RestoreError> {
    let window = config.validate()?;
    let framing = resolve_framing(config, framing)?;

    let mut requests = Vec::new();
    for (query_index, query) in queries.iter().enumerate() {
        for segment in segment(&query.token_ids, window, config.step)? {
            requests.push(SegmentRequest {
                query_index,
                segment,
                tokens: &query.token_ids[segment.range()],
            });
        }
    }
    tracing::debug!(
        queries = queries.len(),
        segments = requests.len(),
        window,
        step = config.step,
        margin = config.margin,
        "segmented queries"
    );

    let outputs = run_batches(&requests, config.batch_size, classifier, framing)?;

    let mut per_query: Vec<Vec<&SegmentOutput>> = vec![Vec::new(); queries.len()];
    for output in &outputs {
        per_query[output.query_index].push(output);
    }

    queries
        .iter()
        .zip(per_query)
        .map(|(query, outputs)| {
            aggregate(
                query.len(),
                outputs.into_iter().map(|o| Contribution {
                    segment: o.segment,
                    margin: mask(&o.segment, config.margin),
                    probabilities: &o.probabilities,
                }),
            )
        })
        .collect()
}

pub(crate) fn resolve_framing(
    config: &RestoreConfig,
    framing: Option<Framing>,
) -> Result<Option<Framing>, RestoreError> {
    if !config.add_cls_and_sep_tokens {
        return Ok(None);
    }
    framing.map(Some).ok_or_else(|| {
        RestoreError::configuration(
            "add_cls_and_sep_tokens is set but the tokenizer has no [CLS]/[SEP] tokens",
        )
    })
}
