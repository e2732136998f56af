use std::collections::HashMap;
use std::path::Path;

use crate::error::RestoreError;
use crate::pipeline::traits::Tokenizer;
use crate::types::TokenizedQuery;
use crate::windowing::Framing;

/// One token per whitespace-separated word.
///
/// Words are looked up lower-cased in `vocab`; unknown words map to
/// `unk_id`.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceTokenizer {
    vocab: HashMap<String, u32>,
    unk_id: u32,
    framing: Option<Framing>,
}

impl WhitespaceTokenizer {
    pub fn new(vocab: HashMap<String, u32>, unk_id: u32) -> Self {
        Self {
            vocab,
            unk_id,
            framing: None,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = Some(framing);
        self
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenizedQuery, RestoreError> {
        let words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        let token_ids = words
            .iter()
            .map(|w| {
                self.vocab
                    .get(&w.to_lowercase())
                    .copied()
                    .unwrap_or(self.unk_id)
            })
            .collect();
        let label_positions = (0..words.len()).collect();
        TokenizedQuery::new(token_ids, words, label_positions)
    }

    fn framing_tokens(&self) -> Option<Framing> {
        self.framing
    }
}

/// Sub-word tokenizer backed by a Hugging Face `tokenizer.json`.
///
/// Words are the whitespace-separated spans of the input; each word takes the
/// label predicted for its first sub-token. Truncation and padding from the
/// `tokenizer.json` are cleared, since segmentation handles any length.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    framing: Option<Framing>,
}

impl HfTokenizer {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RestoreError> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| RestoreError::runtime("load tokenizer.json", e))?;
        Self::new(inner)
    }

    pub fn new(mut inner: tokenizers::Tokenizer) -> Result<Self, RestoreError> {
        inner
            .with_truncation(None)
            .map_err(|e| RestoreError::runtime("disable truncation", e))?;
        inner.with_padding(None);
        let framing = match (inner.token_to_id("[CLS]"), inner.token_to_id("[SEP]")) {
            (Some(cls_id), Some(sep_id)) => Some(Framing { cls_id, sep_id }),
            _ => None,
        };
        Ok(Self { inner, framing })
    }
}

impl Tokenizer for HfTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenizedQuery, RestoreError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| RestoreError::runtime("tokenize", e))?;
        let spans = group_whitespace_words(text, encoding.get_offsets());

        let mut words = Vec::with_capacity(spans.len());
        let mut label_positions = Vec::with_capacity(spans.len());
        for (first_token, start, end) in spans {
            let word = text.get(start..end).ok_or_else(|| {
                RestoreError::invalid_input(format!(
                    "token offsets {start}..{end} do not fall on character boundaries"
                ))
            })?;
            words.push(word.to_string());
            label_positions.push(first_token);
        }
        TokenizedQuery::new(encoding.get_ids().to_vec(), words, label_positions)
    }

    fn framing_tokens(&self) -> Option<Framing> {
        self.framing
    }
}

/// Merges consecutive token byte spans not separated by whitespace into
/// `(first_token, start, end)` word spans.
fn group_whitespace_words(text: &str, offsets: &[(usize, usize)]) -> Vec<(usize, usize, usize)> {
    let mut words: Vec<(usize, usize, usize)> = Vec::new();
    for (idx, &(start, end)) in offsets.iter().enumerate() {
        let continues = match words.last() {
            Some(&(_, _, prev_end)) => text
                .get(prev_end.min(start)..start)
                .is_some_and(|gap| !gap.chars().any(char::is_whitespace)),
            None => false,
        };
        match words.last_mut() {
            Some(word) if continues => word.2 = word.2.max(end),
            _ => words.push((idx, start, end)),
        }
    }
    words
}
