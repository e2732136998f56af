use std::collections::BTreeMap;
use std::path::Path;

use crate::error::RestoreError;

/// Locations of the default Candle model and tokenizer.
#[derive(Debug, Clone)]
pub struct PunctuatorConfig {
    pub model_path: String,
    pub config_path: String,
    pub tokenizer_path: String,
    pub device: String,
}

impl Default for PunctuatorConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            config_path: String::new(),
            tokenizer_path: String::new(),
            device: "auto".to_string(),
        }
    }
}

/// Windowing parameters for one `restore` call.
///
/// `max_length` counts the `[CLS]`/`[SEP]` framing tokens when
/// `add_cls_and_sep_tokens` is set, so segments carry `max_length - 2`
/// content tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreConfig {
    pub max_length: usize,
    pub step: usize,
    pub margin: usize,
    pub batch_size: usize,
    pub add_cls_and_sep_tokens: bool,
}

impl RestoreConfig {
    pub const DEFAULT_MAX_LENGTH: usize = 64;
    pub const DEFAULT_STEP: usize = 8;
    pub const DEFAULT_MARGIN: usize = 16;
    pub const DEFAULT_BATCH_SIZE: usize = 128;

    pub fn framing_len(&self) -> usize {
        if self.add_cls_and_sep_tokens {
            2
        } else {
            0
        }
    }

    /// Content tokens per segment once framing is removed.
    pub fn window_length(&self) -> usize {
        self.max_length.saturating_sub(self.framing_len())
    }

    /// Checks every parameter combination up front and returns the content
    /// window length. Every token keeps at least one unmasked output only if
    /// `step + 2 * margin <= window_length`.
    pub fn validate(&self) -> Result<usize, RestoreError> {
        if self.batch_size == 0 {
            return Err(RestoreError::configuration("batch_size must be >= 1"));
        }
        let window = self.window_length();
        if window == 0 {
            return Err(RestoreError::configuration(format!(
                "max_length {} leaves no room for content tokens (framing uses {})",
                self.max_length,
                self.framing_len()
            )));
        }
        if self.step == 0 {
            return Err(RestoreError::configuration("step must be >= 1"));
        }
        if self.step > window {
            return Err(RestoreError::configuration(format!(
                "step {} exceeds segment length {window}",
                self.step
            )));
        }
        let discarded = self
            .margin
            .checked_mul(2)
            .and_then(|m| m.checked_add(self.step))
            .unwrap_or(usize::MAX);
        if discarded > window {
            return Err(RestoreError::configuration(format!(
                "step {} with margin {} would leave tokens uncovered: \
                 step + 2 * margin must be <= segment length {window}",
                self.step, self.margin
            )));
        }
        Ok(window)
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            max_length: Self::DEFAULT_MAX_LENGTH,
            step: Self::DEFAULT_STEP,
            margin: Self::DEFAULT_MARGIN,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            add_cls_and_sep_tokens: true,
        }
    }
}

/// Subset of a Hugging Face BERT token-classification `config.json`.
#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct BertModelConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default)]
    pub id2label: BTreeMap<String, String>,
}

fn default_max_position_embeddings() -> usize {
    512
}
fn default_type_vocab_size() -> usize {
    2
}
fn default_eps() -> f64 {
    1e-12
}

impl BertModelConfig {
    pub(crate) fn load(path: &Path) -> Result<Self, RestoreError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| RestoreError::io("read config.json", e))?;
        serde_json::from_str(&data).map_err(|e| RestoreError::json("parse config.json", e))
    }

    pub(crate) fn num_labels(&self) -> usize {
        self.id2label.len()
    }
}
