use std::path::Path;

use crate::config::{BertModelConfig, PunctuatorConfig, RestoreConfig};
use crate::error::RestoreError;
use crate::labels::LabelSet;
use crate::pipeline::defaults::HfTokenizer;
use crate::pipeline::model_runtime::CandleTokenClassifier;
use crate::pipeline::runtime::{resolve_framing, Punctuator, PunctuatorParts};
use crate::pipeline::traits::{TokenClassifier, Tokenizer};

pub struct PunctuatorBuilder {
    config: PunctuatorConfig,
    restore_config: RestoreConfig,
    tokenizer: Option<Box<dyn Tokenizer>>,
    classifier: Option<Box<dyn TokenClassifier>>,
    label_set: Option<LabelSet>,
}

impl PunctuatorBuilder {
    pub fn new(config: PunctuatorConfig) -> Self {
        Self {
            config,
            restore_config: RestoreConfig::default(),
            tokenizer: None,
            classifier: None,
            label_set: None,
        }
    }

    pub fn with_restore_config(mut self, restore_config: RestoreConfig) -> Self {
        self.restore_config = restore_config;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn TokenClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_label_set(mut self, label_set: LabelSet) -> Self {
        self.label_set = Some(label_set);
        self
    }

    /// Loads whatever was not injected from the paths in [`PunctuatorConfig`]
    /// and checks that the parts agree with each other.
    pub fn build(self) -> Result<Punctuator, RestoreError> {
        self.restore_config.validate()?;

        let mut model_cfg = None;
        let label_set = match self.label_set {
            Some(label_set) => label_set,
            None => LabelSet::from_id2label(
                &cached_model_config(&self.config.config_path, &mut model_cfg)?.id2label,
            )?,
        };
        let classifier: Box<dyn TokenClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Box::new(CandleTokenClassifier::load(
                &self.config,
                cached_model_config(&self.config.config_path, &mut model_cfg)?,
            )?),
        };
        let tokenizer: Box<dyn Tokenizer> = match self.tokenizer {
            Some(tokenizer) => tokenizer,
            None => Box::new(HfTokenizer::from_file(&self.config.tokenizer_path)?),
        };

        if classifier.num_labels() != label_set.len() {
            return Err(RestoreError::configuration(format!(
                "classifier predicts {} classes but the label set has {} labels",
                classifier.num_labels(),
                label_set.len()
            )));
        }
        resolve_framing(&self.restore_config, tokenizer.framing_tokens())?;

        Ok(Punctuator::from_parts(PunctuatorParts {
            tokenizer,
            classifier,
            label_set,
            restore_config: self.restore_config,
        }))
    }
}

fn cached_model_config<'a>(
    path: &str,
    slot: &'a mut Option<BertModelConfig>,
) -> Result<&'a BertModelConfig, RestoreError> {
    let cfg = match slot.take() {
        Some(cfg) => cfg,
        None => BertModelConfig::load(Path::new(path))?,
    };
    Ok(slot.insert(cfg))
}
