use candle_core::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;

use crate::config::{BertModelConfig, PunctuatorConfig};
use crate::error::RestoreError;
use crate::model::bert::BertForTokenClassification;
use crate::pipeline::traits::TokenClassifier;
use crate::types::ProbabilityVector;

/// BERT token classifier evaluated with Candle.
pub(crate) struct CandleTokenClassifier {
    model: BertForTokenClassification,
    device: Device,
    num_labels: usize,
    pad_id: u32,
    max_positions: usize,
}

impl CandleTokenClassifier {
    pub(crate) fn load(
        config: &PunctuatorConfig,
        model_cfg: &BertModelConfig,
    ) -> Result<Self, RestoreError> {
        let device = select_device(&config.device)?;
        let model_data = std::fs::read(&config.model_path)
            .map_err(|e| RestoreError::io("read safetensors", e))?;
        let vb = VarBuilder::from_buffered_safetensors(model_data, DType::F32, &device)
            .map_err(|e| RestoreError::runtime("load safetensors", e))?;
        let classifier = Self::from_var_builder(model_cfg, vb, device)?;

        tracing::info!(
            hidden_size = model_cfg.hidden_size,
            layers = model_cfg.num_hidden_layers,
            labels = model_cfg.num_labels(),
            device = ?classifier.device,
            "BERT token classifier loaded"
        );
        Ok(classifier)
    }

    pub(crate) fn from_var_builder(
        model_cfg: &BertModelConfig,
        vb: VarBuilder,
        device: Device,
    ) -> Result<Self, RestoreError> {
        if model_cfg.num_labels() == 0 {
            return Err(RestoreError::invalid_input(
                "model config has an empty id2label map",
            ));
        }
        let model = BertForTokenClassification::load(model_cfg, vb)
            .map_err(|e| RestoreError::runtime("build model", e))?;
        Ok(Self {
            model,
            device,
            num_labels: model_cfg.num_labels(),
            pad_id: model_cfg.pad_token_id,
            max_positions: model_cfg.max_position_embeddings,
        })
    }
}

/// `auto` prefers CUDA, then Metal, and falls back to CPU when neither is
/// compiled in or available.
fn select_device(name: &str) -> Result<Device, RestoreError> {
    match name {
        "auto" => {
            let device = Device::cuda_if_available(0)
                .map_err(|e| RestoreError::runtime("CUDA detection", e))?;
            if device.is_cpu() {
                Device::metal_if_available(0).map_err(|e| RestoreError::runtime("Metal detection", e))
            } else {
                Ok(device)
            }
        }
        "cuda" => Device::new_cuda(0).map_err(|e| RestoreError::runtime("CUDA init", e)),
        "metal" => Device::new_metal(0).map_err(|e| RestoreError::runtime("Metal init", e)),
        _ => Ok(Device::Cpu),
    }
}

impl TokenClassifier for CandleTokenClassifier {
    fn predict(&self, batch: &[&[u32]]) -> Result<Vec<Vec<ProbabilityVector>>, RestoreError> {
        let max_len = batch.iter().map(|s| s.len()).max().unwrap_or(0);
        if max_len == 0 {
            return Ok(vec![Vec::new(); batch.len()]);
        }
        if max_len > self.max_positions {
            return Err(RestoreError::invalid_input(format!(
                "sequence of {max_len} tokens exceeds the model's {} positions",
                self.max_positions
            )));
        }

        // Right-pad to the longest sequence; the mask hides padding.
        let mut ids = Vec::with_capacity(batch.len() * max_len);
        let mut mask = Vec::with_capacity(batch.len() * max_len);
        for seq in batch {
            ids.extend_from_slice(seq);
            ids.extend(std::iter::repeat(self.pad_id).take(max_len - seq.len()));
            mask.extend(std::iter::repeat(1f32).take(seq.len()));
            mask.extend(std::iter::repeat(0f32).take(max_len - seq.len()));
        }
        let shape = (batch.len(), max_len);
        let ids = Tensor::from_vec(ids, shape, &self.device)
            .map_err(|e| RestoreError::runtime("input tensor creation", e))?;
        let mask = Tensor::from_vec(mask, shape, &self.device)
            .map_err(|e| RestoreError::runtime("mask tensor creation", e))?;

        let logits = self
            .model
            .forward(&ids, &mask)
            .map_err(|e| RestoreError::runtime("forward pass", e))?;
        let probs: Vec<Vec<Vec<f32>>> = candle_nn::ops::softmax(&logits, D::Minus1)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec3())
            .map_err(|e| RestoreError::runtime("softmax", e))?;

        probs
            .into_iter()
            .zip(batch)
            .map(|(rows, seq)| {
                rows.into_iter()
                    .take(seq.len())
                    .map(ProbabilityVector::new)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect()
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn tiny_config(num_labels: usize) -> BertModelConfig {
        let id2label: BTreeMap<String, String> = (0..num_labels)
            .map(|i| (i.to_string(), if i == 0 { "O".to_string() } else { ",".to_string() }))
            .collect();
        BertModelConfig {
            vocab_size: 16,
            hidden_size: 8,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 16,
            max_position_embeddings: 8,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
            pad_token_id: 0,
            id2label,
        }
    }

    fn zero_classifier(num_labels: usize) -> CandleTokenClassifier {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        CandleTokenClassifier::from_var_builder(&tiny_config(num_labels), vb, Device::Cpu)
            .expect("zero-initialized model builds")
    }

    #[test]
    fn predict_strips_padding_per_sequence() {
        let classifier = zero_classifier(3);
        let first: &[u32] = &[1, 2, 3];
        let second: &[u32] = &[4];
        let out = classifier.predict(&[first, second]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 3);
        assert_eq!(out[1].len(), 1);
        // Zero weights give uniform probabilities.
        for p in out[0][0].as_slice() {
            assert!((p - 1.0 / 3.0).abs() < 1e-5);
        }
        assert_eq!(classifier.num_labels(), 3);
    }

    #[test]
    fn predict_rejects_sequences_longer_than_positions() {
        let classifier = zero_classifier(2);
        let long: &[u32] = &[1; 9];
        assert!(matches!(
            classifier.predict(&[long]),
            Err(RestoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn empty_batch_entries_produce_empty_outputs() {
        let classifier = zero_classifier(2);
        let empty: &[u32] = &[];
        let out = classifier.predict(&[empty]).unwrap();
        assert_eq!(out, vec![Vec::<ProbabilityVector>::new()]);
    }

    #[test]
    fn empty_label_map_is_rejected() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(
            CandleTokenClassifier::from_var_builder(&tiny_config(0), vb, Device::Cpu).is_err()
        );
    }

    #[test]
    fn unknown_device_names_fall_back_to_cpu() {
        assert!(matches!(select_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(select_device("tpu").unwrap(), Device::Cpu));
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    #[test]
    fn auto_device_is_cpu_without_accelerator_features() {
        assert!(matches!(select_device("auto").unwrap(), Device::Cpu));
    }
}
