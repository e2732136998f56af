use candle_core::{Module, Tensor, D};
use candle_nn::{Embedding, Linear, VarBuilder};

use crate::config::BertModelConfig;
use crate::model::layers::{additive_attention_mask, layer_norm, LayerNorm};

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    layer_norm: LayerNorm,
}

impl Embeddings {
    fn load(cfg: &BertModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            word: candle_nn::embedding(cfg.vocab_size, cfg.hidden_size, vb.pp("word_embeddings"))?,
            position: candle_nn::embedding(
                cfg.max_position_embeddings,
                cfg.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type: candle_nn::embedding(
                cfg.type_vocab_size,
                cfg.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        let (_, t) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, t as u32, input_ids.device())?;
        let token_types = input_ids.zeros_like()?;
        let h = self
            .word
            .forward(input_ids)?
            .broadcast_add(&self.position.forward(&positions)?)?;
        let h = (h + self.token_type.forward(&token_types)?)?;
        self.layer_norm.forward(&h)
    }
}

struct SelfAttention {
    q: Linear,
    k: Linear,
    v: Linear,
    out: Linear,
    out_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl SelfAttention {
    fn load(cfg: &BertModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let hd = cfg.hidden_size / cfg.num_attention_heads;
        let attn = vb.pp("self");
        let output = vb.pp("output");
        Ok(Self {
            q: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, attn.pp("query"))?,
            k: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, attn.pp("key"))?,
            v: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, attn.pp("value"))?,
            out: candle_nn::linear(cfg.hidden_size, cfg.hidden_size, output.pp("dense"))?,
            out_norm: layer_norm(cfg.hidden_size, cfg.layer_norm_eps, output.pp("LayerNorm"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: hd,
            scale: (hd as f64).powf(-0.5),
        })
    }

    /// Post-norm block: `ln(x + out(attn(x)))`.
    fn forward(&self, xs: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        let reshape = |x: Tensor| {
            x.reshape((b, t, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };

        let q = reshape((self.q.forward(xs)? * self.scale)?)?;
        let k = reshape(self.k.forward(xs)?)?;
        let v = reshape(self.v.forward(xs)?)?;

        let scores = q
            .matmul(&k.transpose(2, 3)?.contiguous()?)?
            .broadcast_add(mask)?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let ctx = attn.matmul(&v)?.transpose(1, 2)?.contiguous()?.reshape((
            b,
            t,
            self.num_heads * self.head_dim,
        ))?;
        self.out_norm.forward(&(xs + self.out.forward(&ctx)?)?)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
    norm: LayerNorm,
}

impl FeedForward {
    fn load(cfg: &BertModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            up: candle_nn::linear(
                cfg.hidden_size,
                cfg.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            down: candle_nn::linear(
                cfg.intermediate_size,
                cfg.hidden_size,
                vb.pp("output").pp("dense"),
            )?,
            norm: layer_norm(
                cfg.hidden_size,
                cfg.layer_norm_eps,
                vb.pp("output").pp("LayerNorm"),
            )?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.down.forward(&self.up.forward(xs)?.gelu_erf()?)?;
        self.norm.forward(&(xs + h)?)
    }
}

struct EncoderLayer {
    attn: SelfAttention,
    ff: FeedForward,
}

impl EncoderLayer {
    fn load(cfg: &BertModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            attn: SelfAttention::load(cfg, vb.pp("attention"))?,
            ff: FeedForward::load(cfg, vb)?,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        self.ff.forward(&self.attn.forward(xs, mask)?)
    }
}

/// BERT encoder with a linear per-token classification head, laid out like
/// Hugging Face `BertForTokenClassification` checkpoints.
pub(crate) struct BertForTokenClassification {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    classifier: Linear,
}

impl BertForTokenClassification {
    pub(crate) fn load(cfg: &BertModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let bert = vb.pp("bert");
        let mut layers = Vec::with_capacity(cfg.num_hidden_layers);
        for i in 0..cfg.num_hidden_layers {
            layers.push(EncoderLayer::load(cfg, bert.pp(format!("encoder.layer.{i}")))?);
        }
        Ok(Self {
            embeddings: Embeddings::load(cfg, bert.pp("embeddings"))?,
            layers,
            classifier: candle_nn::linear(cfg.hidden_size, cfg.num_labels(), vb.pp("classifier"))?,
        })
    }

    /// `input_ids` is `(batch, seq)` u32, `attention_mask` `(batch, seq)` f32
    /// ones for real tokens. Returns `(batch, seq, num_labels)` logits.
    pub(crate) fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let mask = additive_attention_mask(attention_mask)?;
        let mut h = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            h = layer.forward(&h, &mask)?;
        }
        self.classifier.forward(&h)
    }
}
