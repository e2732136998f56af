use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

pub(crate) struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub(crate) fn load(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        let weight = vb.get(size, "weight")?;
        let bias = vb.get(size, "bias")?;
        Ok(Self { weight, bias, eps })
    }

    pub(crate) fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.weight.dim(0)? as f64;
        let mean = (x.sum_keepdim(D::Minus1)? / hidden)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

pub(crate) fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<LayerNorm> {
    LayerNorm::load(size, eps, vb)
}

/// Turns a `(batch, seq)` mask of ones and zeros into an additive
/// `(batch, 1, 1, seq)` bias for attention scores.
pub(crate) fn additive_attention_mask(mask: &Tensor) -> candle_core::Result<Tensor> {
    mask.affine(10_000.0, -10_000.0)?.unsqueeze(1)?.unsqueeze(1)
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;

    #[test]
    fn layer_norm_centers_and_scales() {
        let ln = LayerNorm {
            weight: Tensor::ones(4, DType::F32, &Device::Cpu).unwrap(),
            bias: Tensor::zeros(4, DType::F32, &Device::Cpu).unwrap(),
            eps: 1e-12,
        };
        let x = Tensor::new(&[[1f32, 2.0, 3.0, 4.0]], &Device::Cpu).unwrap();
        let y: Vec<Vec<f32>> = ln.forward(&x).unwrap().to_vec2().unwrap();
        let mean: f32 = y[0].iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!(y[0][0] < 0.0 && y[0][3] > 0.0);
    }

    #[test]
    fn padding_positions_get_large_negative_bias() {
        let mask = Tensor::new(&[[1f32, 1.0, 0.0]], &Device::Cpu).unwrap();
        let bias = additive_attention_mask(&mask).unwrap();
        assert_eq!(bias.dims(), &[1, 1, 1, 3]);
        let flat: Vec<f32> = bias.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(flat, vec![0.0, 0.0, -10_000.0]);
    }
}
