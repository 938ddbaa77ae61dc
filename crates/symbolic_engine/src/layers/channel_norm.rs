//! Channel-wise LayerNorm - Normalization that preserves head structure

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::VarBuilder;

/// Epsilon for layer normalization
pub const LAYER_NORM_EPS: f64 = 1e-5;

/// Normalizes each head's `d / n_head` slice of the hidden vector on its own,
/// so one channel's statistics never leak into another's.
pub struct ChannelLayerNorm {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    pub n_head: usize,
    pub eps: f64,
}

impl ChannelLayerNorm {
    pub fn load(dim: usize, n_head: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints((dim,), "weight", candle_nn::Init::Const(1.0))?;
        let bias = if bias {
            Some(vb.get_with_hints((dim,), "bias", candle_nn::Init::Const(0.0))?)
        } else {
            None
        };
        Ok(Self {
            weight,
            bias,
            n_head,
            eps: LAYER_NORM_EPS,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x_dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;
        let dims = x.dims().to_vec();
        let dim = *dims.last().unwrap_or(&0);
        let head_dim = dim / self.n_head;

        let mut split = dims[..dims.len() - 1].to_vec();
        split.push(self.n_head);
        split.push(head_dim);
        let xs = x.reshape(split)?;

        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        let normed = normed.reshape(dims)?;

        let mut out = normed.broadcast_mul(&self.weight.to_dtype(DType::F32)?)?;
        if let Some(bias) = &self.bias {
            out = out.broadcast_add(&bias.to_dtype(DType::F32)?)?;
        }
        out.to_dtype(x_dtype)
    }
}

/// Normalization used inside blocks: channel-wise by default, standard
/// LayerNorm for the comparison variant.
pub enum Norm {
    Channel(ChannelLayerNorm),
    Standard(candle_nn::LayerNorm),
}

impl Norm {
    pub fn load(
        dim: usize,
        n_head: usize,
        bias: bool,
        channel_wise: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if channel_wise {
            return Ok(Norm::Channel(ChannelLayerNorm::load(dim, n_head, bias, vb)?));
        }
        let config = candle_nn::LayerNormConfig {
            eps: LAYER_NORM_EPS,
            remove_mean: true,
            affine: true,
        };
        Ok(Norm::Standard(candle_nn::layer_norm(dim, config, vb)?))
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Norm::Channel(norm) => norm.forward(x),
            Norm::Standard(norm) => norm.forward(x),
        }
    }
}
