//! SymbolicBlock - Transformer block with attention + FFN

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::layers::attention::AttentionSettings;
use crate::layers::{FeedForward, Norm, StandardMlp, SymbolicAttention, VocabFfn};
use crate::model::{ModelVariant, SymbolicConfig};

/// Single transformer block: attention + FFN with residual connections
pub struct SymbolicBlock {
    pub norm1: Norm,
    pub attn: SymbolicAttention,
    pub norm2: Norm,
    pub ffn: FeedForward,
}

impl SymbolicBlock {
    pub fn load(cfg: &SymbolicConfig, vb: VarBuilder) -> Result<Self> {
        let channel_wise = cfg.model_variant != ModelVariant::SymbolicStandardNorm;
        let norm1 = Norm::load(cfg.n_embd, cfg.n_head, cfg.bias, channel_wise, vb.pp("norm1"))?;
        let norm2 = Norm::load(cfg.n_embd, cfg.n_head, cfg.bias, channel_wise, vb.pp("norm2"))?;

        let settings = AttentionSettings {
            n_embd: cfg.n_embd,
            n_head: cfg.n_head,
            bias: cfg.bias,
            use_v: cfg.use_v,
            use_proj: cfg.use_proj,
            vocab_refinement: cfg.use_vocab_refinement,
            dropout: cfg.dropout,
        };
        let attn = SymbolicAttention::load(&settings, vb.pp("attn"))?;

        let ffn = if cfg.use_symbolic_ffn {
            FeedForward::Symbolic(VocabFfn::load(
                cfg.n_embd,
                cfg.vocab_size,
                cfg.bias,
                cfg.dropout,
                vb.pp("ffn"),
            )?)
        } else {
            FeedForward::Standard(StandardMlp::load(
                cfg.n_embd,
                cfg.bias,
                cfg.dropout,
                vb.pp("ffn"),
            )?)
        };

        Ok(Self {
            norm1,
            attn,
            norm2,
            ffn,
        })
    }

    pub fn forward(&self, x: &Tensor, vocab_emb: &Tensor, train: bool) -> Result<Tensor> {
        let residual = x;
        let x_norm = self.norm1.forward(x)?;
        let attn_out = self.attn.forward(&x_norm, vocab_emb, train)?;
        let x_mid = (residual + attn_out)?;

        let residual = &x_mid;
        let x_norm2 = self.norm2.forward(&x_mid)?;
        let ffn_out = self.ffn.forward(&x_norm2, vocab_emb, train)?;
        residual + ffn_out
    }
}
