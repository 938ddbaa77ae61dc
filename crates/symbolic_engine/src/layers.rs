//! Layers Module - Building blocks of the symbolic transformer
//!
//! - ChannelLayerNorm: per-head normalization that keeps channel structure
//! - ALiBi: linear attention biases instead of position embeddings
//! - SymbolicAttention: causal attention with optional V/output projections
//! - FeedForward: vocabulary-grounded FFN or a plain GELU MLP

use candle_core::{Result, Tensor};

pub mod alibi;
pub mod attention;
pub mod channel_norm;
pub mod feed_forward;

pub use alibi::{alibi_bias, alibi_slopes};
pub use attention::SymbolicAttention;
pub use channel_norm::{ChannelLayerNorm, Norm};
pub use feed_forward::{FeedForward, StandardMlp, VocabFfn};

// --- Helper Trait for Robust Operations ---
pub(crate) trait TensorExt {
    /// `[.., in] x [in, out] -> [.., out]` for any rank of `self`.
    fn matmul_robust(&self, rhs: &Tensor) -> Result<Tensor>;
}

impl TensorExt for Tensor {
    fn matmul_robust(&self, rhs: &Tensor) -> Result<Tensor> {
        let lhs = self.contiguous()?;
        let rhs = rhs.contiguous()?;
        let lhs_rank = lhs.rank();

        if lhs_rank == 1 {
            lhs.unsqueeze(0)?.matmul(&rhs)?.squeeze(0)
        } else if lhs_rank == 2 {
            lhs.matmul(&rhs)
        } else {
            let flattened = lhs.flatten(0, lhs_rank - 2)?;
            let out = flattened.matmul(&rhs)?;
            let mut new_shape = lhs.dims()[..lhs_rank - 1].to_vec();
            new_shape.push(out.dim(1)?);
            out.reshape(new_shape)
        }
    }
}

/// Re-express `x` as a softmax mixture of the rows of `vocab_emb`.
///
/// `x: [.., d]`, `vocab_emb: [V, d]`. The result lies in the span of the
/// vocabulary embeddings, which is what keeps the model symbolic.
pub fn project_to_vocab(x: &Tensor, vocab_emb: &Tensor) -> Result<Tensor> {
    let dim = vocab_emb.dim(1)?;
    let scores = (x.matmul_robust(&vocab_emb.t()?)? / (dim as f64).sqrt())?;
    let weights = candle_nn::ops::softmax_last_dim(&scores)?;
    weights.matmul_robust(vocab_emb)
}
