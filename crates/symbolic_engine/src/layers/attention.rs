//! SymbolicAttention - Causal multi-head attention with ALiBi

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_b, ops::softmax_last_dim, Dropout, Linear, VarBuilder};

use super::{alibi_bias, alibi_slopes, project_to_vocab};

/// Multi-head causal attention.
///
/// Queries and keys are learned projections. Values are the (normalized)
/// input itself unless `use_v` is set, and the head outputs are only mixed
/// by a learned matrix when `use_proj` is set; without either, the output
/// is a convex mixture of input vectors and stays on the vocabulary
/// manifold.
pub struct SymbolicAttention {
    pub q_proj: Linear,
    pub k_proj: Linear,
    pub v_proj: Option<Linear>,
    pub o_proj: Option<Linear>,
    pub n_head: usize,
    pub head_dim: usize,
    pub scaling: f64,
    pub slopes: Vec<f32>,
    pub vocab_refinement: bool,
    pub dropout: Dropout,
}

pub struct AttentionSettings {
    pub n_embd: usize,
    pub n_head: usize,
    pub bias: bool,
    pub use_v: bool,
    pub use_proj: bool,
    pub vocab_refinement: bool,
    pub dropout: f32,
}

impl SymbolicAttention {
    pub fn load(settings: &AttentionSettings, vb: VarBuilder) -> Result<Self> {
        let n_embd = settings.n_embd;
        let head_dim = n_embd / settings.n_head;
        let scaling = 1.0 / (head_dim as f64).sqrt();

        let q_proj = linear_b(n_embd, n_embd, settings.bias, vb.pp("q_proj"))?;
        let k_proj = linear_b(n_embd, n_embd, settings.bias, vb.pp("k_proj"))?;
        let v_proj = if settings.use_v {
            Some(linear_b(n_embd, n_embd, settings.bias, vb.pp("v_proj"))?)
        } else {
            None
        };
        let o_proj = if settings.use_proj {
            Some(linear_b(n_embd, n_embd, settings.bias, vb.pp("o_proj"))?)
        } else {
            None
        };

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_head: settings.n_head,
            head_dim,
            scaling,
            slopes: alibi_slopes(settings.n_head),
            vocab_refinement: settings.vocab_refinement,
            dropout: Dropout::new(settings.dropout),
        })
    }

    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        x.reshape((b, t, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// `x: [batch, seq, n_embd]`, `vocab_emb: [vocab, n_embd]`.
    pub fn forward(&self, x: &Tensor, vocab_emb: &Tensor, train: bool) -> Result<Tensor> {
        let (b, t, c) = x.dims3()?;

        let q = self.split_heads(&self.q_proj.forward(x)?)?;
        let k = self.split_heads(&self.k_proj.forward(x)?)?;
        let v = match &self.v_proj {
            Some(v_proj) => self.split_heads(&v_proj.forward(x)?)?,
            None => self.split_heads(x)?,
        };

        let scores = (q.matmul(&k.t()?.contiguous()?)? * self.scaling)?;
        let bias = alibi_bias(&self.slopes, t, x.device())?.to_dtype(scores.dtype())?;
        let scores = scores.broadcast_add(&bias)?;
        let weights = softmax_last_dim(&scores)?;
        let weights = self.dropout.forward(&weights, train)?;

        let y = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, c))?;

        let y = match &self.o_proj {
            Some(o_proj) => o_proj.forward(&y)?,
            None => y,
        };

        if self.vocab_refinement {
            project_to_vocab(&y, vocab_emb)
        } else {
            Ok(y)
        }
    }
}
