//! Feed-forward blocks

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_b, ops::softmax_last_dim, Dropout, Linear, VarBuilder};

use super::TensorExt;

/// Vocabulary-grounded FFN.
///
/// The hidden activation is turned into a distribution over the vocabulary
/// and the output is the matching mixture of vocabulary embeddings.
pub struct VocabFfn {
    pub up: Linear,
    pub to_vocab: Linear,
    pub dropout: Dropout,
}

impl VocabFfn {
    pub fn load(
        n_embd: usize,
        vocab_size: usize,
        bias: bool,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let up = linear_b(n_embd, 4 * n_embd, bias, vb.pp("up_proj"))?;
        let to_vocab = linear_b(4 * n_embd, vocab_size, bias, vb.pp("vocab_proj"))?;
        Ok(Self {
            up,
            to_vocab,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, vocab_emb: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.up.forward(x)?.gelu()?;
        let weights = softmax_last_dim(&self.to_vocab.forward(&hidden)?)?;
        let out = weights.matmul_robust(vocab_emb)?;
        self.dropout.forward(&out, train)
    }
}

/// Plain GELU MLP, used when the symbolic FFN is disabled.
pub struct StandardMlp {
    pub up: Linear,
    pub down: Linear,
    pub dropout: Dropout,
}

impl StandardMlp {
    pub fn load(n_embd: usize, bias: bool, dropout: f32, vb: VarBuilder) -> Result<Self> {
        let up = linear_b(n_embd, 4 * n_embd, bias, vb.pp("up_proj"))?;
        let down = linear_b(4 * n_embd, n_embd, bias, vb.pp("down_proj"))?;
        Ok(Self {
            up,
            down,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let hidden = self.up.forward(x)?.gelu()?;
        self.dropout.forward(&self.down.forward(&hidden)?, train)
    }
}

pub enum FeedForward {
    Symbolic(VocabFfn),
    Standard(StandardMlp),
}

impl FeedForward {
    pub fn forward(&self, x: &Tensor, vocab_emb: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            FeedForward::Symbolic(ffn) => ffn.forward(x, vocab_emb, train),
            FeedForward::Standard(mlp) => mlp.forward(x, train),
        }
    }
}
