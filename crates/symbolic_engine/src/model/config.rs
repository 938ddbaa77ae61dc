//! SymbolicConfig - Model and training hyperparameters

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Which flavour of the symbolic transformer to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModelVariant {
    /// Channel-wise layer norm (default).
    #[default]
    Symbolic,
    /// Adds a reconstruction loss pulling the final hidden state onto the
    /// vocabulary manifold.
    SymbolicReconstruct,
    /// Standard LayerNorm instead of the channel-wise one.
    SymbolicStandardNorm,
}

impl ModelVariant {
    pub fn describe(&self) -> &'static str {
        match self {
            ModelVariant::Symbolic => "Symbolic Transformer (Channel-wise LayerNorm)",
            ModelVariant::SymbolicReconstruct => {
                "Symbolic Transformer (with reconstruction loss)"
            }
            ModelVariant::SymbolicStandardNorm => "Symbolic Transformer (Standard LayerNorm)",
        }
    }
}

/// Flat record of model and training hyperparameters.
///
/// `vocab_size` is derived: it is filled in from the tokenizer before the
/// model is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolicConfig {
    pub model_variant: ModelVariant,
    pub vocab_size: usize,
    pub block_size: usize,
    pub max_position_embeddings: usize,
    pub n_layer: usize,
    pub n_head: usize,
    pub n_embd: usize,
    pub dropout: f32,
    pub bias: bool,

    pub use_symbolic_ffn: bool,
    pub use_vocab_refinement: bool,
    pub use_v: bool,
    pub use_proj: bool,
    pub reconstruction_loss_weight: f64,

    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub num_epochs: usize,

    pub generation_max_len: usize,
    pub temperature: f64,
    pub top_k: usize,
}

impl Default for SymbolicConfig {
    fn default() -> Self {
        Self::small()
    }
}

impl SymbolicConfig {
    fn base(n_layer: usize, n_head: usize, n_embd: usize, block_size: usize) -> Self {
        Self {
            model_variant: ModelVariant::Symbolic,
            vocab_size: 0,
            block_size,
            max_position_embeddings: block_size * 4,
            n_layer,
            n_head,
            n_embd,
            dropout: 0.1,
            bias: false,
            use_symbolic_ffn: true,
            use_vocab_refinement: false,
            use_v: false,
            use_proj: false,
            reconstruction_loss_weight: 1.0,
            batch_size: 32,
            learning_rate: 3e-4,
            weight_decay: 0.01,
            num_epochs: 5,
            generation_max_len: 30,
            temperature: 0.5,
            top_k: 20,
        }
    }

    pub fn tiny() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 5e-4,
            ..Self::base(2, 2, 128, 128)
        }
    }

    pub fn small() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 3e-4,
            ..Self::base(6, 6, 384, 128)
        }
    }

    pub fn medium() -> Self {
        Self {
            batch_size: 16,
            learning_rate: 2.5e-4,
            ..Self::base(12, 12, 768, 256)
        }
    }

    pub fn large() -> Self {
        Self {
            batch_size: 8,
            learning_rate: 1.5e-4,
            ..Self::base(24, 16, 1024, 512)
        }
    }

    /// Character-level model: longer context, larger batches.
    pub fn character() -> Self {
        Self {
            batch_size: 64,
            learning_rate: 1e-3,
            dropout: 0.2,
            ..Self::base(6, 6, 384, 256)
        }
    }

    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Rough parameter count (embedding + attention + FFN), used for logging
    /// before the model exists.
    pub fn estimate_params(&self) -> usize {
        let d = self.n_embd;
        let attn = 2 * d * d
            + if self.use_v { d * d } else { 0 }
            + if self.use_proj { d * d } else { 0 };
        let ffn = if self.use_symbolic_ffn {
            d * 4 * d + 4 * d * self.vocab_size
        } else {
            2 * d * 4 * d
        };
        self.vocab_size * d + self.n_layer * (attn + ffn + 2 * d) + d
    }

    /// Checks the invariants the model relies on.
    pub fn validate(&self) -> Result<()> {
        if self.n_layer == 0 || self.n_head == 0 || self.n_embd == 0 {
            bail!(
                "n_layer, n_head and n_embd must be non-zero (got {}, {}, {})",
                self.n_layer,
                self.n_head,
                self.n_embd
            );
        }
        if self.n_embd % self.n_head != 0 {
            bail!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd,
                self.n_head
            );
        }
        if self.block_size == 0 {
            bail!("block_size must be non-zero");
        }
        if self.max_position_embeddings < self.block_size {
            bail!(
                "max_position_embeddings ({}) must be at least block_size ({})",
                self.max_position_embeddings,
                self.block_size
            );
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout must be in [0, 1), got {}", self.dropout);
        }
        if self.batch_size == 0 {
            bail!("batch_size must be non-zero");
        }
        if self.learning_rate <= 0.0 {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if self.reconstruction_loss_weight < 0.0 {
            bail!(
                "reconstruction_loss_weight must be non-negative, got {}",
                self.reconstruction_loss_weight
            );
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), plus a vocabulary must be known.
    pub fn validate_for_model(&self) -> Result<()> {
        self.validate()?;
        if self.vocab_size == 0 {
            bail!("vocab_size is 0: update the config from the tokenizer first");
        }
        Ok(())
    }
}
