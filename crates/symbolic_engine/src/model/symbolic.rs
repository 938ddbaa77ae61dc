//! SymbolicTransformer - Full model implementation

use candle_core::{DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{Dropout, Embedding, VarBuilder};
use rand::Rng;

use crate::layers::{project_to_vocab, Norm, TensorExt};
use crate::model::{ModelVariant, SymbolicBlock, SymbolicConfig};
use crate::sampling::sample_token;

/// Standard deviation of the token embedding init
const EMBEDDING_INIT_STD: f64 = 0.02;

/// Token embedding, `n_layer` blocks, final norm and an LM head tied to the
/// embedding. There are no position embeddings: ALiBi handles order.
pub struct SymbolicTransformer {
    pub wte: Embedding,
    pub blocks: Vec<SymbolicBlock>,
    pub ln_f: Norm,
    pub dropout: Dropout,
    pub config: SymbolicConfig,
}

/// Output of a training forward pass.
pub struct ForwardOutput {
    pub logits: Tensor,
    pub loss: Tensor,
    /// Reconstruction term (already weighted), when the variant has one.
    pub reconstruction_loss: Option<Tensor>,
}

impl SymbolicTransformer {
    pub fn load(cfg: SymbolicConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate_for_model()
            .map_err(|e| candle_core::Error::Msg(e.to_string()))?;

        let weight = vb.pp("wte").get_with_hints(
            (cfg.vocab_size, cfg.n_embd),
            "weight",
            candle_nn::Init::Randn {
                mean: 0.0,
                stdev: EMBEDDING_INIT_STD,
            },
        )?;
        let wte = Embedding::new(weight, cfg.n_embd);

        let mut blocks = Vec::with_capacity(cfg.n_layer);
        for i in 0..cfg.n_layer {
            blocks.push(SymbolicBlock::load(&cfg, vb.pp(format!("blocks.{i}")))?);
        }

        let channel_wise = cfg.model_variant != ModelVariant::SymbolicStandardNorm;
        let ln_f = Norm::load(cfg.n_embd, cfg.n_head, cfg.bias, channel_wise, vb.pp("ln_f"))?;
        tracing::debug!(
            "Loaded {:?}: {} layers, {} heads, n_embd {}, vocab {}",
            cfg.model_variant,
            cfg.n_layer,
            cfg.n_head,
            cfg.n_embd,
            cfg.vocab_size
        );

        Ok(Self {
            wte,
            blocks,
            ln_f,
            dropout: Dropout::new(cfg.dropout),
            config: cfg,
        })
    }

    pub fn device(&self) -> &Device {
        self.wte.embeddings().device()
    }

    /// Vocabulary embedding matrix `[vocab, n_embd]`.
    pub fn vocab_embeddings(&self) -> &Tensor {
        self.wte.embeddings()
    }

    /// `idx: [batch, seq]` (u32) → (final hidden state, logits).
    fn forward_hidden(&self, idx: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let vocab_emb = self.wte.embeddings();
        let mut x = self.wte.forward(idx)?;
        x = self.dropout.forward(&x, train)?;
        for block in &self.blocks {
            x = block.forward(&x, vocab_emb, train)?;
        }
        let hidden = self.ln_f.forward(&x)?;
        let logits = hidden.matmul_robust(&vocab_emb.t()?)?;
        Ok((hidden, logits))
    }

    /// Inference forward pass: logits `[batch, seq, vocab]`.
    pub fn forward(&self, idx: &Tensor) -> Result<Tensor> {
        let (_, logits) = self.forward_hidden(idx, false)?;
        Ok(logits)
    }

    /// Forward pass with cross-entropy against `targets: [batch, seq]`.
    ///
    /// The reconstruct variant adds `weight * MSE(h, project_to_vocab(h))`.
    pub fn forward_with_loss(
        &self,
        idx: &Tensor,
        targets: &Tensor,
        train: bool,
    ) -> Result<ForwardOutput> {
        let (hidden, logits) = self.forward_hidden(idx, train)?;
        let (b, t, v) = logits.dims3()?;
        let logits_flat = logits.reshape((b * t, v))?;
        let targets_flat = targets.reshape(b * t)?.to_dtype(DType::U32)?;
        let ce = candle_nn::loss::cross_entropy(&logits_flat, &targets_flat)?;

        if self.config.model_variant != ModelVariant::SymbolicReconstruct {
            return Ok(ForwardOutput {
                logits,
                loss: ce,
                reconstruction_loss: None,
            });
        }

        let projected = project_to_vocab(&hidden, self.wte.embeddings())?;
        let recon = (hidden - projected)?.sqr()?.mean_all()?;
        let recon = (recon * self.config.reconstruction_loss_weight)?;
        let loss = (&ce + &recon)?;
        Ok(ForwardOutput {
            logits,
            loss,
            reconstruction_loss: Some(recon),
        })
    }

    /// Autoregressive generation. Returns the prompt followed by
    /// `max_new_tokens` sampled tokens.
    ///
    /// The context is cropped to `max_position_embeddings`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        prompt: &[u32],
        max_new_tokens: usize,
        temperature: f64,
        top_k: usize,
        rng: &mut R,
    ) -> Result<Vec<u32>> {
        if prompt.is_empty() {
            candle_core::bail!("generation needs at least one prompt token");
        }
        let device = self.device().clone();
        let mut tokens = prompt.to_vec();

        for _ in 0..max_new_tokens {
            let start = tokens
                .len()
                .saturating_sub(self.config.max_position_embeddings);
            let context = &tokens[start..];
            let input = Tensor::new(context, &device)?.unsqueeze(0)?;
            let logits = self.forward(&input)?;
            let last: Vec<f32> = logits
                .i((0, context.len() - 1))?
                .to_dtype(DType::F32)?
                .to_vec1()?;
            tokens.push(sample_token(&last, temperature, top_k, rng)?);
        }
        Ok(tokens)
    }
}
