//! Symbolic Training Configuration
//!
//! Builds the model config from CLI arguments, resolves gradient
//! accumulation and prints the configuration banner.

use std::io::Write;

use anyhow::Result;
use symbolic_engine::{ModelVariant, SymbolicConfig};

use crate::tokenizer::SymbolicTokenizer;
use crate::train::args::{Preset, TrainArgs};

pub fn get_preset_config(preset: Preset) -> SymbolicConfig {
    match preset {
        Preset::Tiny => SymbolicConfig::tiny(),
        Preset::Small => SymbolicConfig::small(),
        Preset::Medium => SymbolicConfig::medium(),
        Preset::Large => SymbolicConfig::large(),
        Preset::Character => SymbolicConfig::character(),
    }
}

/// Preset first, then every override present on the command line.
///
/// Reconstruction wins over standard norm when both are requested.
pub fn create_symbolic_config(args: &TrainArgs) -> Result<SymbolicConfig> {
    let mut config = get_preset_config(args.preset);

    config.model_variant = if args.use_reconstruction {
        ModelVariant::SymbolicReconstruct
    } else if args.use_standard_norm {
        ModelVariant::SymbolicStandardNorm
    } else {
        ModelVariant::Symbolic
    };

    if let Some(v) = args.block_size {
        config.block_size = v;
    }
    if let Some(v) = args.max_position_embeddings {
        config.max_position_embeddings = v;
    }
    if let Some(v) = args.n_layer {
        config.n_layer = v;
    }
    if let Some(v) = args.n_head {
        config.n_head = v;
    }
    if let Some(v) = args.n_embd {
        config.n_embd = v;
    }
    if let Some(v) = args.dropout {
        config.dropout = v;
    }
    if args.bias {
        config.bias = true;
    }
    if let Some(v) = args.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = args.learning_rate {
        config.learning_rate = v;
    }

    config.use_symbolic_ffn = args.use_symbolic_ffn();
    config.use_vocab_refinement = args.use_vocab_refinement;
    config.use_v = args.use_v;
    config.use_proj = args.use_proj;

    config.num_epochs = args.num_epochs;
    config.weight_decay = args.weight_decay;
    config.generation_max_len = args.generation_max_len;
    config.temperature = args.temperature;
    config.top_k = args.top_k;

    if args.use_reconstruction {
        config.reconstruction_loss_weight = args.reconstruction_loss_weight;
    }

    config.validate()?;
    Ok(config)
}

/// Fills in the derived vocabulary size.
pub fn update_from_tokenizer(config: &mut SymbolicConfig, tokenizer: &SymbolicTokenizer) {
    config.vocab_size = tokenizer.vocab_size();
}

/// How mini-batches are grouped into parameter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulationPlan {
    pub mini_batch_size: usize,
    pub steps: usize,
    pub effective_batch_size: usize,
    /// The requested effective size, when it could not be met exactly.
    pub requested: Option<usize>,
}

impl AccumulationPlan {
    /// `--effective-batch-size` takes precedence over
    /// `--gradient-accumulation-steps`.
    pub fn resolve(
        mini_batch_size: usize,
        accumulation_steps: usize,
        effective_batch_size: Option<usize>,
    ) -> Self {
        match effective_batch_size {
            Some(target) => {
                let steps = (target / mini_batch_size.max(1)).max(1);
                let effective = steps * mini_batch_size;
                Self {
                    mini_batch_size,
                    steps,
                    effective_batch_size: effective,
                    requested: (effective != target).then_some(target),
                }
            }
            None => {
                let steps = accumulation_steps.max(1);
                Self {
                    mini_batch_size,
                    steps,
                    effective_batch_size: steps * mini_batch_size,
                    requested: None,
                }
            }
        }
    }

    pub fn print(&self, out: &mut impl Write) -> std::io::Result<()> {
        if self.steps > 1 || self.requested.is_some() {
            writeln!(out, "Mini-batch size:           {}", self.mini_batch_size)?;
            writeln!(out, "Gradient accumulation:     {} steps", self.steps)?;
            writeln!(out, "Effective batch size:      {}", self.effective_batch_size)?;
            if let Some(requested) = self.requested {
                writeln!(out, "  (Adjusted from requested {})", requested)?;
            }
        } else {
            writeln!(
                out,
                "Batch size:                {} (no accumulation)",
                self.mini_batch_size
            )?;
        }
        Ok(())
    }
}

/// Prints the symbolic configuration banner.
pub fn print_config(
    config: &SymbolicConfig,
    dataset_name: &str,
    out: &mut impl Write,
) -> std::io::Result<()> {
    writeln!(out, "Model Type:                {}", config.model_variant.describe())?;
    writeln!(out, "Symbolic Constraints:      All internal states vocabulary-constrained")?;
    writeln!(out, "Use Symbolic FFN:          {}", config.use_symbolic_ffn)?;
    writeln!(out, "Use Vocab Refinement:      {}", config.use_vocab_refinement)?;
    writeln!(out, "Use V Projection:          {}", config.use_v)?;
    writeln!(out, "Use Output Projection:     {}", config.use_proj)?;
    if config.model_variant == ModelVariant::SymbolicReconstruct {
        writeln!(
            out,
            "Reconstruction Weight:     {}",
            config.reconstruction_loss_weight
        )?;
    }
    writeln!(out, "Dataset:                   {}", dataset_name)?;
    writeln!(out, "Vocab Size:                {}", config.vocab_size)?;
    writeln!(out, "Layers / Heads / Embd:     {} / {} / {}", config.n_layer, config.n_head, config.n_embd)?;
    writeln!(out, "Block Size:                {}", config.block_size)?;
    writeln!(out, "Max Position Embeddings:   {}", config.max_position_embeddings)?;
    writeln!(out, "Dropout:                   {}", config.dropout)?;
    writeln!(out, "Bias:                      {}", config.bias)?;
    writeln!(out, "Learning Rate:             {}", config.learning_rate)?;
    writeln!(out, "Weight Decay:              {}", config.weight_decay)?;
    writeln!(out, "Epochs:                    {}", config.num_epochs)?;
    Ok(())
}
