//! Training Arguments - CLI configuration for training

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Tiny,
    #[default]
    Small,
    Medium,
    Large,
    Character,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerType {
    #[default]
    Gpt2,
    Character,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrainerType {
    #[default]
    Simple,
}

/// Train a symbolic transformer with ALiBi
#[derive(Parser, Debug, Clone, Serialize)]
#[command(author, version, about = "Train a symbolic transformer with ALiBi", long_about = None)]
pub struct TrainArgs {
    // --- Dataset ---
    /// Dataset file or directory (.txt, .jsonl or .json)
    #[arg(long, default_value = "data/TinyStories")]
    pub dataset: String,

    /// Dataset configuration (sub-directory of the dataset)
    #[arg(long)]
    pub dataset_config: Option<String>,

    /// Maximum number of samples to use
    #[arg(long, default_value_t = 10000)]
    pub max_samples: usize,

    // --- Model ---
    /// Model size preset
    #[arg(long, value_enum, default_value_t = Preset::Small)]
    pub preset: Preset,

    /// Training sequence length
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Maximum sequence length for inference
    #[arg(long)]
    pub max_position_embeddings: Option<usize>,

    #[arg(long)]
    pub n_layer: Option<usize>,

    #[arg(long)]
    pub n_head: Option<usize>,

    #[arg(long)]
    pub n_embd: Option<usize>,

    #[arg(long)]
    pub dropout: Option<f32>,

    /// Use bias in linear layers
    #[arg(long, action)]
    pub bias: bool,

    // --- Symbolic ---
    /// Use the vocabulary-constrained FFN (default)
    #[arg(long = "use-symbolic-ffn", action = clap::ArgAction::SetTrue, overrides_with = "no_symbolic_ffn")]
    pub use_symbolic_ffn_flag: bool,

    /// Disable the symbolic FFN
    #[arg(long, action, overrides_with = "use_symbolic_ffn_flag")]
    pub no_symbolic_ffn: bool,

    /// Use vocabulary refinement in projections
    #[arg(long, action)]
    pub use_vocab_refinement: bool,

    /// Use value projection in attention
    #[arg(long, action)]
    pub use_v: bool,

    /// Use output projection in attention
    #[arg(long, action)]
    pub use_proj: bool,

    /// Use the reconstruction-loss version of the symbolic transformer
    #[arg(long, action)]
    pub use_reconstruction: bool,

    #[arg(long, default_value_t = 1.0)]
    pub reconstruction_loss_weight: f64,

    /// Use standard LayerNorm instead of channel-wise LayerNorm
    #[arg(long, action)]
    pub use_standard_norm: bool,

    // --- Training ---
    /// Mini-batch size (used together with gradient accumulation)
    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, default_value_t = 5)]
    pub num_epochs: usize,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    /// Max norm for gradient clipping (<= 0 disables clipping)
    #[arg(long, default_value_t = 1.0)]
    pub clip_grad_norm: f64,

    #[arg(long, value_enum, default_value_t = TrainerType::Simple)]
    pub trainer_type: TrainerType,

    /// Mini-batches to accumulate before each parameter update
    #[arg(long, default_value_t = 1)]
    pub gradient_accumulation_steps: usize,

    /// Target effective batch size (derives the accumulation steps)
    #[arg(long)]
    pub effective_batch_size: Option<usize>,

    /// Checkpoint manifest (.json) or weights (.safetensors) to resume from
    #[arg(long)]
    pub resume_from_checkpoint: Option<String>,

    // --- Tokenizer ---
    #[arg(long, value_enum, default_value_t = TokenizerType::Gpt2)]
    pub tokenizer_type: TokenizerType,

    /// tokenizer.json file or a directory containing one
    #[arg(long)]
    pub tokenizer_path: Option<String>,

    // --- Output ---
    #[arg(long, default_value = "./output_symbolic")]
    pub output_dir: String,

    /// Optimizer steps between progress log lines
    #[arg(long, default_value_t = 256)]
    pub log_interval: usize,

    /// File name (stem) of the final model checkpoint
    #[arg(long, default_value = "symbolic_model")]
    pub save_model_filename: String,

    #[arg(long, value_enum, default_value_t = DeviceChoice::Auto)]
    pub device: DeviceChoice,

    /// Seed for data shuffling and sampling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    // --- Generation ---
    /// Test symbolic interpretability after training
    #[arg(long, action)]
    pub test_generation: bool,

    /// Skip sample text generation after training
    #[arg(long, action)]
    pub skip_generation: bool,

    /// Max new tokens for generation
    #[arg(long, default_value_t = 30)]
    pub generation_max_len: usize,

    /// Sampling temperature (lower for symbolic reasoning)
    #[arg(long, default_value_t = 0.5)]
    pub temperature: f64,

    #[arg(long, default_value_t = 20)]
    pub top_k: usize,
}

impl TrainArgs {
    /// The symbolic FFN is on unless `--no-symbolic-ffn` was given last.
    pub fn use_symbolic_ffn(&self) -> bool {
        !self.no_symbolic_ffn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = TrainArgs::parse_from(["train_symbolic"]);
        assert_eq!(args.preset, Preset::Small);
        assert_eq!(args.num_epochs, 5);
        assert!(args.use_symbolic_ffn());
        assert_eq!(args.tokenizer_type, TokenizerType::Gpt2);
        assert_eq!(args.gradient_accumulation_steps, 1);
        assert!(args.resume_from_checkpoint.is_none());
    }

    #[test]
    fn test_symbolic_ffn_toggle() {
        let args = TrainArgs::parse_from(["train_symbolic", "--no-symbolic-ffn"]);
        assert!(!args.use_symbolic_ffn());
        let args =
            TrainArgs::parse_from(["train_symbolic", "--no-symbolic-ffn", "--use-symbolic-ffn"]);
        assert!(args.use_symbolic_ffn());
    }

    #[test]
    fn test_overrides_parse() {
        let args = TrainArgs::parse_from([
            "train_symbolic",
            "--preset",
            "character",
            "--n-layer",
            "3",
            "--dropout",
            "0.05",
            "--device",
            "cpu",
            "--resume-from-checkpoint",
            "out/checkpoint_epoch_3.json",
        ]);
        assert_eq!(args.preset, Preset::Character);
        assert_eq!(args.n_layer, Some(3));
        assert_eq!(args.dropout, Some(0.05));
        assert_eq!(args.device, DeviceChoice::Cpu);
        assert_eq!(
            args.resume_from_checkpoint.as_deref(),
            Some("out/checkpoint_epoch_3.json")
        );
    }
}
