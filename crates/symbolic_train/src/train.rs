//! Train Module - Training pipeline for the symbolic transformer
//!
//! - TrainArgs: CLI arguments for training
//! - checkpoint: checkpoint bundles and resumption
//! - resume: epoch-offset wrapper around any epoch trainer
//! - trainer: the simple epoch trainer
//! - session: end-to-end run (config → data → train → save → smoke tests)

pub mod args;
pub mod checkpoint;
pub mod resume;
pub mod session;
pub mod trainer;

pub use args::TrainArgs;
pub use checkpoint::{load_checkpoint_for_resumption, save_checkpoint};
pub use resume::{EpochTrainer, ResumeTrainer, TrainingResult};
pub use session::run;
