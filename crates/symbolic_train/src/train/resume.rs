//! Resume Wrapper - Continue epoch numbering across restarts
//!
//! Trainers count epochs from zero. [`ResumeTrainer`] runs one for the
//! epochs that are still missing and relabels every checkpoint it writes
//! with the absolute epoch number.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// File stem of the checkpoint written after `epoch`.
pub fn checkpoint_stem(epoch: usize) -> String {
    format!("checkpoint_epoch_{epoch}")
}

/// Where a checkpoint is about to be written and which epoch it records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRequest {
    pub path: PathBuf,
    pub epoch: Option<usize>,
}

/// Decides the final path and epoch label of every checkpoint a trainer
/// saves.
pub trait CheckpointLabeler {
    fn label(&self, output_dir: Option<&Path>, request: CheckpointRequest) -> CheckpointRequest;

    /// Absolute epoch number of the trainer's zero-based `epoch`, used for
    /// shuffling and progress lines.
    fn absolute_epoch(&self, epoch: usize) -> usize {
        epoch
    }
}

/// Saves checkpoints exactly where the trainer asks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsRequested;

impl CheckpointLabeler for AsRequested {
    fn label(&self, _output_dir: Option<&Path>, request: CheckpointRequest) -> CheckpointRequest {
        request
    }
}

/// Shifts epoch labels by `offset` and renames the file to match.
///
/// Requests without an epoch pass through untouched. Without an output
/// directory the path is kept and only the epoch label moves.
#[derive(Debug, Clone, Copy)]
pub struct EpochOffset {
    pub offset: usize,
}

impl CheckpointLabeler for EpochOffset {
    fn label(&self, output_dir: Option<&Path>, request: CheckpointRequest) -> CheckpointRequest {
        let Some(epoch) = request.epoch else {
            return request;
        };
        let absolute = self.absolute_epoch(epoch);
        let path = match output_dir {
            Some(dir) => dir.join(checkpoint_stem(absolute)),
            None => request.path,
        };
        CheckpointRequest {
            path,
            epoch: Some(absolute),
        }
    }

    fn absolute_epoch(&self, epoch: usize) -> usize {
        epoch + self.offset
    }
}

/// Outcome of a training run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub final_loss: f32,
    /// Wall-clock seconds.
    pub training_time: f64,
    pub epochs_completed: usize,
}

/// A training loop that runs `num_epochs` epochs counted from zero.
pub trait EpochTrainer {
    fn num_epochs(&self) -> usize;

    fn set_num_epochs(&mut self, epochs: usize);

    /// Runs every epoch, routing each checkpoint through `labeler`.
    fn train(&mut self, labeler: &dyn CheckpointLabeler) -> Result<TrainingResult>;
}

/// Runs the wrapped trainer only for the epochs after `start_epoch`.
pub struct ResumeTrainer<T: EpochTrainer> {
    trainer: T,
    start_epoch: usize,
}

impl<T: EpochTrainer> ResumeTrainer<T> {
    pub fn new(trainer: T, start_epoch: usize) -> Self {
        Self {
            trainer,
            start_epoch,
        }
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn inner(&self) -> &T {
        &self.trainer
    }

    pub fn into_inner(self) -> T {
        self.trainer
    }

    /// Runs `configured − start_epoch` epochs. When nothing is left, returns
    /// a zero result without touching the wrapped trainer.
    ///
    /// The wrapped trainer's epoch count is restored afterwards, also when
    /// it fails; its errors propagate unchanged.
    pub fn train(&mut self) -> Result<TrainingResult> {
        let configured_epochs = self.trainer.num_epochs();
        let Some(remaining) = configured_epochs
            .checked_sub(self.start_epoch)
            .filter(|&r| r > 0)
        else {
            warn!(
                "No epochs remaining to train. Already completed {} epochs.",
                self.start_epoch
            );
            return Ok(TrainingResult::default());
        };

        info!(
            "Resuming at epoch {}: {} of {} epochs remaining",
            self.start_epoch, remaining, configured_epochs
        );
        self.trainer.set_num_epochs(remaining);
        let labeler = EpochOffset {
            offset: self.start_epoch,
        };
        let result = self.trainer.train(&labeler);
        self.trainer.set_num_epochs(configured_epochs);
        result
    }
}
