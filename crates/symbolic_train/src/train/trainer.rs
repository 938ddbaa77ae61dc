//! Simple Trainer - Epoch loop with gradient accumulation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Optimizer, VarMap};
use symbolic_engine::{SymbolicAdamW, SymbolicTransformer};
use tracing::{info, warn};

use super::checkpoint::{save_checkpoint, CheckpointProgress, RunMetadata};
use super::resume::{
    checkpoint_stem, CheckpointLabeler, CheckpointRequest, EpochTrainer, TrainingResult,
};
use crate::data::{Batch, DataLoader};

#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub num_epochs: usize,
    /// Per-epoch checkpoints are skipped when unset.
    pub output_dir: Option<PathBuf>,
    /// Maximum global gradient norm; `<= 0` disables clipping.
    pub clip_grad_norm: f64,
    /// Optimizer steps between progress lines.
    pub log_interval: usize,
    pub gradient_accumulation_steps: usize,
}

/// Scales every gradient so the global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total_norm_sq = 0.0f64;
    for var in vars {
        if let Some(g) = grads.get(var.as_tensor()) {
            total_norm_sq += g
                .sqr()?
                .sum_all()?
                .to_dtype(DType::F64)?
                .to_scalar::<f64>()?;
        }
    }
    let total_norm = total_norm_sq.sqrt();
    if max_norm <= 0.0 || total_norm <= max_norm {
        return Ok(total_norm);
    }
    let scale = max_norm / total_norm.max(1e-12);
    for var in vars {
        if let Some(g) = grads.remove(var.as_tensor()) {
            grads.insert(var.as_tensor(), g.affine(scale, 0.0)?);
        }
    }
    Ok(total_norm)
}

/// Plain epoch trainer over a [`DataLoader`].
pub struct SimpleTrainer {
    model: SymbolicTransformer,
    varmap: VarMap,
    optimizer: SymbolicAdamW,
    loader: DataLoader,
    device: Device,
    settings: TrainerSettings,
    metadata: RunMetadata,
}

impl SimpleTrainer {
    pub fn new(
        model: SymbolicTransformer,
        varmap: VarMap,
        optimizer: SymbolicAdamW,
        loader: DataLoader,
        device: Device,
        settings: TrainerSettings,
        metadata: RunMetadata,
    ) -> Self {
        Self {
            model,
            varmap,
            optimizer,
            loader,
            device,
            settings,
            metadata,
        }
    }

    pub fn model(&self) -> &SymbolicTransformer {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn optimizer(&self) -> &SymbolicAdamW {
        &self.optimizer
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// One optimizer update over a group of batches. Returns the mean loss.
    fn train_step(&mut self, group: &[Batch], vars: &[Var]) -> Result<f32> {
        let mut losses = Vec::with_capacity(group.len());
        for batch in group {
            let (inputs, targets) = batch.to_tensors(&self.device)?;
            let out = self.model.forward_with_loss(&inputs, &targets, true)?;
            losses.push(out.loss);
        }
        let loss = (Tensor::stack(&losses, 0)?.sum_all()? / group.len() as f64)?;
        let loss_value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;

        let mut grads = loss.backward()?;
        clip_grad_norm(&mut grads, vars, self.settings.clip_grad_norm)?;
        self.optimizer.step(&grads)?;
        Ok(loss_value)
    }

    /// `epoch` is absolute: it picks the shuffle order and labels progress.
    fn run_epoch(&mut self, epoch: usize, step: &mut usize) -> Result<f32> {
        let vars = self.varmap.all_vars();
        let batches = self.loader.epoch_batches(epoch);
        let accumulation = self.settings.gradient_accumulation_steps.max(1);
        let log_interval = self.settings.log_interval.max(1);

        let mut epoch_loss = 0.0f32;
        let mut groups = 0usize;
        for group in batches.chunks(accumulation) {
            let loss = self.train_step(group, &vars)?;
            if !loss.is_finite() {
                warn!("⚠️ Non-finite loss at step {}: {}", step, loss);
            }
            epoch_loss += loss;
            groups += 1;
            *step += 1;
            if *step % log_interval == 0 {
                info!(
                    "Epoch {:3} | Step {:6} | Loss: {:.4} | LR: {:.2e}",
                    epoch,
                    step,
                    loss,
                    self.optimizer.learning_rate()
                );
            }
        }
        Ok(epoch_loss / groups.max(1) as f32)
    }

    fn save_epoch(&self, labeler: &dyn CheckpointLabeler, epoch: usize, loss: f32) -> Result<()> {
        let Some(dir) = self.settings.output_dir.as_deref() else {
            return Ok(());
        };
        let request = labeler.label(
            Some(dir),
            CheckpointRequest {
                path: dir.join(checkpoint_stem(epoch)),
                epoch: Some(epoch),
            },
        );
        save_checkpoint(
            &request.path,
            &self.varmap,
            Some(&self.optimizer),
            &CheckpointProgress {
                epoch: request.epoch,
                loss: Some(loss),
                training_result: None,
            },
            &self.metadata,
        )?;
        Ok(())
    }
}

impl EpochTrainer for SimpleTrainer {
    fn num_epochs(&self) -> usize {
        self.settings.num_epochs
    }

    fn set_num_epochs(&mut self, epochs: usize) {
        self.settings.num_epochs = epochs;
    }

    fn train(&mut self, labeler: &dyn CheckpointLabeler) -> Result<TrainingResult> {
        let start = Instant::now();
        let num_epochs = self.settings.num_epochs;
        info!(
            "🏋️ Training {} epochs, {} batches per epoch, accumulation {}",
            num_epochs,
            self.loader.len(),
            self.settings.gradient_accumulation_steps.max(1)
        );

        let mut step = 0usize;
        let mut final_loss = 0.0f32;
        for epoch in 0..num_epochs {
            let epoch_start = Instant::now();
            let absolute = labeler.absolute_epoch(epoch);
            final_loss = self.run_epoch(absolute, &mut step)?;
            info!(
                "✅ Epoch {} done | Avg Loss: {:.4} | {:.1}s",
                absolute,
                final_loss,
                epoch_start.elapsed().as_secs_f64()
            );
            self.save_epoch(labeler, epoch, final_loss)?;
        }

        Ok(TrainingResult {
            final_loss,
            training_time: start.elapsed().as_secs_f64(),
            epochs_completed: num_epochs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::TokenizerSnapshot;
    use crate::train::checkpoint::read_manifest;
    use crate::train::resume::{AsRequested, EpochOffset};
    use candle_nn::VarBuilder;
    use symbolic_engine::{AdamWParams, SymbolicConfig};
    use tempfile::tempdir;

    fn tiny_trainer(output_dir: Option<PathBuf>, num_epochs: usize) -> Result<SimpleTrainer> {
        let config = SymbolicConfig {
            vocab_size: 7,
            n_layer: 1,
            n_head: 2,
            n_embd: 8,
            block_size: 4,
            max_position_embeddings: 16,
            dropout: 0.0,
            ..SymbolicConfig::tiny()
        };
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = SymbolicTransformer::load(config.clone(), vb)?;
        let optimizer = SymbolicAdamW::from_varmap(
            &varmap,
            AdamWParams {
                lr: 1e-2,
                ..Default::default()
            },
        )?;
        let stream: Vec<u32> = (0..64).map(|i| (i % 7) as u32).collect();
        let loader = DataLoader::from_tokens(&stream, 4, 4, 1)?;
        Ok(SimpleTrainer::new(
            model,
            varmap,
            optimizer,
            loader,
            device,
            TrainerSettings {
                num_epochs,
                output_dir,
                clip_grad_norm: 1.0,
                log_interval: 1,
                gradient_accumulation_steps: 2,
            },
            RunMetadata {
                config,
                tokenizer: TokenizerSnapshot::Character { chars: vec!['a'] },
                training_args: serde_json::Value::Null,
            },
        ))
    }

    #[test]
    fn test_clip_grad_norm_scales_to_max() -> Result<()> {
        let w = Var::new(&[3f32, 4.0], &Device::Cpu)?;
        let loss = (w.as_tensor() * &Tensor::new(&[3f32, 4.0], &Device::Cpu)?)?.sum_all()?;
        let mut grads = loss.backward()?;
        let vars = vec![w.clone()];

        let norm = clip_grad_norm(&mut grads, &vars, 1.0)?;
        assert!((norm - 5.0).abs() < 1e-5);
        let clipped: Vec<f32> = grads.get(w.as_tensor()).unwrap().to_vec1()?;
        assert!((clipped[0] - 0.6).abs() < 1e-5);
        assert!((clipped[1] - 0.8).abs() < 1e-5);

        // Disabled clipping leaves gradients alone.
        let mut grads = loss.backward()?;
        clip_grad_norm(&mut grads, &vars, 0.0)?;
        let raw: Vec<f32> = grads.get(w.as_tensor()).unwrap().to_vec1()?;
        assert_eq!(raw, vec![3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_training_saves_one_checkpoint_per_epoch() -> Result<()> {
        let dir = tempdir()?;
        let mut trainer = tiny_trainer(Some(dir.path().to_path_buf()), 2)?;
        let result = trainer.train(&AsRequested)?;

        assert_eq!(result.epochs_completed, 2);
        assert!(result.final_loss.is_finite());
        assert!(result.training_time >= 0.0);
        for epoch in 0..2 {
            assert!(dir.path().join(format!("checkpoint_epoch_{epoch}.json")).exists());
            assert!(dir
                .path()
                .join(format!("checkpoint_epoch_{epoch}.safetensors"))
                .exists());
        }
        // 15 windows make 4 batches, 2 per update, 2 epochs.
        assert_eq!(trainer.optimizer().step_count()?, 4);
        Ok(())
    }

    #[test]
    fn test_offset_labeler_renames_epoch_checkpoints() -> Result<()> {
        let dir = tempdir()?;
        let mut trainer = tiny_trainer(Some(dir.path().to_path_buf()), 1)?;
        trainer.train(&EpochOffset { offset: 3 })?;

        assert!(dir.path().join("checkpoint_epoch_3.json").exists());
        assert!(!dir.path().join("checkpoint_epoch_0.json").exists());
        let manifest = read_manifest(&dir.path().join("checkpoint_epoch_3.json"))?;
        assert_eq!(manifest.epoch, Some(3));
        Ok(())
    }

    #[test]
    fn test_no_output_dir_skips_checkpoints() -> Result<()> {
        let mut trainer = tiny_trainer(None, 1)?;
        let result = trainer.train(&AsRequested)?;
        assert_eq!(result.epochs_completed, 1);
        assert!(trainer.settings.output_dir.is_none());
        Ok(())
    }
}
