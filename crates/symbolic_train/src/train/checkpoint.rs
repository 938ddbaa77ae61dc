//! Checkpoint Management - Training state persistence
//!
//! A checkpoint is one stem written as three files:
//! `<stem>.json` (manifest), `<stem>.safetensors` (model) and
//! `<stem>.optim.safetensors` (optimizer state).

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use symbolic_engine::{SymbolicAdamW, SymbolicConfig};
use tracing::{error, info, warn};

use super::resume::TrainingResult;
use crate::tokenizer::TokenizerSnapshot;

/// Manifest schema written by this build.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const MANIFEST_EXT: &str = ".json";
const MODEL_EXT: &str = ".safetensors";
const OPTIM_EXT: &str = ".optim.safetensors";

/// Why a checkpoint could not be restored.
///
/// Only [`CheckpointError::ShapeMismatch`] is fatal: the checkpoint belongs
/// to a different architecture. Every other failure starts training from
/// scratch.
#[derive(Debug)]
pub enum CheckpointError {
    /// A checkpoint file could not be read.
    Io { path: PathBuf, source: std::io::Error },

    /// The manifest or a tensor file is not what a checkpoint should contain.
    Corrupt { path: PathBuf, reason: String },

    /// Written by a newer build with a manifest schema this one does not know.
    UnsupportedVersion { path: PathBuf, found: u32 },

    /// A stored tensor does not fit the parameter it belongs to.
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

impl CheckpointError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CheckpointError::ShapeMismatch { .. })
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Io { path, source } => {
                write!(f, "checkpoint io ({}): {source}", path.display())
            }
            CheckpointError::Corrupt { path, reason } => {
                write!(f, "corrupt checkpoint ({}): {reason}", path.display())
            }
            CheckpointError::UnsupportedVersion { path, found } => write!(
                f,
                "checkpoint format version {found} is not supported (max {CHECKPOINT_FORMAT_VERSION}): {}",
                path.display()
            ),
            CheckpointError::ShapeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "checkpoint shape mismatch for '{name}': model expects {expected:?}, checkpoint has {found:?}"
            ),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckpointError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Contents of `<stem>.json`. Every field is optional on read so older or
/// hand-written bundles still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointManifest {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub epoch: Option<usize>,
    #[serde(default)]
    pub loss: Option<f32>,
    /// File name of the model tensors, relative to the manifest.
    #[serde(default)]
    pub model_state: Option<String>,
    /// File name of the optimizer tensors, relative to the manifest.
    #[serde(default)]
    pub optimizer_state: Option<String>,
    #[serde(default)]
    pub config: Option<SymbolicConfig>,
    #[serde(default)]
    pub tokenizer: Option<TokenizerSnapshot>,
    #[serde(default)]
    pub training_args: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub training_result: Option<TrainingResult>,
}

/// Everything about the run that every checkpoint repeats.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub config: SymbolicConfig,
    pub tokenizer: TokenizerSnapshot,
    pub training_args: serde_json::Value,
}

/// Progress recorded by one save.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointProgress {
    /// Last completed epoch, 0-based.
    pub epoch: Option<usize>,
    pub loss: Option<f32>,
    pub training_result: Option<TrainingResult>,
}

/// `path` with any checkpoint file suffix removed.
pub fn checkpoint_stem_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = [OPTIM_EXT, MODEL_EXT, MANIFEST_EXT]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(&name);
    path.with_file_name(stem)
}

fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// The manifest that belongs to any of a checkpoint's files (or its stem).
pub fn manifest_path(path: &Path) -> PathBuf {
    with_suffix(&checkpoint_stem_path(path), MANIFEST_EXT)
}

/// Writes a full checkpoint under `stem` and returns the manifest path.
///
/// Tensor files go first. The manifest is renamed into place last, so a
/// manifest on disk always points at complete tensor files.
pub fn save_checkpoint(
    stem: &Path,
    varmap: &VarMap,
    optimizer: Option<&SymbolicAdamW>,
    progress: &CheckpointProgress,
    metadata: &RunMetadata,
) -> Result<PathBuf> {
    let stem = checkpoint_stem_path(stem);
    if let Some(parent) = stem.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create checkpoint dir {}", parent.display()))?;
    }

    let lock_path = with_suffix(&stem, ".lock");
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;
    lock_file.lock_exclusive()?;
    let written = write_bundle(&stem, varmap, optimizer, progress, metadata);
    lock_file.unlock()?;
    let manifest = written?;

    info!("💾 Checkpoint saved: {}", manifest.display());
    Ok(manifest)
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn write_bundle(
    stem: &Path,
    varmap: &VarMap,
    optimizer: Option<&SymbolicAdamW>,
    progress: &CheckpointProgress,
    metadata: &RunMetadata,
) -> Result<PathBuf> {
    let model_path = with_suffix(stem, MODEL_EXT);
    varmap
        .save(&model_path)
        .with_context(|| format!("Failed to save model state to {}", model_path.display()))?;

    let optimizer_state = match optimizer {
        Some(opt) => {
            let optim_path = with_suffix(stem, OPTIM_EXT);
            candle_core::safetensors::save(&opt.state_tensors(), &optim_path).with_context(
                || format!("Failed to save optimizer state to {}", optim_path.display()),
            )?;
            file_name_of(&optim_path)
        }
        None => None,
    };

    let manifest = CheckpointManifest {
        format_version: CHECKPOINT_FORMAT_VERSION,
        epoch: progress.epoch,
        loss: progress.loss,
        model_state: file_name_of(&model_path),
        optimizer_state,
        config: Some(metadata.config.clone()),
        tokenizer: Some(metadata.tokenizer.clone()),
        training_args: Some(metadata.training_args.clone()),
        timestamp: Some(chrono::Local::now().to_rfc3339()),
        training_result: progress.training_result,
    };

    let manifest_path = with_suffix(stem, MANIFEST_EXT);
    let tmp_path = with_suffix(stem, ".json.tmp");
    {
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        serde_json::to_writer_pretty(file, &manifest)?;
    }
    fs::rename(&tmp_path, &manifest_path)
        .with_context(|| format!("Failed to move manifest to {}", manifest_path.display()))?;
    Ok(manifest_path)
}

/// Reads and version-checks a manifest.
pub fn read_manifest(path: &Path) -> Result<CheckpointManifest, CheckpointError> {
    let file = File::open(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: CheckpointManifest = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| {
            if e.is_io() {
                CheckpointError::Io {
                    path: path.to_path_buf(),
                    source: e.into(),
                }
            } else {
                CheckpointError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;
    if manifest.format_version > CHECKPOINT_FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: manifest.format_version,
        });
    }
    Ok(manifest)
}

fn load_tensor_file(
    path: &Path,
    device: &Device,
) -> Result<HashMap<String, Tensor>, CheckpointError> {
    if !path.exists() {
        return Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "tensor file missing"),
        });
    }
    candle_core::safetensors::load(path, device).map_err(|e| CheckpointError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Checks that every stored tensor fits its variable. Nothing is written.
fn check_shapes(
    vars: &HashMap<String, Var>,
    tensors: &HashMap<String, Tensor>,
) -> Result<(), CheckpointError> {
    for (name, tensor) in tensors {
        if let Some(var) = vars.get(name) {
            if var.dims() != tensor.dims() {
                return Err(CheckpointError::ShapeMismatch {
                    name: name.clone(),
                    expected: var.dims().to_vec(),
                    found: tensor.dims().to_vec(),
                });
            }
        }
    }
    Ok(())
}

/// Copies stored tensors into `vars`. Parameters missing from the
/// checkpoint keep their current values. Returns how many were restored.
fn restore_vars(
    what: &str,
    source: &Path,
    vars: &HashMap<String, Var>,
    tensors: &HashMap<String, Tensor>,
) -> Result<usize, CheckpointError> {
    let corrupt = |e: candle_core::Error| CheckpointError::Corrupt {
        path: source.to_path_buf(),
        reason: e.to_string(),
    };

    let mut missing = Vec::new();
    let mut restored = 0;
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();
    for name in names {
        match tensors.get(name) {
            Some(tensor) => {
                let var = &vars[name];
                let value = tensor.to_dtype(var.dtype()).map_err(corrupt)?;
                var.set(&value).map_err(corrupt)?;
                restored += 1;
            }
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        warn!(
            "{} state is missing {} entries, keeping their current values: {}",
            what,
            missing.len(),
            missing.join(", ")
        );
    }
    let unexpected = tensors.keys().filter(|k| !vars.contains_key(*k)).count();
    if unexpected > 0 {
        warn!("{} state has {} unexpected entries, ignored", what, unexpected);
    }
    Ok(restored)
}

fn snapshot_vars(varmap: &VarMap) -> HashMap<String, Var> {
    match varmap.data().lock() {
        Ok(data) => data.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn restore_from_manifest(
    manifest_file: &Path,
    varmap: &VarMap,
    optimizer: Option<&SymbolicAdamW>,
    device: &Device,
) -> Result<usize, CheckpointError> {
    let manifest = read_manifest(manifest_file)?;
    let base = manifest_file.parent().unwrap_or_else(|| Path::new(""));

    let model_state = match &manifest.model_state {
        Some(name) => {
            let path = base.join(name);
            Some((load_tensor_file(&path, device)?, path))
        }
        None => None,
    };
    let optimizer_state = match (&manifest.optimizer_state, optimizer) {
        (Some(name), Some(_)) => {
            let path = base.join(name);
            Some((load_tensor_file(&path, device)?, path))
        }
        _ => None,
    };

    let model_vars = snapshot_vars(varmap);
    let optim_vars = optimizer.map(|o| o.state_vars()).unwrap_or_default();
    if let Some((tensors, _)) = &model_state {
        check_shapes(&model_vars, tensors)?;
    }
    if let Some((tensors, _)) = &optimizer_state {
        check_shapes(&optim_vars, tensors)?;
    }

    match &model_state {
        Some((tensors, path)) => {
            let n = restore_vars("Model", path, &model_vars, tensors)?;
            info!("✅ Model state restored ({} tensors)", n);
        }
        None => warn!("⚠️ Checkpoint has no model state, keeping fresh initialization"),
    }
    match (&optimizer_state, optimizer) {
        (Some((tensors, path)), Some(_)) => {
            let n = restore_vars("Optimizer", path, &optim_vars, tensors)?;
            info!("✅ Optimizer state restored ({} tensors)", n);
        }
        (None, Some(_)) => warn!("⚠️ Checkpoint has no optimizer state, starting optimizer fresh"),
        _ => {}
    }

    let start_epoch = match manifest.epoch {
        Some(epoch) => epoch + 1,
        None => {
            warn!("⚠️ Checkpoint records no epoch, starting from epoch 0");
            0
        }
    };
    if let Some(loss) = manifest.loss {
        info!("Checkpoint loss: {:.4}", loss);
    }
    Ok(start_epoch)
}

/// Restores model and optimizer state from `path` and returns the epoch to
/// start from.
///
/// No path, a path that does not exist, and every recoverable
/// [`CheckpointError`] yield `Ok(0)`. Only a shape mismatch is returned.
pub fn load_checkpoint_for_resumption(
    path: Option<&Path>,
    varmap: &VarMap,
    optimizer: Option<&SymbolicAdamW>,
    device: &Device,
) -> Result<usize, CheckpointError> {
    let Some(path) = path else {
        return Ok(0);
    };
    let manifest_file = manifest_path(path);
    if !manifest_file.exists() {
        warn!(
            "⚠️ Checkpoint not found: {}. Starting from scratch.",
            path.display()
        );
        return Ok(0);
    }

    info!("📂 Loading checkpoint: {}", manifest_file.display());
    match restore_from_manifest(&manifest_file, varmap, optimizer, device) {
        Ok(start_epoch) => {
            info!("🔄 Resuming from epoch {}", start_epoch);
            Ok(start_epoch)
        }
        Err(e) if e.is_fatal() => {
            error!("❌ {}", e);
            Err(e)
        }
        Err(e @ CheckpointError::UnsupportedVersion { .. }) => {
            warn!("⚠️ {}. Starting from scratch.", e);
            Ok(0)
        }
        Err(e) => {
            error!("❌ Failed to load checkpoint: {}. Starting from scratch.", e);
            Ok(0)
        }
    }
}
