//! Data - Local text datasets, token windows and batching

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use tracing::{info, warn};

use crate::tokenizer::SymbolicTokenizer;

/// Preferred text fields, in order, before falling back to any string field.
const TEXT_FIELDS: [&str; 2] = ["text", "story"];

/// Resolves `--dataset` / `--dataset-config` to the list of files to read.
pub fn resolve_dataset_files(dataset: &str, dataset_config: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut root = PathBuf::from(dataset);
    if let Some(cfg) = dataset_config {
        root = root.join(cfg);
    }

    if root.is_file() {
        return Ok(vec![root]);
    }
    if !root.is_dir() {
        bail!("Dataset not found at '{}'", root.display());
    }

    let mut files = Vec::new();
    for ext in ["jsonl", "json", "txt"] {
        let pattern = format!("{}/**/*.{}", root.display(), ext);
        files.extend(glob::glob(&pattern)?.filter_map(|p| p.ok()));
    }
    files.sort();
    if files.is_empty() {
        bail!("No .jsonl, .json or .txt files found in {:?}", root);
    }
    Ok(files)
}

/// Picks the text column of a record: `text`, then `story`, then the first
/// string-valued field.
pub fn resolve_text_field(record: &serde_json::Map<String, Value>) -> Option<String> {
    for field in TEXT_FIELDS {
        if record.contains_key(field) {
            return Some(field.to_string());
        }
    }
    record
        .iter()
        .find(|(_, v)| v.is_string())
        .map(|(k, _)| k.clone())
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_json_records(path: &Path) -> Result<Vec<serde_json::Map<String, Value>>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let is_jsonl = path.extension().map_or(false, |e| e == "jsonl");

    let values: Vec<Value> = if is_jsonl {
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<Value>, _>>()
            .with_context(|| format!("Invalid JSON line in {}", path.display()))?
    } else {
        match serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
        {
            Value::Array(items) => items,
            other => vec![other],
        }
    };

    Ok(values
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

fn read_text_samples(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Loads at most `max_samples` text samples from the dataset.
///
/// Fails when a JSON dataset has no usable text column; that is the one
/// setup error the run cannot recover from.
pub fn load_text_samples(
    dataset: &str,
    dataset_config: Option<&str>,
    max_samples: usize,
) -> Result<Vec<String>> {
    let files = resolve_dataset_files(dataset, dataset_config)?;
    let mut samples = Vec::new();
    let mut text_field: Option<String> = None;

    for file in files {
        if samples.len() >= max_samples {
            break;
        }
        let is_json = file
            .extension()
            .map_or(false, |e| e == "jsonl" || e == "json");

        if !is_json {
            samples.extend(read_text_samples(&file)?);
            continue;
        }

        let records = read_json_records(&file)?;
        if text_field.is_none() {
            if let Some(first) = records.first() {
                match resolve_text_field(first) {
                    Some(field) => {
                        info!("Using text column '{}'", field);
                        text_field = Some(field);
                    }
                    None => {
                        let available: Vec<&String> = first.keys().collect();
                        bail!("Could not find text column. Available: {:?}", available);
                    }
                }
            }
        }
        if let Some(field) = &text_field {
            samples.extend(
                records
                    .iter()
                    .filter_map(|r| r.get(field))
                    .map(value_to_text)
                    .filter(|s| !s.trim().is_empty()),
            );
        }
    }

    samples.truncate(max_samples);
    if samples.is_empty() {
        bail!("Dataset '{}' yielded no text samples", dataset);
    }
    info!("Loaded {} text samples", samples.len());
    Ok(samples)
}

/// A mini-batch of `inputs`/`targets`, both `[batch, seq]`.
pub struct Batch {
    pub inputs: Vec<u32>,
    pub targets: Vec<u32>,
    pub batch_size: usize,
    pub seq_len: usize,
}

impl Batch {
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let shape = (self.batch_size, self.seq_len);
        let inputs = Tensor::from_slice(&self.inputs, shape, device)?;
        let targets = Tensor::from_slice(&self.targets, shape, device)?;
        Ok((inputs, targets))
    }
}

/// Fixed-length training windows cut from the concatenated token stream,
/// shuffled per epoch.
pub struct DataLoader {
    windows: Vec<Vec<u32>>,
    batch_size: usize,
    seed: u64,
}

impl DataLoader {
    /// Tokenizes every sample, concatenates them and cuts non-overlapping
    /// windows of `block_size + 1` tokens.
    pub fn from_samples(
        samples: &[String],
        tokenizer: &SymbolicTokenizer,
        block_size: usize,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        let mut stream = Vec::new();
        for sample in samples {
            stream.extend(tokenizer.encode(sample, true)?);
        }
        Self::from_tokens(&stream, block_size, batch_size, seed)
    }

    pub fn from_tokens(
        stream: &[u32],
        block_size: usize,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 || block_size == 0 {
            bail!("batch_size and block_size must be non-zero");
        }
        let windows: Vec<Vec<u32>> = stream
            .windows(block_size + 1)
            .step_by(block_size)
            .map(|w| w.to_vec())
            .collect();
        if windows.is_empty() {
            bail!(
                "Dataset too small: {} tokens, need at least {} for one window",
                stream.len(),
                block_size + 1
            );
        }
        if windows.len() < batch_size {
            warn!(
                "Only {} windows for batch size {}; batches will be partial",
                windows.len(),
                batch_size
            );
        }
        Ok(Self {
            windows,
            batch_size,
            seed,
        })
    }

    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    /// Number of batches per epoch (the last one may be partial).
    pub fn len(&self) -> usize {
        self.windows.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Batches for `epoch`, in a shuffle order that depends only on the seed
    /// and the epoch index.
    pub fn epoch_batches(&self, epoch: usize) -> Vec<Batch> {
        let mut order: Vec<usize> = (0..self.windows.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);

        order
            .chunks(self.batch_size)
            .map(|chunk| {
                let seq_len = self.windows[chunk[0]].len() - 1;
                let mut inputs = Vec::with_capacity(chunk.len() * seq_len);
                let mut targets = Vec::with_capacity(chunk.len() * seq_len);
                for &i in chunk {
                    let w = &self.windows[i];
                    inputs.extend_from_slice(&w[..seq_len]);
                    targets.extend_from_slice(&w[1..]);
                }
                Batch {
                    inputs,
                    targets,
                    batch_size: chunk.len(),
                    seq_len,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_text_field_resolution_order() {
        let rec: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"id": 1, "story": "s", "text": "t"}"#).unwrap();
        assert_eq!(resolve_text_field(&rec).as_deref(), Some("text"));

        let rec: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"id": 1, "story": "s"}"#).unwrap();
        assert_eq!(resolve_text_field(&rec).as_deref(), Some("story"));

        let rec: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"id": 1, "body": "b"}"#).unwrap();
        assert_eq!(resolve_text_field(&rec).as_deref(), Some("body"));

        let rec: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"id": 1, "score": 2.0}"#).unwrap();
        assert_eq!(resolve_text_field(&rec), None);
    }

    #[test]
    fn test_missing_text_column_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("train.jsonl");
        let mut f = fs::File::create(&path)?;
        writeln!(f, r#"{{"id": 1, "score": 0.5}}"#)?;

        let err = load_text_samples(path.to_str().unwrap(), None, 10).unwrap_err();
        assert!(err.to_string().contains("Could not find text column"));
        Ok(())
    }

    #[test]
    fn test_jsonl_and_max_samples() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("en");
        fs::create_dir_all(&sub)?;
        let mut f = fs::File::create(sub.join("train.jsonl"))?;
        for i in 0..5 {
            writeln!(f, r#"{{"story": "story number {i}"}}"#)?;
        }

        let samples = load_text_samples(dir.path().to_str().unwrap(), Some("en"), 3)?;
        assert_eq!(samples, vec!["story number 0", "story number 1", "story number 2"]);
        Ok(())
    }

    #[test]
    fn test_txt_paragraphs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("corpus.txt");
        fs::write(&path, "first one\n\nsecond\n\n\n\nthird")?;
        let samples = load_text_samples(path.to_str().unwrap(), None, 100)?;
        assert_eq!(samples, vec!["first one", "second", "third"]);
        Ok(())
    }

    #[test]
    fn test_windows_and_batches() -> Result<()> {
        let stream: Vec<u32> = (0..21).collect();
        let loader = DataLoader::from_tokens(&stream, 4, 2, 7)?;
        // windows start at 0, 4, 8, 12, 16
        assert_eq!(loader.num_windows(), 5);
        assert_eq!(loader.len(), 3);

        let batches = loader.epoch_batches(0);
        assert_eq!(batches.len(), 3);
        let total: usize = batches.iter().map(|b| b.batch_size).sum();
        assert_eq!(total, 5);
        for b in &batches {
            for row in 0..b.batch_size {
                let inp = &b.inputs[row * 4..row * 4 + 4];
                let tgt = &b.targets[row * 4..row * 4 + 4];
                for k in 0..4 {
                    assert_eq!(tgt[k], inp[k] + 1);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_shuffle_is_deterministic_per_epoch() -> Result<()> {
        let stream: Vec<u32> = (0..200).collect();
        let loader = DataLoader::from_tokens(&stream, 4, 3, 11)?;
        let a: Vec<u32> = loader.epoch_batches(2).iter().flat_map(|b| b.inputs.clone()).collect();
        let b: Vec<u32> = loader.epoch_batches(2).iter().flat_map(|b| b.inputs.clone()).collect();
        assert_eq!(a, b);
        // A resumed epoch must not replay epoch 0's order.
        let first: Vec<u32> = loader.epoch_batches(0).iter().flat_map(|b| b.inputs.clone()).collect();
        assert_ne!(a, first);
        Ok(())
    }

    #[test]
    fn test_too_small_dataset() {
        assert!(DataLoader::from_tokens(&[1, 2, 3], 4, 1, 0).is_err());
    }
}
