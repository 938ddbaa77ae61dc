//! Interpretability smoke test
//!
//! Generates from a few fixed reasoning prompts at several lengths and keeps
//! a transcript under `logs/`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::generation::{generate_text, TextGenerator};
use crate::tokenizer::SymbolicTokenizer;

pub const INTERPRETABILITY_PROMPTS: [&str; 3] = [
    "Max went to",
    "The key opens the door. Sarah has the key. Sarah can",
    "Rain makes things wet. It is raining. The ground is",
];

pub const GENERATION_LENGTHS: [usize; 3] = [5, 10, 20];

/// Low temperature keeps the continuations close to the argmax.
pub const INTERPRETABILITY_TEMPERATURE: f64 = 0.3;
pub const INTERPRETABILITY_TOP_K: usize = 20;

const SEQUENCE_MARKERS: [&str; 3] = ["a b c", "1 2 3", "monday tuesday"];
const MATH_PROMPT_MARKERS: [&str; 5] = ["equals", "+", "-", "plus", "minus"];
const MATH_ANSWER_MARKERS: [&str; 3] = ["=", "equals", "is"];
const LOGIC_ANSWER_MARKERS: [&str; 3] = ["then", "therefore", "so"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Keyword heuristic over a prompt and its continuation. Matching is on
/// lowercase substrings, so `"is"` also matches inside `"this"`.
pub fn analyze_symbolic_consistency(prompt: &str, generated: &str) -> Option<&'static str> {
    let prompt = prompt.to_lowercase();
    let generated = generated.to_lowercase();

    if prompt.contains("if")
        && prompt.contains("then")
        && contains_any(&generated, &LOGIC_ANSWER_MARKERS)
    {
        return Some("Logical structure maintained");
    }
    if contains_any(&prompt, &SEQUENCE_MARKERS) {
        return Some("Sequence pattern detected");
    }
    if contains_any(&prompt, &MATH_PROMPT_MARKERS) && contains_any(&generated, &MATH_ANSWER_MARKERS)
    {
        return Some("Mathematical reasoning maintained");
    }
    None
}

/// Writes every line to the console sink and the transcript file.
struct Transcript<'a, C: Write> {
    console: &'a mut C,
    file: BufWriter<File>,
}

impl<C: Write> Transcript<'_, C> {
    /// To both sinks.
    fn both(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.console, "{line}")?;
        writeln!(self.file, "{line}")
    }

    fn file_only(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{line}")
    }
}

/// Runs the interpretability prompts and returns the transcript path,
/// `<logs_dir>/symbolic_interpretability_<timestamp>.log`.
///
/// Per-prompt generation errors are written into the transcript; only
/// failing to write the transcript itself is an error.
pub fn test_symbolic_interpretability(
    generator: &mut dyn TextGenerator,
    tokenizer: &SymbolicTokenizer,
    vocab_size: usize,
    logs_dir: &Path,
    timestamp: &str,
    console: &mut impl Write,
) -> Result<PathBuf> {
    let rule = "=".repeat(60);
    writeln!(console, "\n{rule}\nTESTING SYMBOLIC INTERPRETABILITY\n{rule}")?;

    let path = logs_dir.join(format!("symbolic_interpretability_{timestamp}.log"));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create transcript {}", path.display()))?;
    let mut out = Transcript {
        console,
        file: BufWriter::new(file),
    };

    out.file_only("Symbolic Interpretability Test Results")?;
    out.file_only(&format!("Timestamp: {timestamp}"))?;
    out.file_only("Model: Symbolic Transformer")?;
    out.file_only(&format!("Vocab size: {vocab_size}"))?;
    out.file_only("All internal representations constrained to vocabulary manifold")?;
    out.file_only(&format!("{}\n", "=".repeat(80)))?;

    for (i, prompt) in INTERPRETABILITY_PROMPTS.iter().enumerate() {
        out.both(&format!("\n--- Symbolic Test {} ---", i + 1))?;
        out.both(&format!("Prompt: \"{prompt}\""))?;
        let prompt_tokens = match tokenizer.encode(prompt, true) {
            Ok(ids) => ids.len().to_string(),
            Err(e) => format!("unavailable ({e})"),
        };
        out.both(&format!("Prompt tokens: {prompt_tokens}"))?;

        for len in GENERATION_LENGTHS {
            out.both(&format!("\nGenerating {len} tokens:"))?;
            match generate_text(
                generator,
                tokenizer,
                prompt,
                len,
                INTERPRETABILITY_TEMPERATURE,
                INTERPRETABILITY_TOP_K,
            ) {
                Ok(generation) => {
                    out.both(&format!("Full: \"{}\"", generation.full_text))?;
                    out.both(&format!("Generated: \"{}\"", generation.generated_text))?;
                    if let Some(note) =
                        analyze_symbolic_consistency(prompt, &generation.generated_text)
                    {
                        out.both(&format!("Symbolic analysis: {note}"))?;
                    }
                }
                Err(e) => out.both(&format!("Error during generation: {e}"))?,
            }
        }
        out.file_only(&format!("\n{}", "-".repeat(80)))?;
    }
    out.file.flush()?;

    writeln!(
        out.console,
        "Symbolic interpretability test results saved to: {}",
        path.display()
    )?;
    info!("Interpretability transcript: {}", path.display());
    Ok(path)
}
