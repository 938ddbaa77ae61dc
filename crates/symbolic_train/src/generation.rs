//! Text generation helpers used after training

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use symbolic_engine::SymbolicTransformer;
use tracing::{error, info};

use crate::tokenizer::SymbolicTokenizer;

/// Prompts generated from after every run unless `--skip-generation`.
pub const SAMPLE_PROMPTS: [&str; 4] = [
    "The door was locked.  Tim had a key to the door.  Tim used ",
    "The brave knight",
    "Spotty loved the sun",
    "The bird saw a shiny",
];

/// Anything that continues a token sequence.
pub trait TextGenerator {
    /// Returns `prompt` followed by up to `max_new_tokens` new tokens.
    fn generate(
        &mut self,
        prompt: &[u32],
        max_new_tokens: usize,
        temperature: f64,
        top_k: usize,
    ) -> Result<Vec<u32>>;
}

/// Samples from a [`SymbolicTransformer`] with a seeded RNG.
pub struct ModelGenerator<'a> {
    model: &'a SymbolicTransformer,
    rng: StdRng,
}

impl<'a> ModelGenerator<'a> {
    pub fn new(model: &'a SymbolicTransformer, seed: u64) -> Self {
        Self {
            model,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TextGenerator for ModelGenerator<'_> {
    fn generate(
        &mut self,
        prompt: &[u32],
        max_new_tokens: usize,
        temperature: f64,
        top_k: usize,
    ) -> Result<Vec<u32>> {
        Ok(self
            .model
            .generate(prompt, max_new_tokens, temperature, top_k, &mut self.rng)?)
    }
}

/// Generated continuation of one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub prompt_tokens: usize,
    /// Prompt and continuation, specials removed.
    pub full_text: String,
    /// Continuation only.
    pub generated_text: String,
}

pub fn generate_text(
    generator: &mut dyn TextGenerator,
    tokenizer: &SymbolicTokenizer,
    prompt: &str,
    max_new_tokens: usize,
    temperature: f64,
    top_k: usize,
) -> Result<Generation> {
    let ids = tokenizer.encode(prompt, true)?;
    let output = generator.generate(&ids, max_new_tokens, temperature, top_k)?;
    let split = ids.len().min(output.len());
    Ok(Generation {
        prompt_tokens: ids.len(),
        full_text: tokenizer.decode(&output, true)?,
        generated_text: tokenizer.decode(&output[split..], true)?,
    })
}

/// Generates for every [`SAMPLE_PROMPTS`] entry. Failures are logged and
/// skipped; returns how many prompts succeeded.
pub fn run_sample_generation(
    generator: &mut dyn TextGenerator,
    tokenizer: &SymbolicTokenizer,
    max_new_tokens: usize,
    temperature: f64,
    top_k: usize,
) -> usize {
    let mut ok = 0;
    for (i, prompt) in SAMPLE_PROMPTS.iter().enumerate() {
        info!("Symbolic test {}: '{}'", i + 1, prompt);
        match generate_text(generator, tokenizer, prompt, max_new_tokens, temperature, top_k) {
            Ok(generation) => {
                info!("Generated: {}", generation.generated_text);
                ok += 1;
            }
            Err(e) => error!("Error generating for '{}': {}", prompt, e),
        }
    }
    ok
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;

    /// Appends a fixed continuation, or fails when asked to.
    pub(crate) struct ScriptedGenerator {
        pub continuation: Vec<u32>,
        pub fail_on_len: Option<usize>,
        pub calls: Vec<(usize, f64, usize)>,
    }

    impl TextGenerator for ScriptedGenerator {
        fn generate(
            &mut self,
            prompt: &[u32],
            max_new_tokens: usize,
            temperature: f64,
            top_k: usize,
        ) -> Result<Vec<u32>> {
            self.calls.push((max_new_tokens, temperature, top_k));
            if self.fail_on_len == Some(max_new_tokens) {
                anyhow::bail!("scripted failure");
            }
            let mut out = prompt.to_vec();
            out.extend(self.continuation.iter().cycle().take(max_new_tokens));
            Ok(out)
        }
    }

    pub(crate) fn char_tokenizer() -> SymbolicTokenizer {
        SymbolicTokenizer::Character(CharTokenizer::build_vocab_from_texts(&[
            "abcdefghijklmnopqrstuvwxyz ABCDEFGHIJKLMNOPQRSTUVWXYZ.=",
        ]))
    }

    #[test]
    fn test_generate_text_splits_prompt_and_continuation() -> Result<()> {
        let tokenizer = char_tokenizer();
        let continuation = tokenizer.encode("xy", false)?;
        let mut generator = ScriptedGenerator {
            continuation,
            fail_on_len: None,
            calls: Vec::new(),
        };
        let generation = generate_text(&mut generator, &tokenizer, "ab", 4, 0.3, 20)?;
        // <bos> plus two characters.
        assert_eq!(generation.prompt_tokens, 3);
        assert_eq!(generation.full_text, "abxyxy");
        assert_eq!(generation.generated_text, "xyxy");
        Ok(())
    }

    #[test]
    fn test_sample_generation_continues_after_errors() {
        let tokenizer = char_tokenizer();
        let mut generator = ScriptedGenerator {
            continuation: vec![4],
            fail_on_len: Some(30),
            calls: Vec::new(),
        };
        assert_eq!(run_sample_generation(&mut generator, &tokenizer, 30, 0.5, 20), 0);
        assert_eq!(generator.calls.len(), SAMPLE_PROMPTS.len());

        generator.fail_on_len = None;
        assert_eq!(run_sample_generation(&mut generator, &tokenizer, 30, 0.5, 20), 4);
    }
}
