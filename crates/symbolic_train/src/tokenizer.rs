//! Tokenizers - GPT-2 (pretrained BPE) and character-level
//!
//! Both kinds serialize into a [`TokenizerSnapshot`] so a checkpoint carries
//! the exact vocabulary it was trained with.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::train::args::TokenizerType;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";
pub const BOS_TOKEN: &str = "<bos>";
pub const EOS_TOKEN: &str = "<eos>";

/// Hub id of the pretrained GPT-2 tokenizer.
const GPT2_HUB_ID: &str = "gpt2";

/// Character-level tokenizer. Special tokens take ids `0..4`, characters
/// follow in sorted order.
#[derive(Debug, Clone, PartialEq)]
pub struct CharTokenizer {
    id_to_token: Vec<String>,
    char_to_id: HashMap<char, u32>,
}

impl CharTokenizer {
    const SPECIALS: [&'static str; 4] = [PAD_TOKEN, UNK_TOKEN, BOS_TOKEN, EOS_TOKEN];

    pub fn from_chars<I: IntoIterator<Item = char>>(chars: I) -> Self {
        let unique: BTreeSet<char> = chars.into_iter().collect();
        let mut id_to_token: Vec<String> = Self::SPECIALS.iter().map(|s| s.to_string()).collect();
        let mut char_to_id = HashMap::with_capacity(unique.len());
        for c in unique {
            char_to_id.insert(c, id_to_token.len() as u32);
            id_to_token.push(c.to_string());
        }
        Self {
            id_to_token,
            char_to_id,
        }
    }

    /// Builds the vocabulary from every character seen in `texts`.
    pub fn build_vocab_from_texts<S: AsRef<str>>(texts: &[S]) -> Self {
        Self::from_chars(texts.iter().flat_map(|t| t.as_ref().chars()).collect::<Vec<_>>())
    }

    pub fn chars(&self) -> Vec<char> {
        let mut chars: Vec<char> = self.char_to_id.keys().copied().collect();
        chars.sort_unstable();
        chars
    }

    fn special_id(&self, token: &str) -> u32 {
        Self::SPECIALS
            .iter()
            .position(|s| *s == token)
            .map(|p| p as u32)
            .unwrap_or(1)
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Vec<u32> {
        let unk = self.special_id(UNK_TOKEN);
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special_tokens {
            ids.push(self.special_id(BOS_TOKEN));
        }
        ids.extend(
            text.chars()
                .map(|c| self.char_to_id.get(&c).copied().unwrap_or(unk)),
        );
        ids
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> String {
        let n_special = Self::SPECIALS.len() as u32;
        ids.iter()
            .filter(|&&id| !(skip_special_tokens && id < n_special))
            .filter_map(|&id| self.id_to_token.get(id as usize))
            .map(String::as_str)
            .collect()
    }

    pub fn vocab_size(&self) -> usize {
        self.id_to_token.len()
    }
}

/// Serialized form of a tokenizer, embedded in checkpoint manifests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TokenizerSnapshot {
    Gpt2 { json: String },
    Character { chars: Vec<char> },
}

pub enum SymbolicTokenizer {
    Gpt2(Box<Tokenizer>),
    Character(CharTokenizer),
}

impl SymbolicTokenizer {
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        match self {
            SymbolicTokenizer::Gpt2(tok) => {
                let encoding = tok
                    .encode(text, add_special_tokens)
                    .map_err(|e| anyhow!("Failed to encode text: {}", e))?;
                Ok(encoding.get_ids().to_vec())
            }
            SymbolicTokenizer::Character(tok) => Ok(tok.encode(text, add_special_tokens)),
        }
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        match self {
            SymbolicTokenizer::Gpt2(tok) => tok
                .decode(ids, skip_special_tokens)
                .map_err(|e| anyhow!("Failed to decode tokens: {}", e)),
            SymbolicTokenizer::Character(tok) => Ok(tok.decode(ids, skip_special_tokens)),
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            SymbolicTokenizer::Gpt2(tok) => tok.get_vocab_size(true),
            SymbolicTokenizer::Character(tok) => tok.vocab_size(),
        }
    }

    pub fn snapshot(&self) -> Result<TokenizerSnapshot> {
        match self {
            SymbolicTokenizer::Gpt2(tok) => Ok(TokenizerSnapshot::Gpt2 {
                json: tok
                    .to_string(false)
                    .map_err(|e| anyhow!("Failed to serialize tokenizer: {}", e))?,
            }),
            SymbolicTokenizer::Character(tok) => Ok(TokenizerSnapshot::Character {
                chars: tok.chars(),
            }),
        }
    }

    pub fn from_snapshot(snapshot: &TokenizerSnapshot) -> Result<Self> {
        match snapshot {
            TokenizerSnapshot::Gpt2 { json } => {
                let tok = Tokenizer::from_str(json)
                    .map_err(|e| anyhow!("Failed to restore tokenizer: {}", e))?;
                Ok(SymbolicTokenizer::Gpt2(Box::new(tok)))
            }
            TokenizerSnapshot::Character { chars } => Ok(SymbolicTokenizer::Character(
                CharTokenizer::from_chars(chars.iter().copied()),
            )),
        }
    }
}

/// Loads a pretrained tokenizer from a `tokenizer.json` path or a directory
/// holding one.
pub fn from_pretrained(path: &Path) -> Result<SymbolicTokenizer> {
    let file = if path.is_dir() {
        path.join("tokenizer.json")
    } else {
        path.to_path_buf()
    };
    tracing::info!("Loading Tokenizer from: {:?}", file);
    let tok = Tokenizer::from_file(&file)
        .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", file.display(), e))?;
    Ok(SymbolicTokenizer::Gpt2(Box::new(tok)))
}

/// Creates a tokenizer of the requested type.
///
/// `character` tokenizers are built from `texts`; they cannot be created
/// empty unless a pretrained path is supplied.
pub fn create_tokenizer<S: AsRef<str>>(
    kind: TokenizerType,
    pretrained: Option<&Path>,
    texts: &[S],
) -> Result<SymbolicTokenizer> {
    if let Some(path) = pretrained {
        return from_pretrained(path);
    }
    match kind {
        TokenizerType::Gpt2 => {
            tracing::info!("Fetching pretrained '{}' tokenizer", GPT2_HUB_ID);
            let tok = Tokenizer::from_pretrained(GPT2_HUB_ID, None)
                .map_err(|e| anyhow!("Failed to fetch gpt2 tokenizer: {}", e))
                .context("pass --tokenizer-path to use a local tokenizer.json")?;
            Ok(SymbolicTokenizer::Gpt2(Box::new(tok)))
        }
        TokenizerType::Character => {
            if texts.is_empty() {
                anyhow::bail!("Character tokenizer needs text samples to build its vocabulary");
            }
            let tok = CharTokenizer::build_vocab_from_texts(texts);
            tracing::info!("Built character vocabulary: {} tokens", tok.vocab_size());
            Ok(SymbolicTokenizer::Character(tok))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_roundtrip_and_specials() {
        let tok = CharTokenizer::build_vocab_from_texts(&["hello world"]);
        // 4 specials + {' ', d, e, h, l, o, r, w}
        assert_eq!(tok.vocab_size(), 12);

        let ids = tok.encode("hello", true);
        assert_eq!(ids[0], 2); // <bos>
        assert_eq!(ids.len(), 6);
        assert_eq!(tok.decode(&ids, true), "hello");
        assert_eq!(tok.decode(&ids, false), "<bos>hello");
    }

    #[test]
    fn test_unknown_chars_map_to_unk() {
        let tok = CharTokenizer::build_vocab_from_texts(&["ab"]);
        let ids = tok.encode("az", false);
        assert_eq!(ids, vec![4, 1]);
        assert_eq!(tok.decode(&ids, true), "a");
    }

    #[test]
    fn test_snapshot_restores_same_vocab() -> Result<()> {
        let tok = SymbolicTokenizer::Character(CharTokenizer::build_vocab_from_texts(&[
            "The cat sat.",
        ]));
        let snap = tok.snapshot()?;
        let json = serde_json::to_string(&snap)?;
        assert!(json.contains("\"kind\":\"character\""));
        let restored = SymbolicTokenizer::from_snapshot(&serde_json::from_str(&json)?)?;
        assert_eq!(restored.vocab_size(), tok.vocab_size());
        assert_eq!(restored.encode("cat", false)?, tok.encode("cat", false)?);
        Ok(())
    }

    #[test]
    fn test_character_tokenizer_needs_texts() {
        let empty: [&str; 0] = [];
        assert!(create_tokenizer(TokenizerType::Character, None, &empty).is_err());
    }
}
