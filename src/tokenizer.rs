//! Deterministic tokenizers used for chunk windows and prompt budgets.
//!
//! [`Cl100kTokenizer`] wraps the `cl100k_base` BPE (the encoding of the
//! OpenAI embedding models), so chunk windows line up with what the
//! embedding service actually counts. [`CharTokenizer`] treats every Unicode
//! scalar as one token; it needs no BPE tables and is handy offline.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::config::ChunkingConfig;
use crate::error::{KnowledgeError, Result};

pub trait Tokenizer: Send + Sync {
    /// Stable name recorded in artifacts.
    fn name(&self) -> &str;
    fn encode(&self, text: &str) -> Vec<usize>;
    /// Decode a token slice. Windows may cut through a multi-byte
    /// character; such bytes decode to U+FFFD instead of failing.
    fn decode(&self, tokens: &[usize]) -> String;

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    /// Longest prefix of `text` that fits in `max_tokens`.
    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.encode(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        self.decode(&tokens[..max_tokens])
    }
}

pub struct Cl100kTokenizer {
    bpe: CoreBPE,
}

impl Cl100kTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| KnowledgeError::Config(format!("failed to load cl100k_base: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for Cl100kTokenizer {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[usize]) -> String {
        String::from_utf8_lossy(&self.bpe._decode_native(tokens)).into_owned()
    }
}

pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn name(&self) -> &str {
        "chars"
    }

    fn encode(&self, text: &str) -> Vec<usize> {
        text.chars().map(|c| c as usize).collect()
    }

    fn decode(&self, tokens: &[usize]) -> String {
        tokens
            .iter()
            .map(|&t| {
                u32::try_from(t)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
            })
            .collect()
    }
}

/// Build the tokenizer named by `chunking.tokenizer`.
pub fn create_tokenizer(config: &ChunkingConfig) -> Result<Arc<dyn Tokenizer>> {
    match config.tokenizer.as_str() {
        "cl100k_base" => Ok(Arc::new(Cl100kTokenizer::new()?)),
        "chars" => Ok(Arc::new(CharTokenizer)),
        other => Err(KnowledgeError::Config(format!(
            "unknown tokenizer '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_tokenizer_roundtrip() {
        let text = "héllo, wörld";
        let tokens = CharTokenizer.encode(text);
        assert_eq!(tokens.len(), text.chars().count());
        assert_eq!(CharTokenizer.decode(&tokens), text);
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        assert_eq!(CharTokenizer.truncate("abcdef", 3), "abc");
        assert_eq!(CharTokenizer.truncate("ab", 3), "ab");
    }

    #[test]
    fn test_cl100k_is_deterministic() {
        let tok = Cl100kTokenizer::new().unwrap();
        let text = "fn main() { println!(\"hello\"); }";
        let a = tok.encode(text);
        let b = tok.encode(text);
        assert_eq!(a, b);
        assert!(!a.is_empty());
        assert_eq!(tok.decode(&a), text);
    }
}
