//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all, see
//! [`Config::default`]) yields a working configuration. The struct is passed
//! explicitly into every job; nothing is cached process-wide.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{KnowledgeError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    /// Directory holding one `<project_name>/` folder per project.
    #[serde(default = "default_content_root")]
    pub root: PathBuf,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
        }
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("./content")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    /// `"cl100k_base"` or `"chars"`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_tokens: default_window_tokens(),
            overlap_tokens: default_overlap(),
            tokenizer: default_tokenizer(),
        }
    }
}

fn default_window_tokens() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_tokenizer() -> String {
    "cl100k_base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    500_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected dimensionality; `None` accepts whatever the service returns.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            analysis_model: default_analysis_model(),
            chat_model: default_chat_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_analysis_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_chat_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_inventory_files")]
    pub max_inventory_files: usize,
    #[serde(default = "default_max_content_files")]
    pub max_content_files: usize,
    #[serde(default = "default_max_chars_per_file")]
    pub max_chars_per_file: usize,
    #[serde(default = "default_analysis_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_inventory_files: default_max_inventory_files(),
            max_content_files: default_max_content_files(),
            max_chars_per_file: default_max_chars_per_file(),
            max_tokens: default_analysis_max_tokens(),
        }
    }
}

fn default_max_inventory_files() -> usize {
    50
}
fn default_max_content_files() -> usize {
    20
}
fn default_max_chars_per_file() -> usize {
    5000
}
fn default_analysis_max_tokens() -> u32 {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Whole prompt window: system context, question, images and answer.
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
    #[serde(default = "default_answer_tokens")]
    pub answer_tokens: usize,
    #[serde(default = "default_image_token_estimate")]
    pub image_token_estimate: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_prompt_tokens: default_max_prompt_tokens(),
            answer_tokens: default_answer_tokens(),
            image_token_estimate: default_image_token_estimate(),
        }
    }
}

fn default_max_prompt_tokens() -> usize {
    16_000
}
fn default_answer_tokens() -> usize {
    3000
}
fn default_image_token_estimate() -> usize {
    1600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Check cross-field constraints. Called by [`load_config`]; call it
    /// yourself when building a `Config` in code.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.window_tokens == 0 {
            return Err(KnowledgeError::Config(
                "chunking.window_tokens must be > 0".into(),
            ));
        }
        if self.chunking.overlap_tokens >= self.chunking.window_tokens {
            return Err(KnowledgeError::Config(format!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.window_tokens ({})",
                self.chunking.overlap_tokens, self.chunking.window_tokens
            )));
        }
        match self.chunking.tokenizer.as_str() {
            "cl100k_base" | "chars" => {}
            other => {
                return Err(KnowledgeError::Config(format!(
                    "unknown chunking.tokenizer '{}'. Must be cl100k_base or chars",
                    other
                )))
            }
        }

        if self.embedding.batch_size == 0 {
            return Err(KnowledgeError::Config(
                "embedding.batch_size must be >= 1".into(),
            ));
        }
        if self.embedding.dims == Some(0) {
            return Err(KnowledgeError::Config(
                "embedding.dims must be > 0 when set".into(),
            ));
        }
        match self.embedding.provider.as_str() {
            "openai" => {}
            other => {
                return Err(KnowledgeError::Config(format!(
                    "unknown embedding provider '{}'. Must be openai",
                    other
                )))
            }
        }

        if self.retrieval.top_k == 0 {
            return Err(KnowledgeError::Config("retrieval.top_k must be >= 1".into()));
        }
        if u32::try_from(self.chat.answer_tokens).is_err() {
            return Err(KnowledgeError::Config(format!(
                "chat.answer_tokens ({}) must be at most {}",
                self.chat.answer_tokens,
                u32::MAX
            )));
        }
        if self.chat.answer_tokens >= self.chat.max_prompt_tokens {
            return Err(KnowledgeError::Config(
                "chat.answer_tokens must be smaller than chat.max_prompt_tokens".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| KnowledgeError::io(path, e))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| KnowledgeError::Config(format!("failed to parse config file: {}", e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/sous.example.toml")).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");
        assert_eq!(cfg.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.window_tokens, 1000);
        assert_eq!(cfg.chunking.overlap_tokens, 200);
        assert_eq!(cfg.embedding.batch_size, 100);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg = parse_config("[chunking]\nwindow_tokens = 64\noverlap_tokens = 8\n").unwrap();
        assert_eq!(cfg.chunking.window_tokens, 64);
        assert_eq!(cfg.chunking.overlap_tokens, 8);
        assert_eq!(cfg.chunking.tokenizer, "cl100k_base");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        let err = parse_config("[chunking]\nwindow_tokens = 100\noverlap_tokens = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_unknown_tokenizer_rejected() {
        assert!(parse_config("[chunking]\ntokenizer = \"words\"\n").is_err());
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_answer_tokens_must_fit_u32() {
        let err = parse_config("[chat]\nmax_prompt_tokens = 9000000000\nanswer_tokens = 4294967296\n")
            .unwrap_err();
        assert!(err.to_string().contains("chat.answer_tokens"));
        assert!(parse_config("[chat]\nmax_prompt_tokens = 9000000000\nanswer_tokens = 4294967295\n").is_ok());
    }

    #[test]
    fn test_answer_budget_must_fit_prompt() {
        assert!(parse_config("[chat]\nmax_prompt_tokens = 100\nanswer_tokens = 200\n").is_err());
    }
}
