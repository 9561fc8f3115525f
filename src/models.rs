//! Core data models used throughout the pipeline.
//!
//! These are the persisted artifact schemas (chunk corpus, project
//! intelligence) and the request/response payloads of the job contract.
//! Every payload that crosses a process or disk boundary is a typed
//! `serde` struct and is validated when read back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token window of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{file_path}_{chunk_index}"`.
    pub id: String,
    pub file_path: String,
    #[serde(alias = "chunk_id")]
    pub chunk_index: usize,
    pub text: String,
    pub start_token: usize,
    pub end_token: usize,
    pub token_count: usize,
}

impl Chunk {
    pub fn make_id(file_path: &str, chunk_index: usize) -> String {
        format!("{}_{}", file_path, chunk_index)
    }
}

/// Every chunk of a project, in index order, plus corpus metadata.
/// Stored as `embeddings/chunks_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkCorpus {
    pub chunks: Vec<Chunk>,
    pub total_chunks: usize,
    pub embedding_dimension: usize,
    pub project_path: String,
    pub project_name: String,
    #[serde(default)]
    pub window_size: usize,
    #[serde(default)]
    pub overlap: usize,
    #[serde(default)]
    pub embedding_model: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Outcome of a vectorize run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorizeStatus {
    Completed,
    NoFiles,
    Partial,
}

/// A file the scanner or chunker refused, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizeReport {
    pub status: VectorizeStatus,
    pub total_files: usize,
    pub total_chunks: usize,
    pub embedding_dimension: usize,
    pub model: String,
    #[serde(default)]
    pub skipped_files: Vec<SkippedFile>,
    #[serde(default)]
    pub failed_batches: usize,
}

// ============ Project intelligence ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectOverview {
    pub name: String,
    pub purpose: String,
    pub architecture_pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    #[serde(default)]
    pub file: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub how_to_run: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub files_involved: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyModule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalIntegration {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentSetup {
    #[serde(default)]
    pub install_commands: Vec<String>,
    #[serde(default)]
    pub run_commands: Vec<String>,
    #[serde(default)]
    pub build_commands: Vec<String>,
    #[serde(default)]
    pub test_commands: Vec<String>,
}

/// Provenance of an intelligence document. Filled in by the summarizer,
/// never by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub model_used: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

/// Architectural digest of a project.
/// Stored as `project_intelligence/full_analysis.json`.
///
/// The top-level sections are required: a document missing any of them is
/// rejected rather than persisted half-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectIntelligence {
    #[serde(rename = "project_overview", alias = "overview")]
    pub overview: ProjectOverview,
    pub entry_points: Vec<EntryPoint>,
    pub data_flows: Vec<DataFlow>,
    pub key_modules: Vec<KeyModule>,
    pub external_integrations: Vec<ExternalIntegration>,
    pub development_setup: DevelopmentSetup,
    pub common_patterns: Vec<String>,
    #[serde(default, alias = "_metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalysisMetadata>,
}

// ============ Job contract ============

/// API credentials, passed explicitly with every job.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Credentials {
    pub fn new(openai_api_key: Option<String>, anthropic_api_key: Option<String>) -> Self {
        let clean = |k: Option<String>| k.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            openai_api_key: clean(openai_api_key),
            anthropic_api_key: clean(anthropic_api_key),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeOutput {
    pub project_name: String,
    pub files_inventoried: usize,
    pub model_used: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// `{success, output | error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AnalyzeOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzeReport {
    pub fn succeeded(output: AnalyzeOutput) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// One stage of a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Succeeded { report: T },
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Composite result of analyze-then-vectorize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadReport {
    pub analysis: StageOutcome<AnalyzeOutput>,
    pub vectorization: StageOutcome<VectorizeReport>,
}

impl ReloadReport {
    pub fn fully_succeeded(&self) -> bool {
        self.analysis.is_success() && self.vectorization.is_success()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    pub intelligence_exists: bool,
    pub embeddings_exist: bool,
}

impl ArtifactStatus {
    pub fn all_present(&self) -> bool {
        self.intelligence_exists && self.embeddings_exist
    }
}

/// A user turn addressed to one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_text: String,
    /// `data:image/...;base64,` URLs or bare base64 (treated as JPEG).
    #[serde(default)]
    pub images: Vec<String>,
    pub project_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_strategy: Option<SearchStrategy>,
    pub search_results_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl ChatResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
            search_strategy: None,
            search_results_count: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Which knowledge source answers a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Project intelligence only.
    Structural,
    /// Vector search over the chunk corpus.
    Semantic,
    /// Both, summary first.
    Hybrid,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

/// A chunk returned by vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Cosine distance, `1 - similarity`. Smaller is closer.
    pub distance: f32,
    pub rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(Chunk::make_id("src/main.rs", 3), "src/main.rs_3");
    }

    #[test]
    fn test_credentials_blank_keys_are_absent() {
        let creds = Credentials::new(Some("  ".into()), Some(" sk-ant ".into()));
        assert!(creds.openai_api_key.is_none());
        assert_eq!(creds.anthropic_api_key.as_deref(), Some("sk-ant"));
    }

    #[test]
    fn test_intelligence_accepts_legacy_keys() {
        let raw = r#"{
            "project_overview": {"name": "demo", "purpose": "p", "architecture_pattern": "MVC"},
            "entry_points": [{"file": "main.py", "type": "python_main"}],
            "data_flows": [],
            "key_modules": [],
            "external_integrations": [],
            "development_setup": {"install_commands": ["pip install -r requirements.txt"]},
            "common_patterns": ["dataclasses"],
            "_metadata": {
                "model_used": "m",
                "started_at": "2025-01-01T00:00:00Z",
                "completed_at": "2025-01-01T00:01:00Z",
                "input_tokens": 10,
                "output_tokens": 20
            }
        }"#;
        let intel: ProjectIntelligence = serde_json::from_str(raw).unwrap();
        assert_eq!(intel.overview.architecture_pattern, "MVC");
        assert_eq!(intel.entry_points[0].kind, "python_main");
        assert_eq!(intel.metadata.unwrap().output_tokens, 20);
    }

    #[test]
    fn test_intelligence_missing_section_rejected() {
        let raw = r#"{"project_overview": {"name": "x", "purpose": "", "architecture_pattern": ""}}"#;
        assert!(serde_json::from_str::<ProjectIntelligence>(raw).is_err());
    }

    #[test]
    fn test_stage_outcome_serializes_state_tag() {
        let outcome: StageOutcome<()> = StageOutcome::Failed {
            error: "boom".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
