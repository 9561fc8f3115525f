//! Intelligence summarizer.
//!
//! Builds the project inventory, samples file contents, and asks the LLM
//! once for a [`ProjectIntelligence`] document. The answer must parse and
//! carry every required section; otherwise nothing is written and the
//! previous intelligence stays in place.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{KnowledgeError, Result};
use crate::inventory::{build_inventory, FileStructure};
use crate::llm::{LlmClient, LlmRequest};
use crate::models::{AnalysisMetadata, AnalyzeOutput, ProjectIntelligence};
use crate::scan::decode_text;
use crate::store::{self, ProjectLayout};

pub const SYSTEM_PROMPT: &str = r#"You are analyzing a codebase to understand its complete architecture and structure.

Your task is to analyze the provided file structure and code content to create a comprehensive understanding of how this project works.

Return your analysis as a single valid JSON object with this EXACT structure:

{
  "project_overview": {
    "name": "project name",
    "purpose": "what this project does in 2-3 sentences",
    "architecture_pattern": "overall architecture pattern (e.g., MVC, microservices, etc.)"
  },
  "entry_points": [
    {
      "file": "path/to/entry/file",
      "type": "entry_type (e.g., react_entry, python_main, express_server)",
      "purpose": "what this entry point does",
      "how_to_run": "command to run this entry point",
      "dependencies": ["list", "of", "key", "dependencies"]
    }
  ],
  "data_flows": [
    {
      "from": "source component/module",
      "to": "destination component/module",
      "method": "communication method (e.g., API, IPC, function call)",
      "purpose": "what data/information flows",
      "files_involved": ["list", "of", "files"]
    }
  ],
  "key_modules": [
    {
      "name": "module name",
      "file": "path/to/file",
      "purpose": "what this module does",
      "dependencies": ["other", "modules", "it", "depends", "on"],
      "interfaces": ["what", "it", "exposes", "or", "provides"]
    }
  ],
  "external_integrations": [
    {
      "service": "external service name",
      "purpose": "why it's used",
      "files": ["files", "that", "use", "this", "service"],
      "type": "integration type (API, database, etc.)"
    }
  ],
  "development_setup": {
    "install_commands": ["npm install", "pip install -r requirements.txt"],
    "run_commands": ["npm start", "python main.py"],
    "build_commands": ["npm run build"],
    "test_commands": ["npm test"]
  },
  "common_patterns": [
    "pattern 1 used throughout the codebase",
    "pattern 2 for handling X"
  ]
}

Focus on understanding:
1. How to run and develop this project
2. What the main entry points are and how they work
3. How different parts of the code communicate
4. What external services/APIs are used
5. The overall architecture and organization patterns

Be specific and accurate. If you can't determine something definitively, use "unknown" or "not_detected"."#;

/// Contents of `analysis_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRunInfo {
    pub analysis_timestamp: DateTime<Utc>,
    pub project_path: String,
    pub total_files_analyzed: usize,
    pub analysis_duration_seconds: f64,
    pub model: String,
    pub cache_enabled: bool,
}

/// A sampled file body included in the prompt.
#[derive(Debug, Clone)]
pub struct ContentSample {
    pub file_path: String,
    pub file_type: String,
    pub content: String,
}

pub async fn analyze_project(
    config: &Config,
    project_path: &Path,
    content_root: &Path,
    llm: &dyn LlmClient,
) -> Result<AnalyzeOutput> {
    let started_at = Utc::now();
    let layout = ProjectLayout::for_project(content_root, project_path)?;

    let structure = build_inventory(project_path, &config.analysis, config.scan.max_file_bytes)?;
    if structure.summary.total_code_files == 0 && structure.summary.total_config_files == 0 {
        return Err(KnowledgeError::Validation(format!(
            "no code or config files to analyze in {}",
            project_path.display()
        )));
    }
    let samples = sample_contents(project_path, &structure, config);
    info!(
        project = %layout.project_name,
        code_files = structure.summary.total_code_files,
        inventoried = structure.file_inventory.len(),
        sampled = samples.len(),
        "analyzing project"
    );

    let request = LlmRequest {
        model: config.llm.analysis_model.clone(),
        system: SYSTEM_PROMPT.to_string(),
        cache_system: true,
        user_text: render_user_prompt(&structure, &samples),
        images: Vec::new(),
        max_tokens: config.analysis.max_tokens,
    };
    let response = llm.complete(&request).await?;

    let mut intelligence = parse_intelligence(&response.text).inspect_err(|e| {
        warn!(project = %layout.project_name, error = %e, "summary rejected");
    })?;

    let completed_at = Utc::now();
    let model_used = if response.model.is_empty() {
        request.model.clone()
    } else {
        response.model.clone()
    };
    intelligence.metadata = Some(AnalysisMetadata {
        model_used: model_used.clone(),
        started_at,
        completed_at,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        cache_creation_tokens: response.cache_creation_tokens,
        cache_read_tokens: response.cache_read_tokens,
    });

    // The summary is written last: a failed run leaves the previous
    // document as the current one.
    store::write_json_atomic(&layout.file_structure_path(), &structure)?;
    store::write_json_atomic(
        &layout.analysis_metadata_path(),
        &AnalysisRunInfo {
            analysis_timestamp: started_at,
            project_path: project_path.display().to_string(),
            total_files_analyzed: structure.file_inventory.len(),
            analysis_duration_seconds: (completed_at - started_at).num_milliseconds() as f64
                / 1000.0,
            model: model_used.clone(),
            cache_enabled: true,
        },
    )?;
    store::save_intelligence(&layout, &intelligence)?;

    info!(
        project = %layout.project_name,
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "analysis saved"
    );

    Ok(AnalyzeOutput {
        project_name: layout.project_name,
        files_inventoried: structure.file_inventory.len(),
        model_used,
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
    })
}

/// First `max_content_files` inventoried files, each cut to `max_chars_per_file`.
pub fn sample_contents(
    project_path: &Path,
    structure: &FileStructure,
    config: &Config,
) -> Vec<ContentSample> {
    structure
        .file_inventory
        .iter()
        .take(config.analysis.max_content_files)
        .filter_map(|info| {
            let bytes = std::fs::read(project_path.join(&info.path)).ok()?;
            let text = decode_text(&bytes)?;
            Some(ContentSample {
                file_path: info.path.clone(),
                file_type: info.kind.clone(),
                content: text.chars().take(config.analysis.max_chars_per_file).collect(),
            })
        })
        .collect()
}

pub fn render_user_prompt(structure: &FileStructure, samples: &[ContentSample]) -> String {
    let tech = &structure.technology_detection;
    let mut out = format!(
        "PROJECT STRUCTURE:\n\
         - Project Name: {}\n\
         - Total Files: {} code files, {} config files\n\
         - Technologies Detected: {}\n\
         - Frameworks: {}\n\
         - Config Files: {}\n\n\
         FILE INVENTORY:\n",
        structure.project_name,
        structure.summary.total_code_files,
        structure.summary.total_config_files,
        tech.languages.join(", "),
        tech.frameworks.join(", "),
        tech.config_files.join(", "),
    );

    for info in &structure.file_inventory {
        let imports: Vec<&str> = info.imports.iter().take(3).map(String::as_str).collect();
        let elements: Vec<&str> = info
            .key_elements
            .iter()
            .take(2)
            .map(String::as_str)
            .collect();
        out.push_str(&format!(
            "\nFile: {} ({})\n- Size: {} chars, {} lines\n- Imports: {:?}\n- Key Elements: {:?}\n",
            info.path, info.kind, info.size, info.lines, imports, elements
        ));
    }

    out.push_str("\nCODE CONTENT:\n");
    for sample in samples {
        out.push_str(&format!(
            "\n=== FILE: {} ({}) ===\n{}\n=== END FILE ===\n",
            sample.file_path, sample.file_type, sample.content
        ));
    }
    out
}

/// The span from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse and validate a summarizer answer.
pub fn parse_intelligence(text: &str) -> Result<ProjectIntelligence> {
    let json = extract_json_object(text)
        .ok_or_else(|| KnowledgeError::MalformedSummary("no JSON object in response".into()))?;
    let mut intelligence: ProjectIntelligence = serde_json::from_str(json)
        .map_err(|e| KnowledgeError::MalformedSummary(e.to_string()))?;
    if intelligence.overview.name.trim().is_empty() {
        return Err(KnowledgeError::MalformedSummary(
            "project_overview.name is empty".into(),
        ));
    }
    // Provenance is ours to fill in, never the model's.
    intelligence.metadata = None;
    Ok(intelligence)
}
