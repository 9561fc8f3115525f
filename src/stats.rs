//! Artifact statistics.
//!
//! A quick summary of what a project has on disk: corpus size, files by
//! extension, index size and when each artifact was last written. Used by
//! `sous stats` to confirm that a reload did what it should.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{KnowledgeError, Result};
use crate::models::ArtifactStatus;
use crate::store::{self, ProjectLayout};

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStats {
    pub total_chunks: usize,
    pub total_vectors: usize,
    pub embedding_dimension: usize,
    pub model: String,
    pub window_size: usize,
    pub overlap: usize,
    pub files_by_extension: BTreeMap<String, usize>,
    pub index_bytes: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceStats {
    pub project_purpose: String,
    pub architecture_pattern: String,
    pub entry_points: usize,
    pub key_modules: usize,
    pub model_used: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStats {
    pub project_name: String,
    pub content_dir: String,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<EmbeddingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intelligence: Option<IntelligenceStats>,
}

/// Summarize the artifacts of one project. Absent artifacts are `None`;
/// corrupted ones are an error.
pub fn project_stats(layout: &ProjectLayout) -> Result<ProjectStats> {
    let embeddings = match store::read_embeddings(layout) {
        Ok(snapshot) => {
            let mut seen = std::collections::HashSet::new();
            let mut files_by_extension = BTreeMap::new();
            for chunk in &snapshot.corpus.chunks {
                if seen.insert(chunk.file_path.as_str()) {
                    *files_by_extension
                        .entry(extension_key(&chunk.file_path))
                        .or_insert(0) += 1;
                }
            }
            let index_path = layout.index_path();
            Some(EmbeddingStats {
                total_chunks: snapshot.corpus.chunks.len(),
                total_vectors: snapshot.index.len(),
                embedding_dimension: snapshot.index.dimension(),
                model: snapshot.corpus.embedding_model.clone(),
                window_size: snapshot.corpus.window_size,
                overlap: snapshot.corpus.overlap,
                files_by_extension,
                index_bytes: std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0),
                updated_at: store::modified_at(&index_path),
            })
        }
        Err(KnowledgeError::MissingArtifacts(_)) => None,
        Err(e) => return Err(e),
    };

    let intelligence = match store::load_intelligence(layout) {
        Ok(intel) => Some(IntelligenceStats {
            project_purpose: intel.overview.purpose.clone(),
            architecture_pattern: intel.overview.architecture_pattern.clone(),
            entry_points: intel.entry_points.len(),
            key_modules: intel.key_modules.len(),
            model_used: intel.metadata.as_ref().map(|m| m.model_used.clone()),
            updated_at: store::modified_at(&layout.analysis_path()),
        }),
        Err(KnowledgeError::MissingArtifacts(_)) => None,
        Err(e) => return Err(e),
    };

    Ok(ProjectStats {
        project_name: layout.project_name.clone(),
        content_dir: layout.root.display().to_string(),
        status: ArtifactStatus {
            intelligence_exists: intelligence.is_some(),
            embeddings_exist: embeddings.is_some(),
        },
        embeddings,
        intelligence,
    })
}

fn extension_key(file_path: &str) -> String {
    Path::new(file_path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| "(none)".to_string())
}

/// Human-readable rendering for the terminal.
pub fn render_stats(stats: &ProjectStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("Project Knowledge: {}\n", stats.project_name));
    out.push_str(&format!("{}\n\n", "=".repeat(19 + stats.project_name.len())));
    out.push_str(&format!("  Content dir:  {}\n\n", stats.content_dir));

    match &stats.embeddings {
        Some(e) => {
            out.push_str("  Embeddings\n");
            out.push_str(&format!("    Chunks:     {}\n", e.total_chunks));
            out.push_str(&format!(
                "    Vectors:    {} x {} ({})\n",
                e.total_vectors, e.embedding_dimension, e.model
            ));
            out.push_str(&format!(
                "    Window:     {} tokens, {} overlap\n",
                e.window_size, e.overlap
            ));
            out.push_str(&format!("    Index size: {}\n", format_bytes(e.index_bytes)));
            out.push_str(&format!(
                "    Updated:    {}\n",
                e.updated_at.map(format_relative).unwrap_or_else(|| "unknown".into())
            ));
            if !e.files_by_extension.is_empty() {
                out.push_str(&format!("    {:<12} {:>6}\n", "EXTENSION", "FILES"));
                for (ext, count) in &e.files_by_extension {
                    out.push_str(&format!("    {:<12} {:>6}\n", ext, count));
                }
            }
        }
        None => out.push_str("  Embeddings:   not built\n"),
    }
    out.push('\n');

    match &stats.intelligence {
        Some(i) => {
            out.push_str("  Intelligence\n");
            out.push_str(&format!("    Architecture: {}\n", i.architecture_pattern));
            out.push_str(&format!("    Purpose:      {}\n", i.project_purpose));
            out.push_str(&format!(
                "    Entry points: {}, key modules: {}\n",
                i.entry_points, i.key_modules
            ));
            out.push_str(&format!(
                "    Updated:      {}\n",
                i.updated_at.map(format_relative).unwrap_or_else(|| "unknown".into())
            ));
        }
        None => out.push_str("  Intelligence: not generated\n"),
    }
    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style, falling back to a date for old or future times.
fn format_relative(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();
    if delta < 0 || delta >= 86400 * 30 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkCorpus};
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_relative() {
        assert_eq!(format_relative(Utc::now()), "just now");
        assert_eq!(
            format_relative(Utc::now() - chrono::Duration::hours(2)),
            "2 hours ago"
        );
    }

    #[test]
    fn test_empty_project_stats() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        let stats = project_stats(&layout).unwrap();
        assert!(stats.embeddings.is_none());
        assert!(stats.intelligence.is_none());
        assert!(render_stats(&stats).contains("not built"));
    }

    #[test]
    fn test_files_by_extension_counts_files_not_chunks() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        let chunk = |file: &str, i: usize| Chunk {
            id: Chunk::make_id(file, i),
            file_path: file.into(),
            chunk_index: i,
            text: "t".into(),
            start_token: 0,
            end_token: 1,
            token_count: 1,
        };
        let chunks = vec![chunk("a.py", 0), chunk("a.py", 1), chunk("b.py", 0), chunk("README.md", 0)];
        let corpus = ChunkCorpus {
            total_chunks: chunks.len(),
            chunks,
            embedding_dimension: 2,
            project_path: "/p/demo".into(),
            project_name: "demo".into(),
            window_size: 10,
            overlap: 2,
            embedding_model: "fake".into(),
            created_at: None,
        };
        store::publish_embeddings(&layout, &corpus, vec![vec![1.0, 0.0]; 4]).unwrap();

        let stats = project_stats(&layout).unwrap();
        let e = stats.embeddings.unwrap();
        assert_eq!(e.total_chunks, 4);
        assert_eq!(e.files_by_extension.get(".py"), Some(&2));
        assert_eq!(e.files_by_extension.get(".md"), Some(&1));
        assert!(stats.status.embeddings_exist);
    }
}
