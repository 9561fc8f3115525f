//! Retrieval router.
//!
//! Classifies a question by keyword cues, resolves the preferred strategy
//! against the artifacts that actually exist, and gathers the evidence:
//! the intelligence document, ranked chunks, or both.
//!
//! # Classification
//!
//! | Structural cue | Implementation cue | Strategy     |
//! |----------------|--------------------|--------------|
//! | yes            | no                 | `structural` |
//! | yes            | yes                | `hybrid`     |
//! | no             | any                | `semantic`   |
//!
//! Cues match case-insensitively at the start of a word, so `test` matches
//! "testing" but not "latest".

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::models::{ArtifactStatus, ProjectIntelligence, ScoredChunk, SearchStrategy};
use crate::store::{self, EmbeddingSnapshot, ProjectLayout};

pub const STRUCTURAL_CUES: &[&str] = &[
    "architecture",
    "overview",
    "entry point",
    "entrypoint",
    "project structure",
    "folder structure",
    "data flow",
    "tech stack",
    "dependencies",
    "integration",
    "how to run",
    "set up",
    "setup",
    "purpose of the project",
    "what does this project",
    "key modules",
    "design pattern",
];

pub const IMPLEMENTATION_CUES: &[&str] = &[
    "function",
    "method",
    "class",
    "variable",
    "implement",
    "bug",
    "error",
    "exception",
    "line",
    "formatted",
    "format",
    "parse",
    "regex",
    "where is",
    "how is",
    "how does the code",
    "code",
    "fix",
    "refactor",
    "test",
];

/// Evidence gathered for one question.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub strategy: SearchStrategy,
    pub intelligence: Option<ProjectIntelligence>,
    pub chunks: Vec<ScoredChunk>,
}

fn contains_cue(text: &str, cue: &str) -> bool {
    text.match_indices(cue).any(|(idx, _)| {
        text[..idx]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true)
    })
}

/// Preferred strategy from the question text alone.
pub fn classify_question(question: &str) -> SearchStrategy {
    let text = question.to_lowercase();
    let structural = STRUCTURAL_CUES.iter().any(|c| contains_cue(&text, c));
    let implementation = IMPLEMENTATION_CUES.iter().any(|c| contains_cue(&text, c));

    match (structural, implementation) {
        (true, false) => SearchStrategy::Structural,
        (true, true) => SearchStrategy::Hybrid,
        (false, _) => SearchStrategy::Semantic,
    }
}

/// Degrade `preferred` to what the artifacts can serve.
pub fn resolve_strategy(preferred: SearchStrategy, status: ArtifactStatus) -> Result<SearchStrategy> {
    use SearchStrategy::*;

    let resolved = match (preferred, status.intelligence_exists, status.embeddings_exist) {
        (_, false, false) => {
            return Err(KnowledgeError::MissingArtifacts(
                "neither project intelligence nor an embedding index".into(),
            ))
        }
        (Hybrid, true, true) => Hybrid,
        (Structural, true, _) | (Hybrid, true, false) | (Semantic, true, false) => Structural,
        (Semantic, _, true) | (Structural, false, true) | (Hybrid, false, true) => Semantic,
    };
    Ok(resolved)
}

/// Optional restrictions on a vector search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Keep only files with these extensions (`.rs` or `rs`).
    pub extensions: Vec<String>,
    /// Drop hits whose cosine similarity (`1 - distance`) is below this.
    pub min_similarity: Option<f32>,
}

/// Rank chunks for a query vector.
///
/// With an extension filter, `3 × k` candidates are fetched and filtered,
/// so fewer than `k` results may come back. Ranks are assigned after
/// filtering.
pub fn rank_chunks(
    snapshot: &EmbeddingSnapshot,
    query_vector: &[f32],
    k: usize,
    filter: &SearchFilter,
) -> Vec<ScoredChunk> {
    let wanted: HashSet<String> = filter
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();
    let fetch = if wanted.is_empty() { k } else { k.saturating_mul(3) };

    snapshot
        .index
        .search(query_vector, fetch)
        .into_iter()
        .filter(|hit| {
            filter
                .min_similarity
                .map_or(true, |min| 1.0 - hit.distance >= min)
        })
        .filter_map(|hit| snapshot.corpus.chunks.get(hit.position).map(|c| (c, hit)))
        .filter(|(chunk, _)| {
            wanted.is_empty()
                || std::path::Path::new(&chunk.file_path)
                    .extension()
                    .map(|e| wanted.contains(&e.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
        })
        .take(k)
        .enumerate()
        .map(|(rank, (chunk, hit))| ScoredChunk {
            chunk: chunk.clone(),
            distance: hit.distance,
            rank: rank + 1,
        })
        .collect()
}

/// Embed `query` and rank it against an already loaded snapshot.
pub async fn search_snapshot(
    config: &Config,
    snapshot: &EmbeddingSnapshot,
    provider: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
    filter: &SearchFilter,
) -> Result<Vec<ScoredChunk>> {
    if query.trim().is_empty() {
        return Err(KnowledgeError::Validation("query is empty".into()));
    }
    let query_vector = embed_query(provider, &config.embedding, query).await?;
    Ok(rank_chunks(snapshot, &query_vector, k, filter))
}

/// Vector search over a project's published corpus.
pub async fn search_project(
    config: &Config,
    layout: &ProjectLayout,
    provider: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
    filter: &SearchFilter,
) -> Result<Vec<ScoredChunk>> {
    if query.trim().is_empty() {
        return Err(KnowledgeError::Validation("query is empty".into()));
    }
    let snapshot = store::load_embeddings(layout).await?;
    search_snapshot(config, &snapshot, provider, query, k, filter).await
}

/// Load the embedding pair once for routing. Absent or still corrupted
/// after the load retries both count as "no index".
async fn available_embeddings(layout: &ProjectLayout) -> Result<Option<EmbeddingSnapshot>> {
    match store::load_embeddings(layout).await {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(KnowledgeError::MissingArtifacts(_)) => Ok(None),
        Err(e @ KnowledgeError::ArtifactCorruption { .. }) => {
            warn!(project = %layout.project_name, error = %e, "ignoring unusable embedding index");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn available_intelligence(layout: &ProjectLayout) -> Result<Option<ProjectIntelligence>> {
    match store::load_intelligence(layout) {
        Ok(intelligence) => Ok(Some(intelligence)),
        Err(KnowledgeError::MissingArtifacts(_)) => Ok(None),
        Err(e @ KnowledgeError::ArtifactCorruption { .. }) => {
            warn!(project = %layout.project_name, error = %e, "ignoring unreadable project intelligence");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Classify, resolve and execute. Reads artifacts only, and each of them
/// once, so the evidence comes from the same pair the strategy was
/// resolved against.
pub async fn route(
    config: &Config,
    layout: &ProjectLayout,
    provider: Option<&dyn EmbeddingProvider>,
    question: &str,
) -> Result<Evidence> {
    let preferred = classify_question(question);
    let mut intelligence = available_intelligence(layout)?;
    let embeddings = available_embeddings(layout).await?;
    let status = ArtifactStatus {
        intelligence_exists: intelligence.is_some(),
        embeddings_exist: embeddings.is_some(),
    };
    let strategy = resolve_strategy(preferred, status)?;
    debug!(
        preferred = preferred.as_str(),
        strategy = strategy.as_str(),
        intelligence = status.intelligence_exists,
        embeddings = status.embeddings_exist,
        "routing question"
    );

    if strategy == SearchStrategy::Semantic {
        intelligence = None;
    }

    let chunks = match (strategy, &embeddings) {
        (SearchStrategy::Semantic | SearchStrategy::Hybrid, Some(snapshot)) => {
            let provider = provider.ok_or_else(|| {
                KnowledgeError::Validation("an OpenAI API key is required for semantic search".into())
            })?;
            search_snapshot(
                config,
                snapshot,
                provider,
                question,
                config.retrieval.top_k,
                &SearchFilter::default(),
            )
            .await?
        }
        _ => Vec::new(),
    };

    Ok(Evidence {
        strategy,
        intelligence,
        chunks,
    })
}
