//! Embedding index builder.
//!
//! Scans the project, chunks every file, embeds the chunks in batches and
//! publishes a fresh corpus/index pair. Individual batch failures do not
//! abort the run: the files they touch are dropped and the report says
//! `partial`. Only a run where every batch failed is an error, and then the
//! previous artifacts stay in place.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{embed_with_retry, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::models::{Chunk, ChunkCorpus, SkippedFile, VectorizeReport, VectorizeStatus};
use crate::scan::{scan_project, SourceFile};
use crate::store::{self, ProjectLayout};
use crate::tokenizer::Tokenizer;

/// Per-file entry of `file_stats.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size_bytes: u64,
    pub chunk_count: usize,
    pub extension: String,
}

/// Contents of `vectorization_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorizationInfo {
    pub status: VectorizeStatus,
    pub total_files: usize,
    pub total_chunks: usize,
    pub embedding_dimension: usize,
    pub model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub tokenizer: String,
    pub embeddings_path: String,
    pub metadata_path: String,
    pub stats_path: String,
    pub created_at: DateTime<Utc>,
}

/// Rebuild the embedding artifacts for `project_path`.
pub async fn vectorize_project(
    config: &Config,
    project_path: &Path,
    content_root: &Path,
    provider: &dyn EmbeddingProvider,
    tokenizer: &dyn Tokenizer,
) -> Result<VectorizeReport> {
    let layout = ProjectLayout::for_project(content_root, project_path)?;
    let scan = scan_project(project_path, &config.scan)?;
    let model = provider.model_name().to_string();

    info!(
        project = %layout.project_name,
        files = scan.files.len(),
        skipped = scan.skipped.len(),
        "vectorizing project"
    );

    let (chunks, mut file_stats) = chunk_files(config, tokenizer, &scan.files);
    let mut skipped_files = scan.skipped;

    if chunks.is_empty() {
        warn!(project = %layout.project_name, "no files to vectorize");
        return Ok(VectorizeReport {
            status: VectorizeStatus::NoFiles,
            total_files: 0,
            total_chunks: 0,
            embedding_dimension: 0,
            model,
            skipped_files,
            failed_batches: 0,
        });
    }

    let outcome = embed_chunks(config, provider, &chunks).await;
    let total_batches = chunks.len().div_ceil(config.embedding.batch_size);

    if outcome.failed_batches == total_batches {
        return Err(KnowledgeError::external(
            "embedding",
            format!(
                "all {} embedding batches failed; existing artifacts left untouched. Last error: {}",
                total_batches,
                outcome.last_error.unwrap_or_default()
            ),
            false,
        ));
    }

    // A file keeps its chunks only if every one of them was embedded, so
    // surviving files still have contiguous chunk indices.
    let failed_files: BTreeSet<String> = chunks
        .iter()
        .zip(outcome.vectors.iter())
        .filter(|(_, v)| v.is_none())
        .map(|(c, _)| c.file_path.clone())
        .collect();

    let mut kept_chunks = Vec::with_capacity(chunks.len());
    let mut kept_vectors = Vec::with_capacity(chunks.len());
    for (chunk, vector) in chunks.into_iter().zip(outcome.vectors) {
        if failed_files.contains(&chunk.file_path) {
            continue;
        }
        if let Some(v) = vector {
            kept_chunks.push(chunk);
            kept_vectors.push(v);
        }
    }

    for path in &failed_files {
        warn!(file = %path, "dropping file with unembedded chunks");
        file_stats.remove(path);
        skipped_files.push(SkippedFile {
            path: path.clone(),
            reason: "embedding failed for one or more chunks".to_string(),
        });
    }

    if kept_chunks.is_empty() {
        return Err(KnowledgeError::external(
            "embedding",
            "every file had at least one failed embedding batch; existing artifacts left untouched",
            false,
        ));
    }

    let status = if failed_files.is_empty() {
        VectorizeStatus::Completed
    } else {
        VectorizeStatus::Partial
    };
    let dimension = kept_vectors.first().map(|v| v.len()).unwrap_or(0);

    let corpus = ChunkCorpus {
        total_chunks: kept_chunks.len(),
        chunks: kept_chunks,
        embedding_dimension: dimension,
        project_path: project_path.display().to_string(),
        project_name: layout.project_name.clone(),
        window_size: config.chunking.window_tokens,
        overlap: config.chunking.overlap_tokens,
        embedding_model: model.clone(),
        created_at: Some(Utc::now()),
    };

    store::publish_embeddings(&layout, &corpus, kept_vectors)?;

    let info_doc = VectorizationInfo {
        status,
        total_files: file_stats.len(),
        total_chunks: corpus.total_chunks,
        embedding_dimension: dimension,
        model: model.clone(),
        chunk_size: config.chunking.window_tokens,
        chunk_overlap: config.chunking.overlap_tokens,
        tokenizer: tokenizer.name().to_string(),
        embeddings_path: layout.index_path().display().to_string(),
        metadata_path: layout.chunks_path().display().to_string(),
        stats_path: layout.file_stats_path().display().to_string(),
        created_at: Utc::now(),
    };
    store::write_json_atomic(&layout.file_stats_path(), &file_stats)?;
    store::write_json_atomic(&layout.vectorization_info_path(), &info_doc)?;

    info!(
        project = %layout.project_name,
        files = file_stats.len(),
        chunks = corpus.total_chunks,
        failed_batches = outcome.failed_batches,
        status = ?status,
        "vectorization finished"
    );

    Ok(VectorizeReport {
        status,
        total_files: file_stats.len(),
        total_chunks: corpus.total_chunks,
        embedding_dimension: dimension,
        model,
        skipped_files,
        failed_batches: outcome.failed_batches,
    })
}

fn chunk_files(
    config: &Config,
    tokenizer: &dyn Tokenizer,
    files: &[SourceFile],
) -> (Vec<Chunk>, BTreeMap<String, FileStat>) {
    let mut chunks = Vec::new();
    let mut stats = BTreeMap::new();

    for file in files {
        let file_chunks = chunk_text(
            tokenizer,
            &file.relative_path,
            &file.text,
            config.chunking.window_tokens,
            config.chunking.overlap_tokens,
        );
        if file_chunks.is_empty() {
            continue;
        }
        stats.insert(
            file.relative_path.clone(),
            FileStat {
                size_bytes: file.size_bytes,
                chunk_count: file_chunks.len(),
                extension: file.extension(),
            },
        );
        chunks.extend(file_chunks);
    }

    (chunks, stats)
}

struct EmbedOutcome {
    /// One slot per chunk; `None` when its batch failed.
    vectors: Vec<Option<Vec<f32>>>,
    failed_batches: usize,
    last_error: Option<String>,
}

async fn embed_chunks(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
) -> EmbedOutcome {
    let batch_size = config.embedding.batch_size;
    let base_delay = Duration::from_millis(config.embedding.retry_base_delay_ms);
    let mut expected_dim = config.embedding.dims;

    let mut outcome = EmbedOutcome {
        vectors: Vec::with_capacity(chunks.len()),
        failed_batches: 0,
        last_error: None,
    };

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let result = embed_with_retry(provider, &texts, config.embedding.max_retries, base_delay)
            .await
            .and_then(|vectors| check_dimensions(vectors, &mut expected_dim));

        match result {
            Ok(vectors) => outcome.vectors.extend(vectors.into_iter().map(Some)),
            Err(e) => {
                warn!(batch = batch_no, chunks = batch.len(), error = %e, "embedding batch failed");
                outcome.failed_batches += 1;
                outcome.last_error = Some(e.to_string());
                outcome.vectors.extend(batch.iter().map(|_| None));
            }
        }
    }

    outcome
}

/// Every vector must match the configured dimension, or the first one seen.
fn check_dimensions(vectors: Vec<Vec<f32>>, expected: &mut Option<usize>) -> Result<Vec<Vec<f32>>> {
    for v in &vectors {
        let want = *expected.get_or_insert(v.len());
        if v.len() != want || want == 0 {
            return Err(KnowledgeError::external(
                "embedding",
                format!("vector dimension {} (expected {})", v.len(), want),
                false,
            ));
        }
    }
    Ok(vectors)
}
