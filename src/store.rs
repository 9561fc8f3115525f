//! On-disk artifact layout, atomic publishing and the artifact gate.
//!
//! ```text
//! <content_root>/<project_name>/
//!   embeddings/
//!     chunks_metadata.json      ChunkCorpus
//!     embeddings.index          FlatIndex (binds to the corpus by digest)
//!     file_stats.json
//!     vectorization_info.json
//!   project_intelligence/
//!     full_analysis.json        ProjectIntelligence
//!     file_structure.json
//!     analysis_metadata.json
//! ```
//!
//! Every file is written to a temp sibling, fsynced and renamed into place.
//! The corpus/index pair is renamed one after the other, so a reader can
//! briefly observe a new corpus next to the old index; the digest in the
//! index header exposes that, and [`load_embeddings`] re-reads until the
//! pair agrees.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{KnowledgeError, Result};
use crate::index::{corpus_digest, FlatIndex};
use crate::models::{ArtifactStatus, Chunk, ChunkCorpus, ProjectIntelligence};
use crate::scan;

const LOAD_ATTEMPTS: u32 = 3;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Paths of one project's artifacts.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    pub project_name: String,
    pub root: PathBuf,
}

impl ProjectLayout {
    pub fn new(content_root: &Path, project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            root: content_root.join(project_name),
        }
    }

    /// Layout keyed by the project directory's name.
    pub fn for_project(content_root: &Path, project_path: &Path) -> Result<Self> {
        let name = scan::project_name(project_path)?;
        Ok(Self::new(content_root, &name))
    }

    pub fn embeddings_dir(&self) -> PathBuf {
        self.root.join("embeddings")
    }

    pub fn intelligence_dir(&self) -> PathBuf {
        self.root.join("project_intelligence")
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.embeddings_dir().join("chunks_metadata.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.embeddings_dir().join("embeddings.index")
    }

    pub fn file_stats_path(&self) -> PathBuf {
        self.embeddings_dir().join("file_stats.json")
    }

    pub fn vectorization_info_path(&self) -> PathBuf {
        self.embeddings_dir().join("vectorization_info.json")
    }

    pub fn analysis_path(&self) -> PathBuf {
        self.intelligence_dir().join("full_analysis.json")
    }

    pub fn file_structure_path(&self) -> PathBuf {
        self.intelligence_dir().join("file_structure.json")
    }

    pub fn analysis_metadata_path(&self) -> PathBuf {
        self.intelligence_dir().join("analysis_metadata.json")
    }
}

/// A consistent corpus/index pair.
#[derive(Debug, Clone)]
pub struct EmbeddingSnapshot {
    pub corpus: ChunkCorpus,
    pub index: FlatIndex,
}

impl EmbeddingSnapshot {
    /// Every chunk of one file, in `chunk_index` order.
    pub fn file_chunks(&self, file_path: &str) -> Vec<Chunk> {
        self.corpus
            .chunks
            .iter()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect()
    }
}

// ============ Atomic writes ============

/// Write `bytes` to `path` via a temp sibling, fsync and rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage(path, bytes)?;
    commit(&tmp, path)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

/// Write the temp file and fsync it. Returns the temp path.
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| KnowledgeError::Validation(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(dir).map_err(|e| KnowledgeError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let mut file = File::create(&tmp).map_err(|e| KnowledgeError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| KnowledgeError::io(&tmp, e))?;
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> Result<()> {
    if let Err(e) = fs::rename(tmp, path) {
        let _ = fs::remove_file(tmp);
        return Err(KnowledgeError::io(path, e));
    }
    if let Some(dir) = path.parent() {
        // Directory fsync is best effort; some filesystems refuse it.
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

// ============ Embeddings ============

/// Build the index for `corpus` and replace both artifacts.
///
/// `vectors[i]` belongs to `corpus.chunks[i]`. Either both files are
/// staged and renamed, or the existing pair is left as it was.
pub fn publish_embeddings(
    layout: &ProjectLayout,
    corpus: &ChunkCorpus,
    vectors: Vec<Vec<f32>>,
) -> Result<FlatIndex> {
    if vectors.len() != corpus.chunks.len() {
        return Err(KnowledgeError::Validation(format!(
            "{} vectors for {} chunks",
            vectors.len(),
            corpus.chunks.len()
        )));
    }

    let corpus_json = serde_json::to_vec_pretty(corpus)?;
    let index = FlatIndex::build(vectors, corpus_digest(&corpus_json))
        .map_err(KnowledgeError::Validation)?;

    let chunks_path = layout.chunks_path();
    let index_path = layout.index_path();

    let staged_corpus = stage(&chunks_path, &corpus_json)?;
    let staged_index = match stage(&index_path, &index.to_bytes()) {
        Ok(p) => p,
        Err(e) => {
            let _ = fs::remove_file(&staged_corpus);
            return Err(e);
        }
    };

    if let Err(e) = commit(&staged_corpus, &chunks_path) {
        let _ = fs::remove_file(&staged_index);
        return Err(e);
    }
    commit(&staged_index, &index_path)?;

    debug!(
        project = %layout.project_name,
        chunks = corpus.chunks.len(),
        "published embeddings"
    );
    Ok(index)
}

/// Read the pair once and check that it agrees.
pub fn read_embeddings(layout: &ProjectLayout) -> Result<EmbeddingSnapshot> {
    let chunks_path = layout.chunks_path();
    let index_path = layout.index_path();

    if !chunks_path.is_file() || !index_path.is_file() {
        return Err(KnowledgeError::MissingArtifacts(format!(
            "embedding index for project '{}'",
            layout.project_name
        )));
    }

    let corpus_json = fs::read(&chunks_path).map_err(|e| KnowledgeError::io(&chunks_path, e))?;
    let index_bytes = fs::read(&index_path).map_err(|e| KnowledgeError::io(&index_path, e))?;

    let index = FlatIndex::from_bytes(&index_bytes)
        .map_err(|reason| KnowledgeError::corruption(&index_path, reason))?;
    if index.digest() != &corpus_digest(&corpus_json) {
        return Err(KnowledgeError::corruption(
            &index_path,
            "index was built from a different chunks_metadata.json",
        ));
    }

    let corpus: ChunkCorpus = serde_json::from_slice(&corpus_json)
        .map_err(|e| KnowledgeError::corruption(&chunks_path, e.to_string()))?;
    if corpus.chunks.len() != index.len() || corpus.total_chunks != index.len() {
        return Err(KnowledgeError::corruption(
            &index_path,
            format!(
                "index holds {} vectors, corpus holds {} chunks",
                index.len(),
                corpus.chunks.len()
            ),
        ));
    }

    Ok(EmbeddingSnapshot { corpus, index })
}

/// Read the pair, retrying briefly while a publish may be in flight.
pub async fn load_embeddings(layout: &ProjectLayout) -> Result<EmbeddingSnapshot> {
    let mut attempt = 1;
    loop {
        match read_embeddings(layout) {
            Err(e @ KnowledgeError::ArtifactCorruption { .. }) if attempt < LOAD_ATTEMPTS => {
                debug!(attempt, error = %e, "embedding pair inconsistent, re-reading");
                attempt += 1;
                tokio::time::sleep(LOAD_RETRY_DELAY).await;
            }
            Err(e @ KnowledgeError::ArtifactCorruption { .. }) => {
                warn!(project = %layout.project_name, error = %e, "embedding artifacts corrupted");
                return Err(e);
            }
            other => return other,
        }
    }
}

// ============ Intelligence ============

pub fn save_intelligence(layout: &ProjectLayout, intelligence: &ProjectIntelligence) -> Result<()> {
    write_json_atomic(&layout.analysis_path(), intelligence)
}

pub fn load_intelligence(layout: &ProjectLayout) -> Result<ProjectIntelligence> {
    let path = layout.analysis_path();
    if !path.is_file() {
        return Err(KnowledgeError::MissingArtifacts(format!(
            "project intelligence for project '{}'",
            layout.project_name
        )));
    }
    read_json(&path)
}

/// Parse a JSON artifact; parse failures are corruption.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| KnowledgeError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| KnowledgeError::corruption(path, e.to_string()))
}

// ============ Gate ============

/// Which artifacts are present and usable. Never writes anything.
pub fn check_artifacts(layout: &ProjectLayout) -> ArtifactStatus {
    ArtifactStatus {
        intelligence_exists: load_intelligence(layout).is_ok(),
        embeddings_exist: read_embeddings(layout).is_ok(),
    }
}

pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus_of(n: usize) -> ChunkCorpus {
        let chunks = (0..n)
            .map(|i| Chunk {
                id: Chunk::make_id("a.rs", i),
                file_path: "a.rs".into(),
                chunk_index: i,
                text: format!("chunk {}", i),
                start_token: i * 8,
                end_token: i * 8 + 10,
                token_count: 10,
            })
            .collect();
        ChunkCorpus {
            chunks,
            total_chunks: n,
            embedding_dimension: 2,
            project_path: "/p/demo".into(),
            project_name: "demo".into(),
            window_size: 10,
            overlap: 2,
            embedding_model: "fake".into(),
            created_at: None,
        }
    }

    fn vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![1.0, i as f32]).collect()
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x/out.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        let entries: Vec<_> = fs::read_dir(tmp.path().join("x")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_then_load() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        publish_embeddings(&layout, &corpus_of(3), vectors(3)).unwrap();

        let snapshot = load_embeddings(&layout).await.unwrap();
        assert_eq!(snapshot.corpus.chunks.len(), 3);
        assert_eq!(snapshot.index.len(), 3);
        assert!(check_artifacts(&layout).embeddings_exist);
    }

    #[test]
    fn test_vector_count_mismatch_rejected_before_writing() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        assert!(publish_embeddings(&layout, &corpus_of(3), vectors(2)).is_err());
        assert!(!layout.chunks_path().exists());
    }

    #[tokio::test]
    async fn test_torn_pair_reported_as_corruption() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        publish_embeddings(&layout, &corpus_of(2), vectors(2)).unwrap();
        let old_index = fs::read(layout.index_path()).unwrap();
        publish_embeddings(&layout, &corpus_of(4), vectors(4)).unwrap();

        // New corpus next to the old index: a crash between the two renames.
        fs::write(layout.index_path(), old_index).unwrap();

        let err = load_embeddings(&layout).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::ArtifactCorruption { .. }));
        assert!(!check_artifacts(&layout).embeddings_exist);
    }

    #[test]
    fn test_gate_checks_artifacts_independently() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        assert_eq!(
            check_artifacts(&layout),
            ArtifactStatus {
                intelligence_exists: false,
                embeddings_exist: false
            }
        );

        publish_embeddings(&layout, &corpus_of(1), vectors(1)).unwrap();
        let status = check_artifacts(&layout);
        assert!(status.embeddings_exist);
        assert!(!status.intelligence_exists);

        fs::create_dir_all(layout.intelligence_dir()).unwrap();
        fs::write(layout.analysis_path(), b"{not json").unwrap();
        assert!(!check_artifacts(&layout).intelligence_exists);
    }

    #[test]
    fn test_missing_index_is_missing_artifacts() {
        let tmp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "demo");
        publish_embeddings(&layout, &corpus_of(1), vectors(1)).unwrap();
        fs::remove_file(layout.index_path()).unwrap();
        assert!(matches!(
            read_embeddings(&layout).unwrap_err(),
            KnowledgeError::MissingArtifacts(_)
        ));
    }
}
