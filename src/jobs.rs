//! Knowledge service: job dispatch and per-project locking.
//!
//! Every job runs as its own `tokio` task and reports one structured
//! result. Analysis, vectorization and reload of the same project are
//! serialized by an in-process lock keyed by the project's content
//! directory; chat takes no lock and reads whatever pair was last
//! published.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::analyze::analyze_project;
use crate::chat;
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{KnowledgeError, Result};
use crate::llm::{self, LlmClient};
use crate::models::{
    AnalyzeOutput, AnalyzeReport, ArtifactStatus, ChatRequest, ChatResponse, Chunk, Credentials,
    ReloadReport, ScoredChunk, StageOutcome, VectorizeReport,
};
use crate::router::{self, SearchFilter};
use crate::stats::{self, ProjectStats};
use crate::store::{self, ProjectLayout};
use crate::tokenizer::{create_tokenizer, Tokenizer};
use crate::vectorize::vectorize_project;

/// Builds the external service clients for a job.
pub trait ProviderFactory: Send + Sync {
    fn embedder(&self, config: &Config, credentials: &Credentials)
        -> Result<Arc<dyn EmbeddingProvider>>;
    fn llm(&self, config: &Config, credentials: &Credentials) -> Result<Arc<dyn LlmClient>>;
}

/// OpenAI embeddings and the Anthropic Messages API.
pub struct LiveProviders;

impl ProviderFactory for LiveProviders {
    fn embedder(
        &self,
        config: &Config,
        credentials: &Credentials,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider =
            embedding::create_provider(&config.embedding, credentials.openai_api_key.as_deref())?;
        Ok(Arc::from(provider))
    }

    fn llm(&self, config: &Config, credentials: &Credentials) -> Result<Arc<dyn LlmClient>> {
        let client = llm::create_llm_client(&config.llm, credentials.anthropic_api_key.as_deref())?;
        Ok(Arc::from(client))
    }
}

/// One async mutex per project content directory.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn lock_for(&self, project_dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = std::path::absolute(project_dir).unwrap_or_else(|_| project_dir.to_path_buf());
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key).or_default().clone()
    }
}

#[derive(Clone)]
pub struct KnowledgeService {
    config: Arc<Config>,
    tokenizer: Arc<dyn Tokenizer>,
    providers: Arc<dyn ProviderFactory>,
    locks: ProjectLocks,
}

impl KnowledgeService {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_providers(config, Arc::new(LiveProviders))
    }

    pub fn with_providers(config: Config, providers: Arc<dyn ProviderFactory>) -> Result<Self> {
        config.validate()?;
        let tokenizer = create_tokenizer(&config.chunking)?;
        Ok(Self {
            config: Arc::new(config),
            tokenizer,
            providers,
            locks: ProjectLocks::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Regenerate the project intelligence.
    pub async fn analyze(
        &self,
        project_path: PathBuf,
        content_root: PathBuf,
        credentials: Credentials,
    ) -> AnalyzeReport {
        let layout = match ProjectLayout::for_project(&content_root, &project_path) {
            Ok(layout) => layout,
            Err(e) => return AnalyzeReport::failed(e.to_string()),
        };

        let svc = self.clone();
        let handle = tokio::spawn(async move {
            let lock = svc.locks.lock_for(&layout.root);
            let _guard = lock.lock().await;
            svc.run_analysis(&project_path, &content_root, &credentials)
                .await
        });

        match handle.await {
            Ok(Ok(output)) => AnalyzeReport::succeeded(output),
            Ok(Err(e)) => AnalyzeReport::failed(e.to_string()),
            Err(join) => {
                error!(error = %join, "analysis task panicked");
                AnalyzeReport::failed(format!("analysis task failed: {}", join))
            }
        }
    }

    /// Rebuild the embedding index.
    pub async fn vectorize(
        &self,
        project_path: PathBuf,
        content_root: PathBuf,
        credentials: Credentials,
    ) -> Result<VectorizeReport> {
        let layout = ProjectLayout::for_project(&content_root, &project_path)?;

        let svc = self.clone();
        let handle = tokio::spawn(async move {
            let lock = svc.locks.lock_for(&layout.root);
            let _guard = lock.lock().await;
            svc.run_vectorization(&project_path, &content_root, &credentials)
                .await
        });

        handle.await.map_err(|join| {
            error!(error = %join, "vectorization task panicked");
            KnowledgeError::external("vectorize", format!("task failed: {}", join), false)
        })?
    }

    /// Analysis then vectorization under one lock acquisition.
    ///
    /// Each stage is recorded independently; a failed analysis does not
    /// stop vectorization.
    pub async fn reload(
        &self,
        project_path: PathBuf,
        content_root: PathBuf,
        credentials: Credentials,
    ) -> ReloadReport {
        let layout = match ProjectLayout::for_project(&content_root, &project_path) {
            Ok(layout) => layout,
            Err(e) => {
                return ReloadReport {
                    analysis: StageOutcome::Failed {
                        error: e.to_string(),
                    },
                    vectorization: StageOutcome::Failed {
                        error: e.to_string(),
                    },
                }
            }
        };

        let svc = self.clone();
        let handle = tokio::spawn(async move {
            let lock = svc.locks.lock_for(&layout.root);
            let _guard = lock.lock().await;
            info!(project = %layout.project_name, "reload started");

            let analysis = {
                let (svc, p, c, k) = (
                    svc.clone(),
                    project_path.clone(),
                    content_root.clone(),
                    credentials.clone(),
                );
                stage(tokio::spawn(async move { svc.run_analysis(&p, &c, &k).await })).await
            };
            let vectorization = {
                let (svc, p, c, k) = (
                    svc.clone(),
                    project_path.clone(),
                    content_root.clone(),
                    credentials.clone(),
                );
                stage(tokio::spawn(async move {
                    svc.run_vectorization(&p, &c, &k).await
                }))
                .await
            };

            info!(
                project = %layout.project_name,
                analysis = analysis.is_success(),
                vectorization = vectorization.is_success(),
                "reload finished"
            );
            ReloadReport {
                analysis,
                vectorization,
            }
        });

        match handle.await {
            Ok(report) => report,
            Err(join) => {
                let error = format!("reload task failed: {}", join);
                ReloadReport {
                    analysis: StageOutcome::Failed {
                        error: error.clone(),
                    },
                    vectorization: StageOutcome::Failed { error },
                }
            }
        }
    }

    /// Answer a question from the published artifacts.
    pub async fn chat(
        &self,
        request: ChatRequest,
        content_root: PathBuf,
        credentials: Credentials,
    ) -> ChatResponse {
        let svc = self.clone();
        let handle = tokio::spawn(async move {
            let llm = match svc.providers.llm(&svc.config, &credentials) {
                Ok(llm) => llm,
                Err(e) => return ChatResponse::failed(e.to_string()),
            };
            // Semantic retrieval needs an embedder; structural answers do not.
            let embedder = match credentials.openai_api_key {
                Some(_) => match svc.providers.embedder(&svc.config, &credentials) {
                    Ok(embedder) => Some(embedder),
                    Err(e) => return ChatResponse::failed(e.to_string()),
                },
                None => None,
            };

            chat::chat(
                &svc.config,
                &content_root,
                &request,
                llm.as_ref(),
                embedder.as_deref(),
                svc.tokenizer.as_ref(),
            )
            .await
        });

        match handle.await {
            Ok(response) => response,
            Err(join) => ChatResponse::failed(format!("chat task failed: {}", join)),
        }
    }

    pub fn check_artifacts(&self, content_root: &Path, project_path: &Path) -> Result<ArtifactStatus> {
        let layout = ProjectLayout::for_project(content_root, project_path)?;
        Ok(store::check_artifacts(&layout))
    }

    pub async fn search(
        &self,
        content_root: &Path,
        project_path: &Path,
        query: &str,
        k: Option<usize>,
        filter: &SearchFilter,
        credentials: &Credentials,
    ) -> Result<Vec<ScoredChunk>> {
        let layout = ProjectLayout::for_project(content_root, project_path)?;
        let provider = self.providers.embedder(&self.config, credentials)?;
        let k = k.unwrap_or(self.config.retrieval.top_k).max(1);
        router::search_project(&self.config, &layout, provider.as_ref(), query, k, filter).await
    }

    /// All chunks of one file from the published corpus, in order.
    /// `file_path` is relative to the project root, as stored in the corpus.
    pub async fn file_chunks(
        &self,
        content_root: &Path,
        project_path: &Path,
        file_path: &str,
    ) -> Result<Vec<Chunk>> {
        if file_path.trim().is_empty() {
            return Err(KnowledgeError::Validation("file_path is empty".into()));
        }
        let layout = ProjectLayout::for_project(content_root, project_path)?;
        let snapshot = store::load_embeddings(&layout).await?;
        Ok(snapshot.file_chunks(file_path))
    }

    pub fn stats(&self, content_root: &Path, project_path: &Path) -> Result<ProjectStats> {
        let layout = ProjectLayout::for_project(content_root, project_path)?;
        stats::project_stats(&layout)
    }

    async fn run_analysis(
        &self,
        project_path: &Path,
        content_root: &Path,
        credentials: &Credentials,
    ) -> Result<AnalyzeOutput> {
        let llm = self.providers.llm(&self.config, credentials)?;
        analyze_project(&self.config, project_path, content_root, llm.as_ref()).await
    }

    async fn run_vectorization(
        &self,
        project_path: &Path,
        content_root: &Path,
        credentials: &Credentials,
    ) -> Result<VectorizeReport> {
        let provider = self.providers.embedder(&self.config, credentials)?;
        vectorize_project(
            &self.config,
            project_path,
            content_root,
            provider.as_ref(),
            self.tokenizer.as_ref(),
        )
        .await
    }
}

async fn stage<T>(handle: tokio::task::JoinHandle<Result<T>>) -> StageOutcome<T> {
    match handle.await {
        Ok(Ok(report)) => StageOutcome::Succeeded { report },
        Ok(Err(e)) => StageOutcome::Failed {
            error: e.to_string(),
        },
        Err(join) => StageOutcome::Failed {
            error: format!("stage task failed: {}", join),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locks_are_shared_per_directory() {
        let locks = ProjectLocks::default();
        let a = locks.lock_for(Path::new("content/demo"));
        let b = locks.lock_for(Path::new("content/demo"));
        let c = locks.lock_for(Path::new("content/other"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_lock_serializes_holders() {
        let locks = ProjectLocks::default();
        let lock = locks.lock_for(Path::new("content/demo"));
        let guard = lock.lock().await;
        assert!(locks.lock_for(Path::new("content/demo")).try_lock().is_err());
        drop(guard);
        assert!(locks.lock_for(Path::new("content/demo")).try_lock().is_ok());
    }
}
