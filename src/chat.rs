//! Chat orchestrator.
//!
//! Validates the request, routes the question, packs the evidence into a
//! token budget and makes one multimodal LLM call. Artifacts are only read;
//! a missing artifact is reported, never rebuilt.
//!
//! Evidence budget:
//!
//! ```text
//! max_prompt_tokens - answer_tokens - tokens(question)
//!     - tokens(system preamble) - images × image_token_estimate
//! ```
//!
//! The summary (structural/hybrid) goes in first, then chunks in rank
//! order. The first piece that does not fit is truncated and packing stops.
//! `search_results_count` is the number of result blocks whose header made
//! it into the prompt, not the number retrieved.

use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};
use crate::llm::{parse_image, LlmClient, LlmRequest};
use crate::models::{ChatRequest, ChatResponse};
use crate::router::{self, Evidence};
use crate::store::ProjectLayout;
use crate::tokenizer::Tokenizer;

pub const SYSTEM_PREAMBLE: &str = "You are SousDev, an intelligent coding assistant with deep \
understanding of this specific project. Answer using the project context below. Reference \
specific files and code when relevant. Be practical and actionable. If the context does not \
contain the answer, say so instead of guessing.";

/// Answer a chat turn. Failures come back as `{success: false, error}`.
pub async fn chat(
    config: &Config,
    content_root: &Path,
    request: &ChatRequest,
    llm: &dyn LlmClient,
    embedder: Option<&dyn EmbeddingProvider>,
    tokenizer: &dyn Tokenizer,
) -> ChatResponse {
    match answer(config, content_root, request, llm, embedder, tokenizer).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "chat failed");
            ChatResponse::failed(e.to_string())
        }
    }
}

async fn answer(
    config: &Config,
    content_root: &Path,
    request: &ChatRequest,
    llm: &dyn LlmClient,
    embedder: Option<&dyn EmbeddingProvider>,
    tokenizer: &dyn Tokenizer,
) -> Result<ChatResponse> {
    let question = request.user_text.trim();
    if question.is_empty() {
        return Err(KnowledgeError::Validation("user_text is empty".into()));
    }
    let max_tokens = u32::try_from(config.chat.answer_tokens).map_err(|_| {
        KnowledgeError::Config(format!(
            "chat.answer_tokens ({}) does not fit in u32",
            config.chat.answer_tokens
        ))
    })?;
    let images = request
        .images
        .iter()
        .map(|raw| parse_image(raw))
        .collect::<Result<Vec<_>>>()?;

    let layout = ProjectLayout::for_project(content_root, Path::new(&request.project_path))?;
    let evidence = router::route(config, &layout, embedder, question).await?;

    let budget = evidence_budget(config, tokenizer, question, images.len());
    let packed = assemble_context(&evidence, tokenizer, budget)?;
    info!(
        project = %layout.project_name,
        strategy = evidence.strategy.as_str(),
        retrieved = evidence.chunks.len(),
        placed = packed.results_included,
        images = images.len(),
        budget,
        "answering chat turn"
    );

    let llm_request = LlmRequest {
        model: config.llm.chat_model.clone(),
        system: format!("{}\n\n{}", SYSTEM_PREAMBLE, packed.text),
        cache_system: true,
        user_text: question.to_string(),
        images,
        max_tokens,
    };
    let response = llm.complete(&llm_request).await?;

    Ok(ChatResponse {
        success: true,
        response: Some(response.text),
        error: None,
        search_strategy: Some(evidence.strategy),
        search_results_count: packed.results_included,
        timestamp: Utc::now(),
    })
}

/// Tokens left for evidence after everything else in the prompt.
pub fn evidence_budget(
    config: &Config,
    tokenizer: &dyn Tokenizer,
    question: &str,
    image_count: usize,
) -> usize {
    config
        .chat
        .max_prompt_tokens
        .saturating_sub(config.chat.answer_tokens)
        .saturating_sub(tokenizer.count(question))
        .saturating_sub(tokenizer.count(SYSTEM_PREAMBLE))
        .saturating_sub(image_count.saturating_mul(config.chat.image_token_estimate))
}

/// Evidence rendered for the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedContext {
    pub text: String,
    /// Result blocks placed whole, or truncated with their header intact.
    pub results_included: usize,
}

struct Piece {
    text: String,
    /// `Some(header)` for a result block.
    header: Option<String>,
}

/// Render evidence into at most `budget` tokens.
pub fn assemble_context(
    evidence: &Evidence,
    tokenizer: &dyn Tokenizer,
    budget: usize,
) -> Result<PackedContext> {
    let mut pieces = Vec::new();
    if let Some(intelligence) = &evidence.intelligence {
        pieces.push(Piece {
            text: format!(
                "PROJECT INTELLIGENCE:\n{}\n",
                serde_json::to_string_pretty(intelligence)?
            ),
            header: None,
        });
    }
    for scored in &evidence.chunks {
        let header = format!("--- RESULT {} ---\n", scored.rank);
        pieces.push(Piece {
            text: format!(
                "{}File: {} (chunk {}, distance {:.4})\n{}\n",
                header,
                scored.chunk.file_path,
                scored.chunk.chunk_index,
                scored.distance,
                scored.chunk.text
            ),
            header: Some(header),
        });
    }

    let mut remaining = budget;
    let mut packed = PackedContext {
        text: String::new(),
        results_included: 0,
    };
    for piece in pieces {
        let cost = tokenizer.count(&piece.text);
        if cost <= remaining {
            remaining -= cost;
            if piece.header.is_some() {
                packed.results_included += 1;
            }
            packed.text.push_str(&piece.text);
            continue;
        }
        if remaining > 0 {
            let clipped = tokenizer.truncate(&piece.text, remaining);
            if piece.header.as_deref().is_some_and(|h| clipped.starts_with(h)) {
                packed.results_included += 1;
            }
            packed.text.push_str(&clipped);
        }
        break;
    }
    Ok(packed)
}
