//! # Sous Knowledge
//!
//! Turns a source tree into project knowledge an assistant can answer from.
//!
//! Two artifacts are built per project, independently of each other:
//!
//! - a token-windowed **chunk corpus** with an exact vector index, for
//!   semantic retrieval;
//! - a structured **project intelligence** document (entry points, data
//!   flows, key modules, setup commands) written by one LLM call.
//!
//! A router picks which of the two answers a question, and the chat
//! orchestrator packs the evidence into a token budget for one multimodal
//! LLM call.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────────────┐
//! │  Scanner │──▶│ Chunker  │──▶│ Vectorizer │──▶│ embeddings/          │
//! └──────────┘   └──────────┘   └────────────┘   │   chunks + index     │
//!      │                                         └──────────┬───────────┘
//!      │         ┌───────────┐  ┌────────────┐   ┌──────────▼───────────┐
//!      └────────▶│ Inventory │─▶│ Summarizer │──▶│ project_intelligence/│
//!                └───────────┘  └────────────┘   └──────────┬───────────┘
//!                                                           ▼
//!                                ┌────────┐   ┌──────────────────────┐
//!                                │ Router │──▶│ Chat (CLI / HTTP)    │
//!                                └────────┘   └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=... ANTHROPIC_API_KEY=...
//! sous reload ~/code/my-app          # analyze + vectorize
//! sous check ~/code/my-app           # which artifacts exist
//! sous chat ~/code/my-app "How is the phone number formatted?"
//! sous serve                         # HTTP JSON API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Artifact schemas and job payloads |
//! | [`tokenizer`] | cl100k and per-character tokenizers |
//! | [`scan`] | Project tree walker |
//! | [`chunk`] | Overlapping token windows |
//! | [`embedding`] | Embedding providers and retry |
//! | [`index`] | Flat vector index and its file format |
//! | [`store`] | Artifact layout, atomic publish, artifact gate |
//! | [`vectorize`] | Embedding index builder |
//! | [`inventory`] | Heuristic file inventory |
//! | [`llm`] | LLM client (Anthropic Messages API) |
//! | [`analyze`] | Intelligence summarizer |
//! | [`router`] | Question classification and retrieval |
//! | [`chat`] | Chat orchestrator |
//! | [`jobs`] | Job dispatch and per-project locks |
//! | [`stats`] | Artifact statistics |
//! | [`server`] | HTTP JSON API |

pub mod analyze;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod inventory;
pub mod jobs;
pub mod llm;
pub mod models;
pub mod router;
pub mod scan;
pub mod server;
pub mod stats;
pub mod store;
pub mod tokenizer;
pub mod vectorize;

pub use error::{KnowledgeError, Result};
pub use jobs::KnowledgeService;
