//! # Vertex RAG
//!
//! Retrieval-augmented question answering over a document collection
//! indexed in Vertex AI Search.
//!
//! ## Architecture
//!
//! ```text
//! ingest:  files ──▶ extract ──▶ chunk ──▶ ManagedIndex::upsert ──▶ Vertex AI Search
//!
//! chat:    stdin ──▶ Agent ──▶ ReasoningModel (Gemini)
//!                      │  ▲
//!                      ▼  │ tool result
//!               search_knowledge_base ──▶ SearchClient ──▶ ManagedIndex::search
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML and environment configuration |
//! | [`error`] | Typed errors |
//! | [`models`] | Core data types |
//! | [`extract`] | Document parser (PDF, text, CSV, e-mail) |
//! | [`chunk`] | Overlapping, boundary-aware chunker |
//! | [`retry`] | Bounded exponential backoff |
//! | [`auth`] | Google Cloud access tokens |
//! | [`index`] | Managed index trait and backends |
//! | [`connector_fs`] | Source file discovery |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Search client |
//! | [`tools`] | Tools exposed to the model |
//! | [`agent`] | Chat sessions, the turn orchestrator and prompt strategies |
//! | [`chat`] | Interactive read loop |

pub mod agent;
pub mod auth;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retry;
pub mod search;
pub mod tools;
