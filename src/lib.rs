//! # docs-retrieval-core
//!
//! **A multi-project documentation retrieval service for AI coding agents.**
//!
//! Ingests developer documentation (HTTP doc sites, GitHub repositories,
//! local markdown trees) for one or more named projects, normalizes it into
//! retrievable chunks, and exposes hybrid search over a JSON-RPC control
//! plane (Model Context Protocol).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌────────┐   ┌─────────┐   ┌─────────┐   ┌──────────────┐
//! │ Source Adapters│──▶│ Parser │──▶│ Chunker │──▶│ Indexer │──▶│ Text + Vector │
//! │  (C6)          │   │ (C5)   │   │ (C4)    │   │ (C8)    │   │ Stores (C3/C2)│
//! └────────────────┘   └────────┘   └─────────┘   └────┬────┘   └──────┬───────┘
//!         ▲                                            │               │
//!         │            driven by Coordinator (C11)     │               ▼
//!         └──────────── via Project Registry (C10) ─────┘        Hybrid Searcher (C9)
//!                                                                       │
//!                                                                       ▼
//!                                                              MCP JSON-RPC server
//! ```
//!
//! ## Data Flow
//!
//! 1. The **Project Registry** ([`registry`]) loads the on-disk project and
//!    source layout.
//! 2. The **Coordinator** ([`coordinator`]) drives one indexing run per
//!    project: it applies the **Quality Gate** ([`quality_gate`]) to
//!    candidate GitHub sources, then hands each accepted source to the
//!    **Indexer** ([`indexer`]).
//! 3. **Source Adapters** ([`source_adapters`]) yield [`models::RawDocument`]s
//!    with a resumable cursor.
//! 4. The **Parser** ([`parser`]) converts a raw document into structured
//!    sections; the **Chunker** ([`chunk`]) splits those into bounded,
//!    typed [`models::Chunk`]s with stable identity.
//! 5. Changed chunks are embedded via the **Embedding Client**
//!    ([`embedding`]) and written to the **Text Store** ([`text_store`])
//!    and **Vector Store** ([`vector_store`]) in a two-phase write.
//! 6. The **Hybrid Searcher** ([`search`]) fuses dense and lexical
//!    candidates with Reciprocal Rank Fusion for retrieval.
//! 7. Results are exposed via the **CLI** (`ctx`) and the **MCP JSON-RPC
//!    server** ([`server`]).
//!
//! ## Quick Start
//!
//! ```bash
//! ctx index --list                        # enumerate configured projects
//! ctx index --project mina                # index every source of "mina"
//! ctx index --project mina --source mina-sdk --resume
//! ctx serve                               # start the MCP JSON-RPC server
//! ```
//!
//! ## Modules
//!
//! | Module | Component | Purpose |
//! |--------|-----------|---------|
//! | [`models`] | — | Core data types: `Project`, `Source`, `RawDocument`, `Chunk`, `SearchHit` |
//! | [`config`] | — | Ambient TOML configuration (`ctx.toml`) and environment overrides |
//! | [`registry`] | C10 | Project Registry: loads and validates the on-disk project/source layout |
//! | [`source_adapters`] | C6 | `DocsSite` / `GitHubRepo` / `LocalMarkdown` adapters behind one trait |
//! | [`quality_gate`] | C7 | Accept/reject decision for candidate GitHub sources |
//! | [`parser`] | C5 | HTML/Markdown → structured sections |
//! | [`chunk`] | C4 | Sections → bounded, typed chunks with adjacency metadata |
//! | [`embedding`] | C1 | Embedding provider trait and implementations |
//! | [`indexer`] | C8 | Parse → chunk → embed → upsert pipeline for one source |
//! | [`coordinator`] | C11 | Per-project run driver: concurrency, resume, quality gate |
//! | [`text_store`] | C3 | Authoritative chunk metadata + FTS5 full-text index |
//! | [`vector_store`] | C2 | Derived dense-vector index |
//! | [`search`] | C9 | Hybrid Searcher: RRF fusion of dense and lexical candidates |
//! | [`server`] | — | MCP-compatible JSON-RPC 2.0 HTTP server (Axum) |
//! | [`db`] | — | SQLite connection pool (WAL mode) |
//! | [`migrate`] | — | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! Ambient settings (database path, server bind address, embedding
//! credentials, crawler/chunking/retrieval defaults, quality thresholds by
//! trust level) are configured via a TOML file (default: `config/ctx.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules. Per-project and per-source configuration lives in a
//! separate versioned on-disk layout loaded by [`registry`].

pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod quality_gate;
pub mod registry;
pub mod search;
pub mod server;
pub mod source_adapters;
pub mod text_store;
pub mod vector_store;
