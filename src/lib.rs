//! # Guide2Govern
//!
//! A document-grounded chat assistant over corporate `.docx` files.
//!
//! Documents are flattened into paragraph-aligned `(text, images, links)`
//! triplets. Paragraph text is chunked, embedded and stored in SQLite with
//! its `{source, para_index}` position. A question is answered from the
//! chunks chosen by nearest-neighbour search plus MMR re-ranking, and the
//! images and links of the paragraphs around each chunk are returned
//! alongside the answer.
//!
//! ## Architecture
//!
//! ```text
//! .docx ──▶ docx ──▶ chunk ──▶ embedding ──▶ index (SQLite)
//!                                               │
//! question ──▶ assistant ──▶ retrieve (MMR) ◀───┘
//!                 │               │
//!                 │               ▼
//!                 │           evidence (±3 paragraphs) ──▶ image ids, links
//!                 ▼
//!            prompt ──▶ llm ──▶ answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`docx`] | Paragraph, image and hyperlink extraction |
//! | [`chunk`] | Recursive character splitter |
//! | [`library`] | Document discovery and parsed-document cache |
//! | [`ingest`] | Delta ingestion into the index |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index trait, SQLite and in-memory backends |
//! | [`retrieve`] | Nearest neighbours + Maximal Marginal Relevance |
//! | [`evidence`] | Image and link reconciliation around hits |
//! | [`prompt`] | Answer and suggestion prompts |
//! | [`llm`] | Chat-completion clients |
//! | [`assistant`] | The question-answering context object |
//! | [`store`] | Users and chat history |
//! | [`feedback`] | Feedback log |
//! | [`auth`] | Bearer-token validation |
//! | [`server`] | HTTP API |

pub mod assistant;
pub mod auth;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod docx;
pub mod embedding;
pub mod evidence;
pub mod feedback;
pub mod index;
pub mod ingest;
pub mod library;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod retry;
pub mod server;
pub mod store;
