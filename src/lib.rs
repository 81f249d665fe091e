//! # Resume Search
//!
//! Local-first search over tabular resume collections.
//!
//! A CSV or XLSX export of resumes is normalized into canonical records,
//! embedded with either an offline TF-IDF vectorizer or a remote embeddings
//! API, and written to a persistent SQLite vector collection. Free-text
//! queries return the nearest resumes, optionally summarized by a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │ CSV/XLSX │──▶│   loader   │──▶│ embedding │──▶│ sqlite_store │
//! └──────────┘   └────────────┘   └───────────┘   └──────┬───────┘
//!                       sync gates decide when to rebuild │
//!                                                         ▼
//!                                  ┌──────────┐    ┌──────────┐
//!                                  │  answer  │◀───│  query   │
//!                                  └──────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rsx load data/uploads/Resume.csv     # ingestion stats only
//! rsx index                            # embed + index if stale
//! rsx query "senior rust engineer" --top-k 5 --category ENGINEERING
//! rsx query "who has payroll experience?" --answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and `RSX_*` overrides |
//! | [`loader`] | Tabular normalization with ingestion stats |
//! | [`html`] | Markup-to-text derivation |
//! | [`xlsx`] | First-worksheet reader for OOXML workbooks |
//! | [`embedding`] | Provider selection and the remote embeddings client |
//! | [`sqlite_store`] | Persistent collection store |
//! | [`pipeline`] | Load → fit → gates → query |
//! | [`answer`] | Chat completions for answers and summaries |
//! | [`progress`] | Indexing progress on stderr |
//! | [`stats`] | Plain-text reports |
//!
//! The store contract, index adapter and sync gates live in the
//! `resume-search-core` crate.

pub mod answer;
pub mod config;
pub mod embedding;
pub mod html;
pub mod loader;
pub mod pipeline;
pub mod progress;
pub mod sqlite_store;
pub mod stats;
pub mod xlsx;
