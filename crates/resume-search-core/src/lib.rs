//! # Resume Search Core
//!
//! Shared logic for Resume Search: canonical records, the embedding
//! capability trait and its local corpus-fit vectorizer, the collection-store
//! contract, the vector index adapter, and the synchronization gates that
//! decide when embeddings and the index must be rebuilt.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! remote providers and persistent stores live in the `resume-search` app
//! crate.

pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod store;
pub mod sync;
