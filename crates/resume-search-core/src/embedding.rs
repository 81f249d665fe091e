//! Embedding provider trait, the local corpus-fit vectorizer, and vector
//! utilities.
//!
//! Defines the [`EmbeddingProvider`] capability set that every embedding
//! backend implements, the offline [`LocalVectorizer`], and pure helpers for
//! vector serialization and similarity computation.
//!
//! The remote HTTP provider lives in the `resume-search` app crate.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tracing::debug;

use crate::error::EmbedError;

/// Progress callback: `(items_done, items_total)`, called after each batch.
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Trait for embedding providers.
///
/// All vectors produced by one provider instance share the same width.
/// Providers that need corpus statistics (see [`LocalVectorizer`]) must be
/// fitted before any `embed*` call and refitted whenever the record set
/// changes; remote providers treat [`fit`](EmbeddingProvider::fit) as a no-op.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider family: `"local"` or `"remote"`.
    fn kind(&self) -> &str;
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector width when known up front.
    fn dims(&self) -> Option<usize>;

    /// Fit internal state on the full corpus. No-op by default.
    fn fit(&mut self, _texts: &[String]) -> Result<(), EmbedError> {
        Ok(())
    }

    /// Embed `texts` in order, reporting progress after every batch.
    ///
    /// `progress` is called with monotonically non-decreasing counts and
    /// reaches `(total, total)` exactly once, at completion.
    async fn embed_batch_with_progress(
        &self,
        texts: &[String],
        progress: ProgressFn<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.embed_batch_with_progress(texts, &|_, _| {}).await
    }

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            got => Err(EmbedError::CountMismatch { expected: 1, got }),
        }
    }
}

/// Default width of the local vectorizer.
pub const DEFAULT_LOCAL_DIMS: usize = 384;

/// Offline TF-IDF vectorizer fitted on the full corpus.
///
/// Fitting keeps the `dims` most frequent terms of the corpus (ties broken
/// alphabetically) together with their smoothed inverse document frequency.
/// Any text, corpus member or novel query, is projected onto that fixed
/// vocabulary; out-of-vocabulary terms contribute nothing. Vectors are
/// L2-normalized and always `dims` wide, zero-padded when the corpus has
/// fewer distinct terms.
///
/// Refitting on a different corpus produces a different vector space, so
/// vectors from two fits must never be compared.
pub struct LocalVectorizer {
    dims: usize,
    batch_size: usize,
    model_name: String,
    vocab: Option<Vocabulary>,
}

struct Vocabulary {
    index: HashMap<String, usize>,
    idf: Vec<f32>,
}

impl LocalVectorizer {
    /// Create an unfitted vectorizer producing `dims`-wide vectors.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Config`] when `dims` or `batch_size` is zero.
    pub fn new(dims: usize, batch_size: usize) -> Result<Self, EmbedError> {
        if dims == 0 {
            return Err(EmbedError::Config(
                "local embedding dims must be > 0".to_string(),
            ));
        }
        if batch_size == 0 {
            return Err(EmbedError::Config(
                "embedding batch_size must be > 0".to_string(),
            ));
        }
        Ok(Self {
            dims,
            batch_size,
            model_name: format!("tfidf-{}", dims),
            vocab: None,
        })
    }

    /// Number of terms actually retained by the last fit.
    pub fn vocabulary_len(&self) -> usize {
        self.vocab.as_ref().map(|v| v.index.len()).unwrap_or(0)
    }

    fn project(&self, vocab: &Vocabulary, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            if let Some(&i) = vocab.index.get(&token) {
                vec[i] += 1.0;
            }
        }
        for (slot, idf) in vec.iter_mut().zip(vocab.idf.iter()) {
            *slot *= idf;
        }
        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for slot in vec.iter_mut() {
                *slot /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LocalVectorizer {
    fn kind(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> Option<usize> {
        Some(self.dims)
    }

    fn fit(&mut self, texts: &[String]) -> Result<(), EmbedError> {
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text);
            let mut seen: HashSet<&str> = HashSet::new();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
                seen.insert(token.as_str());
            }
            for token in seen {
                *doc_freq.entry(token.to_string()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.dims);

        let mut terms: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        terms.sort();

        let n_docs = texts.len() as f32;
        let mut index = HashMap::with_capacity(terms.len());
        let mut idf = Vec::with_capacity(terms.len());
        for (i, term) in terms.into_iter().enumerate() {
            let df = doc_freq.get(&term).copied().unwrap_or(0) as f32;
            idf.push(((1.0 + n_docs) / (1.0 + df)).ln() + 1.0);
            index.insert(term, i);
        }

        debug!(
            docs = texts.len(),
            vocabulary = index.len(),
            dims = self.dims,
            "fitted local vectorizer"
        );
        self.vocab = Some(Vocabulary { index, idf });
        Ok(())
    }

    async fn embed_batch_with_progress(
        &self,
        texts: &[String],
        progress: ProgressFn<'_>,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let vocab = self.vocab.as_ref().ok_or(EmbedError::Unfitted)?;
        let total = texts.len();
        if total == 0 {
            progress(0, 0);
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(total);
        for batch in texts.chunks(self.batch_size) {
            out.extend(batch.iter().map(|t| self.project(vocab, t)));
            progress(out.len(), total);
        }
        Ok(out)
    }
}

/// Lowercased word tokens of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use resume_search_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance (`1 - similarity`), in `[0.0, 2.0]`. Smaller is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn corpus() -> Vec<String> {
        vec![
            "Senior Rust engineer, distributed systems and Rust tooling".to_string(),
            "Python data scientist with pandas and machine learning".to_string(),
            "Go engineer building cloud services".to_string(),
        ]
    }

    #[tokio::test]
    async fn embed_before_fit_is_unfitted() {
        let v = LocalVectorizer::new(16, 8).unwrap();
        let err = v.embed("rust").await.unwrap_err();
        assert!(matches!(err, EmbedError::Unfitted));
        let err = v.embed_batch(&corpus()).await.unwrap_err();
        assert!(matches!(err, EmbedError::Unfitted));
    }

    #[test]
    fn zero_dims_rejected_at_construction() {
        assert!(matches!(
            LocalVectorizer::new(0, 8),
            Err(EmbedError::Config(_))
        ));
    }

    #[tokio::test]
    async fn fitted_batch_has_fixed_width() {
        let texts = corpus();
        let mut v = LocalVectorizer::new(64, 2).unwrap();
        v.fit(&texts).unwrap();
        let vectors = v.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());
        assert!(vectors.iter().all(|vec| vec.len() == 64));
        assert!(v.vocabulary_len() <= 64);
    }

    #[tokio::test]
    async fn vocabulary_capped_at_dims() {
        let texts = corpus();
        let mut v = LocalVectorizer::new(3, 8).unwrap();
        v.fit(&texts).unwrap();
        assert_eq!(v.vocabulary_len(), 3);
        let vec = v.embed("rust engineer").await.unwrap();
        assert_eq!(vec.len(), 3);
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let texts = corpus();
        let mut a = LocalVectorizer::new(32, 8).unwrap();
        let mut b = LocalVectorizer::new(32, 8).unwrap();
        a.fit(&texts).unwrap();
        b.fit(&texts).unwrap();
        assert_eq!(
            a.embed_batch(&texts).await.unwrap(),
            b.embed_batch(&texts).await.unwrap()
        );
    }

    #[tokio::test]
    async fn out_of_vocabulary_query_is_zero_vector() {
        let mut v = LocalVectorizer::new(32, 8).unwrap();
        v.fit(&corpus()).unwrap();
        let vec = v.embed("zzzz qqqq").await.unwrap();
        assert!(vec.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn query_is_closest_to_matching_document() {
        let texts = corpus();
        let mut v = LocalVectorizer::new(64, 8).unwrap();
        v.fit(&texts).unwrap();
        let docs = v.embed_batch(&texts).await.unwrap();
        let q = v.embed("python machine learning").await.unwrap();
        let best = docs
            .iter()
            .enumerate()
            .map(|(i, d)| (i, cosine_distance(&q, d)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .unwrap();
        assert_eq!(best.0, 1);
    }

    #[tokio::test]
    async fn progress_reaches_total_once() {
        let texts = corpus();
        let mut v = LocalVectorizer::new(16, 2).unwrap();
        v.fit(&texts).unwrap();
        let calls = Mutex::new(Vec::new());
        v.embed_batch_with_progress(&texts, &|done, total| {
            calls.lock().unwrap().push((done, total));
        })
        .await
        .unwrap();
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls, vec![(2, 3), (3, 3)]);
    }

    #[test]
    fn tokenize_lowercases_and_drops_short_tokens() {
        assert_eq!(
            tokenize("C++ Go, a Rust-Engineer"),
            vec!["go", "rust", "engineer"]
        );
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        let sim = cosine_similarity(&a, &b);
        assert_eq!(sim, 0.0);
    }
}
