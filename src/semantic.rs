//! Optional semantic (embedding) search backend, gated behind the
//! `semantic` Cargo feature. Resolves a model name to a `fastembed`
//! model, embeds the query, and compares it against pre-computed chunk
//! embeddings by cosine similarity. Without the feature, every call
//! reports `backend_unavailable` so the dispatcher degrades to BM25-only
//! search rather than failing the whole query.

use crate::error::{CoreError, ErrorKind, Result};
use crate::protocol::Snippet;

/// Model presets mirroring the teacher's structural-embedding presets,
/// retargeted onto `fastembed`'s bundled ONNX models.
#[derive(Debug, Clone, Copy)]
pub enum ModelPreset {
    MiniLm,
    BgeSmall,
}

pub fn resolve_model(name: Option<&str>) -> ModelPreset {
    match name {
        Some("bge-small") => ModelPreset::BgeSmall,
        _ => ModelPreset::MiniLm,
    }
}

pub fn available_backends() -> Vec<String> {
    let mut backends = vec!["bm25".to_string()];
    if cfg!(feature = "semantic") {
        backends.push("semantic".to_string());
    }
    backends
}

#[cfg(feature = "semantic")]
mod live {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use std::sync::Mutex;

    fn fastembed_model(preset: ModelPreset) -> EmbeddingModel {
        match preset {
            ModelPreset::MiniLm => EmbeddingModel::AllMiniLML6V2,
            ModelPreset::BgeSmall => EmbeddingModel::BGESmallENV15,
        }
    }

    static EMBEDDER: OnceCell<Mutex<TextEmbedding>> = OnceCell::new();

    fn embedder() -> Result<&'static Mutex<TextEmbedding>> {
        EMBEDDER.get_or_try_init(|| {
            let model = fastembed_model(resolve_model(None));
            TextEmbedding::try_new(InitOptions::new(model))
                .map(Mutex::new)
                .map_err(|e| CoreError::new(ErrorKind::BackendUnavailable, format!("semantic model load failed: {e}")))
        })
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }

    /// Embeds `query`, ranks against `corpus` by cosine similarity. The
    /// corpus is the caller's responsibility to supply (pre-chunked content
    /// with embeddings cached); the bare `search` entry point used by the
    /// dispatcher's scatter-gather has no corpus hookup yet, so it reports
    /// `backend_unavailable` until an embedding cache is wired up.
    pub fn search(_query: &str, _limit: usize) -> Result<Vec<Snippet>> {
        let _ = embedder()?;
        Err(CoreError::new(ErrorKind::BackendUnavailable, "semantic corpus not indexed"))
    }

    pub fn embed_one(text: &str) -> Result<Vec<f32>> {
        let guard = embedder()?;
        let mut model = guard.lock().unwrap();
        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| CoreError::new(ErrorKind::BackendUnavailable, e.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::new(ErrorKind::BackendUnavailable, "empty embedding result"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn cosine_similarity_identical_vectors_is_one() {
            let v = vec![1.0, 2.0, 3.0];
            assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        }
    }
}

#[cfg(not(feature = "semantic"))]
mod stub {
    use super::*;

    pub fn search(_query: &str, _limit: usize) -> Result<Vec<Snippet>> {
        Err(CoreError::new(ErrorKind::BackendUnavailable, "semantic feature not compiled in"))
    }
}

#[cfg(feature = "semantic")]
pub use live::search;
#[cfg(not(feature = "semantic"))]
pub use stub::search;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_backends_always_includes_bm25() {
        assert!(available_backends().contains(&"bm25".to_string()));
    }

    #[test]
    fn search_without_corpus_reports_backend_unavailable() {
        let err = search("anything", 10).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BackendUnavailable);
    }
}
