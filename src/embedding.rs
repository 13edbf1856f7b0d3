//! Embedder construction from configuration.
//!
//! # Supported Providers
//!
//! | Config Value | Embedder |
//! |-------------|----------|
//! | `"hash"` | [`HashEmbedder`]: feature hashing, no model files, fully offline |
//! | `"local"` | `LocalEmbedder`: fastembed model (feature `local-embeddings-fastembed`) |
//!
//! Models for `local` are downloaded on first use from Hugging Face and
//! cached. After initial download no network calls are needed.

use std::sync::Arc;

use anyhow::{bail, Result};
use docket_core::embedding::{Embedder, HashEmbedder};

use crate::config::EmbeddingConfig;

/// Create the [`Embedder`] selected by `config.provider`.
///
/// # Errors
///
/// Returns an error for unknown provider names, or for `local` when the
/// binary was built without the fastembed feature or the model cannot load.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.effective_dims()))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires building with --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use anyhow::{anyhow, bail, Result};
    use docket_core::embedding::Embedder;
    use docket_core::error::EmbeddingError;
    use parking_lot::Mutex;
    use tracing::info;

    use crate::config::EmbeddingConfig;

    /// Embedder running a sentence-embedding model in-process.
    pub struct LocalEmbedder {
        model: Mutex<fastembed::TextEmbedding>,
        model_name: String,
        dims: usize,
        batch_size: usize,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let fastembed_model = config_to_fastembed_model(&model_name)?;
            info!(model = %model_name, "loading local embedding model");
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
            Ok(Self {
                model: Mutex::new(model),
                model_name,
                dims: config.effective_dims(),
                batch_size: config.batch_size,
            })
        }
    }

    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.embed_batch(&[text])
                .pop()
                .unwrap_or_else(|| Err(EmbeddingError::Failed("model returned no vector".into())))
        }

        fn embed_batch(&self, texts: &[&str]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
            let result = self.model.lock().embed(texts.to_vec(), Some(self.batch_size));
            match result {
                Ok(vectors) if vectors.len() == texts.len() => vectors
                    .into_iter()
                    .map(|v| {
                        if v.len() == self.dims {
                            Ok(v)
                        } else {
                            Err(EmbeddingError::DimensionMismatch {
                                expected: self.dims,
                                actual: v.len(),
                            })
                        }
                    })
                    .collect(),
                Ok(vectors) => {
                    let reason = format!("model returned {} vectors for {} texts", vectors.len(), texts.len());
                    texts.iter().map(|_| Err(EmbeddingError::Failed(reason.clone()))).collect()
                }
                Err(e) => {
                    let reason = e.to_string();
                    texts.iter().map(|_| Err(EmbeddingError::Failed(reason.clone()))).collect()
                }
            }
        }
    }

    fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_provider_uses_configured_dims() {
        let config = EmbeddingConfig {
            dims: Some(128),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 128);
        assert_eq!(embedder.model_name(), "fnv1a-hash-128");
        assert_eq!(embedder.embed("indemnification").unwrap().len(), 128);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    #[test]
    fn local_provider_needs_feature() {
        let config = EmbeddingConfig {
            provider: "local".to_string(),
            ..EmbeddingConfig::default()
        };
        let err = create_embedder(&config).err().unwrap();
        assert!(err.to_string().contains("local-embeddings-fastembed"));
    }
}
