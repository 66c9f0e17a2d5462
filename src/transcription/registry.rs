//! # Model Registry
//!
//! Lazy, once-only construction of the shared speech model.
//!
//! Loading a Whisper checkpoint takes seconds and hundreds of megabytes,
//! so the process holds exactly one. `ModelCell` wraps a
//! `tokio::sync::OnceCell`: the first caller runs the loader while
//! concurrent callers await the same initialization, and a failed load
//! leaves the cell empty so the next request retries instead of pinning
//! the process to a dead model.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::model::SpeechModel;

/// Shared handle to the lazily constructed speech model.
pub struct ModelCell {
    cell: OnceCell<Arc<dyn SpeechModel>>,
}

impl ModelCell {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// A cell already holding a model. Used by tests and tools that
    /// construct the model up front.
    pub fn preloaded(model: Arc<dyn SpeechModel>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(model)),
        }
    }

    /// Return the model, running `load` if the cell is still empty.
    ///
    /// Concurrent first callers are serialized; only one runs `load`.
    /// An error is returned to the caller and not cached.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<dyn SpeechModel>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn SpeechModel>>>,
    {
        let model = self.cell.get_or_try_init(load).await?;
        Ok(model.clone())
    }
}

impl Default for ModelCell {
    fn default() -> Self {
        Self::new()
    }
}
