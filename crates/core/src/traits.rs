use crate::error::{SourceError, StoreError};
use crate::models::{ContentHash, FigureId, StoredQuestion};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared by one document run.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Encoded page image as produced by the provider's rasterizer.
#[derive(Debug, Clone)]
pub struct PageRaster {
    pub page: u32,
    pub bytes: Vec<u8>,
}

/// Direct figure retrieval from the document-analysis provider.
#[async_trait]
pub trait FigureSource: Send + Sync {
    async fn figure_bytes(
        &self,
        document_id: &str,
        figure_id: &FigureId,
        cancel: &CancelSignal,
    ) -> Result<Vec<u8>, SourceError>;
}

#[async_trait]
impl<T> FigureSource for Box<T>
where
    T: FigureSource + ?Sized,
{
    async fn figure_bytes(
        &self,
        document_id: &str,
        figure_id: &FigureId,
        cancel: &CancelSignal,
    ) -> Result<Vec<u8>, SourceError> {
        (**self).figure_bytes(document_id, figure_id, cancel).await
    }
}

#[async_trait]
pub trait PageRasterSource: Send + Sync {
    async fn page_raster(&self, document_id: &str, page: u32) -> Result<PageRaster, SourceError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8], key: &str) -> Result<String, StoreError>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    async fn find_by_hash(
        &self,
        digest: &ContentHash,
        exam_id: &str,
    ) -> Result<Option<StoredQuestion>, StoreError>;

    /// One round-trip for every candidate digest of a document.
    async fn find_by_hashes(
        &self,
        digests: &[ContentHash],
        exam_id: &str,
    ) -> Result<HashMap<ContentHash, StoredQuestion>, StoreError>;

    async fn save(&self, exam_id: &str, question: &crate::Question) -> Result<StoredQuestion, StoreError>;
}
