use crate::error::{SourceError, StoreError};
use crate::models::FigureId;
use crate::traits::{BlobStore, CancelSignal, FigureSource, PageRaster, PageRasterSource};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::Url;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Pre-exported figure images laid out as `{root}/{document_id}/{figure_id}.png`.
pub struct LocalFigureDir {
    root: PathBuf,
}

impl LocalFigureDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FigureSource for LocalFigureDir {
    async fn figure_bytes(
        &self,
        document_id: &str,
        figure_id: &FigureId,
        cancel: &CancelSignal,
    ) -> Result<Vec<u8>, SourceError> {
        let folder = self.root.join(document_id);
        if !tokio::fs::try_exists(&folder).await? {
            return Err(SourceError::DocumentMissing(document_id.to_string()));
        }
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        read_first(&folder, figure_id.as_str()).await
    }
}

/// Rendered page images laid out as `{root}/{document_id}/page-{n}.png`.
pub struct LocalPageDir {
    root: PathBuf,
}

impl LocalPageDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PageRasterSource for LocalPageDir {
    async fn page_raster(&self, document_id: &str, page: u32) -> Result<PageRaster, SourceError> {
        let folder = self.root.join(document_id);
        if !tokio::fs::try_exists(&folder).await? {
            return Err(SourceError::DocumentMissing(document_id.to_string()));
        }
        let bytes = read_first(&folder, &format!("page-{page}")).await?;
        Ok(PageRaster { page, bytes })
    }
}

async fn read_first(folder: &Path, stem: &str) -> Result<Vec<u8>, SourceError> {
    for extension in IMAGE_EXTENSIONS {
        let path = folder.join(format!("{stem}.{extension}"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => return Ok(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => continue,
            Err(error) => return Err(SourceError::Io(error)),
        }
    }
    Err(SourceError::NotFound(folder.join(stem).display().to_string()))
}

/// Writes blobs under a root directory and hands back `file://` urls.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: &[u8], key: &str) -> Result<String, StoreError> {
        let relative = validate_key(key)?;
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let absolute = tokio::fs::canonicalize(&path).await?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| StoreError::InvalidKey(format!("{} is not a file path", absolute.display())))?;
        debug!(key, size = bytes.len(), "blob stored");
        Ok(url.to_string())
    }
}

fn validate_key(key: &str) -> Result<&Path, StoreError> {
    let path = Path::new(key);
    let plain = !key.is_empty() && path.components().all(|part| matches!(part, Component::Normal(_)));
    if plain {
        Ok(path)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
