//! Figure binary retrieval with ordered fallback strategies.
//!
//! Every strategy reads through a [`DocumentHandle`] and returns bytes or a
//! [`StrategyFailure`]; none of them writes anywhere. An attempt is bounded by
//! `attempt_timeout` and a transient failure is retried once after
//! `transient_backoff`. Empty payloads count as failures so a produced
//! [`ImageAsset`] always carries bytes.

use crate::error::{ExtractionError, StrategyFailure};
use crate::geometry::BoundingBox;
use crate::models::{FigureId, ImageAsset, ImagePayload, PageInfo, PipelineOptions, RawFigure, StrategyKind};
use crate::traits::{CancelSignal, FigureSource, PageRasterSource};
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only view of one analysed document, cheap to clone into workers.
#[derive(Clone)]
pub struct DocumentHandle {
    pub document_id: String,
    pages: Arc<Vec<PageInfo>>,
    figures: Arc<dyn FigureSource>,
    rasters: Arc<dyn PageRasterSource>,
}

impl DocumentHandle {
    pub fn new(
        document_id: impl Into<String>,
        pages: Vec<PageInfo>,
        figures: Arc<dyn FigureSource>,
        rasters: Arc<dyn PageRasterSource>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            pages: Arc::new(pages),
            figures,
            rasters,
        }
    }

    pub fn page(&self, number: u32) -> Option<&PageInfo> {
        self.pages.iter().find(|page| page.number == number)
    }
}

pub fn asset_id(document_id: &str, figure_id: &FigureId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(figure_id.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("img-{}", &digest[..16])
}

#[derive(Debug, Clone, Copy)]
pub struct ImageExtractor {
    attempt_timeout: Duration,
    transient_backoff: Duration,
}

impl ImageExtractor {
    pub fn new(options: &PipelineOptions) -> Self {
        Self {
            attempt_timeout: options.attempt_timeout,
            transient_backoff: options.transient_backoff,
        }
    }

    pub async fn extract(
        &self,
        handle: &DocumentHandle,
        figure: &RawFigure,
        strategy_order: &[StrategyKind],
        cancel: &CancelSignal,
    ) -> Result<ImageAsset, ExtractionError> {
        if strategy_order.is_empty() {
            return Err(ExtractionError::NoStrategy {
                figure_id: figure.id.clone(),
            });
        }

        let mut attempts = Vec::new();
        for &strategy in strategy_order {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled(figure.id.clone()));
            }

            match self.attempt(strategy, handle, figure, cancel).await {
                Ok(bytes) => {
                    debug!(figure = %figure.id, %strategy, size = bytes.len(), "figure extracted");
                    return Ok(ImageAsset {
                        id: asset_id(&handle.document_id, &figure.id),
                        payload: ImagePayload::Bytes(bytes),
                        source_figure: figure.id.clone(),
                        method: strategy,
                    });
                }
                Err(StrategyFailure::Cancelled) => {
                    return Err(ExtractionError::Cancelled(figure.id.clone()));
                }
                Err(failure) => {
                    debug!(figure = %figure.id, %strategy, %failure, "strategy failed");
                    attempts.push((strategy, failure));
                }
            }
        }

        warn!(figure = %figure.id, attempts = attempts.len(), "all extraction strategies failed");
        Err(ExtractionError::Exhausted {
            figure_id: figure.id.clone(),
            attempts,
        })
    }

    async fn attempt(
        &self,
        strategy: StrategyKind,
        handle: &DocumentHandle,
        figure: &RawFigure,
        cancel: &CancelSignal,
    ) -> Result<Vec<u8>, StrategyFailure> {
        let mut retried = false;
        loop {
            let outcome = match tokio::time::timeout(
                self.attempt_timeout,
                run_strategy(strategy, handle, figure, cancel),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StrategyFailure::TimedOut(self.attempt_timeout.as_millis())),
            };

            match outcome {
                Ok(bytes) if bytes.is_empty() => {
                    return Err(StrategyFailure::NotAvailable("empty payload".to_string()))
                }
                Ok(bytes) => return Ok(bytes),
                Err(failure) if failure.is_transient() && !retried => {
                    retried = true;
                    debug!(figure = %figure.id, %strategy, %failure, "retrying after transient failure");
                    tokio::time::sleep(self.transient_backoff).await;
                    if cancel.is_cancelled() {
                        return Err(StrategyFailure::Cancelled);
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}

async fn run_strategy(
    strategy: StrategyKind,
    handle: &DocumentHandle,
    figure: &RawFigure,
    cancel: &CancelSignal,
) -> Result<Vec<u8>, StrategyFailure> {
    match strategy {
        StrategyKind::ProviderFigure => handle
            .figures
            .figure_bytes(&handle.document_id, &figure.id, cancel)
            .await
            .map_err(StrategyFailure::from),
        StrategyKind::PageCrop => crop_figure(handle, figure).await,
    }
}

async fn crop_figure(handle: &DocumentHandle, figure: &RawFigure) -> Result<Vec<u8>, StrategyFailure> {
    let bounds = figure.bounds().ok_or_else(|| {
        StrategyFailure::MalformedRegion(format!("figure {} has no usable polygon", figure.id))
    })?;
    let page = handle
        .page(figure.page)
        .cloned()
        .ok_or_else(|| StrategyFailure::NotAvailable(format!("page {} size unknown", figure.page)))?;
    let raster = handle
        .rasters
        .page_raster(&handle.document_id, figure.page)
        .await
        .map_err(StrategyFailure::from)?;

    tokio::task::spawn_blocking(move || crop_raster(&raster.bytes, &page, &bounds))
        .await
        .map_err(|error| StrategyFailure::NotAvailable(format!("crop task failed: {error}")))?
}

/// Crops `bounds` (page units) out of an encoded page raster and re-encodes
/// the region as PNG.
pub fn crop_raster(raster: &[u8], page: &PageInfo, bounds: &BoundingBox) -> Result<Vec<u8>, StrategyFailure> {
    if page.width <= 0.0 || page.height <= 0.0 {
        return Err(StrategyFailure::MalformedRegion(format!(
            "page {} has no positive size",
            page.number
        )));
    }

    let decoded = image::load_from_memory(raster)
        .map_err(|error| StrategyFailure::NotAvailable(format!("page raster undecodable: {error}")))?;
    let (pixel_width, pixel_height) = (decoded.width() as f64, decoded.height() as f64);
    let scale_x = pixel_width / page.width;
    let scale_y = pixel_height / page.height;

    let x0 = (bounds.x0 * scale_x).floor().clamp(0.0, pixel_width);
    let y0 = (bounds.y0 * scale_y).floor().clamp(0.0, pixel_height);
    let x1 = (bounds.x1 * scale_x).ceil().clamp(0.0, pixel_width);
    let y1 = (bounds.y1 * scale_y).ceil().clamp(0.0, pixel_height);
    if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
        return Err(StrategyFailure::MalformedRegion(format!(
            "region ({:.2},{:.2})-({:.2},{:.2}) lies outside page {}",
            bounds.x0, bounds.y0, bounds.x1, bounds.y1, page.number
        )));
    }

    let region = decoded.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32);
    let mut encoded = Cursor::new(Vec::new());
    region
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|error| StrategyFailure::NotAvailable(format!("png encoding failed: {error}")))?;
    Ok(encoded.into_inner())
}
