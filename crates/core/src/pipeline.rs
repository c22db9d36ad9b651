//! Per-document coordinator: match, extract, assemble, deduplicate.
//!
//! Stages advance `Received → Extracting → Assembling → Deduplicating` and the
//! run ends `Completed` or `PartiallyFailed`. Only an empty document is fatal;
//! every per-figure or per-question problem becomes a [`PipelineWarning`].

use crate::assembler::assemble;
use crate::canonical::question_hash;
use crate::dedup::{check_duplicates, resolve, unchecked, ResolvedQuestion};
use crate::error::{ExtractionError, PipelineError};
use crate::extraction::{DocumentHandle, ImageExtractor};
use crate::matcher::{in_reading_order, match_figures, FigureMerge};
use crate::models::{
    ContentHash, ContextBlock, FigureId, ImageAsset, ImagePayload, ImageRef, ImageStatus, PipelineOptions,
    PipelineStage, PipelineWarning, RawDocument, RawFigure, StoredQuestion, WarningKind,
    WarningSubject,
};
use crate::roles::RoleClassifier;
use crate::traits::{BlobStore, CancelSignal, FigureSource, PageRasterSource, QuestionRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub document_id: String,
    pub exam_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stage: PipelineStage,
    pub stages_finished: Vec<PipelineStage>,
    pub blocks: Vec<ContextBlock>,
    pub questions: Vec<ResolvedQuestion>,
    pub merges: Vec<FigureMerge>,
    pub warnings: Vec<PipelineWarning>,
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn deduplicated(&self) -> bool {
        self.stages_finished.contains(&PipelineStage::Deduplicating)
    }

    pub fn pending_images(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(ContextBlock::all_images)
            .filter(|image| image.is_pending())
            .count()
    }
}

pub struct ExamPipeline<F, P, B, R>
where
    F: FigureSource,
    P: PageRasterSource,
    B: BlobStore,
    R: QuestionRepository,
{
    figures: Arc<F>,
    rasters: Arc<P>,
    blobs: Arc<B>,
    repo: Arc<R>,
    options: PipelineOptions,
    roles: RoleClassifier,
    extractor: ImageExtractor,
}

impl<F, P, B, R> ExamPipeline<F, P, B, R>
where
    F: FigureSource + 'static,
    P: PageRasterSource + 'static,
    B: BlobStore + 'static,
    R: QuestionRepository + 'static,
{
    pub fn new(
        figures: Arc<F>,
        rasters: Arc<P>,
        blobs: Arc<B>,
        repo: Arc<R>,
        options: PipelineOptions,
    ) -> Result<Self, PipelineError> {
        options.validate().map_err(PipelineError::InvalidOptions)?;
        let roles = RoleClassifier::new(&options)?;
        let extractor = ImageExtractor::new(&options);
        Ok(Self {
            figures,
            rasters,
            blobs,
            repo,
            options,
            roles,
            extractor,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn run(
        &self,
        raw: RawDocument,
        exam_id: &str,
        cancel: &CancelSignal,
    ) -> Result<PipelineReport, PipelineError> {
        if raw.paragraphs.is_empty() && raw.figures.is_empty() {
            return Err(PipelineError::MissingInput(raw.document_id));
        }

        let mut run = RunState::new(&raw.document_id, exam_id);
        info!(run_id = %run.report.run_id, document = %raw.document_id, exam_id, "pipeline received document");

        let paragraphs = in_reading_order(&raw.paragraphs);
        let roles = self.roles.classify_all(&paragraphs);
        let figures = unique_figures(&raw.figures, &mut run);
        let matched = match_figures(&paragraphs, &roles, &figures, &raw.pages, &self.options);
        for merge in &matched.merges {
            run.report.warnings.push(PipelineWarning::new(
                WarningSubject::Figure(merge.dropped.clone()),
                WarningKind::FigureMerged,
                format!("merged into figure {} (IoU {:.2})", merge.kept, merge.iou),
            ));
        }
        run.report.merges = matched.merges.clone();

        run.advance(PipelineStage::Extracting);
        let handle = DocumentHandle::new(
            raw.document_id.clone(),
            raw.pages.clone(),
            self.figures.clone(),
            self.rasters.clone(),
        );
        let images = self.extract_all(&handle, &matched.figures, cancel, &mut run).await;
        if cancel.is_cancelled() {
            return Ok(run.cancel());
        }

        run.advance(PipelineStage::Assembling);
        let assembly = assemble(&raw.document_id, &paragraphs, &roles, &matched, &images);
        run.report.warnings.extend(assembly.warnings);
        run.report.blocks = assembly.blocks;
        info!(
            document = %raw.document_id,
            blocks = run.report.blocks.len(),
            questions = assembly.questions.len(),
            "assembled context blocks"
        );
        if cancel.is_cancelled() {
            return Ok(run.cancel());
        }

        run.advance(PipelineStage::Deduplicating);
        let hashes: Vec<ContentHash> = assembly.questions.iter().map(question_hash).collect();
        match check_duplicates(self.repo.as_ref(), &hashes, exam_id).await {
            Ok(existing) => {
                let (questions, warnings) = resolve(assembly.questions, exam_id, &existing);
                run.report.questions = questions;
                run.report.warnings.extend(warnings);
            }
            Err(error) => {
                warn!(document = %raw.document_id, %error, "duplicate lookup failed");
                run.report.warnings.push(PipelineWarning::new(
                    WarningSubject::Document,
                    WarningKind::RepositoryUnavailable,
                    format!("duplicate lookup failed: {error}"),
                ));
                run.report.questions = unchecked(assembly.questions);
                return Ok(run.finish());
            }
        }
        if cancel.is_cancelled() {
            return Ok(run.cancel());
        }

        run.advance(PipelineStage::Completed);
        Ok(run.finish())
    }

    async fn extract_all(
        &self,
        handle: &DocumentHandle,
        figures: &[RawFigure],
        cancel: &CancelSignal,
        run: &mut RunState,
    ) -> BTreeMap<FigureId, ImageRef> {
        let semaphore = Arc::new(Semaphore::new(self.options.worker_limit));
        let mut tasks = Vec::with_capacity(figures.len());

        for figure in figures {
            let semaphore = semaphore.clone();
            let handle = handle.clone();
            let figure = figure.clone();
            let cancel = cancel.clone();
            let blobs = self.blobs.clone();
            let extractor = self.extractor;
            let order = self.options.strategy_order.clone();
            let upload_timeout = self.options.attempt_timeout;

            tasks.push((
                figure.clone(),
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| ExtractionError::Cancelled(figure.id.clone()))?;
                    let asset = extractor.extract(&handle, &figure, &order, &cancel).await?;
                    upload(blobs.as_ref(), &handle.document_id, &figure, asset, upload_timeout).await
                }),
            ));
        }

        let mut images = BTreeMap::new();
        for (figure, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(error) => Err(ExtractionError::Worker {
                    figure_id: figure.id.clone(),
                    reason: error.to_string(),
                }),
            };

            let image = match outcome {
                Ok(image) => image,
                Err(error) => {
                    let kind = match error {
                        ExtractionError::Cancelled(_) => WarningKind::Cancelled,
                        _ => WarningKind::ExtractionPending,
                    };
                    warn!(figure = %figure.id, %error, "figure left pending");
                    run.report.warnings.push(PipelineWarning::new(
                        WarningSubject::Figure(figure.id.clone()),
                        kind,
                        match kind {
                            WarningKind::Cancelled => "extraction cancelled",
                            _ => "extraction pending",
                        },
                    ));
                    ImageRef {
                        figure_id: figure.id.clone(),
                        page: figure.page,
                        caption: figure.caption.clone(),
                        status: ImageStatus::Pending {
                            reason: error.to_string(),
                        },
                    }
                }
            };
            images.insert(figure.id.clone(), image);
        }
        images
    }
}

/// Keeps the first figure for each id so asset ids stay unique.
fn unique_figures(figures: &[RawFigure], run: &mut RunState) -> Vec<RawFigure> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(figures.len());
    for figure in figures {
        if seen.insert(&figure.id) {
            unique.push(figure.clone());
        } else {
            run.report.warnings.push(PipelineWarning::new(
                WarningSubject::Figure(figure.id.clone()),
                WarningKind::DuplicateFigureId,
                "duplicate figure id; first occurrence kept",
            ));
        }
    }
    unique
}

/// Stores the asset bytes and swaps the payload for the returned url.
async fn upload<B>(
    blobs: &B,
    document_id: &str,
    figure: &RawFigure,
    mut asset: ImageAsset,
    timeout: Duration,
) -> Result<ImageRef, ExtractionError>
where
    B: BlobStore + ?Sized,
{
    let bytes = match &asset.payload {
        ImagePayload::Bytes(bytes) => bytes.clone(),
        ImagePayload::Url(url) => return Ok(resolved_ref(figure, &asset, url.clone())),
    };
    let extension = image::guess_format(&bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin");
    let key = format!("{document_id}/{}.{extension}", asset.id);

    let url = match tokio::time::timeout(timeout, blobs.put(&bytes, &key)).await {
        Ok(Ok(url)) => url,
        Ok(Err(source)) => {
            return Err(ExtractionError::Upload {
                figure_id: figure.id.clone(),
                source,
            })
        }
        Err(_) => {
            return Err(ExtractionError::Upload {
                figure_id: figure.id.clone(),
                source: crate::error::StoreError::Timeout,
            })
        }
    };
    asset.payload = ImagePayload::Url(url.clone());
    Ok(resolved_ref(figure, &asset, url))
}

fn resolved_ref(figure: &RawFigure, asset: &ImageAsset, url: String) -> ImageRef {
    ImageRef {
        figure_id: figure.id.clone(),
        page: figure.page,
        caption: figure.caption.clone(),
        status: ImageStatus::Resolved {
            asset_id: asset.id.clone(),
            url,
            method: asset.method,
        },
    }
}

struct RunState {
    report: PipelineReport,
}

impl RunState {
    fn new(document_id: &str, exam_id: &str) -> Self {
        let now = Utc::now();
        Self {
            report: PipelineReport {
                run_id: Uuid::new_v4(),
                document_id: document_id.to_string(),
                exam_id: exam_id.to_string(),
                started_at: now,
                finished_at: now,
                stage: PipelineStage::Received,
                stages_finished: Vec::new(),
                blocks: Vec::new(),
                questions: Vec::new(),
                merges: Vec::new(),
                warnings: Vec::new(),
                cancelled: false,
            },
        }
    }

    /// Marks the current stage finished and enters `next`.
    fn advance(&mut self, next: PipelineStage) {
        let finished = self.report.stage;
        self.report.stages_finished.push(finished);
        self.report.stage = next;
        info!(document = %self.report.document_id, ?finished, ?next, "pipeline stage");
    }

    fn cancel(mut self) -> PipelineReport {
        warn!(document = %self.report.document_id, stage = ?self.report.stage, "pipeline cancelled");
        self.report.cancelled = true;
        self.report.warnings.push(PipelineWarning::new(
            WarningSubject::Document,
            WarningKind::Cancelled,
            format!("cancelled during {:?}", self.report.stage),
        ));
        self.report.stage = PipelineStage::PartiallyFailed;
        self.report.finished_at = Utc::now();
        self.report
    }

    fn finish(mut self) -> PipelineReport {
        let failed = self.report.cancelled
            || self.report.stage != PipelineStage::Completed
            || self.report.warnings.iter().any(|warning| warning.kind.is_failure());
        if failed {
            self.report.stage = PipelineStage::PartiallyFailed;
        }
        self.report.finished_at = Utc::now();
        info!(
            document = %self.report.document_id,
            stage = ?self.report.stage,
            warnings = self.report.warnings.len(),
            "pipeline finished"
        );
        self.report
    }
}

/// Saves the report's new questions. Duplicates are skipped and a report that
/// never finished deduplication is refused.
pub async fn persist<R>(report: &PipelineReport, repo: &R) -> Result<Vec<StoredQuestion>, PipelineError>
where
    R: QuestionRepository + ?Sized,
{
    if report.cancelled || !report.deduplicated() {
        return Err(PipelineError::Incomplete(report.document_id.clone()));
    }

    let mut saved = Vec::new();
    for resolved in report.questions.iter().filter(|item| item.resolution.is_new()) {
        saved.push(repo.save(&report.exam_id, &resolved.question).await?);
    }
    info!(
        document = %report.document_id,
        exam_id = %report.exam_id,
        saved = saved.len(),
        skipped = report.questions.len() - saved.len(),
        "questions persisted"
    );
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Resolution;
    use crate::error::StoreError;
    use crate::extraction::tests::{letter_page, page_png, Behavior, FakeFigures, FakeRasters};
    use crate::geometry::Point;
    use crate::models::{Question, RawParagraph, Span, StrategyKind};
    use crate::stores::InMemoryQuestionRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryBlobs {
        objects: Mutex<BTreeMap<String, usize>>,
        fail: bool,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn put(&self, bytes: &[u8], key: &str) -> Result<String, StoreError> {
            if self.fail {
                return Err(StoreError::Request("bucket unavailable".to_string()));
            }
            self.objects.lock().await.insert(key.to_string(), bytes.len());
            Ok(format!("mem://{key}"))
        }
    }

    struct DownRepository;

    #[async_trait]
    impl QuestionRepository for DownRepository {
        async fn find_by_hash(&self, _: &ContentHash, _: &str) -> Result<Option<StoredQuestion>, StoreError> {
            Err(StoreError::Request("connection refused".to_string()))
        }

        async fn find_by_hashes(
            &self,
            _: &[ContentHash],
            _: &str,
        ) -> Result<HashMap<ContentHash, StoredQuestion>, StoreError> {
            Err(StoreError::Request("connection refused".to_string()))
        }

        async fn save(&self, _: &str, _: &Question) -> Result<StoredQuestion, StoreError> {
            Err(StoreError::Request("connection refused".to_string()))
        }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn paragraph(offset: usize, text: &str, y0: f64) -> RawParagraph {
        RawParagraph {
            page: 1,
            text: text.to_string(),
            spans: vec![Span {
                offset,
                length: text.len(),
            }],
            polygon: rect(1.0, y0, 9.0, y0 + 0.2),
        }
    }

    fn figure(id: &str, offset: usize, y0: f64) -> RawFigure {
        RawFigure {
            id: FigureId::new(id),
            page: 1,
            polygon: rect(1.0, y0, 4.0, y0 + 1.0),
            spans: vec![Span { offset, length: 1 }],
            caption: None,
        }
    }

    fn exam_document() -> RawDocument {
        RawDocument {
            document_id: "doc-1".to_string(),
            pages: vec![letter_page()],
            paragraphs: vec![
                paragraph(0, "Leia os textos a seguir.", 0.2),
                paragraph(10, "TEXTO A", 0.5),
                paragraph(30, "TEXTO B", 3.0),
                paragraph(50, "QUESTÃO 01 Os textos A e B tratam de", 6.0),
                paragraph(60, "A) fome", 6.3),
                paragraph(70, "B) seca", 6.6),
                paragraph(80, "QUESTÃO 02 Segundo o texto B,", 7.0),
                paragraph(90, "A) chove", 7.3),
            ],
            // Provider order differs from id order.
            figures: vec![figure("1.2", 40, 3.3), figure("1.1", 20, 0.8)],
        }
    }

    fn pipeline(
        behaviors: HashMap<String, Behavior>,
        raster: Option<Vec<u8>>,
        blobs: MemoryBlobs,
        repo: Arc<InMemoryQuestionRepository>,
    ) -> ExamPipeline<FakeFigures, FakeRasters, MemoryBlobs, InMemoryQuestionRepository> {
        ExamPipeline::new(
            Arc::new(FakeFigures {
                behaviors,
                ..FakeFigures::default()
            }),
            Arc::new(FakeRasters { png: raster }),
            Arc::new(blobs),
            repo,
            PipelineOptions {
                attempt_timeout: Duration::from_millis(200),
                transient_backoff: Duration::from_millis(1),
                ..PipelineOptions::default()
            },
        )
        .expect("valid options")
    }

    fn all_bytes() -> HashMap<String, Behavior> {
        HashMap::from([
            ("1.1".to_string(), Behavior::Bytes(page_png(4, 4))),
            ("1.2".to_string(), Behavior::Bytes(page_png(4, 4))),
        ])
    }

    #[tokio::test]
    async fn exam_document_resolves_blocks_images_and_questions() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(all_bytes(), None, MemoryBlobs::default(), repo);
        let report = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_eq!(report.stage, PipelineStage::Completed);
        assert_eq!(
            report.stages_finished,
            vec![
                PipelineStage::Received,
                PipelineStage::Extracting,
                PipelineStage::Assembling,
                PipelineStage::Deduplicating
            ]
        );
        assert_eq!(report.blocks.len(), 1);
        let subs = report.blocks[0].sub_contexts.as_ref().expect("two labels");
        assert_eq!(subs[0].images[0].figure_id, FigureId::new("1.1"));
        assert_eq!(subs[1].images[0].figure_id, FigureId::new("1.2"));
        assert!(subs[0].images[0].url().is_some_and(|url| url.starts_with("mem://doc-1/img-")));
        assert!(subs[0].images[0].url().is_some_and(|url| url.ends_with(".png")));

        assert_eq!(report.questions.len(), 2);
        let block_id = report.blocks[0].id.as_str();
        assert!(report
            .questions
            .iter()
            .all(|item| item.question.context_id.as_deref() == Some(block_id)));
        assert_eq!(report.pending_images(), 0);
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(all_bytes(), None, MemoryBlobs::default(), repo);
        let first = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");
        let second = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.blocks, second.blocks);
        assert_eq!(first.questions, second.questions);
        assert_eq!(first.warnings, second.warnings);
    }

    #[tokio::test]
    async fn empty_document_is_fatal() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(HashMap::new(), None, MemoryBlobs::default(), repo);
        let document = RawDocument {
            document_id: "empty".to_string(),
            pages: vec![letter_page()],
            ..RawDocument::default()
        };
        let error = pipeline
            .run(document, "exam-1", &CancelSignal::new())
            .await
            .expect_err("no content");
        assert!(matches!(error, PipelineError::MissingInput(id) if id == "empty"));
    }

    #[tokio::test]
    async fn failed_extraction_keeps_pending_images() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(HashMap::new(), None, MemoryBlobs::default(), repo.clone());
        let report = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_eq!(report.stage, PipelineStage::PartiallyFailed);
        assert!(report.deduplicated());
        assert_eq!(report.pending_images(), 2);
        assert!(report.blocks[0].has_image());
        let pending: Vec<String> = report
            .warnings
            .iter()
            .filter(|warning| warning.kind == WarningKind::ExtractionPending)
            .map(ToString::to_string)
            .collect();
        assert_eq!(pending, vec!["figure 1.1: extraction pending", "figure 1.2: extraction pending"]);

        let saved = persist(&report, repo.as_ref()).await.expect("persist");
        assert_eq!(saved.len(), 2);
    }

    #[tokio::test]
    async fn crop_fallback_resolves_when_provider_is_empty() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let behaviors = HashMap::from([
            ("1.1".to_string(), Behavior::Empty),
            ("1.2".to_string(), Behavior::Empty),
        ]);
        let pipeline = pipeline(behaviors, Some(page_png(100, 100)), MemoryBlobs::default(), repo);
        let report = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_eq!(report.stage, PipelineStage::Completed);
        let methods: Vec<StrategyKind> = report.blocks[0]
            .all_images()
            .filter_map(|image| match &image.status {
                ImageStatus::Resolved { method, .. } => Some(*method),
                ImageStatus::Pending { .. } => None,
            })
            .collect();
        assert_eq!(methods, vec![StrategyKind::PageCrop, StrategyKind::PageCrop]);
    }

    #[tokio::test]
    async fn upload_failure_is_reported_not_swallowed() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let blobs = MemoryBlobs {
            fail: true,
            ..MemoryBlobs::default()
        };
        let pipeline = pipeline(all_bytes(), None, blobs, repo);
        let report = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_eq!(report.stage, PipelineStage::PartiallyFailed);
        assert_eq!(report.pending_images(), 2);
        let reason = report.blocks[0]
            .all_images()
            .find_map(|image| match &image.status {
                ImageStatus::Pending { reason } => Some(reason.clone()),
                ImageStatus::Resolved { .. } => None,
            })
            .expect("pending reason");
        assert!(reason.contains("upload failed"));
    }

    #[tokio::test]
    async fn cancelled_run_is_partial_and_never_persisted() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(all_bytes(), None, MemoryBlobs::default(), repo.clone());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let report = pipeline.run(exam_document(), "exam-1", &cancel).await.expect("run");
        assert!(report.cancelled);
        assert_eq!(report.stage, PipelineStage::PartiallyFailed);
        assert_eq!(report.stages_finished, vec![PipelineStage::Received]);
        assert!(report.questions.is_empty());

        let error = persist(&report, repo.as_ref()).await.expect_err("refused");
        assert!(matches!(error, PipelineError::Incomplete(_)));
    }

    #[tokio::test]
    async fn second_import_of_same_exam_reuses_ids_but_other_exam_does_not() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(all_bytes(), None, MemoryBlobs::default(), repo.clone());

        let first = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");
        let saved = persist(&first, repo.as_ref()).await.expect("persist");
        assert_eq!(saved.len(), 2);

        let again = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");
        assert!(again
            .questions
            .iter()
            .all(|item| matches!(item.resolution, Resolution::Existing { .. })));
        assert_eq!(persist(&again, repo.as_ref()).await.expect("persist").len(), 0);

        let other = pipeline
            .run(exam_document(), "exam-2", &CancelSignal::new())
            .await
            .expect("run");
        assert!(other.questions.iter().all(|item| item.resolution.is_new()));
    }

    #[tokio::test]
    async fn crashed_worker_is_not_blamed_on_a_strategy() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let behaviors = HashMap::from([
            ("1.1".to_string(), Behavior::Panic),
            ("1.2".to_string(), Behavior::Bytes(page_png(4, 4))),
        ]);
        let pipeline = pipeline(behaviors, None, MemoryBlobs::default(), repo);
        let report = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_eq!(report.stage, PipelineStage::PartiallyFailed);
        assert_eq!(report.pending_images(), 1);
        let reason = report.blocks[0]
            .all_images()
            .find_map(|image| match &image.status {
                ImageStatus::Pending { reason } => Some(reason.clone()),
                ImageStatus::Resolved { .. } => None,
            })
            .expect("pending reason");
        assert!(reason.starts_with("figure 1.1: extraction worker failed"));
        assert!(!reason.contains("provider_figure"));
    }

    #[tokio::test]
    async fn repository_outage_keeps_questions_unchecked() {
        let repo = Arc::new(DownRepository);
        let pipeline = ExamPipeline::new(
            Arc::new(FakeFigures {
                behaviors: all_bytes(),
                ..FakeFigures::default()
            }),
            Arc::new(FakeRasters { png: None }),
            Arc::new(MemoryBlobs::default()),
            repo.clone(),
            PipelineOptions::default(),
        )
        .expect("valid options");

        let report = pipeline
            .run(exam_document(), "exam-1", &CancelSignal::new())
            .await
            .expect("run");

        assert_eq!(report.stage, PipelineStage::PartiallyFailed);
        assert!(!report.deduplicated());
        assert_eq!(report.blocks.len(), 1);
        let numbers: Vec<u32> = report.questions.iter().map(|item| item.question.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(report
            .questions
            .iter()
            .all(|item| item.resolution == Resolution::Unchecked && item.question.content_hash.is_some()));
        assert!(report
            .warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::RepositoryUnavailable));

        let error = persist(&report, repo.as_ref()).await.expect_err("refused");
        assert!(matches!(error, PipelineError::Incomplete(_)));
    }

    #[tokio::test]
    async fn repeated_figure_ids_keep_the_first() {
        let repo = Arc::new(InMemoryQuestionRepository::default());
        let pipeline = pipeline(all_bytes(), None, MemoryBlobs::default(), repo);
        let mut document = exam_document();
        document.figures.push(figure("1.1", 45, 8.5));

        let report = pipeline
            .run(document, "exam-1", &CancelSignal::new())
            .await
            .expect("run");
        let images: Vec<&FigureId> = report.blocks[0].all_images().map(|image| &image.figure_id).collect();
        assert_eq!(images, vec![&FigureId::new("1.1"), &FigureId::new("1.2")]);
        assert!(report
            .warnings
            .iter()
            .any(|warning| warning.kind == WarningKind::DuplicateFigureId));
        assert_eq!(report.stage, PipelineStage::Completed);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let result = ExamPipeline::new(
            Arc::new(FakeFigures::default()),
            Arc::new(FakeRasters { png: None }),
            Arc::new(MemoryBlobs::default()),
            Arc::new(InMemoryQuestionRepository::default()),
            PipelineOptions {
                worker_limit: 0,
                ..PipelineOptions::default()
            },
        );
        assert!(matches!(result, Err(PipelineError::InvalidOptions(_))));
    }
}
