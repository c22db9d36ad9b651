pub mod assembler;
pub mod canonical;
pub mod dedup;
pub mod error;
pub mod extraction;
pub mod geometry;
pub mod ingest;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod presentation;
pub mod questions;
pub mod roles;
pub mod sequence;
pub mod stores;
pub mod traits;

pub use assembler::{assemble, Assembly};
pub use canonical::{canonicalize, normalize_whitespace, question_hash};
pub use dedup::{check_duplicates, resolve, Resolution, ResolvedQuestion};
pub use error::{
    ExtractionError, IngestError, PipelineError, SourceError, StoreError, StrategyFailure,
};
pub use extraction::{DocumentHandle, ImageExtractor};
pub use geometry::{BoundingBox, Point};
pub use ingest::{
    discover_analysis_files, load_analysis_file, load_folder_best_effort, parse_analysis,
    LoadReport, ParsedAnalysis, SkippedFile,
};
pub use matcher::{match_figures, FigureBinding, FigureMerge, MatchOutcome};
pub use models::{
    Alternative, BlockKind, ContentHash, ContextBlock, FigureId, ImageAsset, ImagePayload,
    ImageRef, ImageStatus, PageInfo, PipelineOptions, PipelineStage, PipelineWarning, Question,
    RawDocument, RawFigure, RawParagraph, Span, StoredQuestion, StrategyKind, SubContext,
    SubContextKind, WarningKind, WarningSubject,
};
pub use pipeline::{persist, ExamPipeline, PipelineReport};
pub use presentation::{ContextBlockView, DocumentView, QuestionView};
pub use roles::{ParagraphRole, RoleClassifier};
pub use sequence::{LabelFamily, SequenceLabel};
pub use stores::{
    HttpFigureSource, InMemoryQuestionRepository, LocalBlobStore, LocalFigureDir, LocalPageDir,
};
pub use traits::{BlobStore, CancelSignal, FigureSource, PageRaster, PageRasterSource, QuestionRepository};
