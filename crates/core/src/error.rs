use crate::models::FigureId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("analysis payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failure of a read-only document source (figure API, page rasters).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source timed out: {0}")]
    Timeout(String),

    #[error("source document missing: {0}")]
    DocumentMissing(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout(_) | SourceError::Unavailable(_) => true,
            SourceError::Http(error) => error.is_timeout() || error.is_connect(),
            _ => false,
        }
    }
}

/// Typed outcome of one extraction strategy that produced no usable bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyFailure {
    #[error("not available: {0}")]
    NotAvailable(String),

    #[error("malformed region: {0}")]
    MalformedRegion(String),

    #[error("source document missing: {0}")]
    SourceDocumentMissing(String),

    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {0} ms")]
    TimedOut(u128),

    #[error("cancelled")]
    Cancelled,
}

impl StrategyFailure {
    /// Transient failures earn one retry before they count.
    pub fn is_transient(&self) -> bool {
        matches!(self, StrategyFailure::Unreachable(_) | StrategyFailure::TimedOut(_))
    }
}

impl From<SourceError> for StrategyFailure {
    fn from(value: SourceError) -> Self {
        if value.is_transient() {
            return StrategyFailure::Unreachable(value.to_string());
        }
        match value {
            SourceError::DocumentMissing(details) => StrategyFailure::SourceDocumentMissing(details),
            SourceError::Cancelled => StrategyFailure::Cancelled,
            other => StrategyFailure::NotAvailable(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("figure {figure_id}: every strategy failed ({})", summarize(.attempts))]
    Exhausted {
        figure_id: FigureId,
        attempts: Vec<(crate::models::StrategyKind, StrategyFailure)>,
    },

    #[error("figure {figure_id}: no extraction strategy configured")]
    NoStrategy { figure_id: FigureId },

    #[error("figure {figure_id}: upload failed: {source}")]
    Upload {
        figure_id: FigureId,
        #[source]
        source: StoreError,
    },

    #[error("figure {0}: extraction cancelled")]
    Cancelled(FigureId),

    #[error("figure {figure_id}: extraction worker failed: {reason}")]
    Worker { figure_id: FigureId, reason: String },
}

fn summarize(attempts: &[(crate::models::StrategyKind, StrategyFailure)]) -> String {
    attempts
        .iter()
        .map(|(strategy, failure)| format!("{strategy}: {failure}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("repository request failed: {0}")]
    Request(String),

    #[error("store timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document {0} has no paragraphs and no figures")]
    MissingInput(String),

    #[error("invalid pipeline options: {0}")]
    InvalidOptions(String),

    #[error("report for document {0} did not finish deduplication; refusing to persist")]
    Incomplete(String),

    #[error("repository error: {0}")]
    Store(#[from] StoreError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
