use crate::geometry::{BoundingBox, Point};
use crate::sequence::SequenceLabel;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageInfo {
    pub number: u32,
    pub width: f64,
    pub height: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawParagraph {
    pub page: u32,
    pub text: String,
    pub spans: Vec<Span>,
    pub polygon: Vec<Point>,
}

impl RawParagraph {
    pub fn offset(&self) -> Option<usize> {
        self.spans.iter().map(|span| span.offset).min()
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_polygon(&self.polygon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFigure {
    pub id: FigureId,
    pub page: u32,
    pub polygon: Vec<Point>,
    pub spans: Vec<Span>,
    pub caption: Option<String>,
}

impl RawFigure {
    pub fn offset(&self) -> Option<usize> {
        self.spans.iter().map(|span| span.offset).min()
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_polygon(&self.polygon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawDocument {
    pub document_id: String,
    pub pages: Vec<PageInfo>,
    pub paragraphs: Vec<RawParagraph>,
    pub figures: Vec<RawFigure>,
}

impl RawDocument {
    pub fn page(&self, number: u32) -> Option<&PageInfo> {
        self.pages.iter().find(|page| page.number == number)
    }
}

/// Provider figure identifier, ordered naturally so that `1.2 < 1.10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FigureId(pub String);

impl FigureId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FigureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for FigureId {
    /// Natural order over dot-separated segments; ids that only differ in
    /// zero padding (`1.1`, `1.01`) fall back to their raw text.
    fn cmp(&self, other: &Self) -> Ordering {
        natural_order(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

fn natural_order(left: &str, right: &str) -> Ordering {
    let mut left = left.split('.');
    let mut right = right.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let segment = match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => a.cmp(b),
                };
                if segment != Ordering::Equal {
                    return segment;
                }
            }
        }
    }
}

impl PartialOrd for FigureId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ProviderFigure,
    PageCrop,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::ProviderFigure => f.write_str("provider_figure"),
            StrategyKind::PageCrop => f.write_str("page_crop"),
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "provider_figure" | "provider" | "direct" => Ok(StrategyKind::ProviderFigure),
            "page_crop" | "crop" => Ok(StrategyKind::PageCrop),
            other => Err(format!("unknown extraction strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePayload {
    Bytes(Vec<u8>),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub id: String,
    pub payload: ImagePayload,
    pub source_figure: FigureId,
    pub method: StrategyKind,
}

impl ImageAsset {
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            ImagePayload::Bytes(bytes) => Some(bytes),
            ImagePayload::Url(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.payload {
            ImagePayload::Url(url) => Some(url),
            ImagePayload::Bytes(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageStatus {
    Resolved {
        asset_id: String,
        url: String,
        method: StrategyKind,
    },
    Pending {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub figure_id: FigureId,
    pub page: u32,
    pub caption: Option<String>,
    pub status: ImageStatus,
}

impl ImageRef {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, ImageStatus::Pending { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match &self.status {
            ImageStatus::Resolved { url, .. } => Some(url),
            ImageStatus::Pending { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubContextKind {
    Charge,
    Propaganda,
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubContext {
    pub sequence: SequenceLabel,
    pub kind: SubContextKind,
    pub title: String,
    pub content: String,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub id: String,
    pub statement: String,
    pub title: String,
    pub paragraphs: Vec<String>,
    pub sub_contexts: Option<Vec<SubContext>>,
    pub images: Vec<ImageRef>,
    pub kinds: Vec<BlockKind>,
}

impl ContextBlock {
    /// True when any figure is attached, whether or not its bytes were retrieved.
    pub fn has_image(&self) -> bool {
        !self.images.is_empty()
            || self
                .sub_contexts
                .iter()
                .flatten()
                .any(|sub| !sub.images.is_empty())
    }

    pub fn all_images(&self) -> impl Iterator<Item = &ImageRef> {
        self.images.iter().chain(
            self.sub_contexts
                .iter()
                .flatten()
                .flat_map(|sub| sub.images.iter()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Alternative {
    pub letter: String,
    pub text: String,
}

/// Lowercase hex SHA-256 digest over canonical question content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub number: u32,
    pub text: String,
    pub alternatives: Vec<Alternative>,
    pub context_id: Option<String>,
    pub has_image: bool,
    pub content_hash: Option<ContentHash>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQuestion {
    pub id: String,
    pub exam_id: String,
    pub question: Question,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subject", content = "id", rename_all = "snake_case")]
pub enum WarningSubject {
    Document,
    Figure(FigureId),
    Block(String),
    Question(u32),
}

impl fmt::Display for WarningSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningSubject::Document => f.write_str("document"),
            WarningSubject::Figure(id) => write!(f, "figure {id}"),
            WarningSubject::Block(id) => write!(f, "block {id}"),
            WarningSubject::Question(number) => write!(f, "question {number}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ExtractionPending,
    FigureMerged,
    DuplicateFigureId,
    DuplicateQuestion,
    MixedLabelFamily,
    UnplacedFigure,
    RepositoryUnavailable,
    Cancelled,
}

impl WarningKind {
    /// Informational kinds record a decision rather than a lost item.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            WarningKind::ExtractionPending | WarningKind::RepositoryUnavailable | WarningKind::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineWarning {
    pub subject: WarningSubject,
    pub kind: WarningKind,
    pub message: String,
}

impl PipelineWarning {
    pub fn new(subject: WarningSubject, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            subject,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Extracting,
    Assembling,
    Deduplicating,
    Completed,
    PartiallyFailed,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub worker_limit: usize,
    pub strategy_order: Vec<StrategyKind>,
    pub attempt_timeout: Duration,
    pub transient_backoff: Duration,
    pub duplicate_iou: f64,
    pub adjacency_gap: f64,
    pub fallback_window: f64,
    pub instruction_patterns: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            strategy_order: vec![StrategyKind::ProviderFigure, StrategyKind::PageCrop],
            attempt_timeout: Duration::from_secs(20),
            transient_backoff: Duration::from_millis(250),
            duplicate_iou: 0.9,
            adjacency_gap: 0.08,
            fallback_window: 0.5,
            instruction_patterns: vec![
                r"(?i)^\s*(?:leia|read|observe|analise|analyze|considere|consider|examine)\b".to_string(),
                r"(?i)\b(?:texto|textos|text|texts|imagem|imagens|image|images|charge|tirinha|gr[áa]fico)\s+(?:a\s+)?(?:seguir|abaixo|following|below)\b".to_string(),
            ],
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_limit == 0 {
            return Err("worker_limit must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.duplicate_iou) {
            return Err(format!("duplicate_iou {} is outside [0, 1]", self.duplicate_iou));
        }
        if self.adjacency_gap < 0.0 || self.fallback_window < 0.0 {
            return Err("adjacency_gap and fallback_window must be non-negative".to_string());
        }
        Ok(())
    }
}
