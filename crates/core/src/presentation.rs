//! Outward JSON shape of blocks and questions.
//!
//! Field names here are a published contract and do not follow the internal
//! model's naming.

use crate::models::{BlockKind, ContextBlock, ImageRef, ImageStatus, Question, SubContext, SubContextKind};
use crate::pipeline::PipelineReport;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageView {
    pub figure_id: String,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl From<&ImageRef> for ImageView {
    fn from(image: &ImageRef) -> Self {
        Self {
            figure_id: image.figure_id.to_string(),
            page: image.page,
            url: match &image.status {
                ImageStatus::Resolved { url, .. } => Some(url.clone()),
                ImageStatus::Pending { .. } => None,
            },
            pending: image.is_pending(),
            caption: image.caption.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubContextView {
    pub sequence: String,
    #[serde(rename = "type")]
    pub kind: SubContextKind,
    pub title: String,
    pub content: String,
    pub images: Vec<ImageView>,
}

impl From<&SubContext> for SubContextView {
    fn from(sub: &SubContext) -> Self {
        Self {
            sequence: sub.sequence.to_string(),
            kind: sub.kind,
            title: sub.title.clone(),
            content: sub.content.clone(),
            images: sub.images.iter().map(ImageView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBlockView {
    pub id: String,
    #[serde(rename = "type")]
    pub kinds: Vec<BlockKind>,
    pub statement: String,
    pub paragraphs: Vec<String>,
    pub title: String,
    #[serde(rename = "hasImage")]
    pub has_image: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_contexts: Option<Vec<SubContextView>>,
    /// Figures attached to the block itself rather than to a sub-context.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageView>,
}

impl From<&ContextBlock> for ContextBlockView {
    fn from(block: &ContextBlock) -> Self {
        Self {
            id: block.id.clone(),
            kinds: block.kinds.clone(),
            statement: block.statement.clone(),
            paragraphs: block.paragraphs.clone(),
            title: block.title.clone(),
            has_image: block.has_image(),
            sub_contexts: block
                .sub_contexts
                .as_ref()
                .map(|subs| subs.iter().map(SubContextView::from).collect()),
            images: block.images.iter().map(ImageView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeView {
    pub letter: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub number: u32,
    pub question: String,
    pub alternatives: Vec<AlternativeView>,
    #[serde(rename = "hasImage")]
    pub has_image: bool,
    pub context_id: Option<String>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            number: question.number,
            question: question.text.clone(),
            alternatives: question
                .alternatives
                .iter()
                .map(|alternative| AlternativeView {
                    letter: alternative.letter.clone(),
                    text: alternative.text.clone(),
                })
                .collect(),
            has_image: question.has_image,
            context_id: question.context_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document_id: String,
    pub exam_id: String,
    pub status: crate::models::PipelineStage,
    pub context_blocks: Vec<ContextBlockView>,
    pub questions: Vec<QuestionView>,
    pub warnings: Vec<String>,
}

impl From<&PipelineReport> for DocumentView {
    fn from(report: &PipelineReport) -> Self {
        Self {
            document_id: report.document_id.clone(),
            exam_id: report.exam_id.clone(),
            status: report.stage,
            context_blocks: report.blocks.iter().map(ContextBlockView::from).collect(),
            questions: report
                .questions
                .iter()
                .map(|resolved| QuestionView::from(&resolved.question))
                .collect(),
            warnings: report.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}
