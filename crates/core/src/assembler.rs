//! Groups reading-ordered paragraphs, labels and figures into context blocks
//! and parses the questions that follow them.
//!
//! An instruction paragraph opens a block; a question heading or the next
//! instruction closes it. Inside a question stem, before the first
//! alternative, instructions and labels are question text. A label paragraph met outside any block opens an
//! implicit block with an empty statement. Blocks with two or more distinct
//! labels are split into sub-contexts ordered by label, everything else stays
//! a flat paragraph list.

use crate::matcher::{figure_anchor, MatchOutcome};
use crate::models::{
    BlockKind, ContextBlock, FigureId, ImageRef, ImageStatus, PipelineWarning, Question, RawFigure,
    RawParagraph, SubContext, SubContextKind, WarningKind, WarningSubject,
};
use crate::questions::QuestionDraft;
use crate::roles::ParagraphRole;
use crate::sequence::{choose_family, RawLabel, SequenceLabel};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

const TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub blocks: Vec<ContextBlock>,
    pub questions: Vec<Question>,
    pub warnings: Vec<PipelineWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Item {
    Figure(usize),
    Paragraph(usize),
}

struct BlockDraft {
    id: String,
    statement: String,
    items: Vec<Item>,
}

pub fn make_block_id(document_id: &str, ordinal: usize, statement: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((ordinal as u64).to_le_bytes());
    hasher.update(statement.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("ctx-{}", &digest[..16])
}

pub fn assemble(
    document_id: &str,
    paragraphs: &[RawParagraph],
    roles: &[ParagraphRole],
    matched: &MatchOutcome,
    images: &BTreeMap<FigureId, ImageRef>,
) -> Assembly {
    let mut assembly = Assembly::default();
    let mut block: Option<BlockDraft> = None;
    let mut question: Option<QuestionDraft> = None;
    let mut context_id: Option<String> = None;
    let mut opened = 0usize;

    let builder = BlockBuilder {
        paragraphs,
        roles,
        matched,
        images,
    };

    for item in reading_items(paragraphs, &matched.figures) {
        match item {
            Item::Figure(index) => {
                let figure = &matched.figures[index];
                if let Some(open) = question.as_mut() {
                    open.mark_image();
                } else if let Some(open) = block.as_mut() {
                    open.items.push(item);
                } else {
                    assembly.warnings.push(PipelineWarning::new(
                        WarningSubject::Figure(figure.id.clone()),
                        WarningKind::UnplacedFigure,
                        "outside any context block or question",
                    ));
                }
            }
            Item::Paragraph(index) => match &roles[index] {
                ParagraphRole::Instruction => {
                    if in_stem(&question) {
                        if let Some(open) = question.as_mut() {
                            open.push_text(&paragraphs[index].text);
                        }
                        continue;
                    }
                    flush_question(&mut question, &mut assembly);
                    flush_block(&mut block, &builder, &mut assembly);
                    let draft = open_block(document_id, &mut opened, &paragraphs[index].text);
                    context_id = Some(draft.id.clone());
                    block = Some(draft);
                }
                ParagraphRole::QuestionStart { number, remainder } => {
                    flush_question(&mut question, &mut assembly);
                    flush_block(&mut block, &builder, &mut assembly);
                    question = Some(QuestionDraft::open(*number, remainder, context_id.clone()));
                }
                ParagraphRole::Alternative { letter, text } => {
                    if let Some(open) = question.as_mut() {
                        open.push_alternative(letter, text);
                    } else if let Some(open) = block.as_mut() {
                        open.items.push(item);
                    }
                }
                ParagraphRole::Label(_) => {
                    if in_stem(&question) {
                        if let Some(open) = question.as_mut() {
                            open.push_text(&paragraphs[index].text);
                        }
                        continue;
                    }
                    flush_question(&mut question, &mut assembly);
                    if block.is_none() {
                        let draft = open_block(document_id, &mut opened, "");
                        context_id = Some(draft.id.clone());
                        block = Some(draft);
                    }
                    if let Some(open) = block.as_mut() {
                        open.items.push(item);
                    }
                }
                ParagraphRole::Body => {
                    if let Some(open) = question.as_mut() {
                        open.push_text(&paragraphs[index].text);
                    } else if let Some(open) = block.as_mut() {
                        open.items.push(item);
                    }
                }
            },
        }
    }

    flush_question(&mut question, &mut assembly);
    flush_block(&mut block, &builder, &mut assembly);
    assembly
}

/// Paragraph indices interleaved with figures at their anchors; figures
/// sharing an anchor keep ascending id order.
fn reading_items(paragraphs: &[RawParagraph], figures: &[RawFigure]) -> Vec<Item> {
    let mut anchored: Vec<(usize, &FigureId, usize)> = figures
        .iter()
        .enumerate()
        .map(|(index, figure)| (figure_anchor(figure, paragraphs), &figure.id, index))
        .collect();
    anchored.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(b.1)));

    let mut items = Vec::with_capacity(paragraphs.len() + figures.len());
    let mut pending = anchored.into_iter().peekable();
    for index in 0..=paragraphs.len() {
        while let Some((_, _, figure)) = pending.next_if(|(anchor, _, _)| *anchor <= index) {
            items.push(Item::Figure(figure));
        }
        if index < paragraphs.len() {
            items.push(Item::Paragraph(index));
        }
    }
    items
}

/// Instructions and labels met before a question's first alternative are
/// part of its stem.
fn in_stem(question: &Option<QuestionDraft>) -> bool {
    question.as_ref().is_some_and(|open| !open.has_alternatives())
}

fn open_block(document_id: &str, opened: &mut usize, statement: &str) -> BlockDraft {
    let id = make_block_id(document_id, *opened, statement);
    *opened += 1;
    BlockDraft {
        id,
        statement: statement.trim().to_string(),
        items: Vec::new(),
    }
}

fn flush_question(question: &mut Option<QuestionDraft>, assembly: &mut Assembly) {
    if let Some(draft) = question.take() {
        assembly.questions.push(draft.finish());
    }
}

fn flush_block(block: &mut Option<BlockDraft>, builder: &BlockBuilder<'_>, assembly: &mut Assembly) {
    if let Some(draft) = block.take() {
        let (built, warnings) = builder.build(draft);
        assembly.blocks.push(built);
        assembly.warnings.extend(warnings);
    }
}

struct BlockBuilder<'a> {
    paragraphs: &'a [RawParagraph],
    roles: &'a [ParagraphRole],
    matched: &'a MatchOutcome,
    images: &'a BTreeMap<FigureId, ImageRef>,
}

#[derive(Default)]
struct SubDraft {
    title: String,
    content: Vec<String>,
    images: Vec<ImageRef>,
}

impl<'a> BlockBuilder<'a> {
    fn label_raw(&self, index: usize) -> Option<RawLabel> {
        match &self.roles[index] {
            ParagraphRole::Label(found) => Some(found.raw),
            _ => None,
        }
    }

    fn image_ref(&self, figure: &RawFigure) -> ImageRef {
        self.images.get(&figure.id).cloned().unwrap_or_else(|| ImageRef {
            figure_id: figure.id.clone(),
            page: figure.page,
            caption: figure.caption.clone(),
            status: ImageStatus::Pending {
                reason: "not extracted".to_string(),
            },
        })
    }

    fn build(&self, draft: BlockDraft) -> (ContextBlock, Vec<PipelineWarning>) {
        let mut warnings = Vec::new();
        let raws: Vec<RawLabel> = draft
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Paragraph(index) => self.label_raw(*index),
                Item::Figure(_) => None,
            })
            .collect();
        let family = choose_family(&raws);

        let mut labels: HashMap<usize, SequenceLabel> = HashMap::new();
        for item in &draft.items {
            if let Item::Paragraph(index) = item {
                if let Some(raw) = self.label_raw(*index) {
                    match raw.resolve(family) {
                        Some(label) => {
                            labels.insert(*index, label);
                        }
                        None => warnings.push(PipelineWarning::new(
                            WarningSubject::Block(draft.id.clone()),
                            WarningKind::MixedLabelFamily,
                            format!(
                                "label in \"{}\" does not match the block's {:?} labels; kept as text",
                                self.paragraphs[*index].text.trim(),
                                family
                            ),
                        )),
                    }
                }
            }
        }

        let mut distinct: Vec<SequenceLabel> = labels.values().copied().collect();
        distinct.sort();
        distinct.dedup();

        let mut paragraphs = Vec::new();
        let mut images = Vec::new();
        let mut sub_contexts = None;

        if distinct.len() >= 2 {
            let mut subs: BTreeMap<SequenceLabel, SubDraft> = BTreeMap::new();
            let mut current: Option<SequenceLabel> = None;
            for item in &draft.items {
                match item {
                    Item::Paragraph(index) => {
                        if let Some(label) = labels.get(index) {
                            current = Some(*label);
                            let (heading, remainder) = self.heading_and_remainder(*index);
                            let sub = subs.entry(*label).or_default();
                            if sub.title.is_empty() {
                                sub.title = heading;
                            }
                            if !remainder.is_empty() {
                                sub.content.push(remainder);
                            }
                            continue;
                        }
                        let text = self.paragraphs[*index].text.trim().to_string();
                        match current.and_then(|label| subs.get_mut(&label)) {
                            Some(sub) => sub.content.push(text),
                            None => paragraphs.push(text),
                        }
                    }
                    Item::Figure(figure_index) => {
                        let figure = &self.matched.figures[*figure_index];
                        let target = self
                            .matched
                            .bindings
                            .get(&figure.id)
                            .and_then(|binding| binding.raw.resolve(family))
                            .filter(|label| distinct.contains(label));
                        match target {
                            Some(label) => subs
                                .entry(label)
                                .or_default()
                                .images
                                .push(self.image_ref(figure)),
                            None => images.push(self.image_ref(figure)),
                        }
                    }
                }
            }

            sub_contexts = Some(
                subs.into_iter()
                    .map(|(label, sub)| {
                        let content = sub.content.join("\n");
                        let title = if sub.title.is_empty() {
                            label.to_string()
                        } else {
                            sub.title
                        };
                        SubContext {
                            kind: sub_context_kind(&title, &content, !sub.images.is_empty()),
                            sequence: label,
                            title,
                            content,
                            images: sub.images,
                        }
                    })
                    .collect(),
            );
        } else {
            for item in &draft.items {
                match item {
                    Item::Paragraph(index) => paragraphs.push(self.paragraphs[*index].text.trim().to_string()),
                    Item::Figure(figure_index) => images.push(self.image_ref(&self.matched.figures[*figure_index])),
                }
            }
        }

        let title = take_title(&mut paragraphs, &draft.items, self.roles);
        let mut block = ContextBlock {
            id: draft.id,
            statement: draft.statement,
            title,
            paragraphs,
            sub_contexts,
            images,
            kinds: Vec::new(),
        };
        block.kinds = block_kinds(&block);
        (block, warnings)
    }

    fn heading_and_remainder(&self, index: usize) -> (String, String) {
        match &self.roles[index] {
            ParagraphRole::Label(found) => (found.heading.clone(), found.remainder.clone()),
            _ => (String::new(), self.paragraphs[index].text.trim().to_string()),
        }
    }
}

/// The first block paragraph becomes the title when it reads like a heading.
fn take_title(paragraphs: &mut Vec<String>, items: &[Item], roles: &[ParagraphRole]) -> String {
    let first_is_body = items.iter().find_map(|item| match item {
        Item::Paragraph(index) => Some(roles[*index] == ParagraphRole::Body),
        Item::Figure(_) => None,
    });
    if first_is_body != Some(true) || paragraphs.len() < 2 {
        return String::new();
    }

    let candidate = &paragraphs[0];
    let looks_like_heading = candidate.chars().count() <= TITLE_MAX_CHARS
        && !candidate.ends_with(['.', '?', '!', ':', ';', ','])
        && !candidate.contains('\n');
    if looks_like_heading {
        paragraphs.remove(0)
    } else {
        String::new()
    }
}

fn sub_context_kind(title: &str, content: &str, has_images: bool) -> SubContextKind {
    let haystack = format!("{title} {content}").to_lowercase();
    if haystack.contains("charge") || haystack.contains("cartoon") {
        SubContextKind::Charge
    } else if haystack.contains("propaganda") || haystack.contains("anúncio") || haystack.contains("advertisement") {
        SubContextKind::Propaganda
    } else if content.trim().is_empty() && has_images {
        SubContextKind::Image
    } else {
        SubContextKind::Text
    }
}

fn block_kinds(block: &ContextBlock) -> Vec<BlockKind> {
    let mut kinds = Vec::new();
    let has_text = !block.paragraphs.is_empty()
        || block
            .sub_contexts
            .iter()
            .flatten()
            .any(|sub| !sub.content.is_empty());
    if has_text {
        kinds.push(BlockKind::Text);
    }
    if block.has_image() {
        kinds.push(BlockKind::Image);
    }
    kinds
}
