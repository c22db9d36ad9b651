//! Binds figures to sequence labels by lexical and spatial proximity and
//! collapses duplicate figure detections.
//!
//! Binding precedence for one figure:
//! 1. a label in the figure's own caption;
//! 2. the label paragraph immediately before the figure on the same page,
//!    within `adjacency_gap` of page height;
//! 3. the vertically nearest label paragraph on the same page, within
//!    `fallback_window` of page height (ties: smaller horizontal gap, then
//!    earlier paragraph);
//! 4. when the page has no label paragraph at all, the last label paragraph on
//!    the previous page, provided no instruction or question sits between.
//!
//! Figures are visited in ascending id order so the result never depends on
//! provider ordering.

use crate::geometry::BoundingBox;
use crate::models::{FigureId, PageInfo, PipelineOptions, RawFigure, RawParagraph};
use crate::roles::ParagraphRole;
use crate::sequence::{scan_label, RawLabel, SequenceLabel, SequenceToken};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    Caption,
    Adjacent,
    Nearest,
    PreviousPage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureBinding {
    pub raw: RawLabel,
    pub paragraph: Option<usize>,
    pub source: BindingSource,
}

impl FigureBinding {
    pub fn label(&self) -> SequenceLabel {
        let family = self.raw.default_family();
        self.raw
            .resolve(family)
            .unwrap_or(SequenceLabel { family, ordinal: 0 })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FigureMerge {
    pub kept: FigureId,
    pub dropped: FigureId,
    pub page: u32,
    pub iou: f64,
}

/// Paragraph indices that belong to one label, starting at the label itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGroup {
    pub token: SequenceToken,
    pub paragraphs: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub tokens: Vec<SequenceToken>,
    pub groups: Vec<LabelGroup>,
    pub bindings: BTreeMap<FigureId, FigureBinding>,
    pub figures: Vec<RawFigure>,
    pub merges: Vec<FigureMerge>,
}

impl MatchOutcome {
    pub fn label_for(&self, figure: &FigureId) -> Option<SequenceLabel> {
        self.bindings.get(figure).map(FigureBinding::label)
    }
}

/// Stable reading order: page, then first span offset, then provider order.
pub fn in_reading_order(paragraphs: &[RawParagraph]) -> Vec<RawParagraph> {
    let mut ordered: Vec<(usize, &RawParagraph)> = paragraphs.iter().enumerate().collect();
    ordered.sort_by_key(|(index, paragraph)| {
        (paragraph.page, paragraph.offset().unwrap_or(usize::MAX), *index)
    });
    ordered.into_iter().map(|(_, paragraph)| paragraph.clone()).collect()
}

/// Number of reading-ordered paragraphs that precede `figure`.
pub fn figure_anchor(figure: &RawFigure, paragraphs: &[RawParagraph]) -> usize {
    match figure.offset() {
        Some(offset) => paragraphs
            .iter()
            .take_while(|paragraph| {
                (paragraph.page, paragraph.offset().unwrap_or(usize::MAX)) < (figure.page, offset)
            })
            .count(),
        None => {
            let top = figure.bounds().map(|b| b.y0);
            paragraphs
                .iter()
                .take_while(|paragraph| {
                    if paragraph.page != figure.page {
                        return paragraph.page < figure.page;
                    }
                    match (paragraph.bounds(), top) {
                        (Some(bounds), Some(top)) => bounds.y0 <= top,
                        _ => true,
                    }
                })
                .count()
        }
    }
}

/// Drops figures that overlap a lower-id figure on the same page at or above
/// `threshold` IoU.
pub fn merge_duplicate_figures(figures: &[RawFigure], threshold: f64) -> (Vec<RawFigure>, Vec<FigureMerge>) {
    let mut sorted = figures.to_vec();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut survivors: Vec<RawFigure> = Vec::new();
    let mut merges = Vec::new();
    for figure in sorted {
        let duplicate_of = figure.bounds().and_then(|bounds| {
            survivors.iter().find_map(|kept| {
                if kept.page != figure.page {
                    return None;
                }
                let iou = kept.bounds()?.iou(&bounds);
                (iou >= threshold).then(|| (kept.id.clone(), iou))
            })
        });

        match duplicate_of {
            Some((kept, iou)) => {
                info!(kept = %kept, dropped = %figure.id, page = figure.page, iou, "merged duplicate figure");
                merges.push(FigureMerge {
                    kept,
                    dropped: figure.id,
                    page: figure.page,
                    iou,
                });
            }
            None => survivors.push(figure),
        }
    }

    (survivors, merges)
}

pub fn match_figures(
    paragraphs: &[RawParagraph],
    roles: &[ParagraphRole],
    figures: &[RawFigure],
    pages: &[PageInfo],
    options: &PipelineOptions,
) -> MatchOutcome {
    let tokens: Vec<SequenceToken> = roles
        .iter()
        .enumerate()
        .filter_map(|(index, role)| match role {
            ParagraphRole::Label(found) => Some(SequenceToken {
                paragraph: index,
                raw: found.raw,
                heading: found.heading.clone(),
                remainder: found.remainder.clone(),
            }),
            _ => None,
        })
        .collect();

    let groups = build_groups(&tokens, roles);
    let (figures, merges) = merge_duplicate_figures(figures, options.duplicate_iou);

    let mut bindings = BTreeMap::new();
    for figure in &figures {
        if let Some(binding) = bind_figure(figure, paragraphs, roles, &tokens, pages, options) {
            debug!(figure = %figure.id, label = %binding.label(), source = ?binding.source, "bound figure");
            bindings.insert(figure.id.clone(), binding);
        }
    }

    MatchOutcome {
        tokens,
        groups,
        bindings,
        figures,
        merges,
    }
}

fn build_groups(tokens: &[SequenceToken], roles: &[ParagraphRole]) -> Vec<LabelGroup> {
    tokens
        .iter()
        .map(|token| {
            let mut paragraphs = vec![token.paragraph];
            paragraphs.extend(
                (token.paragraph + 1..roles.len())
                    .take_while(|&index| roles[index] == ParagraphRole::Body),
            );
            LabelGroup {
                token: token.clone(),
                paragraphs,
            }
        })
        .collect()
}

fn page_height(pages: &[PageInfo], number: u32) -> Option<f64> {
    pages
        .iter()
        .find(|page| page.number == number)
        .map(|page| page.height)
        .filter(|height| *height > 0.0)
}

fn bind_figure(
    figure: &RawFigure,
    paragraphs: &[RawParagraph],
    roles: &[ParagraphRole],
    tokens: &[SequenceToken],
    pages: &[PageInfo],
    options: &PipelineOptions,
) -> Option<FigureBinding> {
    if let Some(found) = figure.caption.as_deref().and_then(scan_label) {
        return Some(FigureBinding {
            raw: found.raw,
            paragraph: None,
            source: BindingSource::Caption,
        });
    }

    let bounds = figure.bounds();
    let height = page_height(pages, figure.page);
    let within = |gap: f64, fraction: f64| match height {
        Some(height) => gap <= fraction * height,
        None => true,
    };
    let token_at = |index: usize| tokens.iter().find(|token| token.paragraph == index);

    let anchor = figure_anchor(figure, paragraphs);
    if anchor > 0 {
        let previous = anchor - 1;
        if paragraphs[previous].page == figure.page {
            if let Some(token) = token_at(previous) {
                let gap = match (paragraphs[previous].bounds(), bounds) {
                    (Some(label), Some(figure)) => label.vertical_gap(&figure),
                    _ => 0.0,
                };
                if within(gap, options.adjacency_gap) {
                    return Some(FigureBinding {
                        raw: token.raw,
                        paragraph: Some(previous),
                        source: BindingSource::Adjacent,
                    });
                }
            }
        }
    }

    if let Some(bounds) = bounds {
        if let Some(token) = nearest_on_page(figure.page, &bounds, paragraphs, tokens)
            .filter(|(_, gap)| within(*gap, options.fallback_window))
            .map(|(token, _)| token)
        {
            return Some(FigureBinding {
                raw: token.raw,
                paragraph: Some(token.paragraph),
                source: BindingSource::Nearest,
            });
        }
    }

    let page_has_labels = tokens
        .iter()
        .any(|token| paragraphs[token.paragraph].page == figure.page);
    if page_has_labels || figure.page <= 1 {
        return None;
    }

    // Walk back through the previous page; give up at a structural break.
    (0..anchor)
        .rev()
        .take_while(|&index| paragraphs[index].page + 1 >= figure.page)
        .take_while(|&index| !matches!(roles[index], ParagraphRole::Instruction) && !roles[index].is_question_part())
        .find_map(|index| token_at(index))
        .filter(|token| paragraphs[token.paragraph].page + 1 == figure.page)
        .map(|token| FigureBinding {
            raw: token.raw,
            paragraph: Some(token.paragraph),
            source: BindingSource::PreviousPage,
        })
}

fn nearest_on_page<'a>(
    page: u32,
    bounds: &BoundingBox,
    paragraphs: &[RawParagraph],
    tokens: &'a [SequenceToken],
) -> Option<(&'a SequenceToken, f64)> {
    tokens
        .iter()
        .filter(|token| paragraphs[token.paragraph].page == page)
        .filter_map(|token| {
            let label_bounds = paragraphs[token.paragraph].bounds()?;
            Some((
                token,
                label_bounds.vertical_gap(bounds),
                label_bounds.horizontal_gap(bounds),
            ))
        })
        .min_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then(a.2.total_cmp(&b.2))
                .then(a.0.paragraph.cmp(&b.0.paragraph))
        })
        .map(|(token, vertical, _)| (token, vertical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::models::Span;
    use crate::roles::RoleClassifier;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn paragraph(page: u32, offset: usize, text: &str, y0: f64, y1: f64) -> RawParagraph {
        RawParagraph {
            page,
            text: text.to_string(),
            spans: vec![Span {
                offset,
                length: text.len(),
            }],
            polygon: rect(1.0, y0, 7.0, y1),
        }
    }

    fn figure(id: &str, page: u32, offset: Option<usize>, bounds: (f64, f64, f64, f64)) -> RawFigure {
        RawFigure {
            id: FigureId::new(id),
            page,
            polygon: rect(bounds.0, bounds.1, bounds.2, bounds.3),
            spans: offset
                .map(|offset| vec![Span { offset, length: 1 }])
                .unwrap_or_default(),
            caption: None,
        }
    }

    fn pages(count: u32) -> Vec<PageInfo> {
        (1..=count)
            .map(|number| PageInfo {
                number,
                width: 8.5,
                height: 11.0,
                unit: "inch".to_string(),
            })
            .collect()
    }

    fn run(paragraphs: &[RawParagraph], figures: &[RawFigure], page_count: u32) -> MatchOutcome {
        let options = PipelineOptions::default();
        let roles = RoleClassifier::new(&options)
            .expect("default patterns compile")
            .classify_all(paragraphs);
        match_figures(paragraphs, &roles, figures, &pages(page_count), &options)
    }

    #[test]
    fn adjacent_labels_bind_each_figure() {
        let paragraphs = vec![
            paragraph(1, 0, "Leia os textos a seguir.", 1.0, 1.3),
            paragraph(1, 30, "TEXTO A: Charge", 1.5, 1.7),
            paragraph(1, 60, "TEXTO B: Propaganda", 5.0, 5.2),
        ];
        let figures = vec![
            figure("1.1", 1, Some(50), (1.0, 1.8, 5.0, 4.5)),
            figure("1.2", 1, Some(80), (1.0, 5.3, 5.0, 8.0)),
        ];

        let outcome = run(&paragraphs, &figures, 1);
        assert_eq!(outcome.label_for(&FigureId::new("1.1")), SequenceLabel::latin('A'));
        assert_eq!(outcome.label_for(&FigureId::new("1.2")), SequenceLabel::latin('B'));
        assert_eq!(outcome.bindings[&FigureId::new("1.2")].source, BindingSource::Adjacent);
        assert_eq!(outcome.groups.len(), 2);
    }

    #[test]
    fn caption_label_wins_over_geometry() {
        let paragraphs = vec![paragraph(1, 0, "TEXTO A: Poem", 1.0, 1.2)];
        let mut captioned = figure("1.1", 1, Some(10), (1.0, 1.3, 5.0, 3.0));
        captioned.caption = Some("Texto B".to_string());

        let outcome = run(&paragraphs, &[captioned], 1);
        let binding = &outcome.bindings[&FigureId::new("1.1")];
        assert_eq!(binding.source, BindingSource::Caption);
        assert_eq!(binding.label(), SequenceLabel::latin('B').expect("letter"));
    }

    #[test]
    fn fallback_uses_nearest_vertical_label_on_same_page() {
        let paragraphs = vec![
            paragraph(1, 0, "TEXTO I", 1.0, 1.2),
            paragraph(1, 10, "Body of the first text that runs long.", 1.3, 3.0),
            paragraph(1, 50, "TEXTO II", 6.0, 6.2),
            paragraph(1, 60, "Second body.", 6.3, 7.0),
        ];
        // Sits after the first body paragraph but closer to TEXTO II.
        let near_second = figure("1.1", 1, Some(45), (1.0, 5.0, 5.0, 5.8));

        let outcome = run(&paragraphs, &[near_second], 1);
        let binding = &outcome.bindings[&FigureId::new("1.1")];
        assert_eq!(binding.source, BindingSource::Nearest);
        assert_eq!(binding.paragraph, Some(2));
        assert_eq!(binding.label(), SequenceLabel::roman(2));
    }

    fn label_at(offset: usize, text: &str, x0: f64, x1: f64) -> RawParagraph {
        RawParagraph {
            page: 1,
            text: text.to_string(),
            spans: vec![Span {
                offset,
                length: text.len(),
            }],
            polygon: rect(x0, 1.0, x1, 1.2),
        }
    }

    #[test]
    fn equal_vertical_gaps_prefer_the_horizontally_closer_label() {
        let paragraphs = vec![
            label_at(0, "TEXTO A", 0.5, 2.0),
            label_at(10, "TEXTO B", 6.0, 8.0),
        ];
        // Both labels sit 1.8 above the figure; only B overlaps it horizontally.
        let figures = vec![figure("1.1", 1, None, (5.0, 3.0, 7.5, 5.0))];

        let outcome = run(&paragraphs, &figures, 1);
        let binding = &outcome.bindings[&FigureId::new("1.1")];
        assert_eq!(binding.source, BindingSource::Nearest);
        assert_eq!(binding.paragraph, Some(1));
        assert_eq!(binding.label(), SequenceLabel::latin('B').expect("letter"));
    }

    #[test]
    fn horizontal_tie_break_ignores_provider_order() {
        let forward = vec![
            label_at(0, "TEXTO A", 0.5, 2.0),
            label_at(10, "TEXTO B", 6.0, 7.5),
        ];
        let reversed = in_reading_order(&[forward[1].clone(), forward[0].clone()]);
        let left = figure("1.1", 1, None, (3.0, 3.0, 4.5, 5.0));
        let right = figure("1.2", 1, None, (4.0, 6.0, 5.5, 8.0));

        let first = run(&forward, &[left.clone(), right.clone()], 1);
        let second = run(&reversed, &[right, left], 1);

        assert_eq!(first.bindings, second.bindings);
        assert_eq!(first.label_for(&FigureId::new("1.1")), SequenceLabel::latin('A'));
        assert_eq!(first.label_for(&FigureId::new("1.2")), SequenceLabel::latin('B'));
    }

    #[test]
    fn figures_without_nearby_labels_stay_unbound() {
        let paragraphs = vec![
            paragraph(1, 0, "Observe a imagem abaixo.", 1.0, 1.3),
            paragraph(1, 20, "Plain caption text.", 1.4, 1.6),
        ];
        let figures = vec![figure("1.1", 1, Some(40), (1.0, 2.0, 5.0, 6.0))];

        let outcome = run(&paragraphs, &figures, 1);
        assert!(outcome.bindings.is_empty());
        assert_eq!(outcome.figures.len(), 1);
    }

    #[test]
    fn previous_page_label_carries_over_when_page_has_none() {
        let paragraphs = vec![
            paragraph(1, 0, "TEXTO A", 9.0, 9.2),
            paragraph(1, 10, "Text continues.", 9.3, 10.5),
            paragraph(2, 40, "More of the same text.", 4.0, 5.0),
        ];
        let figures = vec![figure("2.1", 2, Some(30), (1.0, 1.0, 5.0, 3.5))];

        let outcome = run(&paragraphs, &figures, 2);
        let binding = &outcome.bindings[&FigureId::new("2.1")];
        assert_eq!(binding.source, BindingSource::PreviousPage);
        assert_eq!(binding.paragraph, Some(0));
    }

    #[test]
    fn overlapping_figures_keep_the_lower_id() {
        let figures = vec![
            figure("1.10", 1, None, (0.0, 0.0, 10.0, 9.5)),
            figure("1.2", 1, None, (0.0, 0.0, 10.0, 10.0)),
            figure("1.3", 1, None, (0.0, 20.0, 10.0, 30.0)),
        ];

        let (survivors, merges) = merge_duplicate_figures(&figures, 0.9);
        let ids: Vec<&str> = survivors.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1.2", "1.3"]);
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].kept, FigureId::new("1.2"));
        assert_eq!(merges[0].dropped, FigureId::new("1.10"));
        assert!((merges[0].iou - 0.95).abs() < 1e-9);
    }

    #[test]
    fn overlap_on_different_pages_is_not_a_duplicate() {
        let figures = vec![
            figure("1.1", 1, None, (0.0, 0.0, 10.0, 10.0)),
            figure("2.1", 2, None, (0.0, 0.0, 10.0, 10.0)),
        ];
        let (survivors, merges) = merge_duplicate_figures(&figures, 0.9);
        assert_eq!(survivors.len(), 2);
        assert!(merges.is_empty());
    }

    #[test]
    fn anchor_without_spans_uses_vertical_position() {
        let paragraphs = vec![
            paragraph(1, 0, "Top", 1.0, 1.5),
            paragraph(1, 10, "Bottom", 6.0, 6.5),
            paragraph(2, 20, "Next page", 1.0, 1.5),
        ];
        let middle = figure("1.1", 1, None, (1.0, 3.0, 5.0, 4.0));
        assert_eq!(figure_anchor(&middle, &paragraphs), 1);
        let with_span = figure("1.2", 1, Some(15), (1.0, 3.0, 5.0, 4.0));
        assert_eq!(figure_anchor(&with_span, &paragraphs), 2);
    }

    #[test]
    fn reading_order_sorts_by_page_then_offset() {
        let shuffled = vec![
            paragraph(2, 5, "c", 0.0, 1.0),
            paragraph(1, 9, "b", 0.0, 1.0),
            paragraph(1, 1, "a", 0.0, 1.0),
        ];
        let ordered = in_reading_order(&shuffled);
        let texts: Vec<&str> = ordered.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }
}
