use crate::error::IngestError;
use crate::models::{PipelineOptions, RawParagraph};
use crate::sequence::{scan_label, LabelMatch};
use once_cell::sync::Lazy;
use regex::Regex;

static QUESTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^[\s\*]*(?:quest[ãa]o|question|q)\s*(?:n[º°o]\.?|#)?\s*[-.:]?\s*(\d{1,3})\b[\s\*.:\-–—)]*(.*)$")
        .expect("question regex compiles")
});

static ALTERNATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*\(?([A-Ja-j])\)\s*(.*)$").expect("alternative regex compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParagraphRole {
    Instruction,
    QuestionStart { number: u32, remainder: String },
    Alternative { letter: String, text: String },
    Label(LabelMatch),
    Body,
}

impl ParagraphRole {
    /// Question headings and alternatives end any open block region.
    pub fn is_question_part(&self) -> bool {
        matches!(
            self,
            ParagraphRole::QuestionStart { .. } | ParagraphRole::Alternative { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RoleClassifier {
    instruction_patterns: Vec<Regex>,
}

impl RoleClassifier {
    pub fn new(options: &PipelineOptions) -> Result<Self, IngestError> {
        let instruction_patterns = options
            .instruction_patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            instruction_patterns,
        })
    }

    pub fn classify(&self, text: &str) -> ParagraphRole {
        if let Some(captures) = QUESTION_RE.captures(text) {
            if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                return ParagraphRole::QuestionStart {
                    number,
                    remainder: captures
                        .get(2)
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default(),
                };
            }
        }

        if let Some(captures) = ALTERNATIVE_RE.captures(text) {
            let letter = captures
                .get(1)
                .map(|m| m.as_str().to_ascii_uppercase())
                .unwrap_or_default();
            let text = captures
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            return ParagraphRole::Alternative { letter, text };
        }

        if let Some(found) = scan_label(text) {
            return ParagraphRole::Label(found);
        }

        if self.is_instruction(text) {
            return ParagraphRole::Instruction;
        }

        ParagraphRole::Body
    }

    pub fn is_instruction(&self, text: &str) -> bool {
        self.instruction_patterns
            .iter()
            .any(|pattern| pattern.is_match(text))
    }

    pub fn classify_all(&self, paragraphs: &[RawParagraph]) -> Vec<ParagraphRole> {
        paragraphs
            .iter()
            .map(|paragraph| self.classify(&paragraph.text))
            .collect()
    }
}
