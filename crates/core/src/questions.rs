use crate::models::{Alternative, Question};

/// Question being accumulated while the assembler walks the document.
#[derive(Debug, Clone)]
pub struct QuestionDraft {
    number: u32,
    text: Vec<String>,
    alternatives: Vec<Alternative>,
    context_id: Option<String>,
    has_image: bool,
}

impl QuestionDraft {
    pub fn open(number: u32, remainder: &str, context_id: Option<String>) -> Self {
        let text = if remainder.trim().is_empty() {
            Vec::new()
        } else {
            vec![remainder.trim().to_string()]
        };
        Self {
            number,
            text,
            alternatives: Vec::new(),
            context_id,
            has_image: false,
        }
    }

    pub fn has_alternatives(&self) -> bool {
        !self.alternatives.is_empty()
    }

    /// Body text goes to the stem until the first alternative, then continues
    /// the last alternative.
    pub fn push_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match self.alternatives.last_mut() {
            Some(last) => {
                if !last.text.is_empty() {
                    last.text.push(' ');
                }
                last.text.push_str(text);
            }
            None => self.text.push(text.to_string()),
        }
    }

    pub fn push_alternative(&mut self, letter: &str, text: &str) {
        self.alternatives.push(Alternative {
            letter: letter.to_string(),
            text: text.trim().to_string(),
        });
    }

    pub fn mark_image(&mut self) {
        self.has_image = true;
    }

    pub fn finish(self) -> Question {
        Question {
            number: self.number,
            text: self.text.join("\n"),
            alternatives: self.alternatives,
            context_id: self.context_id,
            has_image: self.has_image,
            content_hash: None,
        }
    }
}
