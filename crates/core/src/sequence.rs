//! Sequence-label grammar for sub-units of a context block.
//!
//! Two families are recognised: Latin letters (`A`, `B`, `C`…) and Roman
//! numerals (`I`, `II`, `III`…). Labels appear either with a `TEXT`/`TEXTO`
//! prefix or as a bare leading marker followed by punctuation. A glyph such as
//! `I` belongs to both families until the surrounding block decides.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static PREFIXED_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^[\s\*\[\(]*((?i:texto|text)\b\s*[-:.–—]?\s*([A-Z]|[IVX]+))\b[\s\*\]\)]*[.:\-–—]?\s*(.*)$")
        .expect("prefixed label regex compiles")
});

static BARE_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^[\s\*\[]*(([A-Z]|[IVX]+))\b[\s\*\]]*(?:(?:[.:]|[\-–—](?:\s|$))\s*(.*)|$)")
        .expect("bare label regex compiles")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LabelFamily {
    Latin,
    Roman,
}

/// A resolved label. Ordering follows the family's natural sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceLabel {
    pub family: LabelFamily,
    pub ordinal: u32,
}

impl SequenceLabel {
    pub fn latin(letter: char) -> Option<Self> {
        let upper = letter.to_ascii_uppercase();
        upper.is_ascii_uppercase().then(|| Self {
            family: LabelFamily::Latin,
            ordinal: (upper as u32) - ('A' as u32) + 1,
        })
    }

    pub fn roman(ordinal: u32) -> Self {
        Self {
            family: LabelFamily::Roman,
            ordinal,
        }
    }
}

impl fmt::Display for SequenceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            LabelFamily::Latin => {
                let letter = char::from_u32('A' as u32 + self.ordinal.saturating_sub(1)).unwrap_or('?');
                write!(f, "{letter}")
            }
            LabelFamily::Roman => f.write_str(&to_roman(self.ordinal)),
        }
    }
}

/// Label as scanned, before the block picks a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawLabel {
    Latin(u32),
    Roman(u32),
    Ambiguous { latin: u32, roman: u32 },
}

impl RawLabel {
    pub fn resolve(self, family: LabelFamily) -> Option<SequenceLabel> {
        match (self, family) {
            (RawLabel::Latin(ordinal), LabelFamily::Latin)
            | (RawLabel::Ambiguous { latin: ordinal, .. }, LabelFamily::Latin) => Some(SequenceLabel {
                family,
                ordinal,
            }),
            (RawLabel::Roman(ordinal), LabelFamily::Roman)
            | (RawLabel::Ambiguous { roman: ordinal, .. }, LabelFamily::Roman) => Some(SequenceLabel {
                family,
                ordinal,
            }),
            _ => None,
        }
    }

    /// Family used when the label stands alone.
    pub fn default_family(self) -> LabelFamily {
        match self {
            RawLabel::Latin(_) => LabelFamily::Latin,
            RawLabel::Roman(_) => LabelFamily::Roman,
            RawLabel::Ambiguous { roman, .. } if roman == 1 => LabelFamily::Roman,
            RawLabel::Ambiguous { .. } => LabelFamily::Latin,
        }
    }
}

/// A label detected at the head of a paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceToken {
    pub paragraph: usize,
    pub raw: RawLabel,
    pub heading: String,
    pub remainder: String,
}

impl SequenceToken {
    pub fn label(&self) -> SequenceLabel {
        let family = self.raw.default_family();
        self.raw
            .resolve(family)
            .unwrap_or(SequenceLabel { family, ordinal: 0 })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatch {
    pub raw: RawLabel,
    pub heading: String,
    pub remainder: String,
}

/// Scans the head of `text` for a sequence label.
///
/// `A)` and `(A)` are alternative markers and never match.
pub fn scan_label(text: &str) -> Option<LabelMatch> {
    if let Some(captures) = PREFIXED_LABEL_RE.captures(text) {
        let raw = classify_glyph(captures.get(2)?.as_str())?;
        return Some(LabelMatch {
            raw,
            heading: collapse(captures.get(1)?.as_str()).to_uppercase(),
            remainder: captures
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        });
    }

    let captures = BARE_LABEL_RE.captures(text)?;
    let glyph = captures.get(2)?.as_str();
    let raw = classify_glyph(glyph)?;
    Some(LabelMatch {
        raw,
        heading: glyph.to_string(),
        remainder: captures
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}

fn classify_glyph(glyph: &str) -> Option<RawLabel> {
    let mut chars = glyph.chars();
    let first = chars.next()?;
    if chars.next().is_none() {
        let latin = SequenceLabel::latin(first)?.ordinal;
        return Some(match parse_roman(glyph) {
            Some(roman) => RawLabel::Ambiguous { latin, roman },
            None => RawLabel::Latin(latin),
        });
    }
    parse_roman(glyph).map(RawLabel::Roman)
}

/// Picks one family for a block: unambiguous labels vote; if none exist,
/// a lone `I` means Roman and anything else Latin.
pub fn choose_family(labels: &[RawLabel]) -> LabelFamily {
    let latin = labels
        .iter()
        .filter(|raw| matches!(raw, RawLabel::Latin(_)))
        .count();
    let roman = labels
        .iter()
        .filter(|raw| matches!(raw, RawLabel::Roman(_)))
        .count();

    match latin.cmp(&roman) {
        std::cmp::Ordering::Greater => LabelFamily::Latin,
        std::cmp::Ordering::Less => LabelFamily::Roman,
        std::cmp::Ordering::Equal if latin > 0 => labels
            .iter()
            .find(|raw| !matches!(raw, RawLabel::Ambiguous { .. }))
            .map(|raw| raw.default_family())
            .unwrap_or(LabelFamily::Latin),
        std::cmp::Ordering::Equal => {
            if labels
                .iter()
                .any(|raw| matches!(raw, RawLabel::Ambiguous { roman: 1, .. }))
            {
                LabelFamily::Roman
            } else {
                LabelFamily::Latin
            }
        }
    }
}

/// Parses canonical Roman numerals from `I` to `XXXIX`.
pub fn parse_roman(text: &str) -> Option<u32> {
    if text.is_empty() || text.len() > 8 {
        return None;
    }
    let mut total = 0u32;
    let mut previous = 0u32;
    for glyph in text.chars().rev() {
        let value = match glyph {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            _ => return None,
        };
        if value < previous {
            total = total.checked_sub(value)?;
        } else {
            total += value;
            previous = value;
        }
    }
    (total > 0 && to_roman(total) == text).then_some(total)
}

pub fn to_roman(mut value: u32) -> String {
    const TABLE: [(u32, &str); 7] = [
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
    ];
    let mut out = String::new();
    for (step, glyphs) in TABLE {
        while value >= step {
            out.push_str(glyphs);
            value -= step;
        }
    }
    match value {
        4 => out.push_str("IV"),
        n => out.push_str(&"I".repeat(n as usize)),
    }
    out
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
