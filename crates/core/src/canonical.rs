use crate::models::{Alternative, ContentHash, Question};
use sha2::{Digest, Sha256};

/// Collapses runs of whitespace and trims; case and accents are preserved.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Digest over the question stem and its alternative texts.
///
/// Alternative texts are sorted so reordering them (or relettering) does not
/// change the digest. Each field is length-prefixed.
pub fn canonicalize(text: &str, alternatives: &[Alternative]) -> ContentHash {
    let mut options: Vec<String> = alternatives
        .iter()
        .map(|alternative| normalize_whitespace(&alternative.text))
        .collect();
    options.sort();

    let mut hasher = Sha256::new();
    write_field(&mut hasher, &normalize_whitespace(text));
    hasher.update((options.len() as u64).to_le_bytes());
    for option in &options {
        write_field(&mut hasher, option);
    }
    ContentHash(format!("{:x}", hasher.finalize()))
}

pub fn question_hash(question: &Question) -> ContentHash {
    canonicalize(&question.text, &question.alternatives)
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
