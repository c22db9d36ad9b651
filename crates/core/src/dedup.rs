use crate::canonical::question_hash;
use crate::error::StoreError;
use crate::models::{ContentHash, PipelineWarning, Question, StoredQuestion, WarningKind, WarningSubject};
use crate::traits::QuestionRepository;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    New,
    /// Already stored for this exam; the stored id is reused.
    Existing { id: String },
    /// Same content as an earlier question of this document.
    Repeat { first: u32 },
    /// The repository could not be consulted; the hash is set but nothing was
    /// compared.
    Unchecked,
}

impl Resolution {
    pub fn is_new(&self) -> bool {
        matches!(self, Resolution::New)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedQuestion {
    pub question: Question,
    pub resolution: Resolution,
}

/// Looks up every digest in one repository round-trip and keeps only matches
/// stored under `exam_id`.
pub async fn check_duplicates<R>(
    repo: &R,
    hashes: &[ContentHash],
    exam_id: &str,
) -> Result<HashMap<ContentHash, StoredQuestion>, StoreError>
where
    R: QuestionRepository + ?Sized,
{
    let unique: Vec<ContentHash> = hashes.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let mut found = repo.find_by_hashes(&unique, exam_id).await?;
    found.retain(|_, stored| stored.exam_id == exam_id);
    debug!(exam_id, candidates = unique.len(), matches = found.len(), "duplicate lookup");
    Ok(found)
}

/// Hashes each question without comparing it to anything, for runs whose
/// duplicate lookup failed.
pub fn unchecked(questions: Vec<Question>) -> Vec<ResolvedQuestion> {
    questions
        .into_iter()
        .map(|mut question| {
            if question.content_hash.is_none() {
                question.content_hash = Some(question_hash(&question));
            }
            ResolvedQuestion {
                question,
                resolution: Resolution::Unchecked,
            }
        })
        .collect()
}

/// Hashes each question and resolves it against `existing` and against the
/// questions before it in the same document.
pub fn resolve(
    questions: Vec<Question>,
    exam_id: &str,
    existing: &HashMap<ContentHash, StoredQuestion>,
) -> (Vec<ResolvedQuestion>, Vec<PipelineWarning>) {
    let mut seen: HashMap<ContentHash, u32> = HashMap::new();
    let mut resolved = Vec::with_capacity(questions.len());
    let mut warnings = Vec::new();

    for mut question in questions {
        let digest = question.content_hash.clone().unwrap_or_else(|| question_hash(&question));
        question.content_hash = Some(digest.clone());

        let resolution = if let Some(stored) = existing.get(&digest) {
            let message = format!(
                "duplicate of exam {} question {} ({})",
                stored.exam_id, stored.question.number, stored.id
            );
            warn!(exam_id, number = question.number, existing = %stored.id, "duplicate question");
            warnings.push(PipelineWarning::new(
                WarningSubject::Question(question.number),
                WarningKind::DuplicateQuestion,
                message,
            ));
            Resolution::Existing {
                id: stored.id.clone(),
            }
        } else if let Some(first) = seen.get(&digest) {
            warn!(exam_id, number = question.number, first, "repeated question in document");
            warnings.push(PipelineWarning::new(
                WarningSubject::Question(question.number),
                WarningKind::DuplicateQuestion,
                format!("duplicate of question {first} in this document"),
            ));
            Resolution::Repeat { first: *first }
        } else {
            Resolution::New
        };

        seen.entry(digest).or_insert(question.number);
        resolved.push(ResolvedQuestion { question, resolution });
    }

    (resolved, warnings)
}
