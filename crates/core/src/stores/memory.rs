use crate::canonical::question_hash;
use crate::error::StoreError;
use crate::models::{ContentHash, Question, StoredQuestion};
use crate::traits::QuestionRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Process-local question repository; hashes are unique per exam.
#[derive(Default)]
pub struct InMemoryQuestionRepository {
    rows: Mutex<HashMap<(String, ContentHash), StoredQuestion>>,
}

impl InMemoryQuestionRepository {
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl QuestionRepository for InMemoryQuestionRepository {
    async fn find_by_hash(
        &self,
        digest: &ContentHash,
        exam_id: &str,
    ) -> Result<Option<StoredQuestion>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&(exam_id.to_string(), digest.clone())).cloned())
    }

    async fn find_by_hashes(
        &self,
        digests: &[ContentHash],
        exam_id: &str,
    ) -> Result<HashMap<ContentHash, StoredQuestion>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(digests
            .iter()
            .filter_map(|digest| {
                rows.get(&(exam_id.to_string(), digest.clone()))
                    .map(|stored| (digest.clone(), stored.clone()))
            })
            .collect())
    }

    async fn save(&self, exam_id: &str, question: &Question) -> Result<StoredQuestion, StoreError> {
        let digest = question.content_hash.clone().unwrap_or_else(|| question_hash(question));
        let mut rows = self.rows.lock().await;
        let key = (exam_id.to_string(), digest.clone());
        if let Some(existing) = rows.get(&key) {
            return Ok(existing.clone());
        }

        let mut question = question.clone();
        question.content_hash = Some(digest);
        let stored = StoredQuestion {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.to_string(),
            question,
        };
        rows.insert(key, stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::tests::question;

    #[tokio::test]
    async fn lookups_are_scoped_to_the_exam() {
        let repo = InMemoryQuestionRepository::default();
        let stored = repo
            .save("exam-1", &question(1, "Enunciado", &["a", "b"]))
            .await
            .expect("save");
        let digest = stored.question.content_hash.clone().expect("hash assigned on save");

        let same = repo.find_by_hash(&digest, "exam-1").await.expect("lookup");
        assert_eq!(same.map(|row| row.id), Some(stored.id.clone()));
        assert!(repo.find_by_hash(&digest, "exam-2").await.expect("lookup").is_none());

        let batch = repo
            .find_by_hashes(&[digest.clone(), ContentHash("missing".to_string())], "exam-1")
            .await
            .expect("lookup");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[&digest].id, stored.id);
    }

    #[tokio::test]
    async fn saving_the_same_content_twice_returns_the_first_row() {
        let repo = InMemoryQuestionRepository::default();
        let first = repo
            .save("exam-1", &question(1, "Enunciado", &["a", "b"]))
            .await
            .expect("save");
        let second = repo
            .save("exam-1", &question(7, "Enunciado", &["b", "a"]))
            .await
            .expect("save");
        assert_eq!(first.id, second.id);
        assert_eq!(repo.len().await, 1);
    }
}
