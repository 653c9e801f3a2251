//! Chapter question database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::Result;
use crate::domain::Question;

/// A persisted quiz question.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionDbModel {
    pub id: i64,
    pub chapter_id: i64,
    /// Order of the question within its chapter.
    pub position: i64,
    pub question: String,
    pub answer: String,
    /// JSON array of option strings.
    pub options: String,
    pub created_at: i64,
}

impl QuestionDbModel {
    pub fn into_question(self) -> Result<Question> {
        let options: Vec<String> = serde_json::from_str(&self.options)?;
        Ok(Question {
            question: self.question,
            answer: self.answer,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_question_parses_options() {
        let row = QuestionDbModel {
            id: 1,
            chapter_id: 123,
            position: 0,
            question: "Root of an empty BST?".to_string(),
            answer: "None".to_string(),
            options: r#"["None","0","-1"]"#.to_string(),
            created_at: 0,
        };
        let q = row.into_question().unwrap();
        assert_eq!(q.options.len(), 3);
        assert!(q.has_answer_option());
    }

    #[test]
    fn test_into_question_rejects_bad_json() {
        let row = QuestionDbModel {
            id: 1,
            chapter_id: 123,
            position: 0,
            question: "q".to_string(),
            answer: "a".to_string(),
            options: "not json".to_string(),
            created_at: 0,
        };
        assert!(matches!(
            row.into_question(),
            Err(crate::Error::Serialization(_))
        ));
    }
}
