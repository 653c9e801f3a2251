//! Quiz question type and option normalization.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A generated multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Question {
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Clean up a question as returned by the generator.
    ///
    /// Returns `None` when the question or answer is blank. Options are
    /// trimmed and deduplicated case-insensitively, the answer is guaranteed
    /// to be among them (an option equal to the answer up to case is replaced
    /// by the answer text), and the final order is shuffled.
    pub fn normalized(self) -> Option<Self> {
        let question = self.question.trim().to_string();
        let answer = self.answer.trim().to_string();
        if question.is_empty() || answer.is_empty() {
            return None;
        }

        let answer_key = answer.to_lowercase();
        let mut seen = std::collections::HashSet::new();
        let mut options = Vec::with_capacity(self.options.len() + 1);
        for option in self.options {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let key = option.to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            if key == answer_key {
                options.push(answer.clone());
            } else {
                options.push(option.to_string());
            }
        }
        if !seen.contains(&answer_key) {
            options.push(answer.clone());
        }

        options.shuffle(&mut rand::rng());

        Some(Self {
            question,
            answer,
            options,
        })
    }

    /// Whether the correct answer appears among the options verbatim.
    pub fn has_answer_option(&self) -> bool {
        self.options.iter().any(|o| o == &self.answer)
    }
}
