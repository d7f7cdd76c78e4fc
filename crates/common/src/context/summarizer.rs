//! Conversation titles

use crate::errors::Result;
use crate::llm::LanguageModel;
use std::sync::Arc;
use tracing::instrument;

const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You are a message summarizer who summarizes a given message into 2-3 words";

/// Turns a conversation's first message into a short title
pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    #[instrument(skip_all)]
    pub async fn summarize(&self, message: &str) -> Result<String> {
        let prompt = format!(
            "{}\n\nSummarize this message into 2-3 words and just return the message",
            message
        );
        let summary = self.model.complete(SUMMARIZER_SYSTEM_PROMPT, &prompt).await?;
        Ok(summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;

    #[tokio::test]
    async fn test_summary_is_trimmed() {
        let summarizer = Summarizer::new(Arc::new(MockLanguageModel::new("  Co-op Questions\n")));
        let summary = summarizer
            .summarize("How does the co-op program work for CS majors?")
            .await
            .unwrap();
        assert_eq!(summary, "Co-op Questions");
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let summarizer = Summarizer::new(Arc::new(MockLanguageModel::failing()));
        assert!(summarizer.summarize("hello").await.is_err());
    }
}
