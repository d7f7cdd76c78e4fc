//! Answer streaming
//!
//! Builds the answer prompt from the conversation transcript, the augmented
//! context and the instructions, then relays the model's text deltas.

use crate::config::PromptsConfig;
use crate::errors::{AppError, Result};
use crate::llm::{LanguageModel, TextStream};
use crate::metrics;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = include_str!("../../prompts/system.txt");
const DEFAULT_INSTRUCTIONS: &str = include_str!("../../prompts/instructions.txt");

/// Output-format directive appended after the query
pub const OUTPUT_FORMAT: &str = "\nPlease answer only in a couple sentences and render the entire response in markdown but organize the code using level 2 headings and paragraphs. Feel free to use lists and other markdown features";

/// One prior turn of the conversation, as sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    /// Missing means a bot turn
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub text: String,
}

/// Render prior turns as `User: ...` / `Bot: ...` lines
pub fn reformat_chat_data(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let speaker = if turn.is_user { "User" } else { "Bot" };
            format!("{}: {}\n", speaker, turn.text)
        })
        .collect()
}

/// Assemble the answer model's user prompt
pub fn build_user_prompt(transcript: &str, context: &str, instructions: &str, query: &str) -> String {
    format!(
        "Use any information from the current conversation history where needed:\n{}\n\n{}\n\n {} \n\n{} + {}",
        transcript, context, instructions, query, OUTPUT_FORMAT
    )
}

/// System prompt and instructions for answer generation
#[derive(Debug, Clone)]
pub struct Prompts {
    pub system: String,
    pub instructions: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.trim_end().to_string(),
            instructions: DEFAULT_INSTRUCTIONS.trim_end().to_string(),
        }
    }
}

impl Prompts {
    /// Compiled-in prompts, overridden by any configured files
    pub fn load(config: &PromptsConfig) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            system: read_override(config.system_path.as_deref())?.unwrap_or(defaults.system),
            instructions: read_override(config.instructions_path.as_deref())?
                .unwrap_or(defaults.instructions),
        })
    }
}

fn read_override(path: Option<&str>) -> Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    std::fs::read_to_string(path)
        .map(|s| Some(s.trim_end().to_string()))
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to read prompt file {}: {}", path, e),
        })
}

/// Streams answers from the chat model
pub struct AnswerService {
    model: Arc<dyn LanguageModel>,
    prompts: Prompts,
}

struct RelayState {
    upstream: TextStream,
    answer: String,
    query: String,
}

impl AnswerService {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Prompts) -> Self {
        Self { model, prompts }
    }

    /// Open the answer stream.
    ///
    /// Fails only if the model call cannot be started. Once streaming,
    /// empty deltas are dropped, an upstream error ends the stream, and the
    /// full answer is logged when the stream completes.
    pub async fn stream_answer(
        &self,
        query: &str,
        history: &[ChatTurn],
        context: &str,
    ) -> Result<TextStream> {
        let transcript = reformat_chat_data(history);
        let user_prompt =
            build_user_prompt(&transcript, context, &self.prompts.instructions, query);

        let upstream = self
            .model
            .stream_complete(&self.prompts.system, &user_prompt)
            .await?;

        let state = RelayState {
            upstream,
            answer: String::new(),
            query: query.to_string(),
        };

        Ok(stream::unfold(state, |mut state| async move {
            loop {
                match state.upstream.next().await {
                    Some(Ok(chunk)) if chunk.is_empty() => continue,
                    Some(Ok(chunk)) => {
                        state.answer.push_str(&chunk);
                        return Some((Ok(chunk), state));
                    }
                    Some(Err(e)) => {
                        warn!(query = %state.query, error = %e, "Answer stream ended early");
                        return None;
                    }
                    None => {
                        metrics::record_answer(state.answer.chars().count());
                        info!(query = %state.query, answer = %state.answer, "Answer generated");
                        return None;
                    }
                }
            }
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;

    #[test]
    fn test_reformat_chat_data() {
        let turns = vec![
            ChatTurn {
                is_user: true,
                text: "Where is the library?".into(),
            },
            ChatTurn {
                is_user: false,
                text: "Hagerty Library is on Market St.".into(),
            },
        ];
        assert_eq!(
            reformat_chat_data(&turns),
            "User: Where is the library?\nBot: Hagerty Library is on Market St.\n"
        );
        assert_eq!(reformat_chat_data(&[]), "");
    }

    #[test]
    fn test_chat_turn_wire_format() {
        let turn: ChatTurn = serde_json::from_str(r#"{"isUser": false, "text": "hi"}"#).unwrap();
        assert!(!turn.is_user);
        assert_eq!(turn.text, "hi");

        let partial: ChatTurn = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert!(!partial.is_user);
        assert_eq!(reformat_chat_data(&[partial]), "Bot: hello\n");
    }

    #[test]
    fn test_build_user_prompt_layout() {
        let prompt = build_user_prompt("User: hi\n", "CTX", "INSTR", "Q?");
        assert_eq!(
            prompt,
            format!(
                "Use any information from the current conversation history where needed:\nUser: hi\n\n\nCTX\n\n INSTR \n\nQ? + {}",
                OUTPUT_FORMAT
            )
        );
    }

    #[test]
    fn test_default_prompts_compiled_in() {
        let prompts = Prompts::load(&PromptsConfig::default()).unwrap();
        assert!(prompts.system.contains("Drexel"));
        assert!(!prompts.instructions.is_empty());
    }

    #[test]
    fn test_missing_prompt_file_is_error() {
        let config = PromptsConfig {
            system_path: Some("/nonexistent/system.txt".into()),
            instructions_path: None,
        };
        assert!(Prompts::load(&config).is_err());
    }

    #[tokio::test]
    async fn test_stream_skips_empty_chunks() {
        let model = MockLanguageModel::new("").with_chunks(["", "Drexel ", "", "is in Philadelphia."]);
        let service = AnswerService::new(Arc::new(model), Prompts::default());

        let chunks: Vec<String> = service
            .stream_answer("Where is Drexel?", &[], "ctx")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks, vec!["Drexel ".to_string(), "is in Philadelphia.".to_string()]);
    }

    #[tokio::test]
    async fn test_setup_failure_is_error() {
        let service = AnswerService::new(Arc::new(MockLanguageModel::failing()), Prompts::default());
        assert!(service.stream_answer("q", &[], "").await.is_err());
    }
}
