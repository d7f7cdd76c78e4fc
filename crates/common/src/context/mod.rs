//! Question answering pipeline
//!
//! - Sufficiency oracle over retrieved context
//! - Context augmentation with web search escalation
//! - Answer prompt assembly and streaming
//! - Conversation title summaries

mod answer;
mod augmenter;
mod summarizer;
mod sufficiency;

pub use answer::{build_user_prompt, reformat_chat_data, AnswerService, ChatTurn, Prompts, OUTPUT_FORMAT};
pub use augmenter::{truncate_chars, AugmentedContext, AugmenterOptions, ContextAugmenter};
pub use summarizer::Summarizer;
pub use sufficiency::{parse_verdict, SufficiencyChecker, Verdict, ASSISTANT_SYSTEM_PROMPT};
