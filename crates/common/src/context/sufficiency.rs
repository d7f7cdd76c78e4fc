//! Sufficiency oracle
//!
//! Asks the chat model whether a context answers a query. The verdict is
//! affirmative only when the reply, trimmed and lower-cased, is exactly
//! `yes`. A failed call counts as insufficient.

use crate::llm::LanguageModel;
use crate::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// System prompt shared by the oracle and the default answer prompt
pub const ASSISTANT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions about Drexel University using the latest and most up to date information";

/// Oracle outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Sufficient,
    Insufficient,
    /// The oracle call failed; treated as insufficient
    Unavailable,
}

impl Verdict {
    pub fn is_sufficient(self) -> bool {
        matches!(self, Verdict::Sufficient)
    }

    fn as_str(self) -> &'static str {
        match self {
            Verdict::Sufficient => "sufficient",
            Verdict::Insufficient => "insufficient",
            Verdict::Unavailable => "error",
        }
    }
}

/// Interpret the oracle's reply
pub fn parse_verdict(reply: &str) -> Verdict {
    if reply.trim().to_lowercase() == "yes" {
        Verdict::Sufficient
    } else {
        Verdict::Insufficient
    }
}

/// Build the oracle's user prompt
pub fn build_check_prompt(context: &str, query: &str) -> String {
    format!(
        "Does the following context answer the query?\n\nContext: {}\n\nQuery: {}\n\nAnswer with 'yes' or 'no' in lowercase only please.",
        context, query
    )
}

/// Binary yes/no judgment over (context, query)
pub struct SufficiencyChecker {
    model: Arc<dyn LanguageModel>,
}

impl SufficiencyChecker {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub async fn check(&self, context: &str, query: &str) -> Verdict {
        let prompt = build_check_prompt(context, query);

        let verdict = match self.model.complete(ASSISTANT_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => {
                debug!(reply = %reply.trim(), "Sufficiency reply");
                parse_verdict(&reply)
            }
            Err(e) => {
                warn!(error = %e, "Sufficiency check failed, escalating");
                Verdict::Unavailable
            }
        };

        metrics::record_sufficiency(verdict.as_str());
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;

    #[test]
    fn test_parse_verdict_exact_match() {
        assert_eq!(parse_verdict("yes"), Verdict::Sufficient);
        assert_eq!(parse_verdict("YES"), Verdict::Sufficient);
        assert_eq!(parse_verdict("  Yes\n"), Verdict::Sufficient);
        assert_eq!(parse_verdict("yes."), Verdict::Insufficient);
        assert_eq!(parse_verdict("Yes, it does"), Verdict::Insufficient);
        assert_eq!(parse_verdict("no"), Verdict::Insufficient);
        assert_eq!(parse_verdict(""), Verdict::Insufficient);
    }

    #[test]
    fn test_check_prompt_layout() {
        let prompt = build_check_prompt("CTX", "Q?");
        assert!(prompt.starts_with("Does the following context answer the query?\n\nContext: CTX"));
        assert!(prompt.contains("\n\nQuery: Q?\n\n"));
    }

    #[tokio::test]
    async fn test_failed_oracle_is_insufficient() {
        let checker = SufficiencyChecker::new(Arc::new(MockLanguageModel::failing()));
        let verdict = checker.check("ctx", "query").await;
        assert_eq!(verdict, Verdict::Unavailable);
        assert!(!verdict.is_sufficient());
    }

    #[tokio::test]
    async fn test_yes_is_sufficient() {
        let checker = SufficiencyChecker::new(Arc::new(MockLanguageModel::new("Yes")));
        assert!(checker.check("ctx", "query").await.is_sufficient());
    }
}
