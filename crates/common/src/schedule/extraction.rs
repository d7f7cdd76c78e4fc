//! Structured extraction of scheduling requests
//!
//! The extraction model is forced to call a `Data` tool whose arguments
//! hold zero or more requests. One worked example is replayed before the
//! user's text as a user turn, an assistant tool call and a tool reply.

use crate::errors::Result;
use crate::llm::{ChatMessage, FunctionCall, LanguageModel, ToolCall, ToolSpec};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert extraction algorithm. \
Only extract relevant information from the text. \
If you do not know the value of an attribute asked \
to extract, return null for the attribute's value.";

const EXAMPLE_INPUT: &str = "I'm a freshman and would like to take CS 171, CI 102, CS 164, and ENGL 103 next term. I don't like classes on Fridays and prefer to take my classes later in the day";

const TOOL_ACKNOWLEDGEMENT: &str = "You have correctly called this tool.";

/// A (subject, course number) pair, e.g. ("CS", 171)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCoursePair {
    pub subject: String,
    pub course: i64,
}

impl SubjectCoursePair {
    pub fn new(subject: impl Into<String>, course: i64) -> Self {
        Self {
            subject: subject.into(),
            course,
        }
    }
}

/// One person's scheduling constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject_course_pairs: Vec<SubjectCoursePair>,

    /// Single-letter day codes (M, T, W, R, F, S)
    #[serde(default, deserialize_with = "null_as_default")]
    pub excluded_days: Vec<String>,

    /// Earliest start hour, 24h clock
    #[serde(default)]
    pub start_time_limit: Option<i64>,
}

/// Arguments of the forced `Data` tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRequests {
    #[serde(default, deserialize_with = "null_as_default")]
    pub people: Vec<SchedulingRequest>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn request_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "subject_course_pairs": {
                "type": "array",
                "description": "A list of subject and course pairs",
                "items": {
                    "type": "object",
                    "properties": {
                        "subject": {
                            "type": "string",
                            "description": "The subject code of the course (e.g., 'CS')."
                        },
                        "course": {
                            "type": "integer",
                            "description": "The course number (e.g., 101)."
                        }
                    },
                    "required": ["subject", "course"]
                }
            },
            "excluded_days": {
                "type": "array",
                "description": "A list of days to exclude for scheduling",
                "items": {"type": "string"}
            },
            "start_time_limit": {
                "type": ["integer", "null"],
                "description": "The earliest time (in 24-hour format) a course can start"
            }
        },
        "required": ["subject_course_pairs", "excluded_days", "start_time_limit"]
    })
}

/// The tool the extraction model must call
pub fn extraction_tool() -> ToolSpec {
    ToolSpec {
        name: "Data".to_string(),
        description: "Scheduling requests extracted from the text".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "people": {"type": "array", "items": request_schema()}
            },
            "required": ["people"]
        }),
    }
}

/// The worked example's expected extraction
pub fn example_request() -> SchedulingRequest {
    SchedulingRequest {
        subject_course_pairs: vec![
            SubjectCoursePair::new("CS", 171),
            SubjectCoursePair::new("CI", 102),
            SubjectCoursePair::new("CS", 164),
            SubjectCoursePair::new("ENGL", 103),
        ],
        excluded_days: vec!["F".to_string()],
        start_time_limit: Some(12),
    }
}

/// Few-shot messages: user input, assistant tool call, tool acknowledgement
pub fn example_messages() -> Result<Vec<ChatMessage>> {
    let call = ToolCall {
        id: Uuid::new_v4().to_string(),
        kind: "function".to_string(),
        function: FunctionCall {
            name: "TMS".to_string(),
            arguments: serde_json::to_string(&example_request())?,
        },
    };
    let call_id = call.id.clone();

    Ok(vec![
        ChatMessage::user(EXAMPLE_INPUT),
        ChatMessage::assistant_tool_calls(vec![call]),
        ChatMessage::tool(call_id, TOOL_ACKNOWLEDGEMENT),
    ])
}

/// Run structured extraction over `text`
#[instrument(skip(model))]
pub async fn extract_requests(model: &dyn LanguageModel, text: &str) -> Result<ExtractedRequests> {
    let mut messages = vec![ChatMessage::system(EXTRACTION_SYSTEM_PROMPT)];
    messages.extend(example_messages()?);
    messages.push(ChatMessage::user(text));

    let extracted = match model.extract(&messages, &extraction_tool()).await? {
        Some(arguments) => serde_json::from_value(arguments)?,
        None => ExtractedRequests::default(),
    };

    debug!(people = extracted.people.len(), "Extraction completed");
    Ok(extracted)
}
