//! Course scheduling
//!
//! Translates free-text scheduling requests into filtered course offerings.

mod extraction;
mod filter;
mod store;
mod translator;

pub use extraction::{
    example_messages, example_request, extract_requests, extraction_tool, ExtractedRequests,
    SchedulingRequest, SubjectCoursePair, EXTRACTION_SYSTEM_PROMPT,
};
pub use filter::{normalize_day, Column, Literal, Predicate, ScheduleFilter, DEFAULT_START_TIME_LIMIT};
pub use store::{normalize_rows, Cell, CourseOfferingRow, NormalizedRows, OfferingsStore, OFFERING_COLUMNS};
pub use translator::{write_offerings, ScheduleOutcome, ScheduleTranslator};
