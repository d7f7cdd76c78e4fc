//! API handlers module

pub mod health;
pub mod query;
pub mod summarize;
