//! Course offering filters
//!
//! Scheduling requests compile into a [`Predicate`] tree. The tree renders
//! two ways: with bound parameters for execution, and with values inlined
//! for logs and inspection.

use super::extraction::SchedulingRequest;
use crate::errors::{AppError, Result};
use sqlx::{QueryBuilder, Sqlite};
use tracing::warn;

/// Start hour used when no request sets one
pub const DEFAULT_START_TIME_LIMIT: i64 = 12;

/// Filterable columns of the offerings table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Subject,
    CourseNumber,
    /// Meeting days, e.g. `MWF`
    Days,
    /// Leading hour of the start time column
    StartHour,
}

impl Column {
    fn sql(self) -> &'static str {
        match self {
            Column::Subject => "\"SubjectCode\"",
            Column::CourseNumber => "\"CourseNo.\"",
            Column::Days => "\"Days_Time\"",
            Column::StartHour => {
                "CAST(SUBSTR(\"Days_Time1\", 1, INSTR(\"Days_Time1\", ':') - 1) AS INTEGER)"
            }
        }
    }
}

/// A literal compared against a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Integer(i64),
}

impl Literal {
    fn inline(&self) -> String {
        match self {
            Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Integer(n) => n.to_string(),
        }
    }
}

/// Boolean filter over offering rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(Column, Literal),
    /// Column does not contain the substring
    NotContains(Column, String),
    AtLeast(Column, i64),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// Escape LIKE wildcards with a backslash
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Predicate {
    /// Append this predicate to a query with bound parameters
    pub fn push_to(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Predicate::Eq(column, literal) => {
                builder.push(column.sql()).push(" = ");
                match literal {
                    Literal::Text(s) => builder.push_bind(s.clone()),
                    Literal::Integer(n) => builder.push_bind(*n),
                };
            }
            Predicate::NotContains(column, needle) => {
                builder
                    .push(column.sql())
                    .push(" NOT LIKE ")
                    .push_bind(like_pattern(needle))
                    .push(" ESCAPE '\\'");
            }
            Predicate::AtLeast(column, n) => {
                builder.push(column.sql()).push(" >= ").push_bind(*n);
            }
            Predicate::And(parts) => push_joined(builder, parts, " AND "),
            Predicate::Or(parts) => push_joined(builder, parts, " OR "),
        }
    }

    /// Render with values inlined
    pub fn to_inline_sql(&self) -> String {
        match self {
            Predicate::Eq(column, literal) => format!("{} = {}", column.sql(), literal.inline()),
            Predicate::NotContains(column, needle) => format!(
                "{} NOT LIKE {} ESCAPE '\\'",
                column.sql(),
                Literal::Text(like_pattern(needle)).inline()
            ),
            Predicate::AtLeast(column, n) => format!("{} >= {}", column.sql(), n),
            Predicate::And(parts) => join_inline(parts, " AND "),
            Predicate::Or(parts) => join_inline(parts, " OR "),
        }
    }
}

fn push_joined(builder: &mut QueryBuilder<'_, Sqlite>, parts: &[Predicate], separator: &str) {
    builder.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            builder.push(separator);
        }
        part.push_to(builder);
    }
    builder.push(")");
}

fn join_inline(parts: &[Predicate], separator: &str) -> String {
    let rendered: Vec<String> = parts.iter().map(Predicate::to_inline_sql).collect();
    format!("({})", rendered.join(separator))
}

/// Normalize a day code: a single ASCII letter, upper-cased
pub fn normalize_day(day: &str) -> Option<char> {
    let mut chars = day.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

/// Compiled filter for a batch of scheduling requests
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleFilter {
    pub predicate: Predicate,
    pub course_clauses: usize,
    pub excluded_days: Vec<char>,
    pub start_time_limit: i64,
}

impl ScheduleFilter {
    /// Combine every request into one filter.
    ///
    /// Course pairs from all requests are OR-ed; excluded days from all
    /// requests are AND-ed; the start limit is the first one set.
    pub fn compile(requests: &[SchedulingRequest]) -> Self {
        let courses: Vec<Predicate> = requests
            .iter()
            .flat_map(|r| r.subject_course_pairs.iter())
            .map(|pair| {
                Predicate::And(vec![
                    Predicate::Eq(
                        Column::Subject,
                        Literal::Text(pair.subject.trim().to_ascii_uppercase()),
                    ),
                    Predicate::Eq(Column::CourseNumber, Literal::Integer(pair.course)),
                ])
            })
            .collect();

        let mut excluded_days: Vec<char> = Vec::new();
        for day in requests.iter().flat_map(|r| r.excluded_days.iter()) {
            match normalize_day(day) {
                Some(code) if !excluded_days.contains(&code) => excluded_days.push(code),
                Some(_) => {}
                None => warn!(day = %day, "Ignoring invalid day code"),
            }
        }

        let start_time_limit = requests
            .iter()
            .find_map(|r| r.start_time_limit)
            .unwrap_or(DEFAULT_START_TIME_LIMIT);

        let course_clauses = courses.len();
        let mut parts = Vec::new();
        if !courses.is_empty() {
            parts.push(Predicate::Or(courses));
        }
        parts.extend(
            excluded_days
                .iter()
                .map(|d| Predicate::NotContains(Column::Days, d.to_string())),
        );
        parts.push(Predicate::AtLeast(Column::StartHour, start_time_limit));

        Self {
            predicate: Predicate::And(parts),
            course_clauses,
            excluded_days,
            start_time_limit,
        }
    }

    /// Query builder for `SELECT *` over `table` with bound parameters
    pub fn select<'args>(&self, table: &str) -> Result<QueryBuilder<'args, Sqlite>> {
        let mut builder = QueryBuilder::new(format!("SELECT * FROM {} WHERE ", quote_table(table)?));
        self.predicate.push_to(&mut builder);
        Ok(builder)
    }

    /// The same query with values inlined
    pub fn inline_sql(&self, table: &str) -> Result<String> {
        Ok(format!(
            "SELECT * FROM {} WHERE {}",
            quote_table(table)?,
            self.predicate.to_inline_sql()
        ))
    }
}

fn quote_table(table: &str) -> Result<String> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::Configuration {
            message: format!("Invalid offerings table name '{}'", table),
        });
    }
    Ok(format!("\"{}\"", table))
}
