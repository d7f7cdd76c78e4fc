//! Course offerings store
//!
//! Rows come back positionally. Only rows with exactly 13 columns map to a
//! [`CourseOfferingRow`]; anything else is dropped and counted.

use super::filter::ScheduleFilter;
use crate::config::SchedulerConfig;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, ValueRef};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Number of columns in an offerings row
pub const OFFERING_COLUMNS: usize = 13;

/// A single stored value, typed as the store returned it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Cell {
    fn from_row(row: &SqliteRow, index: usize) -> Cell {
        match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Cell::Null,
            Err(_) => return Cell::Null,
            Ok(_) => {}
        }
        if let Ok(n) = row.try_get::<i64, _>(index) {
            return Cell::Integer(n);
        }
        if let Ok(x) = row.try_get::<f64, _>(index) {
            return Cell::Real(x);
        }
        if let Ok(s) = row.try_get::<String, _>(index) {
            return Cell::Text(s);
        }
        match row.try_get::<Vec<u8>, _>(index) {
            Ok(bytes) => Cell::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => Cell::Null,
        }
    }
}

/// One course section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseOfferingRow {
    pub subject: Cell,
    pub course_number: Cell,
    pub instruction_type: Cell,
    pub delivery_method: Cell,
    pub section: Cell,
    pub course_url: Cell,
    pub crn: Cell,
    pub course_title: Cell,
    pub day: Cell,
    pub time: Cell,
    pub start_date: Cell,
    pub final_exam: Cell,
    pub instructor: Cell,
}

impl CourseOfferingRow {
    /// Map 13 positional values in table order
    pub fn from_cells(cells: Vec<Cell>) -> Option<Self> {
        let [subject, course_number, instruction_type, delivery_method, section, course_url, crn, course_title, day, time, start_date, final_exam, instructor]: [Cell; OFFERING_COLUMNS] =
            cells.try_into().ok()?;

        Some(Self {
            subject,
            course_number,
            instruction_type,
            delivery_method,
            section,
            course_url,
            crn,
            course_title,
            day,
            time,
            start_date,
            final_exam,
            instructor,
        })
    }
}

/// Rows that mapped, plus how many did not
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedRows {
    pub rows: Vec<CourseOfferingRow>,
    pub dropped: usize,
}

/// Keep well-shaped rows, count the rest
pub fn normalize_rows<I>(raw: I) -> NormalizedRows
where
    I: IntoIterator<Item = Vec<Cell>>,
{
    let mut normalized = NormalizedRows::default();
    for cells in raw {
        match CourseOfferingRow::from_cells(cells) {
            Some(row) => normalized.rows.push(row),
            None => normalized.dropped += 1,
        }
    }
    normalized
}

/// SQLite-backed offerings table
pub struct OfferingsStore {
    pool: SqlitePool,
    table: String,
}

impl OfferingsStore {
    /// Open the store read-only
    pub async fn connect(config: &SchedulerConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self::with_pool(pool, &config.table))
    }

    pub fn with_pool(pool: SqlitePool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    /// Table the filter runs against
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run the filter and normalize the result
    #[instrument(skip_all, fields(table = %self.table))]
    pub async fn fetch(&self, filter: &ScheduleFilter) -> Result<NormalizedRows> {
        let mut builder = filter.select(&self.table)?;
        let rows = builder.build().fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "Offerings query completed");

        Ok(normalize_rows(rows.iter().map(|row| {
            (0..row.len())
                .map(|i| Cell::from_row(row, i))
                .collect::<Vec<_>>()
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::extraction::{SchedulingRequest, SubjectCoursePair};

    fn cells(n: usize) -> Vec<Cell> {
        (0..n).map(|i| Cell::Text(format!("c{}", i))).collect()
    }

    #[test]
    fn test_thirteen_cells_map_in_order() {
        let row = CourseOfferingRow::from_cells(cells(13)).unwrap();
        assert_eq!(row.subject, Cell::Text("c0".into()));
        assert_eq!(row.crn, Cell::Text("c6".into()));
        assert_eq!(row.instructor, Cell::Text("c12".into()));
    }

    #[test]
    fn test_wrong_shapes_are_dropped() {
        let normalized = normalize_rows(vec![cells(12), cells(13), cells(14), cells(13)]);
        assert_eq!(normalized.rows.len(), 2);
        assert_eq!(normalized.dropped, 2);
    }

    #[test]
    fn test_row_serializes_snake_case() {
        let mut values = cells(13);
        values[1] = Cell::Integer(171);
        values[12] = Cell::Null;
        let row = CourseOfferingRow::from_cells(values).unwrap();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["course_number"], 171);
        assert_eq!(json["final_exam"], "c11");
        assert!(json["instructor"].is_null());
    }

    async fn seeded_store() -> OfferingsStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            r#"CREATE TABLE "winterTms" (
                "SubjectCode" TEXT, "CourseNo." INTEGER, "InstrType" TEXT, "InstrMethod" TEXT,
                "Sec" TEXT, "CourseURL" TEXT, "CRN" INTEGER, "CourseTitle" TEXT,
                "Days_Time" TEXT, "Days_Time1" TEXT, "StartDate" TEXT, "FinalExam" TEXT,
                "Instructor" TEXT
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let rows = [
            ("CS", 171, "MWF", "13:00 - 13:50 pm", 11111),
            ("CS", 171, "TR", "09:30 - 10:50 am", 11112),
            ("CS", 171, "F", "14:00 - 15:50 pm", 11113),
            ("CI", 102, "W", "15:00 - 16:50 pm", 22222),
            ("MATH", 121, "MW", "16:00 - 17:50 pm", 33333),
        ];
        for (subject, number, days, time, crn) in rows {
            sqlx::query(r#"INSERT INTO "winterTms" VALUES (?, ?, 'Lecture', 'Face To Face', '001', 'https://termmasterschedule.drexel.edu', ?, 'Course', ?, ?, '01/06/25', NULL, 'Staff')"#)
                .bind(subject)
                .bind(number)
                .bind(crn)
                .bind(days)
                .bind(time)
                .execute(&pool)
                .await
                .unwrap();
        }

        OfferingsStore::with_pool(pool, "winterTms")
    }

    #[tokio::test]
    async fn test_fetch_applies_filter() {
        let store = seeded_store().await;
        let filter = ScheduleFilter::compile(&[SchedulingRequest {
            subject_course_pairs: vec![
                SubjectCoursePair::new("CS", 171),
                SubjectCoursePair::new("CI", 102),
            ],
            excluded_days: vec!["F".into()],
            start_time_limit: Some(12),
        }]);

        let result = store.fetch(&filter).await.unwrap();
        assert_eq!(result.dropped, 0);

        let crns: Vec<Cell> = result.rows.iter().map(|r| r.crn.clone()).collect();
        assert_eq!(crns, vec![Cell::Integer(22222)]);
        assert_eq!(result.rows[0].final_exam, Cell::Null);
    }

    #[tokio::test]
    async fn test_fetch_without_courses_is_underconstrained() {
        let store = seeded_store().await;
        let filter = ScheduleFilter::compile(&[]);
        let result = store.fetch(&filter).await.unwrap();
        // Every section starting at or after noon
        assert_eq!(result.rows.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_table_is_error() {
        let store = seeded_store().await;
        let other = OfferingsStore::with_pool(store.pool.clone(), "springTms");
        assert!(other.fetch(&ScheduleFilter::compile(&[])).await.is_err());
    }
}
