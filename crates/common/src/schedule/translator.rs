//! Scheduling query translation pipeline
//!
//! free text → extracted requests → compiled filter → offerings rows → JSON export

use super::extraction::{extract_requests, ExtractedRequests};
use super::filter::ScheduleFilter;
use super::store::{CourseOfferingRow, NormalizedRows, OfferingsStore};
use crate::errors::Result;
use crate::llm::LanguageModel;
use crate::metrics;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Everything one translation produced
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub requests: ExtractedRequests,
    pub filter: ScheduleFilter,
    /// Compiled query with values inlined
    pub sql: String,
    pub rows: NormalizedRows,
    /// The store query failed and the export is empty
    pub query_failed: bool,
    pub output_path: PathBuf,
}

/// Natural-language course scheduling
pub struct ScheduleTranslator {
    model: Arc<dyn LanguageModel>,
    store: OfferingsStore,
    output_path: PathBuf,
}

impl ScheduleTranslator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        store: OfferingsStore,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model,
            store,
            output_path: output_path.into(),
        }
    }

    /// Translate `text` and write the matching offerings to the output file
    #[instrument(skip(self))]
    pub async fn translate(&self, text: &str) -> Result<ScheduleOutcome> {
        let requests = extract_requests(self.model.as_ref(), text).await?;
        let filter = ScheduleFilter::compile(&requests.people);
        let sql = filter.inline_sql(self.store.table())?;

        if filter.course_clauses == 0 {
            warn!("No courses extracted, query is only filtered by day and time");
        }
        info!(sql = %sql, "Compiled offerings query");

        let (rows, query_failed) = match self.store.fetch(&filter).await {
            Ok(rows) => (rows, false),
            Err(e) => {
                error!(error = %e, "Offerings query failed, exporting no results");
                (NormalizedRows::default(), true)
            }
        };

        if rows.dropped > 0 {
            warn!(dropped = rows.dropped, "Dropped malformed offering rows");
        }
        metrics::record_schedule(rows.rows.len(), rows.dropped);

        write_offerings(&self.output_path, &rows.rows)?;
        info!(
            rows = rows.rows.len(),
            path = %self.output_path.display(),
            "Offerings exported"
        );

        Ok(ScheduleOutcome {
            requests,
            filter,
            sql,
            rows,
            query_failed,
            output_path: self.output_path.clone(),
        })
    }
}

/// Write rows as a JSON array indented by four spaces
pub fn write_offerings(path: &Path, rows: &[CourseOfferingRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    rows.serialize(&mut serializer)?;

    std::fs::write(path, buffer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLanguageModel;
    use crate::schedule::store::Cell;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store(table: Option<&str>) -> OfferingsStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        if let Some(table) = table {
            sqlx::query(&format!(
                r#"CREATE TABLE "{}" (
                    "SubjectCode" TEXT, "CourseNo." INTEGER, a TEXT, b TEXT, c TEXT, d TEXT,
                    "CRN" INTEGER, e TEXT, "Days_Time" TEXT, "Days_Time1" TEXT, f TEXT, g TEXT, h TEXT
                )"#,
                table
            ))
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(&format!(
                r#"INSERT INTO "{}" VALUES
                    ('CS', 171, 'Lecture', 'Face To Face', '001', 'u', 41001, 'Computer Programming I', 'TR', '14:00 - 15:20 pm', '01/06/25', NULL, 'Staff'),
                    ('CS', 171, 'Lab', 'Face To Face', '060', 'u', 41002, 'Computer Programming I', 'F', '15:00 - 16:50 pm', '01/06/25', NULL, 'Staff')"#,
                table
            ))
            .execute(&pool)
            .await
            .unwrap();
        }

        OfferingsStore::with_pool(pool, table.unwrap_or("winterTms"))
    }

    fn model() -> MockLanguageModel {
        MockLanguageModel::new("").with_extraction(json!({
            "people": [{
                "subject_course_pairs": [{"subject": "CS", "course": 171}],
                "excluded_days": ["F"],
                "start_time_limit": null
            }]
        }))
    }

    fn output(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("dragongpt-{}-{}", name, std::process::id()))
            .join("generated-courses.json")
    }

    #[tokio::test]
    async fn test_translate_writes_filtered_rows() {
        let path = output("translate");
        let translator = ScheduleTranslator::new(Arc::new(model()), store(Some("winterTms")).await, &path);

        let outcome = translator
            .translate("I need CS 171 but no Friday classes")
            .await
            .unwrap();

        assert!(!outcome.query_failed);
        assert_eq!(outcome.rows.rows.len(), 1);
        assert_eq!(outcome.rows.rows[0].crn, Cell::Integer(41001));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["crn"], 41001);
        assert_eq!(written[0]["course_title"], "Computer Programming I");
        assert!(std::fs::read_to_string(&path).unwrap().contains("\n    {"));
    }

    #[tokio::test]
    async fn test_query_failure_exports_empty_array() {
        let path = output("failure");
        let translator = ScheduleTranslator::new(Arc::new(model()), store(None).await, &path);

        let outcome = translator.translate("CS 171").await.unwrap();

        assert!(outcome.query_failed);
        assert!(outcome.rows.rows.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_extraction_failure_propagates() {
        let translator = ScheduleTranslator::new(
            Arc::new(MockLanguageModel::failing()),
            store(Some("winterTms")).await,
            output("extract-failure"),
        );
        assert!(translator.translate("CS 171").await.is_err());
    }

    #[tokio::test]
    async fn test_logged_sql_names_the_queried_table() {
        let path = output("spring");
        let translator = ScheduleTranslator::new(Arc::new(model()), store(Some("springTms")).await, &path);

        let outcome = translator.translate("CS 171, no Fridays").await.unwrap();

        assert!(!outcome.query_failed);
        assert_eq!(outcome.rows.rows.len(), 1);
        assert!(outcome.sql.starts_with("SELECT * FROM \"springTms\" WHERE"));
    }
}
