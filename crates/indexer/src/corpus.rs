//! Scraped corpora
//!
//! Parses the JSON exports produced by the scrapers into documents ready
//! for chunking. Each kind decides its id key, the text to embed and the
//! metadata stored next to every chunk.

use crate::chunker::normalize_ascii;
use crate::processor::IndexingError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Supported corpus kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusKind {
    /// Official university pages
    Pages,
    /// Course catalog descriptions
    Courses,
    /// Student organizations
    Orgs,
    /// College overviews with their programs
    Colleges,
    /// Graduate program pages
    Graduate,
    /// Undergraduate majors
    Majors,
    /// Minors
    Minors,
}

impl CorpusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusKind::Pages => "pages",
            CorpusKind::Courses => "courses",
            CorpusKind::Orgs => "orgs",
            CorpusKind::Colleges => "colleges",
            CorpusKind::Graduate => "graduate",
            CorpusKind::Majors => "majors",
            CorpusKind::Minors => "minors",
        }
    }

    /// Largest upsert request for this kind. Program corpora carry large
    /// metadata and go in smaller batches.
    pub fn max_upsert_batch(&self) -> usize {
        match self {
            CorpusKind::Graduate | CorpusKind::Majors | CorpusKind::Minors => 100,
            _ => 200,
        }
    }
}

impl fmt::Display for CorpusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorpusKind {
    type Err = IndexingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pages" => Ok(CorpusKind::Pages),
            "courses" => Ok(CorpusKind::Courses),
            "orgs" => Ok(CorpusKind::Orgs),
            "colleges" => Ok(CorpusKind::Colleges),
            "graduate" => Ok(CorpusKind::Graduate),
            "majors" => Ok(CorpusKind::Majors),
            "minors" => Ok(CorpusKind::Minors),
            other => Err(IndexingError::Corpus(format!(
                "Unknown corpus kind '{}' (expected pages, courses, orgs, colleges, graduate, majors or minors)",
                other
            ))),
        }
    }
}

/// One source item, before chunking
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Prefix of every chunk id
    pub key: String,
    /// Text that gets chunked and embedded
    pub text: String,
    /// Metadata shared by all chunks of this document
    pub metadata: Map<String, Value>,
    /// Metadata field that receives the chunk text
    pub chunk_field: &'static str,
    /// Whether chunks also carry `Chunk_Index`
    pub index_chunks: bool,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    #[serde(rename = "Header", default)]
    header: Value,
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "Text")]
    text: String,
}

#[derive(Debug, Deserialize)]
struct CourseEntry {
    url: String,
    data: CourseData,
}

#[derive(Debug, Deserialize)]
struct CourseData {
    #[serde(rename = "Identifier")]
    identifier: String,
    #[serde(rename = "Title", default)]
    title: Value,
    #[serde(rename = "Number_of_credits", default)]
    credits: Value,
    #[serde(rename = "Description", default)]
    description: String,
    #[serde(rename = "College/Department", default)]
    department: Value,
    #[serde(rename = "Repeat Status", default)]
    repeat_status: Value,
    #[serde(rename = "Prerequisites", default)]
    prerequisites: Value,
}

#[derive(Debug, Deserialize)]
struct OrgEntry {
    #[serde(rename = "Org Name")]
    name: String,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct CollegeEntry {
    name: String,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    majors: Value,
    #[serde(default)]
    minors: Value,
    #[serde(default)]
    accelerated_degrees: Value,
    #[serde(default)]
    certificates: Value,
    #[serde(default)]
    special_programs: Value,
}

#[derive(Debug, Deserialize)]
struct GraduateEntry {
    program_name: String,
    #[serde(default)]
    program_details: Value,
    #[serde(default)]
    sections: Value,
    #[serde(default)]
    faculty: Value,
    #[serde(default)]
    url: Value,
}

#[derive(Debug, Deserialize)]
struct MajorEntry {
    #[serde(rename = "About the Program", default)]
    about: Value,
    #[serde(rename = "Degree Requirements", default)]
    degree_requirements: Value,
    #[serde(rename = "Co-op/Career Opportunities", default)]
    coop: Value,
    #[serde(rename = "Facilities", default)]
    facilities: Value,
    #[serde(rename = "Faculty", default)]
    faculty: Value,
}

#[derive(Debug, Deserialize)]
struct MinorEntry {
    #[serde(default)]
    about: Value,
    #[serde(default)]
    requirements: Value,
    #[serde(default)]
    program_requirements: Value,
}

/// Strings as-is, null as empty, anything else as JSON text
fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Arrays joined with `", "`, anything else as [`field_text`]
fn list_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(field_text).collect::<Vec<_>>().join(", "),
        other => field_text(other),
    }
}

/// Lists stay lists, null becomes an empty list
fn list_value(value: Value) -> Value {
    match value {
        Value::Null => Value::Array(Vec::new()),
        other => other,
    }
}

fn text_document(key: String, text: String, metadata: Map<String, Value>) -> Document {
    Document {
        key,
        text,
        metadata,
        chunk_field: "Text_Chunk",
        index_chunks: true,
    }
}

/// Read a file as UTF-8, replacing invalid sequences
pub fn read_lossy(path: &Path) -> Result<String, IndexingError> {
    let bytes = std::fs::read(path)
        .map_err(|e| IndexingError::Corpus(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse<T: for<'de> Deserialize<'de>>(json: &str, what: &str) -> Result<T, IndexingError> {
    serde_json::from_str(json)
        .map_err(|e| IndexingError::Corpus(format!("Invalid {} corpus: {}", what, e)))
}

/// Pages: `[{Header, URL, Text}]`, keyed by URL
pub fn parse_pages(json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: Vec<PageEntry> = parse(json, "pages")?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let mut metadata = Map::new();
            metadata.insert("Header".to_string(), entry.header);
            metadata.insert("URL".to_string(), Value::String(entry.url.clone()));
            text_document(entry.url, entry.text, metadata)
        })
        .collect())
}

/// Courses: `[{url, data: {...}}]`, keyed by course identifier.
///
/// The description is what gets chunked; each chunk replaces it in the
/// stored metadata.
pub fn parse_courses(json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: Vec<CourseEntry> = parse(json, "courses")?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let data = entry.data;
            let mut metadata = Map::new();
            metadata.insert("Identifier".to_string(), Value::String(data.identifier.clone()));
            metadata.insert("Title".to_string(), data.title);
            metadata.insert("Number_of_credits".to_string(), data.credits);
            metadata.insert("College/Department".to_string(), data.department);
            metadata.insert("Repeat Status".to_string(), data.repeat_status);
            metadata.insert("Prerequisites".to_string(), data.prerequisites);
            metadata.insert("url".to_string(), Value::String(entry.url));
            Document {
                key: data.identifier,
                text: data.description,
                metadata,
                chunk_field: "Description",
                index_chunks: false,
            }
        })
        .collect())
}

/// Organizations: `[{Org Name, Description}]` paired with a parallel
/// array of URLs. Names and descriptions are ASCII-normalized.
pub fn parse_orgs(json: &str, urls_json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: Vec<OrgEntry> = parse(json, "orgs")?;
    let urls: Vec<String> = parse(urls_json, "org urls")?;

    if entries.len() != urls.len() {
        warn!(
            orgs = entries.len(),
            urls = urls.len(),
            "Organization and URL counts differ, extra entries are ignored"
        );
    }

    Ok(entries
        .into_iter()
        .zip(urls)
        .map(|(entry, url)| {
            let name = normalize_ascii(&entry.name);
            let description = normalize_ascii(&entry.description);
            let text = format!("{} - {}", name, description);

            let mut metadata = Map::new();
            metadata.insert("Org Name".to_string(), Value::String(name.clone()));
            metadata.insert("Description".to_string(), Value::String(description));
            metadata.insert("URL".to_string(), Value::String(url));
            text_document(name, text, metadata)
        })
        .collect())
}

/// Colleges: `[{name, description, majors, minors, ...}]`, keyed by
/// college name. Program lists are kept as lists in the metadata.
pub fn parse_colleges(json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: Vec<CollegeEntry> = parse(json, "colleges")?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let special_programs = entry
                .special_programs
                .get("description")
                .map(field_text)
                .unwrap_or_default();
            let description = field_text(&entry.description);
            let text = normalize_ascii(&format!(
                "{} - {} Majors: {} Minors: {} Accelerated Degrees: {} Certificates: {} Special Programs: {}",
                entry.name,
                description,
                list_text(&entry.majors),
                list_text(&entry.minors),
                list_text(&entry.accelerated_degrees),
                list_text(&entry.certificates),
                special_programs,
            ));

            let mut metadata = Map::new();
            metadata.insert("name".to_string(), Value::String(entry.name.clone()));
            metadata.insert("description".to_string(), Value::String(description));
            metadata.insert("majors".to_string(), list_value(entry.majors));
            metadata.insert("minors".to_string(), list_value(entry.minors));
            metadata.insert("accelerated_degrees".to_string(), list_value(entry.accelerated_degrees));
            metadata.insert("certificates".to_string(), list_value(entry.certificates));
            metadata.insert("special_programs".to_string(), Value::String(special_programs));
            text_document(normalize_ascii(&entry.name), text, metadata)
        })
        .collect())
}

/// Graduate programs: `[{program_name, program_details, sections, faculty, url}]`,
/// keyed by the ASCII program name. Nested details are stored as JSON text.
pub fn parse_graduate(json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: Vec<GraduateEntry> = parse(json, "graduate")?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let name = normalize_ascii(&entry.program_name);
            let details = field_text(&entry.program_details);
            let sections = field_text(&entry.sections);
            let faculty = list_text(&entry.faculty);
            let text = normalize_ascii(&format!(
                "Program Name: {}\nDetails: {}\nSections: {}\nFaculty: {}",
                name, details, sections, faculty
            ));

            let mut metadata = Map::new();
            metadata.insert("program_name".to_string(), Value::String(name.clone()));
            metadata.insert("program_details".to_string(), Value::String(details));
            metadata.insert("sections".to_string(), Value::String(sections));
            metadata.insert("faculty".to_string(), Value::String(faculty));
            metadata.insert("url".to_string(), Value::String(field_text(&entry.url)));
            text_document(name, text, metadata)
        })
        .collect())
}

/// Majors: `{"<major>": {"About the Program", "Degree Requirements", ...}}`,
/// keyed by the ASCII major name
pub fn parse_majors(json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: BTreeMap<String, MajorEntry> = parse(json, "majors")?;

    Ok(entries
        .into_iter()
        .map(|(major, entry)| {
            let name = normalize_ascii(&major);
            let about = field_text(&entry.about);
            let requirements = field_text(&entry.degree_requirements);
            let coop = field_text(&entry.coop);
            let facilities = field_text(&entry.facilities);
            let faculty = field_text(&entry.faculty);
            let text = normalize_ascii(&format!(
                "Major Name: {}\nAbout the Program: {}\nDegree Requirements: {}\nCo-op/Career Opportunities: {}\nFacilities: {}\nFaculty: {}",
                name, about, requirements, coop, facilities, faculty
            ));

            let mut metadata = Map::new();
            metadata.insert("major_name".to_string(), Value::String(name.clone()));
            metadata.insert("about_the_program".to_string(), Value::String(about));
            metadata.insert("degree_requirements".to_string(), Value::String(requirements));
            metadata.insert("coop_career_opportunities".to_string(), Value::String(coop));
            metadata.insert("facilities".to_string(), Value::String(facilities));
            metadata.insert("faculty".to_string(), Value::String(faculty));
            text_document(name, text, metadata)
        })
        .collect())
}

/// Minors: `{"<minor>": {about, requirements, program_requirements}}`,
/// keyed by the ASCII minor name
pub fn parse_minors(json: &str) -> Result<Vec<Document>, IndexingError> {
    let entries: BTreeMap<String, MinorEntry> = parse(json, "minors")?;

    Ok(entries
        .into_iter()
        .map(|(minor, entry)| {
            let name = normalize_ascii(&minor);
            let about = field_text(&entry.about);
            let requirements = list_text(&entry.requirements);
            let program_requirements = field_text(&entry.program_requirements);
            let text = normalize_ascii(&format!(
                "Minor Name: {}\nAbout: {}\nRequirements: {}\nProgram Requirements: {}",
                name, about, requirements, program_requirements
            ));

            let mut metadata = Map::new();
            metadata.insert("minor_name".to_string(), Value::String(name.clone()));
            metadata.insert("about".to_string(), Value::String(about));
            metadata.insert("requirements".to_string(), Value::String(requirements));
            metadata.insert("program_requirements".to_string(), Value::String(program_requirements));
            text_document(name, text, metadata)
        })
        .collect())
}

/// Load a corpus from disk. `urls_path` is required for organizations.
pub fn load_corpus(
    kind: CorpusKind,
    path: &Path,
    urls_path: Option<&Path>,
) -> Result<Vec<Document>, IndexingError> {
    let json = read_lossy(path)?;
    match kind {
        CorpusKind::Pages => parse_pages(&json),
        CorpusKind::Courses => parse_courses(&json),
        CorpusKind::Orgs => {
            let urls_path = urls_path.ok_or_else(|| {
                IndexingError::Corpus("The orgs corpus needs a URLs file".to_string())
            })?;
            parse_orgs(&json, &read_lossy(urls_path)?)
        }
        CorpusKind::Colleges => parse_colleges(&json),
        CorpusKind::Graduate => parse_graduate(&json),
        CorpusKind::Majors => parse_majors(&json),
        CorpusKind::Minors => parse_minors(&json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("pages".parse::<CorpusKind>().unwrap(), CorpusKind::Pages);
        assert_eq!("orgs".parse::<CorpusKind>().unwrap(), CorpusKind::Orgs);
        assert_eq!("graduate".parse::<CorpusKind>().unwrap(), CorpusKind::Graduate);
        assert!("housing".parse::<CorpusKind>().is_err());
        assert_eq!(CorpusKind::Minors.max_upsert_batch(), 100);
        assert_eq!(CorpusKind::Pages.max_upsert_batch(), 200);
    }

    #[test]
    fn test_parse_pages() {
        let json = json!([{
            "Header": "Tuition",
            "URL": "https://drexel.edu/tuition",
            "Text": "Tuition and fees"
        }])
        .to_string();

        let docs = parse_pages(&json).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key, "https://drexel.edu/tuition");
        assert_eq!(docs[0].text, "Tuition and fees");
        assert_eq!(docs[0].metadata["Header"], "Tuition");
        assert_eq!(docs[0].chunk_field, "Text_Chunk");
        assert!(docs[0].index_chunks);
    }

    #[test]
    fn test_parse_courses_keeps_loose_fields() {
        let json = json!([{
            "url": "https://catalog.drexel.edu/coursedescriptions/quarter/undergrad/cs/",
            "data": {
                "Identifier": "CS 260",
                "Title": "Data Structures",
                "Number_of_credits": 4.0,
                "Description": "Covers lists, trees and graphs.",
                "College/Department": "Computing & Informatics",
                "Repeat Status": "Not repeatable for credit",
                "Prerequisites": null
            }
        }])
        .to_string();

        let docs = parse_courses(&json).unwrap();

        assert_eq!(docs[0].key, "CS 260");
        assert_eq!(docs[0].text, "Covers lists, trees and graphs.");
        assert_eq!(docs[0].metadata["Number_of_credits"], 4.0);
        assert_eq!(docs[0].metadata["Prerequisites"], Value::Null);
        assert!(docs[0].metadata.get("Description").is_none());
        assert_eq!(docs[0].chunk_field, "Description");
        assert!(!docs[0].index_chunks);
    }

    #[test]
    fn test_parse_orgs_normalizes_and_pairs_urls() {
        let orgs = json!([
            {"Org Name": "Société Française", "Description": "French club"},
            {"Org Name": "Robotics", "Description": "Build robots"}
        ])
        .to_string();
        let urls = json!(["https://drexel.campuslabs.com/engage/organization/sf"]).to_string();

        let docs = parse_orgs(&orgs, &urls).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key, "Societe Francaise");
        assert_eq!(docs[0].text, "Societe Francaise - French club");
        assert_eq!(
            docs[0].metadata["URL"],
            "https://drexel.campuslabs.com/engage/organization/sf"
        );
    }

    #[test]
    fn test_invalid_json_is_corpus_error() {
        let err = parse_pages("{not json").unwrap_err();
        assert!(matches!(err, IndexingError::Corpus(_)));
    }

    #[test]
    fn test_orgs_require_urls_file() {
        let path = std::env::temp_dir().join(format!("dragongpt-orgs-{}.json", std::process::id()));
        std::fs::write(&path, "[]").unwrap();

        let result = load_corpus(CorpusKind::Orgs, &path, None);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(IndexingError::Corpus(_))));
    }

    #[test]
    fn test_parse_colleges() {
        let json = json!([{
            "name": "College of Computing & Informatics",
            "description": "Computing at Drexel.",
            "majors": ["Computer Science", "Data Science"],
            "minors": ["Cybersecurity"],
            "special_programs": {"description": "Co-op for all."}
        }])
        .to_string();

        let docs = parse_colleges(&json).unwrap();

        assert_eq!(docs[0].key, "College of Computing & Informatics");
        assert_eq!(
            docs[0].text,
            "College of Computing & Informatics - Computing at Drexel. Majors: Computer Science, Data Science \
             Minors: Cybersecurity Accelerated Degrees:  Certificates:  Special Programs: Co-op for all."
        );
        assert_eq!(docs[0].metadata["majors"], json!(["Computer Science", "Data Science"]));
        assert_eq!(docs[0].metadata["certificates"], json!([]));
        assert_eq!(docs[0].metadata["special_programs"], "Co-op for all.");
        assert_eq!(docs[0].chunk_field, "Text_Chunk");
    }

    #[test]
    fn test_parse_graduate_stringifies_nested_fields() {
        let json = json!([{
            "program_name": "Biomédical Engineering MS",
            "program_details": {"Credits": "45.0"},
            "sections": "Admission requirements",
            "faculty": ["Dr. A", "Dr. B"],
            "url": "https://drexel.edu/grad/programs/bme"
        }])
        .to_string();

        let docs = parse_graduate(&json).unwrap();

        assert_eq!(docs[0].key, "Biomedical Engineering MS");
        assert_eq!(
            docs[0].text,
            "Program Name: Biomedical Engineering MS\nDetails: {\"Credits\":\"45.0\"}\nSections: Admission requirements\nFaculty: Dr. A, Dr. B"
        );
        assert_eq!(docs[0].metadata["url"], "https://drexel.edu/grad/programs/bme");
        assert_eq!(docs[0].metadata["faculty"], "Dr. A, Dr. B");
        assert_eq!(docs[0].metadata["program_details"], "{\"Credits\":\"45.0\"}");
    }

    #[test]
    fn test_parse_majors() {
        let json = json!({
            "Computer Science (BS)": {
                "About the Program": "Learn to program.",
                "Degree Requirements": {"Total": "180.0 credits"},
                "Faculty": "Staff"
            }
        })
        .to_string();

        let docs = parse_majors(&json).unwrap();

        assert_eq!(docs[0].key, "Computer Science (BS)");
        assert!(docs[0].text.starts_with(
            "Major Name: Computer Science (BS)\nAbout the Program: Learn to program.\nDegree Requirements: {\"Total\":\"180.0 credits\"}"
        ));
        assert!(docs[0].text.ends_with("Facilities: \nFaculty: Staff"));
        assert_eq!(docs[0].metadata["about_the_program"], "Learn to program.");
        assert_eq!(docs[0].metadata["coop_career_opportunities"], "");
        assert!(docs[0].metadata.get("url").is_none());
    }

    #[test]
    fn test_parse_minors_treats_null_as_empty() {
        let json = json!({
            "Écriture": {"about": null, "requirements": ["ENGL 101", "ENGL 102"], "program_requirements": null}
        })
        .to_string();

        let docs = parse_minors(&json).unwrap();

        assert_eq!(docs[0].key, "Ecriture");
        assert_eq!(
            docs[0].text,
            "Minor Name: Ecriture\nAbout: \nRequirements: ENGL 101, ENGL 102\nProgram Requirements: "
        );
        assert_eq!(docs[0].metadata["minor_name"], "Ecriture");
        assert_eq!(docs[0].metadata["requirements"], "ENGL 101, ENGL 102");
    }
}
