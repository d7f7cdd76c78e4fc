//! DragonGPT Indexer
//!
//! Loads scraped corpora into the vector index:
//! 1. Parses a JSON export (pages, courses or student organizations)
//! 2. Splits long texts into word chunks
//! 3. Embeds the chunks in batches
//! 4. Upserts the records with their metadata
//!
//! Usage: `indexer <pages|courses|orgs|colleges|graduate|majors|minors> <path> [urls_path]`

mod chunker;
mod corpus;
mod processor;

use crate::corpus::{load_corpus, CorpusKind};
use crate::processor::{IndexLoader, LoaderConfig};
use dragongpt_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    index::PineconeIndex,
    VERSION,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: indexer <pages|courses|orgs|colleges|graduate|majors|minors> <path> [urls_path]";

/// Parsed command line
#[derive(Debug, PartialEq)]
struct Args {
    kind: CorpusKind,
    path: PathBuf,
    urls_path: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let (kind, path) = match args {
        [kind, path, ..] => (kind, path),
        _ => anyhow::bail!(USAGE),
    };
    let kind: CorpusKind = kind.parse()?;
    let urls_path = args.get(2).map(PathBuf::from);

    if kind == CorpusKind::Orgs && urls_path.is_none() {
        anyhow::bail!("the orgs corpus needs a URLs file\n{}", USAGE);
    }

    Ok(Args {
        kind,
        path: PathBuf::from(path),
        urls_path,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config.observability);
    info!("Starting DragonGPT Indexer v{}", VERSION);

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let documents = load_corpus(args.kind, &args.path, args.urls_path.as_deref())?;
    info!(
        corpus = %args.kind,
        path = %args.path.display(),
        documents = documents.len(),
        "Corpus parsed"
    );

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );
    let index = PineconeIndex::new(&config.index, embedder.clone())?;

    let loader = IndexLoader::new(
        embedder,
        std::sync::Arc::new(index),
        LoaderConfig {
            embed_batch_size: config.embedding.batch_size,
            upsert_batch_size: config.index.upsert_batch_size.min(args.kind.max_upsert_batch()),
            ..Default::default()
        },
    );

    match loader.load(args.kind, &documents).await {
        Ok(report) => {
            println!(
                "Added {} {} records to index ({} documents, {} chunks, {} skipped)",
                report.upserted, args.kind, report.documents, report.chunks, report.skipped
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Indexing failed");
            Err(e.into())
        }
    }
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&strings(&["courses", "data/courses.json"])).unwrap();
        assert_eq!(
            args,
            Args {
                kind: CorpusKind::Courses,
                path: PathBuf::from("data/courses.json"),
                urls_path: None,
            }
        );
    }

    #[test]
    fn test_orgs_need_urls() {
        assert!(parse_args(&strings(&["orgs", "orgs.json"])).is_err());
        let args = parse_args(&strings(&["orgs", "orgs.json", "urls.json"])).unwrap();
        assert_eq!(args.urls_path, Some(PathBuf::from("urls.json")));
    }

    #[test]
    fn test_missing_or_unknown_arguments() {
        assert!(parse_args(&strings(&["pages"])).is_err());
        assert!(parse_args(&strings(&["alumni", "a.json"])).is_err());
    }

    #[test]
    fn test_program_kinds_parse() {
        let args = parse_args(&strings(&["majors", "data/majors.json"])).unwrap();
        assert_eq!(args.kind, CorpusKind::Majors);
        assert!(args.urls_path.is_none());
    }
}
