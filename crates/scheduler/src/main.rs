//! DragonGPT Scheduler
//!
//! Turns a course scheduling question into a filtered offerings export:
//! 1. Extracts subject/course pairs, excluded days and a start hour
//! 2. Compiles them into a parameterized offerings query
//! 3. Writes the matching rows as a JSON array

use anyhow::Context;
use dragongpt_common::{
    config::{AppConfig, ObservabilityConfig},
    llm::OpenAiChatClient,
    schedule::{OfferingsStore, ScheduleOutcome, ScheduleTranslator},
    VERSION,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "Enter your course scheduling query: ";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config.observability);
    info!("Starting DragonGPT Scheduler v{}", VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let query = match query_from_args(&args) {
        Some(query) => query,
        None => read_query(&mut io::stdin().lock(), &mut io::stdout())?,
    };
    if query.is_empty() {
        anyhow::bail!("A scheduling query is required");
    }

    let model = Arc::new(OpenAiChatClient::new(&config.llm)?);
    let store = OfferingsStore::connect(&config.scheduler)
        .await
        .with_context(|| format!("opening offerings store {}", config.scheduler.database_url))?;

    let translator = ScheduleTranslator::new(model, store, config.scheduler.output_path.clone());

    match translator.translate(&query).await {
        Ok(outcome) => {
            print!("{}", summary(&outcome));
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Scheduling query failed");
            Err(e.into())
        }
    }
}

/// Logs go to stderr so the summary on stdout stays clean
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn query_from_args(args: &[String]) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    Some(args.join(" ").trim().to_string())
}

fn read_query<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> io::Result<String> {
    write!(output, "{}", PROMPT)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn summary(outcome: &ScheduleOutcome) -> String {
    let mut out = String::new();

    for (i, request) in outcome.requests.people.iter().enumerate() {
        let courses: Vec<String> = request
            .subject_course_pairs
            .iter()
            .map(|p| format!("{} {}", p.subject, p.course))
            .collect();
        out.push_str(&format!(
            "Request {}: courses [{}], excluded days [{}], start hour {}\n",
            i + 1,
            courses.join(", "),
            request.excluded_days.join(", "),
            request
                .start_time_limit
                .map(|h| h.to_string())
                .unwrap_or_else(|| "default".to_string()),
        ));
    }

    out.push_str(&format!("Query: {}\n", outcome.sql));
    if outcome.query_failed {
        out.push_str("Query failed, no offerings exported\n");
    }
    out.push_str(&format!(
        "Wrote {} offerings to {}",
        outcome.rows.rows.len(),
        outcome.output_path.display()
    ));
    if outcome.rows.dropped > 0 {
        out.push_str(&format!(" ({} malformed rows skipped)", outcome.rows.dropped));
    }
    out.push('\n');
    out
}
