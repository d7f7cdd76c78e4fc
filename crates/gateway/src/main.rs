//! DragonGPT API Gateway
//!
//! The HTTP entry point for the chatbot frontend.
//! Handles:
//! - Question answering with streamed responses
//! - Conversation titles
//! - Rate limiting and CORS
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use dragongpt_common::{
    config::{AppConfig, ObservabilityConfig},
    context::{AnswerService, AugmenterOptions, ContextAugmenter, Prompts, Summarizer},
    embeddings::create_embedder,
    errors::Result,
    fetch::HttpPageFetcher,
    index::PineconeIndex,
    llm::{LanguageModel, OpenAiChatClient},
    metrics,
    search::DuckDuckGoLite,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub augmenter: Arc<ContextAugmenter>,
    pub answers: Arc<AnswerService>,
    pub summarizer: Arc<Summarizer>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Construct every service handle once, at start-up
    pub fn from_config(config: Arc<AppConfig>, metrics: Option<PrometheusHandle>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = Arc::new(PineconeIndex::new(&config.index, embedder)?);
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatClient::new(&config.llm)?);
        let search = Arc::new(DuckDuckGoLite::new(&config.search, &config.fetch)?);
        let fetcher = Arc::new(HttpPageFetcher::new(&config.fetch)?);
        let prompts = Prompts::load(&config.prompts)?;

        let augmenter = ContextAugmenter::new(
            index,
            model.clone(),
            search,
            fetcher,
            AugmenterOptions::from(config.as_ref()),
        );

        Ok(Self {
            augmenter: Arc::new(augmenter),
            answers: Arc::new(AnswerService::new(model.clone(), prompts)),
            summarizer: Arc::new(Summarizer::new(model)),
            config,
            metrics,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting DragonGPT API Gateway v{}", dragongpt_common::VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    let metrics_handle = if config.observability.metrics_enabled {
        Some(install_metrics_recorder()?)
    } else {
        None
    };

    let state = AppState::from_config(config.clone(), metrics_handle)
        .context("Failed to initialize services")?;

    // Build the router
    let app = create_router(state)?;

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing from observability settings. `RUST_LOG` wins over the configured level.
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_retrieval_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::UPSTREAM_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_embedding_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::UPSTREAM_BUCKETS,
        )?
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    metrics::register_metrics();
    Ok(handle)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router> {
    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let mut api_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route("/summarize-convo", post(handlers::summarize::summarize_convo));

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        )?;
        api_routes = api_routes.route_layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    let cors = cors_layer(&state.config);

    // Compose the app
    Ok(Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics))
        .merge(api_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use dragongpt_common::{
        fetch::PageFetcher,
        index::{IndexRecord, RetrievedFragment, VectorIndex},
        llm::MockLanguageModel,
        search::{SearchResult, WebSearch},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct EmptyIndex;

    #[async_trait]
    impl VectorIndex for EmptyIndex {
        async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedFragment>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, records: &[IndexRecord]) -> Result<usize> {
            Ok(records.len())
        }
    }

    struct NoSearch;

    #[async_trait]
    impl WebSearch for NoSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
            Ok(Vec::new())
        }
    }

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn fetch_text(&self, _url: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn state_with(model: MockLanguageModel, config: AppConfig) -> AppState {
        let model: Arc<dyn LanguageModel> = Arc::new(model);
        AppState {
            config: Arc::new(config),
            augmenter: Arc::new(ContextAugmenter::new(
                Arc::new(EmptyIndex),
                model.clone(),
                Arc::new(NoSearch),
                Arc::new(NoFetch),
                AugmenterOptions::default(),
            )),
            answers: Arc::new(AnswerService::new(model.clone(), Prompts::default())),
            summarizer: Arc::new(Summarizer::new(model)),
            metrics: None,
        }
    }

    fn app(model: MockLanguageModel) -> Router {
        create_router(state_with(model, AppConfig::default())).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_liveness() {
        let response = app(MockLanguageModel::new(""))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Server is running");
    }

    #[tokio::test]
    async fn test_query_streams_answer() {
        let model = MockLanguageModel::new("yes").with_chunks(["Drexel ", "", "Dragons"]);
        let response = app(model)
            .oneshot(post_json(
                "/query",
                json!({
                    "query": "What is the mascot?",
                    "priorConversation": [{"isUser": true, "text": "hi"}]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_text(response).await, "Drexel Dragons");
    }

    #[tokio::test]
    async fn test_missing_query_is_400() {
        for body in [json!({}), json!({"query": "   "})] {
            let response = app(MockLanguageModel::new(""))
                .oneshot(post_json("/query", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(body["detail"], "Query is required");
        }
    }

    #[tokio::test]
    async fn test_turn_without_is_user_is_accepted() {
        let body = json!({
            "query": "Where is the library?",
            "priorConversation": [{"text": "Hi there"}, {"isUser": true, "text": "Hello"}]
        });
        let response = app(MockLanguageModel::new("yes").with_chunks(["Hagerty"]))
            .oneshot(post_json("/query", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hagerty");
    }

    #[tokio::test]
    async fn test_oversized_query_is_400() {
        let response = app(MockLanguageModel::new(""))
            .oneshot(post_json("/query", json!({"query": "a".repeat(4001)})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(body["detail"].as_str().unwrap().contains("query"));
    }

    #[tokio::test]
    async fn test_stream_setup_failure_is_500_with_answer() {
        let response = app(MockLanguageModel::failing())
            .oneshot(post_json("/query", json!({"query": "When is move-in?"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(body["answer"].as_str().unwrap().contains("mock failure"));
    }

    #[tokio::test]
    async fn test_summarize_convo() {
        let response = app(MockLanguageModel::new(" Housing Deadlines "))
            .oneshot(post_json(
                "/summarize-convo",
                json!({"message": "When do I have to apply for housing?"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["messageSummary"], "Housing Deadlines");
    }

    #[tokio::test]
    async fn test_summarize_without_message_is_400() {
        let response = app(MockLanguageModel::new("x"))
            .oneshot(post_json("/summarize-convo", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = create_router(state_with(MockLanguageModel::new("x"), config)).unwrap();

        let first = app
            .clone()
            .oneshot(post_json("/summarize-convo", json!({"message": "a"})))
            .await
            .unwrap();
        let second = app
            .oneshot(post_json("/summarize-convo", json!({"message": "b"})))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_metrics_disabled_is_404() {
        let response = app(MockLanguageModel::new(""))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
