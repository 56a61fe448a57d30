use std::sync::Arc;
use term_bloom_rs::api::create_router;
use term_bloom_rs::common::bytes2hr;
use term_bloom_rs::types::AppState;
#[cfg(feature = "redb")]
use term_bloom_rs::RedbArchive;
use term_bloom_rs::{FilterGeometry, ServerConfig, Store};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn build_store(config: &ServerConfig) -> term_bloom_rs::Result<Store> {
    let store_config = config.store_config();
    match &config.bloom_archive_path {
        #[cfg(feature = "redb")]
        Some(path) => {
            let archive = Arc::new(RedbArchive::open(path)?);
            Store::with_archive(store_config, archive)
        }
        #[cfg(not(feature = "redb"))]
        Some(_) => Err(term_bloom_rs::FilterError::InvalidConfig(
            "BLOOM_ARCHIVE_PATH requires the redb feature".into(),
        )),
        None => Store::new(store_config),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // load configuration from environment variables
    let config = ServerConfig::from_env()?;
    let geometry = FilterGeometry::from_config(&config.filter_config())?;
    let store = build_store(&config)?;

    let state = Arc::new(AppState {
        store,
        snapshot_path: config.bloom_snapshot_path.clone().map(Into::into),
    });

    // Create router with logging middleware
    let app = create_router(state).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    tracing::info!(
                        status = %response.status(),
                        latency = ?latency,
                        "response generated"
                    );
                },
            ),
    );

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let term_bytes = geometry.term_bytes();
    info!(
        r#"
    Term-windowed Bloom filter server

    Filter:
       • Capacity per term: {:>12} keys
       • False positive rate: {:>9.6}%
       • Retention: {:>18} terms
       • Bits per term: {:>14}
       • Hash functions: {:>13}
       • Memory: {:>21}
       • Term archive: {:>15}

    Endpoints:
       • GET    /keys/{{key}}         - Check key (local read)
       • POST   /keys/{{key}}?term=N  - Record key
       • GET    /terms              - Term window
       • GET    /stats              - Filter statistics
       • POST   /snapshot           - Compact log
       • Swagger UI:  http://{}/swagger-ui/
    "#,
        geometry.capacity,
        geometry.false_positive_rate * 100.0,
        config.bloom_retention,
        geometry.m,
        geometry.k,
        bytes2hr(term_bytes * config.bloom_retention as usize),
        config.bloom_archive_path.as_deref().unwrap_or("none"),
        addr,
    );

    info!("Starting server on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
