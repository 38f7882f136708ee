//! Example: serving requests behind the trace context middleware
//!
//! Every request gets a sampling decision and, unless it is a static asset, an `x-trace`
//! response header. Run with `RUST_LOG=debug` to see the request spans and decision logs.

use std::sync::Arc;

use axum::{routing::get, Router};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xtrace::{
    CurrentContext, OracleArgs, OracleResponse, SamplingDecision, SamplingEngine, SettingsStore,
    TraceContextLayer, TracingConfig, TracingMode, UrlRule,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // A stand-in oracle: samples everything except trigger requests without a signature
    let engine = SamplingEngine::new(|args: &OracleArgs| {
        let rejected = args
            .trigger
            .as_ref()
            .is_some_and(|t| t.trigger_trace == 1 && t.signature.is_none());
        OracleResponse {
            sample: i32::from(args.tracing_mode == 1 && !rejected),
            metrics: 1,
            rate: args.sample_rate,
            source: 6,
            ..OracleResponse::default()
        }
    });

    // Never trace health checks
    let store = Arc::new(SettingsStore::from_config(TracingConfig {
        transaction_settings: vec![
            UrlRule::regexp("^/health$").with_tracing(TracingMode::Disabled),
        ],
        ..TracingConfig::default()
    }));

    let app = Router::new()
        .route("/", get(handler))
        .route("/health", get(health))
        .route("/decision", get(decision))
        .layer(TraceContextLayer::new(engine, store));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();

    tracing::info!("Starting server on 0.0.0.0:3000");
    axum::serve(listener, app).await.unwrap();
}

async fn handler(CurrentContext(xtrace): CurrentContext) -> String {
    tracing::info!("Handling request");
    match xtrace {
        Some(xtrace) => format!("Hello! Your x-trace is: {xtrace}"),
        None => "Hello! This request is not traced".to_owned(),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn decision(decision: SamplingDecision) -> String {
    tracing::debug!(kvs = ?decision.sample_kvs(), "sampling decision");
    decision.to_string()
}
