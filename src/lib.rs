//! 追踪上下文编解码与采样决策
//!
//! 负责旧版 X-Trace 标识与 W3C `traceparent`/`tracestate` 的解析、校验与互转，
//! 并为每个工作单元决定是否采样、是否传播。
//! 核心功能与Web框架无关，并为Axum提供了开箱即用的中间件支持。
//!
//! ## Usage
//!
//! ### 基础用法：解析和转换标识
//! ```
//! use xtrace::{convert, XTrace};
//!
//! let value = "2B7435A9FE510AE4533414D425DADF4E180D2B4E3649E60702469DB05F01";
//! let xtrace = XTrace::parse(value).unwrap();
//! assert!(xtrace.is_valid());
//! assert!(xtrace.is_sampled());
//!
//! let w3c = convert::legacy_to_w3c(&xtrace, None).unwrap();
//! let (traceparent, tracestate) = w3c.serialize().unwrap();
//! assert_eq!(traceparent, "00-7435a9fe510ae4533414d425dadf4e18-49e60702469db05f-01");
//! assert_eq!(tracestate.as_deref(), Some("sw=49e60702469db05f01"));
//! ```
//!
//! ### 采样决策
//! ```
//! use std::collections::HashMap;
//! use xtrace::{OracleArgs, OracleResponse, SamplingEngine, TracingSettings};
//!
//! // 采样器通常由外部提供，这里用闭包代替
//! let engine = SamplingEngine::new(|_: &OracleArgs| OracleResponse {
//!     sample: 1,
//!     metrics: 1,
//!     ..OracleResponse::default()
//! });
//!
//! let settings = TracingSettings::default();
//! let headers: HashMap<String, String> = HashMap::new();
//! let decision = engine.evaluate(&settings, Some("/users"), &headers, None);
//! assert!(decision.do_sample());
//!
//! // 静态资源不会询问采样器
//! let decision = engine.evaluate(&settings, Some("/app.css"), &headers, None);
//! assert!(!decision.do_propagate());
//! ```
//!
//! ### Axum 集成（需要启用 axum feature）
//! ```ignore
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use xtrace::{
//!     CurrentContext, OracleArgs, OracleResponse, SamplingEngine, SettingsStore,
//!     TraceContextLayer,
//! };
//!
//! async fn handler(CurrentContext(xtrace): CurrentContext) -> String {
//!     xtrace.map(|x| x.to_string()).unwrap_or_default()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = SamplingEngine::new(|_: &OracleArgs| OracleResponse::default());
//!     let store = Arc::new(SettingsStore::default());
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(TraceContextLayer::new(engine, store));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod propagation;
pub mod sampling;
mod trace_id;
pub mod url_filter;
pub mod w3c;
pub mod xtrace;

pub use config::{SettingsStore, TracingConfig, TracingMode, TracingSettings};
pub use context::{continue_service_context, current_context, is_tracing, with_context};
pub use error::RuleError;
pub use propagation::{
    entry_context, inject_outgoing, parse_incoming, serialize_outgoing, Extractor, IncomingContext,
    Injector, OutgoingHeaders,
};
pub use sampling::{
    DecisionPath, DecisionType, OracleArgs, OracleResponse, SamplingDecision, SamplingEngine,
    SamplingOracle, TriggerArgs, TriggerOptions,
};
pub use trace_id::{ParentId, TraceId};
pub use url_filter::{RegexOptions, UrlFilters, UrlRule};
pub use w3c::{TraceParent, TraceState, W3CContext};
pub use xtrace::{EdgeId, TaskId, XTrace};

/// 旧版追踪标识头
pub const X_TRACE_HEADER: &str = "x-trace";
/// W3C traceparent 头
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// W3C tracestate 头
pub const TRACESTATE_HEADER: &str = "tracestate";
/// 触发式追踪选项头
pub const X_TRACE_OPTIONS_HEADER: &str = "x-trace-options";
/// 触发式追踪选项签名头
pub const X_TRACE_OPTIONS_SIGNATURE_HEADER: &str = "x-trace-options-signature";

// -- axum feature --
#[cfg(feature = "axum")]
mod integrations;
#[cfg(feature = "axum")]
pub use integrations::axum::{
    CurrentContext, TraceContextConfig, TraceContextLayer, TraceContextService,
};
