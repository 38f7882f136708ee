//! Axum框架的追踪上下文中间件

use crate::{
    config::SettingsStore,
    context,
    propagation::{self, Extractor, Injector},
    sampling::{SamplingDecision, SamplingEngine, TriggerOptions},
    xtrace::XTrace,
    X_TRACE_HEADER,
};
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use std::{
    convert::Infallible,
    future::Future,
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::Instrument;

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|value| value.to_str().ok())
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                self.insert(name, value);
            }
            _ => tracing::debug!(key, "skipping header that is not a valid http header"),
        }
    }
}

/// 追踪上下文中间件配置选项
#[derive(Clone, Debug)]
pub struct TraceContextConfig {
    /// 是否启用 tracing span（默认启用）
    pub enable_span: bool,
    /// 是否在响应头中返回 `x-trace`（默认启用）
    pub enable_response_header: bool,
}

impl Default for TraceContextConfig {
    fn default() -> Self {
        Self {
            enable_span: true,
            enable_response_header: true,
        }
    }
}

/// 追踪上下文中间件层
///
/// 每个请求：解析入站头部，基于当前配置快照做出采样决策，
/// 在 task-local 作用域中执行后续处理，并把决策放入请求扩展。
#[derive(Clone)]
pub struct TraceContextLayer {
    engine: SamplingEngine,
    settings: Arc<SettingsStore>,
    config: TraceContextConfig,
}

impl TraceContextLayer {
    /// 使用默认配置创建中间件层
    pub fn new(engine: SamplingEngine, settings: Arc<SettingsStore>) -> Self {
        Self::with_config(engine, settings, TraceContextConfig::default())
    }

    /// 创建高性能模式的中间件层
    ///
    /// 禁用 tracing span 以获得最佳性能
    pub fn new_high_performance(engine: SamplingEngine, settings: Arc<SettingsStore>) -> Self {
        let config = TraceContextConfig {
            enable_span: false,
            enable_response_header: true,
        };
        Self::with_config(engine, settings, config)
    }

    /// 使用自定义配置创建中间件层
    pub fn with_config(
        engine: SamplingEngine,
        settings: Arc<SettingsStore>,
        config: TraceContextConfig,
    ) -> Self {
        Self {
            engine,
            settings,
            config,
        }
    }
}

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextService {
            inner,
            engine: self.engine.clone(),
            settings: Arc::clone(&self.settings),
            config: self.config.clone(),
        }
    }
}

/// 追踪上下文服务
#[derive(Clone)]
pub struct TraceContextService<S> {
    inner: S,
    engine: SamplingEngine,
    settings: Arc<SettingsStore>,
    config: TraceContextConfig,
}

impl<S> Service<Request> for TraceContextService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let settings = self.settings.snapshot();
        let incoming = propagation::parse_incoming(req.headers());
        let trigger = TriggerOptions::from_headers(req.headers());

        let decision = self.engine.evaluate_incoming(
            &settings,
            context::current_context(),
            Some(req.uri().path()),
            &incoming,
            trigger.as_ref(),
        );
        let xtrace = propagation::entry_context(incoming.xtrace, &decision);

        // 提取请求信息用于span（在req被移动之前）
        let method = req.method().clone();
        let uri = req.uri().clone();
        let sampled = decision.do_sample();

        req.extensions_mut().insert(decision);

        let future = self.inner.call(req);
        let enable_response_header = self.config.enable_response_header;

        if self.config.enable_span {
            let span = tracing::info_span!(
                "request",
                x_trace = %xtrace.map(|x| x.to_string()).unwrap_or_default(),
                method = %method,
                uri = %uri,
                sampled
            );
            Box::pin(run_in_context(xtrace, future, enable_response_header).instrument(span))
        } else {
            // 高性能模式：跳过 span 创建
            Box::pin(run_in_context(xtrace, future, enable_response_header))
        }
    }
}

/// 在追踪上下文中等待内部服务，并按需写回响应头
///
/// 响应头取处理结束时的上下文，下游调用可能已经延续了它。
async fn run_in_context<F, E>(
    xtrace: Option<XTrace>,
    future: F,
    enable_response_header: bool,
) -> Result<Response, E>
where
    F: Future<Output = Result<Response, E>>,
{
    let Some(xtrace) = xtrace else {
        return future.await;
    };

    context::with_context(xtrace, async move {
        let mut response = future.await?;

        if enable_response_header {
            let current = context::current_context().unwrap_or(xtrace);
            if let Ok(header_value) = HeaderValue::from_str(&current.to_string()) {
                response.headers_mut().insert(X_TRACE_HEADER, header_value);
            }
        }

        Ok(response)
    })
    .await
}

// -- Extractors --

/// Axum 提取器，获取当前请求的追踪上下文
///
/// 请求未被追踪（例如静态资源）时为 `None`。
///
/// # 示例
/// ```no_run
/// use axum::{routing::get, Router};
/// use xtrace::CurrentContext;
///
/// async fn my_handler(CurrentContext(xtrace): CurrentContext) -> String {
///     tracing::info!(x_trace = ?xtrace, "Handler started");
///     xtrace.map(|x| x.to_string()).unwrap_or_default()
/// }
///
/// let app: Router = Router::new().route("/", get(my_handler));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentContext(pub Option<XTrace>);

impl<S> FromRequestParts<S> for CurrentContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(context::current_context()))
    }
}

/// 从请求扩展中获取中间件做出的采样决策
///
/// 未挂载 [`TraceContextLayer`] 时拒绝请求。
impl<S> FromRequestParts<S> for SamplingDecision
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<SamplingDecision>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "sampling decision missing, is TraceContextLayer installed?",
        ))
    }
}
