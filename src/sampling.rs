//! 采样决策引擎
//!
//! 每个工作单元经历一次状态转换：
//!
//! ```text
//! START -> LOCAL_CONTINUE | ASSET_SKIP | EVALUATE -> DECIDED
//! ```
//!
//! - `LOCAL_CONTINUE`：已处于有效的本地上下文中，沿用当前采样状态，不查询采样器
//! - `ASSET_SKIP`：命中不追踪规则，既不采样也不传播
//! - `EVALUATE`：结合全局模式与 URL 过滤计算追踪模式，交给外部采样器决定
//!
//! 采样器失败只会降级采样，不会中断请求，也不会自动重试。

use std::fmt;
use std::sync::Arc;

use crate::config::TracingSettings;
use crate::context;
use crate::propagation::{parse_incoming, Extractor, IncomingContext};
use crate::xtrace::XTrace;
use crate::{X_TRACE_OPTIONS_HEADER, X_TRACE_OPTIONS_SIGNATURE_HEADER};

/// 传给采样器的追踪模式：启用
pub const TRACING_MODE_ENABLED: i32 = 1;
/// 传给采样器的追踪模式：禁用
pub const TRACING_MODE_DISABLED: i32 = 0;
/// 传给采样器的追踪模式：未设置
pub const TRACING_MODE_UNSET: i32 = -1;
/// 未设置的数值参数
pub const SETTINGS_UNSET: i32 = -1;
/// 采样器返回的成功状态
pub const DECISIONS_OK: i32 = 0;
/// 触发式追踪的决策类型
pub const DECISION_TYPE_TRIGGER: i32 = 1;

const TRIGGER_TRACE_KEY: &str = "trigger-trace";
const TIMESTAMP_KEY: &str = "ts";

/// 调用方提供的触发式追踪选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerOptions {
    /// 选项中是否带有 `trigger-trace`
    pub trigger_trace: bool,
    /// 原始选项串
    pub options: Option<String>,
    /// 选项串的签名
    pub signature: Option<String>,
    /// 选项中的 `ts`（秒）
    pub timestamp: Option<i64>,
}

impl TriggerOptions {
    /// 解析 `x-trace-options` 与签名
    ///
    /// 两者都缺失时返回 `None`。选项串按 `;` 切分，识别 `trigger-trace` 与 `ts=`，
    /// 其余键原样留在选项串中交给采样器。
    pub fn parse(options: Option<&str>, signature: Option<&str>) -> Option<Self> {
        if options.is_none() && signature.is_none() {
            return None;
        }

        let mut trigger_trace = false;
        let mut timestamp = None;
        for item in options.unwrap_or_default().split(';').map(str::trim) {
            match item.split_once('=') {
                Some((key, value)) if key.trim() == TIMESTAMP_KEY => {
                    timestamp = value.trim().parse().ok();
                }
                None if item == TRIGGER_TRACE_KEY => trigger_trace = true,
                _ => {}
            }
        }

        Some(Self {
            trigger_trace,
            options: options.map(str::to_owned),
            signature: signature.map(str::to_owned),
            timestamp,
        })
    }

    /// 从请求头读取
    pub fn from_headers(headers: &dyn Extractor) -> Option<Self> {
        Self::parse(
            headers.get(X_TRACE_OPTIONS_HEADER),
            headers.get(X_TRACE_OPTIONS_SIGNATURE_HEADER),
        )
    }

    fn is_present(&self) -> bool {
        self.options.is_some() || self.signature.is_some()
    }
}

/// 触发式追踪相关的采样器参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerArgs {
    /// 1 表示请求触发式追踪
    pub trigger_trace: i32,
    /// 触发式追踪模式：1 启用，0 禁用
    pub trigger_mode: i32,
    pub options: Option<String>,
    pub signature: Option<String>,
    pub timestamp: i64,
}

/// 采样器调用参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleArgs {
    /// 入站标识（X-Trace 形式）
    pub tracestring: Option<String>,
    /// 入站 tracestate 中的 `sw` 成员
    pub sw_member_value: Option<String>,
    pub tracing_mode: i32,
    pub sample_rate: i32,
    /// 仅当调用方提供了选项或签名时存在
    pub trigger: Option<TriggerArgs>,
}

/// 采样器返回的决策元组
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleResponse {
    pub metrics: i32,
    pub sample: i32,
    pub rate: i32,
    pub source: i32,
    pub bucket_rate: f64,
    pub bucket_cap: f64,
    pub decision_type: i32,
    pub auth: i32,
    pub status_message: String,
    pub auth_message: String,
    pub status: i32,
}

/// 外部采样器
///
/// 不透明的同步调用，内部可能做令牌桶限流等处理。实现必须快速返回且不阻塞。
pub trait SamplingOracle: Send + Sync {
    fn decide(&self, args: &OracleArgs) -> OracleResponse;
}

impl<F> SamplingOracle for F
where
    F: Fn(&OracleArgs) -> OracleResponse + Send + Sync,
{
    fn decide(&self, args: &OracleArgs) -> OracleResponse {
        self(args)
    }
}

/// 决策类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecisionType {
    #[default]
    Normal,
    Trigger,
}

impl From<i32> for DecisionType {
    fn from(value: i32) -> Self {
        if value == DECISION_TYPE_TRIGGER {
            Self::Trigger
        } else {
            Self::Normal
        }
    }
}

/// 决策经过的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPath {
    /// 沿用已有的本地上下文
    LocalContinue,
    /// 命中不追踪规则
    AssetSkip,
    /// 由采样器决定
    Evaluated,
}

/// 单个工作单元的采样决策
///
/// 计算完成后不可变。
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingDecision {
    do_sample: bool,
    do_metrics: bool,
    do_propagate: bool,
    rate: Option<i32>,
    source: Option<i32>,
    bucket_rate: Option<f64>,
    bucket_cap: Option<f64>,
    decision_type: DecisionType,
    auth_status: Option<i32>,
    auth_message: Option<String>,
    status_code: Option<i32>,
    status_message: Option<String>,
    tracestring: Option<String>,
    sw_member_value: Option<String>,
    local_context: Option<XTrace>,
    path: DecisionPath,
}

impl SamplingDecision {
    fn without_oracle(
        path: DecisionPath,
        local_context: Option<XTrace>,
        incoming: &IncomingContext,
    ) -> Self {
        Self {
            do_sample: local_context.is_some_and(|xtrace| xtrace.is_sampled()),
            do_metrics: false,
            do_propagate: path == DecisionPath::LocalContinue,
            rate: None,
            source: None,
            bucket_rate: None,
            bucket_cap: None,
            decision_type: DecisionType::Normal,
            auth_status: None,
            auth_message: None,
            status_code: None,
            status_message: None,
            tracestring: incoming.tracestring(),
            sw_member_value: incoming.sw_member_value().map(str::to_owned),
            local_context,
            path,
        }
    }

    fn from_response(response: OracleResponse, args: OracleArgs) -> Self {
        Self {
            do_sample: response.sample > 0,
            do_metrics: response.metrics > 0,
            do_propagate: true,
            rate: Some(response.rate),
            source: Some(response.source),
            bucket_rate: Some(response.bucket_rate),
            bucket_cap: Some(response.bucket_cap),
            decision_type: DecisionType::from(response.decision_type),
            auth_status: Some(response.auth),
            auth_message: Some(response.auth_message),
            status_code: Some(response.status),
            status_message: Some(response.status_message),
            tracestring: args.tracestring,
            sw_member_value: args.sw_member_value,
            local_context: None,
            path: DecisionPath::Evaluated,
        }
    }

    pub fn do_sample(&self) -> bool {
        self.do_sample
    }

    pub fn do_metrics(&self) -> bool {
        self.do_metrics
    }

    pub fn do_propagate(&self) -> bool {
        self.do_propagate
    }

    pub fn rate(&self) -> Option<i32> {
        self.rate
    }

    pub fn source(&self) -> Option<i32> {
        self.source
    }

    pub fn bucket_rate(&self) -> Option<f64> {
        self.bucket_rate
    }

    pub fn bucket_cap(&self) -> Option<f64> {
        self.bucket_cap
    }

    pub fn decision_type(&self) -> DecisionType {
        self.decision_type
    }

    pub fn auth_status(&self) -> Option<i32> {
        self.auth_status
    }

    pub fn auth_message(&self) -> Option<&str> {
        self.auth_message.as_deref()
    }

    pub fn status_code(&self) -> Option<i32> {
        self.status_code
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// 入站标识
    pub fn tracestring(&self) -> Option<&str> {
        self.tracestring.as_deref()
    }

    pub fn sw_member_value(&self) -> Option<&str> {
        self.sw_member_value.as_deref()
    }

    pub fn path(&self) -> DecisionPath {
        self.path
    }

    /// 沿用的本地上下文，仅在 [`DecisionPath::LocalContinue`] 时存在
    pub fn local_context(&self) -> Option<XTrace> {
        self.local_context
    }

    /// 是否为触发式追踪
    pub fn triggered_trace(&self) -> bool {
        self.decision_type == DecisionType::Trigger
    }

    /// 鉴权是否通过；未经过采样器时视为通过
    pub fn auth_ok(&self) -> bool {
        self.auth_status.map_or(true, |auth| auth < 1)
    }

    /// 入口事件上附加的采样信息
    pub fn sample_kvs(&self) -> Vec<(&'static str, i32)> {
        [("SampleRate", self.rate), ("SampleSource", self.source)]
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }
}

impl fmt::Display for SamplingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "do_propagate: {}, do_sample: {}, do_metrics: {} rate: {}, source: {}",
            self.do_propagate,
            self.do_sample,
            self.do_metrics,
            self.rate.unwrap_or(SETTINGS_UNSET),
            self.source.unwrap_or(SETTINGS_UNSET)
        )
    }
}

/// 采样决策引擎
///
/// 配置以快照形式显式传入，引擎本身不持有可变状态，可在线程间自由克隆共享。
#[derive(Clone)]
pub struct SamplingEngine {
    oracle: Arc<dyn SamplingOracle>,
}

impl SamplingEngine {
    pub fn new<O>(oracle: O) -> Self
    where
        O: SamplingOracle + 'static,
    {
        Self {
            oracle: Arc::new(oracle),
        }
    }

    pub fn from_arc(oracle: Arc<dyn SamplingOracle>) -> Self {
        Self { oracle }
    }

    /// 对一个工作单元做出决策
    ///
    /// 本地上下文取自当前 task-local 作用域。
    ///
    /// # 参数
    /// * `settings` - 配置快照
    /// * `url` - 请求路径，用于资源与 URL 过滤
    /// * `headers` - 入站头部
    /// * `trigger` - 触发式追踪选项
    pub fn evaluate(
        &self,
        settings: &TracingSettings,
        url: Option<&str>,
        headers: &dyn Extractor,
        trigger: Option<&TriggerOptions>,
    ) -> SamplingDecision {
        let incoming = parse_incoming(headers);
        self.evaluate_incoming(settings, context::current_context(), url, &incoming, trigger)
    }

    /// 使用显式给定的本地上下文与已解析的入站上下文做出决策
    pub fn evaluate_incoming(
        &self,
        settings: &TracingSettings,
        local: Option<XTrace>,
        url: Option<&str>,
        incoming: &IncomingContext,
        trigger: Option<&TriggerOptions>,
    ) -> SamplingDecision {
        if let Some(local) = local.filter(XTrace::is_valid) {
            return SamplingDecision::without_oracle(
                DecisionPath::LocalContinue,
                Some(local),
                incoming,
            );
        }

        if let Some(url) = url.filter(|url| settings.is_asset(url)) {
            tracing::debug!(url, "skipping tracing for asset");
            return SamplingDecision::without_oracle(DecisionPath::AssetSkip, None, incoming);
        }

        let args = oracle_args(settings, url, incoming, trigger);
        let response = self.oracle.decide(&args);

        if response.status > DECISIONS_OK {
            tracing::warn!(
                status = response.status,
                status_message = %response.status_message,
                "problem getting the sampling decisions"
            );
        }

        SamplingDecision::from_response(response, args)
    }
}

impl fmt::Debug for SamplingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingEngine").finish_non_exhaustive()
    }
}

/// 计算追踪模式
///
/// 全局禁用且未命中 `enabled` 组，或命中 `disabled` 组时为禁用。没有 URL 时不命中任何一组。
pub fn tracing_mode_for(settings: &TracingSettings, url: Option<&str>) -> i32 {
    let filters = &settings.url_filters;
    let enabled = url.is_some_and(|url| filters.is_enabled(url));
    let disabled = url.is_some_and(|url| filters.is_disabled(url));
    if (settings.tracing_mode_disabled() && !enabled) || disabled {
        TRACING_MODE_DISABLED
    } else {
        TRACING_MODE_ENABLED
    }
}

fn oracle_args(
    settings: &TracingSettings,
    url: Option<&str>,
    incoming: &IncomingContext,
    trigger: Option<&TriggerOptions>,
) -> OracleArgs {
    let trigger = trigger.filter(|options| options.is_present()).map(|options| TriggerArgs {
        trigger_trace: i32::from(options.trigger_trace),
        trigger_mode: if settings.trigger_tracing_disabled() { 0 } else { 1 },
        options: options.options.clone(),
        signature: options.signature.clone(),
        timestamp: options.timestamp.unwrap_or(i64::from(SETTINGS_UNSET)),
    });

    OracleArgs {
        tracestring: incoming.tracestring(),
        sw_member_value: incoming.sw_member_value().map(str::to_owned),
        tracing_mode: tracing_mode_for(settings, url),
        sample_rate: settings
            .sample_rate
            .and_then(|rate| i32::try_from(rate).ok())
            .unwrap_or(SETTINGS_UNSET),
        trigger,
    }
}
