//! 面向适配层的传播接口
//!
//! 适配层只需提供头部的读写能力（[`Extractor`] / [`Injector`]），
//! 入站解析、出站序列化与入口上下文的推导都集中在这里。

use std::collections::HashMap;

use crate::convert;
use crate::sampling::SamplingDecision;
use crate::w3c::{TraceState, W3CContext};
use crate::xtrace::XTrace;
use crate::{TRACEPARENT_HEADER, TRACESTATE_HEADER, X_TRACE_HEADER};

/// 从载体中读取头部
pub trait Extractor {
    /// 读取头部值，键不区分大小写
    fn get(&self, key: &str) -> Option<&str>;
}

/// 向载体写入头部
pub trait Injector {
    fn set(&mut self, key: &str, value: String);
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, &key.to_lowercase()).map(String::as_str)
    }
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

/// 入站头部解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingContext {
    /// 入站标识（已转换为 X-Trace 形式，仅通过弱校验）
    pub xtrace: Option<XTrace>,
    /// 入站 W3C 头部；无效时 `traceparent` 为空
    pub w3c: W3CContext,
}

impl IncomingContext {
    /// 传给采样器的标识字符串
    pub fn tracestring(&self) -> Option<String> {
        self.xtrace.map(|xtrace| xtrace.to_string())
    }

    /// 入站 tracestate 中的 `sw` 成员
    pub fn sw_member_value(&self) -> Option<&str> {
        self.w3c.tracestate.sw_member_value()
    }

    /// 入站标识是否通过强校验
    pub fn is_valid(&self) -> bool {
        self.xtrace.is_some_and(|xtrace| xtrace.is_valid())
    }
}

/// 解析入站头部
///
/// 优先使用合法的 `traceparent`；否则退回旧版 `x-trace` 头。畸形头部一律视为缺失。
pub fn parse_incoming(headers: &dyn Extractor) -> IncomingContext {
    let w3c = W3CContext::parse(headers.get(TRACEPARENT_HEADER), headers.get(TRACESTATE_HEADER));

    let xtrace = match &w3c.traceparent {
        Some(traceparent) => Some(convert::w3c_to_legacy(traceparent, None)),
        None => headers.get(X_TRACE_HEADER).and_then(|value| {
            let parsed = XTrace::parse(value.trim());
            if parsed.is_none() {
                tracing::debug!(x_trace = value, "ignoring malformed x-trace header");
            }
            parsed
        }),
    };

    IncomingContext { xtrace, w3c }
}

/// 出站头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingHeaders {
    /// task id 前 16 字节全零时没有 W3C 形式，此时与 `tracestate` 一同省略
    pub traceparent: Option<String>,
    /// 为空时省略该头部
    pub tracestate: Option<String>,
    /// 旧版 `x-trace` 头
    pub x_trace: String,
}

impl OutgoingHeaders {
    /// 写入载体
    pub fn inject(&self, injector: &mut dyn Injector) {
        if let Some(traceparent) = &self.traceparent {
            injector.set(TRACEPARENT_HEADER, traceparent.clone());
        }
        if let Some(tracestate) = &self.tracestate {
            injector.set(TRACESTATE_HEADER, tracestate.clone());
        }
        injector.set(X_TRACE_HEADER, self.x_trace.clone());
    }
}

/// 由当前上下文生成出站头部
///
/// # 参数
/// * `xtrace` - 当前上下文
/// * `tracestate` - 入站 tracestate，其他厂商的成员会原样保留
///
/// # 返回
/// 上下文无效时返回 `None`，调用方不应传播
pub fn serialize_outgoing(
    xtrace: &XTrace,
    tracestate: Option<&TraceState>,
) -> Option<OutgoingHeaders> {
    if !xtrace.is_valid() {
        return None;
    }
    let w3c = convert::legacy_to_w3c(xtrace, tracestate).and_then(|w3c| w3c.serialize());
    if w3c.is_none() {
        tracing::debug!(x_trace = %xtrace, "no W3C form for context, sending x-trace only");
    }
    let (traceparent, tracestate) = match w3c {
        Some((traceparent, tracestate)) => (Some(traceparent), tracestate),
        None => (None, None),
    };
    Some(OutgoingHeaders {
        traceparent,
        tracestate,
        x_trace: xtrace.to_string(),
    })
}

/// 为出站调用注入头部
///
/// 有有效的本地上下文时以它为准；否则若入站带有合法的 W3C 头部，原样透传。
///
/// # 返回
/// 是否写入了任何头部
pub fn inject_outgoing(
    current: Option<XTrace>,
    incoming: &IncomingContext,
    injector: &mut dyn Injector,
) -> bool {
    let outgoing = current
        .and_then(|xtrace| serialize_outgoing(&xtrace, Some(&incoming.w3c.tracestate)));
    if let Some(headers) = outgoing {
        headers.inject(injector);
        return true;
    }

    match incoming.w3c.serialize() {
        Some((traceparent, tracestate)) => {
            injector.set(TRACEPARENT_HEADER, traceparent);
            if let Some(tracestate) = tracestate {
                injector.set(TRACESTATE_HEADER, tracestate);
            }
            true
        }
        None => false,
    }
}

/// 推导工作单元的入口上下文
///
/// - 不传播时返回 `None`
/// - 决策沿用了本地上下文时原样返回它
/// - 入站标识有效时沿用其 task id，并为本跳分配新的 edge id
/// - 否则开启一条新链路
///
/// 后两种情况的采样位取自决策结果。
pub fn entry_context(incoming: Option<XTrace>, decision: &SamplingDecision) -> Option<XTrace> {
    if !decision.do_propagate() {
        return None;
    }
    if let Some(local) = decision.local_context() {
        return Some(local);
    }
    let xtrace = match incoming.filter(XTrace::is_valid) {
        Some(xtrace) => xtrace.with_random_edge_id(),
        None => XTrace::generate(decision.do_sample()),
    };
    Some(xtrace.with_sampled_flag(decision.do_sample()))
}
