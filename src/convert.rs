//! X-Trace 与 W3C 表示之间的转换
//!
//! 映射规则（固定不变，下游系统依赖这些字节）：
//! - W3C trace-id = task id 的**前 16 字节**
//! - W3C → X-Trace 时在 trace-id 之后补 4 个零字节；若已知先前的 task id 且前 16 字节一致，
//!   则沿用原 task id，避免漂移
//! - edge id 与 parent-id 直接对应
//! - flags 字节整体复制，采样位随之保持

use crate::trace_id::{ParentId, TraceId};
use crate::w3c::{TraceParent, TraceState, W3CContext};
use crate::xtrace::{EdgeId, TaskId, XTrace};

const W3C_TRACE_ID_BYTES: usize = 16;

/// task id -> W3C trace-id
pub fn task_id_to_trace_id(task_id: &TaskId) -> TraceId {
    let mut bytes = [0u8; W3C_TRACE_ID_BYTES];
    bytes.copy_from_slice(&task_id.as_bytes()[..W3C_TRACE_ID_BYTES]);
    TraceId::from_bytes(bytes)
}

/// W3C trace-id -> task id（尾部补零）
pub fn trace_id_to_task_id(trace_id: &TraceId) -> TaskId {
    let mut bytes = [0u8; 20];
    bytes[..W3C_TRACE_ID_BYTES].copy_from_slice(trace_id.as_bytes());
    TaskId::from_bytes(bytes)
}

/// `sw` 成员值：edge id 与 flags 的小写十六进制
pub fn sw_member_value(xtrace: &XTrace) -> Option<String> {
    let edge_id = xtrace.edge_id()?;
    Some(format!(
        "{}{:02x}",
        hex::encode(edge_id.as_bytes()),
        xtrace.flags()
    ))
}

/// X-Trace -> `traceparent`
///
/// 强校验失败的标识没有可用的 edge id，也无法构造合法的 trace-id，此时返回 `None`。
pub fn legacy_to_traceparent(xtrace: &XTrace) -> Option<TraceParent> {
    let edge_id = xtrace.edge_id()?;
    let trace_id = task_id_to_trace_id(&xtrace.task_id());
    let parent_id = ParentId::from_bytes(*edge_id.as_bytes());
    if trace_id.is_zero() || parent_id.is_zero() {
        return None;
    }
    Some(TraceParent::new(trace_id, parent_id, xtrace.flags()))
}

/// X-Trace -> W3C 上下文
///
/// 以 `tracestate` 为基础写入 `sw` 成员，其他厂商的成员顺序不变。
pub fn legacy_to_w3c(xtrace: &XTrace, tracestate: Option<&TraceState>) -> Option<W3CContext> {
    let traceparent = legacy_to_traceparent(xtrace)?;
    let sw_value = sw_member_value(xtrace)?;
    let tracestate = tracestate.cloned().unwrap_or_default().with_sw_member(sw_value);
    Some(W3CContext::new(traceparent, tracestate))
}

/// `traceparent` -> X-Trace
///
/// # 参数
/// * `traceparent` - 已解析的 traceparent
/// * `prior_task_id` - 本进程已知的原始 task id（链路以旧格式开始时）
pub fn w3c_to_legacy(traceparent: &TraceParent, prior_task_id: Option<&TaskId>) -> XTrace {
    let task_id = match prior_task_id {
        Some(prior) if task_id_to_trace_id(prior) == traceparent.trace_id => *prior,
        Some(_) => {
            tracing::debug!(
                trace_id = %traceparent.trace_id,
                "prior task id belongs to another trace, zero-extending"
            );
            trace_id_to_task_id(&traceparent.trace_id)
        }
        None => trace_id_to_task_id(&traceparent.trace_id),
    };
    let edge_id = EdgeId::from_bytes(*traceparent.parent_id.as_bytes());
    XTrace::from_parts(task_id, edge_id, traceparent.flags)
}
