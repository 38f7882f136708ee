//! 本地追踪上下文管理
//!
//! 使用 `tokio::task_local` 保存当前工作单元的 X-Trace，与Web框架无关。

use std::cell::Cell;

use tokio::task_local;

use crate::xtrace::XTrace;

// 使用tokio的task_local来存储当前工作单元的上下文
task_local! {
    static CURRENT_CONTEXT: Cell<Option<XTrace>>;
}

/// 获取当前上下文
///
/// 不在任何追踪作用域内时返回 `None`。
pub fn current_context() -> Option<XTrace> {
    CURRENT_CONTEXT.try_with(Cell::get).ok().flatten()
}

/// 替换当前作用域内的上下文
///
/// # 返回
/// 不在追踪作用域内时返回 `false`，上下文不会被记录
pub fn set_current_context(xtrace: XTrace) -> bool {
    CURRENT_CONTEXT
        .try_with(|current| current.set(Some(xtrace)))
        .is_ok()
}

/// 当前是否处于一条被采样的有效链路中
pub fn is_tracing() -> bool {
    current_context().is_some_and(|xtrace| xtrace.is_sampled())
}

/// 在指定的追踪上下文中执行异步操作
///
/// # 参数
/// * `xtrace` - 要设置的上下文
/// * `future` - 要执行的异步操作
///
/// # 返回
/// 异步操作的结果
pub async fn with_context<F, T>(xtrace: XTrace, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_CONTEXT.scope(Cell::new(Some(xtrace)), future).await
}

/// 同步版本的 [`with_context`]
pub fn sync_with_context<F, T>(xtrace: XTrace, f: F) -> T
where
    F: FnOnce() -> T,
{
    CURRENT_CONTEXT.sync_scope(Cell::new(Some(xtrace)), f)
}

/// 判断下游返回的标识能否作为新的本地上下文
///
/// 条件：返回值通过强校验、当前正在追踪、task id 与发出时一致且采样位已置。
/// 不满足时返回 `None` 并记录 debug 日志，这只是尽力而为的优化。
pub fn accept_returned_context(
    start: &str,
    returned: &str,
    tracing_active: bool,
) -> Option<XTrace> {
    let returned_xtrace = XTrace::parse(returned).filter(XTrace::is_valid)?;
    if !tracing_active {
        return None;
    }

    let start_task = XTrace::parse(start).map(|x| x.task_id());
    if start_task == Some(returned_xtrace.task_id()) && returned_xtrace.is_sampled() {
        Some(returned_xtrace)
    } else {
        tracing::debug!(
            start,
            returned,
            "sampling flag unset or mismatched start and returned ids"
        );
        None
    }
}

/// 服务调用返回后延续上下文
///
/// # 参数
/// * `start` - 发出请求前的上下文
/// * `returned` - 下游返回的上下文（例如响应头中的 `x-trace`）
///
/// # 返回
/// 被接受时返回新上下文，并写入当前作用域；否则本地上下文保持不变
pub fn continue_service_context(start: &str, returned: &str) -> Option<XTrace> {
    let accepted = accept_returned_context(start, returned, is_tracing())?;
    set_current_context(accepted);
    Some(accepted)
}
