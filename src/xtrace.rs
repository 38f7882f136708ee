//! X-Trace 旧版追踪标识（60 个十六进制字符）的编解码与校验
//!
//! 布局（按字节）：
//!
//! | 字节 | 十六进制字符 | 含义 |
//! |------|--------------|------|
//! | 0 | 0..2 | 版本标记，固定为 `2B` |
//! | 1..21 | 2..42 | task id（整条链路不变） |
//! | 21..29 | 42..58 | edge id（每一跳替换） |
//! | 29 | 58..60 | flags，bit 0 为采样位 |
//!
//! 内部统一使用定长字节数组，十六进制只出现在边界。所有畸形输入都降级为
//! `None`/`false`，从不 panic。

use std::fmt;
use std::ops::Range;

use crate::trace_id::{ParentId, TraceId};

/// 版本标记字节
pub const XTRACE_MARKER: u8 = 0x2B;
/// 字节长度
pub const XTRACE_BYTES: usize = 30;
/// 十六进制长度
pub const XTRACE_HEX_LEN: usize = XTRACE_BYTES * 2;

const TASK_ID: Range<usize> = 1..21;
const EDGE_ID: Range<usize> = 21..29;
const FLAGS: usize = 29;

/// 采样标志位
pub const SAMPLED_FLAG: u8 = 0x01;

// 字符串层面的偏移
const TASK_ID_HEX: Range<usize> = 2..42;
const EDGE_ID_HEX: Range<usize> = 42..58;
const EDGE_FLAGS_HEX: Range<usize> = 42..60;

/// task id（20 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId([u8; 20]);

impl TaskId {
    #[inline]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// 全零 task id 表示未初始化的上下文
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// edge id（8 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId([u8; 8]);

impl EdgeId {
    #[inline]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// 生成随机且非零的 edge id
    pub fn random() -> Self {
        Self(*ParentId::random().as_bytes())
    }

    /// 解析 16 个十六进制字符（大小写均可），其余一律返回 `None`
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != 16 {
            return None;
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(hex_str, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// 旧版追踪标识
///
/// 不可变值对象：所有修改方法都返回新值。
///
/// `parse` 只做弱校验（长度、`2B` 前缀、十六进制），因此首跳尚未分配 task id 的标识
/// 仍然可以被解析出来；是否可信由 [`XTrace::is_valid`] 决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XTrace([u8; XTRACE_BYTES]);

impl XTrace {
    /// 解析旧版标识（弱校验）
    ///
    /// # 参数
    /// * `value` - 60 个十六进制字符，以 `2b`/`2B` 开头
    ///
    /// # 返回
    /// 满足长度、前缀和十六进制要求时返回 `Some`，不检查 task id 是否全零
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != XTRACE_HEX_LEN {
            return None;
        }
        let mut bytes = [0u8; XTRACE_BYTES];
        hex::decode_to_slice(value, &mut bytes).ok()?;
        if bytes[0] != XTRACE_MARKER {
            return None;
        }
        Some(Self(bytes))
    }

    /// 由各字段组装
    pub fn from_parts(task_id: TaskId, edge_id: EdgeId, flags: u8) -> Self {
        let mut bytes = [0u8; XTRACE_BYTES];
        bytes[0] = XTRACE_MARKER;
        bytes[TASK_ID].copy_from_slice(task_id.as_bytes());
        bytes[EDGE_ID].copy_from_slice(edge_id.as_bytes());
        bytes[FLAGS] = flags;
        Self(bytes)
    }

    /// 开启一条新的链路
    ///
    /// task id 由新生成的 W3C [`TraceId`] 加 4 个零字节构成，因此在 W3C 与旧格式之间
    /// 往返时无需先前的 task id 也不会丢失信息。
    pub fn generate(sampled: bool) -> Self {
        let mut task = [0u8; 20];
        task[..16].copy_from_slice(TraceId::new().as_bytes());
        let flags = if sampled { SAMPLED_FLAG } else { 0 };
        Self::from_parts(TaskId(task), EdgeId::random(), flags)
    }

    /// 强校验：task id 不能全为零
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.task_id().is_zero()
    }

    /// 是否采样（要求强校验通过）
    #[inline]
    pub fn is_sampled(&self) -> bool {
        self.is_valid() && self.0[FLAGS] & SAMPLED_FLAG == SAMPLED_FLAG
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.0[FLAGS]
    }

    /// 置采样位，返回新值
    #[must_use]
    pub fn with_sampled(mut self) -> Self {
        self.0[FLAGS] |= SAMPLED_FLAG;
        self
    }

    /// 清除采样位，返回新值
    #[must_use]
    pub fn without_sampled(mut self) -> Self {
        self.0[FLAGS] &= !SAMPLED_FLAG;
        self
    }

    /// 按布尔值设置采样位
    #[must_use]
    pub fn with_sampled_flag(self, sampled: bool) -> Self {
        if sampled {
            self.with_sampled()
        } else {
            self.without_sampled()
        }
    }

    /// task id（弱校验即可获取）
    pub fn task_id(&self) -> TaskId {
        let mut task = [0u8; 20];
        task.copy_from_slice(&self.0[TASK_ID]);
        TaskId(task)
    }

    /// edge id，强校验失败时返回 `None`
    pub fn edge_id(&self) -> Option<EdgeId> {
        if !self.is_valid() {
            return None;
        }
        let mut edge = [0u8; 8];
        edge.copy_from_slice(&self.0[EDGE_ID]);
        Some(EdgeId(edge))
    }

    /// edge id 与 flags 的十六进制（18 个大写字符），强校验失败时返回 `None`
    pub fn edge_id_and_flags(&self) -> Option<String> {
        let edge_id = self.edge_id()?;
        Some(format!("{edge_id}{:02X}", self.flags()))
    }

    /// 替换 edge id，flags 保持不变
    #[must_use]
    pub fn with_edge_id(mut self, edge_id: EdgeId) -> Self {
        self.0[EDGE_ID].copy_from_slice(edge_id.as_bytes());
        self
    }

    /// 为下一跳分配新的 edge id
    #[must_use]
    pub fn with_random_edge_id(self) -> Self {
        self.with_edge_id(EdgeId::random())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; XTRACE_BYTES] {
        &self.0
    }
}

impl fmt::Display for XTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

// -- 字符串层面的操作，供直接处理头部值的调用方使用 --

/// 强校验：长度 60、`2b` 前缀、task id 不全为零
pub fn valid(value: &str) -> bool {
    XTrace::parse(value).is_some_and(|x| x.is_valid())
}

/// 弱校验：长度 60、`2b` 前缀，不要求 task id 非零
///
/// 校验服务调用返回的标识时使用这一版本。
pub fn ok(value: &str) -> bool {
    XTrace::parse(value).is_some()
}

/// 是否采样
pub fn sampled(value: &str) -> bool {
    XTrace::parse(value).is_some_and(|x| x.is_sampled())
}

/// 置采样位；无法解析时原样返回
///
/// 只改写 flags 的两个字符，其余字符连同大小写保持原样。
pub fn set_sampled(value: &str) -> String {
    match XTrace::parse(value) {
        Some(xtrace) => splice_flags(value, xtrace.with_sampled()),
        None => value.to_owned(),
    }
}

/// 清除采样位；无法解析时原样返回
pub fn clear_sampled(value: &str) -> String {
    match XTrace::parse(value) {
        Some(xtrace) => splice_flags(value, xtrace.without_sampled()),
        None => value.to_owned(),
    }
}

// `value` 已通过解析，必为 60 个 ASCII 十六进制字符
fn splice_flags(value: &str, xtrace: XTrace) -> String {
    format!("{}{:02X}", &value[..EDGE_ID_HEX.end], xtrace.flags())
}

/// task id 部分（字符 2..42），弱校验失败时返回 `None`
pub fn task_id(value: &str) -> Option<&str> {
    ok(value).then(|| &value[TASK_ID_HEX])
}

/// edge id 部分（字符 42..58），强校验失败时返回 `None`
pub fn edge_id(value: &str) -> Option<&str> {
    valid(value).then(|| &value[EDGE_ID_HEX])
}

/// edge id 与 flags（字符 42..60），强校验失败时返回 `None`
pub fn edge_id_and_flags(value: &str) -> Option<&str> {
    valid(value).then(|| &value[EDGE_FLAGS_HEX])
}

/// 替换 edge id；新值不是 16 个十六进制字符或原值无法解析时原样返回
pub fn replace_edge_id(value: &str, new_edge_id: &str) -> String {
    match (XTrace::parse(value), EdgeId::from_hex(new_edge_id)) {
        (Some(xtrace), Some(edge_id)) => xtrace.with_edge_id(edge_id).to_string(),
        _ => value.to_owned(),
    }
}
