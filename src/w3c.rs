//! W3C `traceparent` / `tracestate` 头部的解析与序列化
//!
//! - `traceparent`：`version-traceid-parentid-flags`，仅接受版本 `00`
//! - `tracestate`：逗号分隔的 `key=value` 成员列表。本系统拥有 `sw` 成员，
//!   序列化时 `sw` 总是排在首位，其余成员保持原有相对顺序

use std::fmt;

use crate::trace_id::{is_lower_hex_bytes, ParentId, TraceId};

/// 唯一接受的 traceparent 版本
pub const TRACEPARENT_VERSION: u8 = 0x00;
/// 本系统在 tracestate 中的成员键
pub const SW_MEMBER_KEY: &str = "sw";
/// tracestate 最多保留的成员数量
pub const TRACESTATE_MAX_MEMBERS: usize = 32;
/// 成员键、值的最大长度
pub const TRACESTATE_MAX_FIELD_LEN: usize = 256;

/// 解析后的 `traceparent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: TraceId,
    pub parent_id: ParentId,
    /// 原始 flags 字节，未知位也原样保留
    pub flags: u8,
}

impl TraceParent {
    pub fn new(trace_id: TraceId, parent_id: ParentId, flags: u8) -> Self {
        Self {
            trace_id,
            parent_id,
            flags,
        }
    }

    /// 解析 traceparent 头
    ///
    /// 段数、长度、字符集或版本不符时返回 `None`；未来版本同样被拒绝。
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let (version, trace_id, parent_id, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        if parse_hex_byte(version)? != TRACEPARENT_VERSION {
            return None;
        }

        Some(Self {
            trace_id: TraceId::from_string_validated(trace_id)?,
            parent_id: ParentId::from_string_validated(parent_id)?,
            flags: parse_hex_byte(flags)?,
        })
    }

    #[inline]
    pub fn is_sampled(&self) -> bool {
        self.flags & 0x01 == 0x01
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}-{}-{}-{:02x}",
            TRACEPARENT_VERSION, self.trace_id, self.parent_id, self.flags
        )
    }
}

/// 两个小写十六进制字符 -> 字节
fn parse_hex_byte(value: &str) -> Option<u8> {
    if value.len() != 2 || !is_lower_hex_bytes(value.as_bytes()) {
        return None;
    }
    u8::from_str_radix(value, 16).ok()
}

/// tracestate 单个成员
///
/// 键值按第一个 `=` 切分并原样保存，不做规范化，以保证序列化结果与输入逐字节一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStateMember {
    key: String,
    value: String,
}

impl TraceStateMember {
    /// 严重畸形（无 `=`、空键、超长）时返回 `None`，其余成员即使不合规范也作为不透明值保留
    fn parse(member: &str) -> Option<Self> {
        let (key, value) = member.split_once('=')?;
        if key.is_empty()
            || key.len() > TRACESTATE_MAX_FIELD_LEN
            || value.len() > TRACESTATE_MAX_FIELD_LEN
        {
            return None;
        }
        Some(Self {
            key: key.to_owned(),
            value: value.to_owned(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for TraceStateMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// 解析后的 `tracestate`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceState {
    members: Vec<TraceStateMember>,
}

impl TraceState {
    /// 解析 tracestate 头，永不失败
    ///
    /// 按 `,` 切分，去掉成员两侧空白，丢弃空成员和严重畸形的成员。
    pub fn parse(value: &str) -> Self {
        let members = value
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .filter_map(|member| {
                let parsed = TraceStateMember::parse(member);
                if parsed.is_none() {
                    tracing::debug!(member, "dropping malformed tracestate member");
                }
                parsed
            })
            .collect();
        Self { members }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// 按原始顺序遍历成员
    pub fn iter(&self) -> impl Iterator<Item = &TraceStateMember> {
        self.members.iter()
    }

    /// 查找第一个匹配键的成员值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|member| member.key == key)
            .map(|member| member.value.as_str())
    }

    /// `sw` 成员的值
    pub fn sw_member_value(&self) -> Option<&str> {
        self.get(SW_MEMBER_KEY)
    }

    /// 写入本系统的 `sw` 成员：已存在则替换，否则插入首位，其余成员顺序不变
    #[must_use]
    pub fn with_sw_member(&self, value: impl Into<String>) -> Self {
        let mut members = Vec::with_capacity(self.members.len() + 1);
        members.push(TraceStateMember {
            key: SW_MEMBER_KEY.to_owned(),
            value: value.into(),
        });
        members.extend(
            self.members
                .iter()
                .filter(|member| member.key != SW_MEMBER_KEY)
                .cloned(),
        );
        Self { members }
    }

    /// 头部值；没有成员时返回 `None`，调用方应省略该头部
    pub fn header_value(&self) -> Option<String> {
        (!self.is_empty()).then(|| self.to_string())
    }
}

impl fmt::Display for TraceState {
    /// `sw` 成员（若存在）排在首位，总数不超过 32，超出时丢弃最右侧成员
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sw = self.members.iter().filter(|m| m.key == SW_MEMBER_KEY).take(1);
        let others = self.members.iter().filter(|m| m.key != SW_MEMBER_KEY);

        for (i, member) in sw.chain(others).take(TRACESTATE_MAX_MEMBERS).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{member}")?;
        }
        Ok(())
    }
}

/// 一对 W3C 头部
///
/// `traceparent` 无效时整个上下文视为无效，`tracestate` 同时被忽略。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct W3CContext {
    pub traceparent: Option<TraceParent>,
    pub tracestate: TraceState,
}

impl W3CContext {
    pub fn new(traceparent: TraceParent, tracestate: TraceState) -> Self {
        Self {
            traceparent: Some(traceparent),
            tracestate,
        }
    }

    /// 解析头部对，永不失败；通过 [`W3CContext::is_valid`] 判断结果
    pub fn parse(traceparent: Option<&str>, tracestate: Option<&str>) -> Self {
        let Some(traceparent) = traceparent.and_then(TraceParent::parse) else {
            if traceparent.is_some() {
                tracing::debug!(?traceparent, "ignoring invalid traceparent");
            }
            return Self::default();
        };

        Self {
            traceparent: Some(traceparent),
            tracestate: tracestate.map(TraceState::parse).unwrap_or_default(),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.traceparent.is_some()
    }

    /// 序列化为 `(traceparent, tracestate)`；`tracestate` 为空时为 `None`
    pub fn serialize(&self) -> Option<(String, Option<String>)> {
        let traceparent = self.traceparent?;
        Some((traceparent.to_string(), self.tracestate.header_value()))
    }
}
