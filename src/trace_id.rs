//! W3C trace-id / parent-id 值类型

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// 高性能追踪ID生成器
///
/// 使用时间戳 + 原子计数器的组合，生成符合W3C TraceContext规范的128位ID
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// 机器ID，基于进程ID和启动时间戳生成，确保不同进程/实例的ID不冲突
static MACHINE_ID: LazyLock<u16> = LazyLock::new(|| {
    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    ((pid ^ timestamp) & 0xFFFF) as u16
});

/// 小写十六进制字节校验（W3C 头部只接受小写）
#[inline]
pub(crate) fn is_lower_hex_bytes(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// W3C trace-id（16 字节）
///
/// 内部以定长字节数组保存，仅在边界处进行十六进制编解码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// 十六进制长度
    pub const HEX_LEN: usize = 32;

    /// 生成新的追踪ID（符合 W3C TraceContext 规范）
    ///
    /// 使用时间戳+计数器+机器ID+随机数的组合，生成128位ID
    ///
    /// # 返回
    /// 新生成的追踪ID，保证不为全零
    #[inline]
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let machine_id = *MACHINE_ID;

        // 构造128位ID：timestamp(48位) + machine_id(16位) + counter(32位) + random(32位)
        let random_part = fastrand::u32(..);

        let high_64 = ((timestamp & 0xFFFFFFFFFFFF) << 16) | (machine_id as u64);
        let low_64 = (counter & 0xFFFFFFFF) << 32 | (random_part as u64);

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&high_64.to_be_bytes());
        bytes[8..].copy_from_slice(&low_64.to_be_bytes());
        Self(bytes)
    }

    /// 从字节构造
    #[inline]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// 从字符串创建追踪ID，并进行 W3C TraceContext 规范校验
    ///
    /// # 校验规则
    /// - 长度必须是 32 个字符
    /// - 只能包含小写十六进制字符（0-9, a-f）
    /// - 不能全为零
    #[inline]
    pub fn from_string_validated(id: &str) -> Option<Self> {
        if id.len() != Self::HEX_LEN || !is_lower_hex_bytes(id.as_bytes()) {
            return None;
        }

        let mut bytes = [0u8; 16];
        hex::decode_to_slice(id, &mut bytes).ok()?;

        let trace_id = Self(bytes);
        if trace_id.is_zero() {
            return None;
        }
        Some(trace_id)
    }

    /// 是否全为零（W3C 规定的无效值）
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// 原始字节
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// W3C parent-id（8 字节），与 X-Trace 的 edge id 一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentId([u8; 8]);

impl ParentId {
    pub const HEX_LEN: usize = 16;

    /// 生成随机且非零的 parent-id
    pub fn random() -> Self {
        loop {
            let value = fastrand::u64(..);
            if value != 0 {
                return Self(value.to_be_bytes());
            }
        }
    }

    #[inline]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// 校验规则同 [`TraceId::from_string_validated`]，长度为 16
    pub fn from_string_validated(id: &str) -> Option<Self> {
        if id.len() != Self::HEX_LEN || !is_lower_hex_bytes(id.as_bytes()) {
            return None;
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(id, &mut bytes).ok()?;
        let parent_id = Self(bytes);
        if parent_id.is_zero() {
            return None;
        }
        Some(parent_id)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_creation() {
        let trace_id = TraceId::new();
        let id_str = trace_id.to_string();

        // 验证长度：必须是 32 个字符
        assert_eq!(id_str.len(), 32);

        // 验证只包含小写十六进制字符
        assert!(is_lower_hex_bytes(id_str.as_bytes()));

        // 验证不全为零
        assert!(!trace_id.is_zero());
    }

    #[test]
    fn test_trace_id_display() {
        let trace_id = TraceId::from_string_validated("0af7651916cd43dd8448eb211c80319c").unwrap();
        assert_eq!(format!("{}", trace_id), "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn test_from_string_validated() {
        let valid_id = "0af7651916cd43dd8448eb211c80319c";
        assert!(TraceId::from_string_validated(valid_id).is_some());

        // 长度不正确
        assert_eq!(TraceId::from_string_validated("short"), None);
        assert_eq!(
            TraceId::from_string_validated("toolongtraceidentifierthatexceeds32chars"),
            None
        );

        // 包含大写字符
        assert_eq!(
            TraceId::from_string_validated("0AF7651916CD43DD8448EB211C80319C"),
            None
        );

        // 包含非十六进制字符
        assert_eq!(
            TraceId::from_string_validated("0af7651916cd43dd8448eb211c80319g"),
            None
        );

        // 全为零
        assert_eq!(
            TraceId::from_string_validated("00000000000000000000000000000000"),
            None
        );
    }

    #[test]
    fn test_trace_id_uniqueness() {
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(TraceId::new()), "Generated duplicate trace ID");
        }
    }

    #[test]
    fn test_parent_id() {
        let parent_id = ParentId::from_string_validated("b7ad6b7169203331").unwrap();
        assert_eq!(parent_id.to_string(), "b7ad6b7169203331");
        assert!(ParentId::from_string_validated("0000000000000000").is_none());
        assert!(ParentId::from_string_validated("B7AD6B7169203331").is_none());
        assert!(!ParentId::random().is_zero());
    }
}
