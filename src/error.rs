//! 过滤规则编译错误

use thiserror::Error;

/// 单条 URL 规则编译失败的原因
///
/// 编译过程从不因单条规则失败而中止，这些错误只用于日志和诊断。
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid regexp `{pattern}`: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid extension list {extensions:?}: {source}")]
    InvalidExtensions {
        extensions: Vec<String>,
        #[source]
        source: regex::Error,
    },
}
