//! URL 过滤规则编译
//!
//! 声明式规则（正则或扩展名列表）按 `tracing` 字段分为 `enabled` 与 `disabled` 两组，
//! 未声明 `tracing` 的规则归入 `disabled`。每组编译为一组正则，任一命中即视为匹配。

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::config::TracingMode;
use crate::error::RuleError;

/// 单条正则编译后的大小上限，防止病态规则拖垮请求路径
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// 正则选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegexOptions {
    /// 忽略大小写
    pub ignore_case: bool,
    /// 忽略模式中的空白并允许 `#` 注释
    pub extended: bool,
    /// `.` 匹配换行
    pub multiline: bool,
}

impl RegexOptions {
    pub fn ignore_case() -> Self {
        Self {
            ignore_case: true,
            ..Self::default()
        }
    }
}

/// 按选项编译正则
pub fn compile_pattern(pattern: &str, opts: RegexOptions) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(opts.ignore_case)
        .ignore_whitespace(opts.extended)
        .dot_matches_new_line(opts.multiline)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

/// 规则中的正则：配置里的字符串，或调用方直接提供的已编译正则
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "String")]
pub enum RulePattern {
    Source(String),
    Compiled(Regex),
}

impl From<String> for RulePattern {
    fn from(source: String) -> Self {
        Self::Source(source)
    }
}

impl From<&str> for RulePattern {
    fn from(source: &str) -> Self {
        Self::Source(source.to_owned())
    }
}

impl From<Regex> for RulePattern {
    fn from(regex: Regex) -> Self {
        Self::Compiled(regex)
    }
}

impl RulePattern {
    fn is_empty(&self) -> bool {
        match self {
            Self::Source(source) => source.is_empty(),
            Self::Compiled(regex) => regex.as_str().is_empty(),
        }
    }
}

/// 一条 URL 规则
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UrlRule {
    pub regexp: Option<RulePattern>,
    /// 仅作用于字符串形式的 `regexp`
    pub opts: RegexOptions,
    pub extensions: Vec<String>,
    /// 缺省为 `disabled`
    pub tracing: Option<TracingMode>,
}

impl UrlRule {
    /// 正则规则
    pub fn regexp(pattern: impl Into<RulePattern>) -> Self {
        Self {
            regexp: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// 扩展名规则
    pub fn extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_opts(mut self, opts: RegexOptions) -> Self {
        self.opts = opts;
        self
    }

    #[must_use]
    pub fn with_tracing(mut self, tracing: TracingMode) -> Self {
        self.tracing = Some(tracing);
        self
    }

    fn is_enabled_rule(&self) -> bool {
        self.tracing == Some(TracingMode::Enabled)
    }
}

/// 一组已编译的匹配器（任一命中即匹配）
#[derive(Debug, Clone)]
pub struct UrlMatcherSet {
    matchers: Vec<Regex>,
}

impl UrlMatcherSet {
    pub fn matches_any(&self, path: &str) -> bool {
        self.matchers.iter().any(|regex| regex.is_match(path))
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// 对可能缺失的匹配组求值；缺失的组永不匹配
///
/// 正则引擎保证线性时间匹配，求值本身不会失败，病态规则在编译阶段就被大小上限拦下。
pub fn matches_any(group: Option<&UrlMatcherSet>, path: &str) -> bool {
    group.is_some_and(|set| set.matches_any(path))
}

/// 编译结果：两组匹配器，任一组都可能缺失
#[derive(Debug, Clone, Default)]
pub struct UrlFilters {
    pub enabled: Option<UrlMatcherSet>,
    pub disabled: Option<UrlMatcherSet>,
}

impl UrlFilters {
    /// 编译规则，失败的规则记录 warn 日志后丢弃
    pub fn compile(rules: &[UrlRule]) -> Self {
        compile_url_settings(rules).0
    }

    /// 路径命中 `enabled` 组
    pub fn is_enabled(&self, path: &str) -> bool {
        matches_any(self.enabled.as_ref(), path)
    }

    /// 路径命中 `disabled` 组
    pub fn is_disabled(&self, path: &str) -> bool {
        matches_any(self.disabled.as_ref(), path)
    }
}

/// 编译规则并返回被丢弃规则的错误
pub fn compile_url_settings(rules: &[UrlRule]) -> (UrlFilters, Vec<RuleError>) {
    let (enabled, disabled): (Vec<&UrlRule>, Vec<&UrlRule>) =
        rules.iter().partition(|rule| rule.is_enabled_rule());

    let mut rejected = Vec::new();
    let filters = UrlFilters {
        enabled: compile_group(&enabled, &mut rejected),
        disabled: compile_group(&disabled, &mut rejected),
    };
    (filters, rejected)
}

fn compile_group(rules: &[&UrlRule], rejected: &mut Vec<RuleError>) -> Option<UrlMatcherSet> {
    let mut matchers = compile_regexps(rules, rejected);
    matchers.extend(compile_extensions(rules, rejected));

    (!matchers.is_empty()).then_some(UrlMatcherSet { matchers })
}

fn compile_regexps(rules: &[&UrlRule], rejected: &mut Vec<RuleError>) -> Vec<Regex> {
    rules
        .iter()
        .filter_map(|rule| {
            let pattern = rule.regexp.as_ref().filter(|p| !p.is_empty())?;
            match pattern {
                RulePattern::Compiled(regex) => Some(regex.clone()),
                RulePattern::Source(source) => match compile_pattern(source, rule.opts) {
                    Ok(regex) => Some(regex),
                    Err(source_err) => {
                        let err = RuleError::InvalidRegex {
                            pattern: source.clone(),
                            source: source_err,
                        };
                        tracing::warn!(
                            error = %err,
                            "problem compiling transaction settings item, will ignore"
                        );
                        rejected.push(err);
                        None
                    }
                },
            }
        })
        .collect()
}

/// 所有扩展名合并为一条正则：`(ext1|ext2)(\?.+)?$`
fn compile_extensions(rules: &[&UrlRule], rejected: &mut Vec<RuleError>) -> Option<Regex> {
    let extensions: Vec<&str> = rules
        .iter()
        .flat_map(|rule| rule.extensions.iter())
        .map(String::as_str)
        .filter(|ext| !ext.is_empty())
        .collect();
    if extensions.is_empty() {
        return None;
    }

    let alternation = extensions
        .iter()
        .map(|ext| regex::escape(ext))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(r"({alternation})(\?.+){{0,1}}$");

    match compile_pattern(&pattern, RegexOptions::default()) {
        Ok(regex) => Some(regex),
        Err(source) => {
            let err = RuleError::InvalidExtensions {
                extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
                source,
            };
            tracing::warn!(
                error = %err,
                "problem compiling transaction settings extensions, will ignore"
            );
            rejected.push(err);
            None
        }
    }
}
