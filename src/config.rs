//! 追踪配置
//!
//! - [`TracingConfig`]：声明式配置，可由 serde 反序列化
//! - [`TracingSettings`]：编译后的不可变快照，采样决策只读取它
//! - [`SettingsStore`]：通过 `ArcSwap` 原子替换快照，读无锁，写经互斥锁串行化

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use regex::Regex;
use serde::Deserialize;

use crate::url_filter::{compile_pattern, RegexOptions, UrlFilters, UrlRule};

/// 默认的不追踪（静态资源）路径正则
pub const DEFAULT_DNT_REGEXP: &str = concat!(
    r"\.(jpg|jpeg|gif|png|ico|css|zip|tgz|gz|rar|bz2|pdf|txt|tar|wav|bmp|rtf|js|flv|swf|otf|eot",
    r"|ttf|woff|woff2|svg|less)(\?.+){0,1}$",
);

/// 采样率上限（百万分之一为单位）
pub const MAX_SAMPLE_RATE: u32 = 1_000_000;

/// 追踪模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingMode {
    #[default]
    Enabled,
    #[serde(alias = "never")]
    Disabled,
}

/// 声明式追踪配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub tracing_mode: TracingMode,
    /// 采样率，`None` 表示交由采样器决定
    pub sample_rate: Option<u32>,
    pub trigger_tracing_mode: TracingMode,
    /// 不追踪的路径正则，`None` 关闭该过滤
    pub dnt_regexp: Option<String>,
    pub dnt_opts: RegexOptions,
    pub transaction_settings: Vec<UrlRule>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            tracing_mode: TracingMode::Enabled,
            sample_rate: None,
            trigger_tracing_mode: TracingMode::Enabled,
            dnt_regexp: Some(DEFAULT_DNT_REGEXP.to_owned()),
            dnt_opts: RegexOptions::default(),
            transaction_settings: Vec::new(),
        }
    }
}

/// 编译后的配置快照
#[derive(Debug, Clone)]
pub struct TracingSettings {
    pub tracing_mode: TracingMode,
    pub sample_rate: Option<u32>,
    pub trigger_tracing_mode: TracingMode,
    pub dnt: Option<Regex>,
    pub url_filters: UrlFilters,
    source: TracingConfig,
}

impl TracingSettings {
    /// 编译配置，任何单项失败都只记录日志并降级
    pub fn compile(config: TracingConfig) -> Self {
        let dnt = config.dnt_regexp.as_deref().filter(|p| !p.is_empty()).and_then(|pattern| {
            compile_pattern(pattern, config.dnt_opts)
                .inspect_err(|err| {
                    tracing::warn!(pattern, error = %err, "could not compile do-not-trace pattern");
                })
                .ok()
        });

        let sample_rate = config.sample_rate.filter(|&rate| {
            let in_range = rate <= MAX_SAMPLE_RATE;
            if !in_range {
                tracing::warn!(rate, "sample_rate out of range, leaving it unset");
            }
            in_range
        });

        Self {
            tracing_mode: config.tracing_mode,
            sample_rate,
            trigger_tracing_mode: config.trigger_tracing_mode,
            dnt,
            url_filters: UrlFilters::compile(&config.transaction_settings),
            source: config,
        }
    }

    /// 编译前的声明式配置
    pub fn config(&self) -> &TracingConfig {
        &self.source
    }

    /// 路径是否为不追踪的静态资源
    pub fn is_asset(&self, path: &str) -> bool {
        self.dnt.as_ref().is_some_and(|regex| regex.is_match(path))
    }

    pub fn tracing_mode_disabled(&self) -> bool {
        self.tracing_mode == TracingMode::Disabled
    }

    pub fn trigger_tracing_disabled(&self) -> bool {
        self.trigger_tracing_mode == TracingMode::Disabled
    }
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self::compile(TracingConfig::default())
    }
}

/// 热更新友好的配置容器
///
/// `snapshot` 返回当前快照的 `Arc`，并发读者之间互不阻塞；
/// 所有写操作经互斥锁串行化，并以单次指针交换生效，读者不会看到半更新的规则集。
pub struct SettingsStore {
    current: ArcSwap<TracingSettings>,
    write_lock: Mutex<()>,
    epoch: AtomicU64,
}

impl SettingsStore {
    pub fn new(settings: TracingSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
            write_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: TracingConfig) -> Self {
        Self::new(TracingSettings::compile(config))
    }

    /// 返回当前配置快照
    pub fn snapshot(&self) -> Arc<TracingSettings> {
        self.current.load_full()
    }

    /// 配置纪元（从 0 开始，每次写入递增）
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 直接替换为新的快照
    pub fn replace(&self, settings: TracingSettings) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store(settings);
    }

    /// 由新配置重新编译并替换
    pub fn reload(&self, config: TracingConfig) {
        self.replace(TracingSettings::compile(config));
    }

    /// 在当前声明式配置的基础上修改后重新编译
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut TracingConfig),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut config = self.current.load().config().clone();
        f(&mut config);
        self.store(TracingSettings::compile(config));
    }

    fn store(&self, settings: TracingSettings) {
        self.current.store(Arc::new(settings));
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(TracingSettings::default())
    }
}
