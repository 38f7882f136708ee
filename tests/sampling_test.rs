//! 采样决策测试
//!
//! 通过公开接口验证决策状态机、URL 过滤优先级与服务调用后的上下文延续

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use xtrace::sampling::{DecisionPath, TRACING_MODE_DISABLED, TRACING_MODE_ENABLED};
use xtrace::{
    continue_service_context, current_context, entry_context, is_tracing, with_context, OracleArgs,
    OracleResponse, SamplingEngine, SettingsStore, TracingConfig, TracingMode, TracingSettings,
    TriggerOptions, UrlRule, XTrace,
};

const INCOMING: &str = "2B7435A9FE510AE4533414D425DADF4E180D2B4E3649E60702469DB05F01";

type Recorded = (SamplingEngine, Arc<AtomicUsize>, Arc<Mutex<Vec<OracleArgs>>>);

/// 记录调用次数与参数的采样器
fn recording_engine(sample: i32) -> Recorded {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = {
        let calls = Arc::clone(&calls);
        let seen = Arc::clone(&seen);
        SamplingEngine::new(move |args: &OracleArgs| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(args.clone());
            OracleResponse {
                sample,
                metrics: 1,
                rate: 1_000_000,
                source: 6,
                ..OracleResponse::default()
            }
        })
    };
    (engine, calls, seen)
}

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_lowercase(), v.to_string())).collect()
}

/// 静态资源：不传播、不采样，且不询问采样器
#[test]
fn test_asset_skips_oracle() {
    let (engine, calls, _) = recording_engine(1);
    let settings = TracingSettings::default();

    let decision = engine.evaluate(&settings, Some("/assets/app.css"), &headers(&[]), None);
    assert!(!decision.do_propagate());
    assert!(!decision.do_sample());
    assert_eq!(decision.path(), DecisionPath::AssetSkip);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// 自定义的不追踪规则
#[test]
fn test_custom_dnt_pattern() {
    let (engine, calls, _) = recording_engine(1);
    let settings = TracingSettings::compile(TracingConfig {
        dnt_regexp: Some(r"^/static/".to_owned()),
        ..TracingConfig::default()
    });

    assert!(!engine.evaluate(&settings, Some("/static/x"), &headers(&[]), None).do_propagate());
    // 默认的扩展名规则已被替换
    assert!(engine.evaluate(&settings, Some("/app.css"), &headers(&[]), None).do_propagate());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// 已处于本地上下文中：沿用采样状态，不询问采样器
#[tokio::test]
async fn test_local_context_skips_oracle() {
    let (engine, calls, _) = recording_engine(0);
    let settings = TracingSettings::default();

    let sampled = XTrace::parse(INCOMING).unwrap();
    let decision = with_context(sampled, async {
        assert!(is_tracing());
        engine.evaluate(&settings, Some("/users"), &headers(&[]), None)
    })
    .await;
    assert!(decision.do_sample());
    assert!(decision.do_propagate());
    assert_eq!(decision.path(), DecisionPath::LocalContinue);

    let unsampled = sampled.without_sampled();
    let decision = with_context(unsampled, async {
        assert!(!is_tracing());
        engine.evaluate(&settings, Some("/users"), &headers(&[]), None)
    })
    .await;
    assert!(!decision.do_sample());
    assert!(decision.do_propagate());

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// 无效的本地上下文不算在追踪中
#[tokio::test]
async fn test_invalid_local_context_is_evaluated() {
    let (engine, calls, _) = recording_engine(1);
    let zero_task = "2B000000000000000000000000000000000000000049E60702469DB05F01";
    let zero_task = XTrace::parse(zero_task).unwrap();

    let decision = with_context(zero_task, async {
        engine.evaluate(&TracingSettings::default(), Some("/users"), &headers(&[]), None)
    })
    .await;
    assert_eq!(decision.path(), DecisionPath::Evaluated);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// URL 过滤优先级：`disabled` 规则
#[test]
fn test_url_filter_precedence_disabled() {
    let (engine, _, seen) = recording_engine(1);
    let settings = TracingSettings::compile(TracingConfig {
        transaction_settings: vec![UrlRule::regexp("/long_job/.*")],
        ..TracingConfig::default()
    });

    engine.evaluate(&settings, Some("/long_job/5"), &headers(&[]), None);
    engine.evaluate(&settings, Some("/other"), &headers(&[]), None);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].tracing_mode, TRACING_MODE_DISABLED);
    assert_eq!(seen[1].tracing_mode, TRACING_MODE_ENABLED);
}

/// URL 过滤优先级：全局禁用时的 `enabled` 规则
#[test]
fn test_url_filter_precedence_enabled() {
    let (engine, _, seen) = recording_engine(1);
    let settings = TracingSettings::compile(TracingConfig {
        tracing_mode: TracingMode::Disabled,
        transaction_settings: vec![UrlRule::regexp("/api/.*").with_tracing(TracingMode::Enabled)],
        ..TracingConfig::default()
    });

    engine.evaluate(&settings, Some("/api/x"), &headers(&[]), None);
    engine.evaluate(&settings, Some("/web/x"), &headers(&[]), None);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].tracing_mode, TRACING_MODE_ENABLED);
    assert_eq!(seen[1].tracing_mode, TRACING_MODE_DISABLED);
}

/// 入站头部传给采样器
#[test]
fn test_incoming_headers_reach_oracle() {
    let (engine, _, seen) = recording_engine(1);
    let settings = TracingSettings::default();

    let carrier = headers(&[
        ("traceparent", "00-a462ade6cfe479081764cc476aa98335-cb3468da6f06eefc-01"),
        ("tracestate", "sw=cb3468da6f06eefc01,aa=1"),
        ("x-trace-options", "trigger-trace;ts=1564432370"),
        ("x-trace-options-signature", "2c1c3fa2"),
    ]);
    let trigger = TriggerOptions::from_headers(&carrier);
    let decision = engine.evaluate(&settings, Some("/users"), &carrier, trigger.as_ref());

    let seen = seen.lock().unwrap();
    assert_eq!(
        seen[0].tracestring.as_deref(),
        Some("2BA462ADE6CFE479081764CC476AA9833500000000CB3468DA6F06EEFC01")
    );
    assert_eq!(seen[0].sw_member_value.as_deref(), Some("cb3468da6f06eefc01"));
    let trigger = seen[0].trigger.as_ref().unwrap();
    assert_eq!(trigger.trigger_trace, 1);
    assert_eq!(trigger.trigger_mode, 1);
    assert_eq!(trigger.timestamp, 1_564_432_370);
    assert_eq!(trigger.signature.as_deref(), Some("2c1c3fa2"));

    assert_eq!(decision.tracestring(), seen[0].tracestring.as_deref());
    assert_eq!(decision.sw_member_value(), Some("cb3468da6f06eefc01"));
}

/// 入口上下文：延续入站链路，或开启新链路
#[test]
fn test_entry_context() {
    let settings = TracingSettings::default();
    let carrier = headers(&[("x-trace", INCOMING)]);
    let incoming = xtrace::parse_incoming(&carrier);

    let (engine, _, _) = recording_engine(1);
    let decision = engine.evaluate(&settings, Some("/users"), &carrier, None);
    let entry = entry_context(incoming.xtrace, &decision).unwrap();
    assert_eq!(entry.task_id(), incoming.xtrace.unwrap().task_id());
    assert_ne!(entry.edge_id(), incoming.xtrace.unwrap().edge_id());
    assert!(entry.is_sampled());

    let (engine, _, _) = recording_engine(0);
    let decision = engine.evaluate(&settings, Some("/users"), &headers(&[]), None);
    let entry = entry_context(None, &decision).unwrap();
    assert!(entry.is_valid());
    assert!(!entry.is_sampled());

    let decision = engine.evaluate(&settings, Some("/app.js"), &carrier, None);
    assert_eq!(entry_context(incoming.xtrace, &decision), None);
}

/// 入口上下文：已在本地上下文中时延续本地链路，而不是另开一条
#[tokio::test]
async fn test_entry_context_continues_local_context() {
    let (engine, calls, _) = recording_engine(1);
    let settings = TracingSettings::default();
    let local = XTrace::parse(INCOMING).unwrap();

    let (decision, entry) = with_context(local, async {
        let decision = engine.evaluate(&settings, Some("/users"), &headers(&[]), None);
        let entry = entry_context(None, &decision);
        (decision, entry)
    })
    .await;

    assert_eq!(decision.path(), DecisionPath::LocalContinue);
    assert_eq!(decision.local_context(), Some(local));
    assert_eq!(entry, Some(local));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // 入站头部指向另一条链路时仍以本地上下文为准
    let other_task = "2B11111111111111111111111111111111111111110123456789ABCDEF01";
    let other = headers(&[("x-trace", other_task)]);
    let incoming = xtrace::parse_incoming(&other);
    let entry = with_context(local.without_sampled(), async {
        let decision = engine.evaluate(&settings, Some("/users"), &other, None);
        entry_context(incoming.xtrace, &decision)
    })
    .await
    .unwrap();
    assert_eq!(entry.task_id(), local.task_id());
    assert!(!entry.is_sampled());

    // 其余路径不带本地上下文
    let decision = engine.evaluate(&settings, Some("/users"), &headers(&[]), None);
    assert_eq!(decision.local_context(), None);
}

/// 配置热更新对下一次决策生效
#[test]
fn test_settings_store_reload() {
    let (engine, _, seen) = recording_engine(1);
    let store = SettingsStore::default();

    engine.evaluate(&store.snapshot(), Some("/users"), &headers(&[]), None);
    store.update(|config| config.sample_rate = Some(250_000));
    engine.evaluate(&store.snapshot(), Some("/users"), &headers(&[]), None);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].sample_rate, -1);
    assert_eq!(seen[1].sample_rate, 250_000);
}

/// 服务调用返回后的上下文延续
#[tokio::test]
async fn test_continue_service_context() {
    let start = XTrace::parse(INCOMING).unwrap();
    let same_task = "2B7435A9FE510AE4533414D425DADF4E180D2B4E360123456789ABCDEF01";
    let other_task = "2B11111111111111111111111111111111111111110123456789ABCDEF01";
    let unsampled = "2B7435A9FE510AE4533414D425DADF4E180D2B4E360123456789ABCDEF00";

    with_context(start, async {
        let accepted = continue_service_context(INCOMING, same_task);
        assert_eq!(accepted.map(|x| x.to_string()).as_deref(), Some(same_task));
        assert_eq!(current_context().map(|x| x.to_string()).as_deref(), Some(same_task));

        assert!(continue_service_context(INCOMING, other_task).is_none());
        assert!(continue_service_context(INCOMING, unsampled).is_none());
        assert!(continue_service_context(INCOMING, "garbage").is_none());
        assert_eq!(current_context().map(|x| x.to_string()).as_deref(), Some(same_task));
    })
    .await;

    // 不在追踪中时不接受
    assert!(continue_service_context(INCOMING, same_task).is_none());
    assert!(current_context().is_none());
}
