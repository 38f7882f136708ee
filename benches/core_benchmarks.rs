//! 核心功能性能基准测试

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use xtrace::{
    convert, parse_incoming, xtrace as legacy, OracleArgs, OracleResponse, SamplingEngine,
    TraceParent, TraceState, TracingConfig, TracingMode, TracingSettings, UrlRule, XTrace,
};

const XTRACE: &str = "2B7435A9FE510AE4533414D425DADF4E180D2B4E3649E60702469DB05F01";
const TRACEPARENT: &str = "00-a462ade6cfe479081764cc476aa98335-cb3468da6f06eefc-01";

/// 基准测试：标识生成
fn bench_generation(c: &mut Criterion) {
    c.bench_function("XTrace::generate", |b| {
        b.iter(|| {
            black_box(XTrace::generate(true));
        })
    });
}

/// 基准测试：标识校验
fn bench_validation(c: &mut Criterion) {
    let invalid_length = "2B7435A9FE510AE4";
    let invalid_chars = "2B7435A9FE510AE4533414D425DADF4E180D2B4E3649E60702469DB05F0G";
    let zero_task = "2B000000000000000000000000000000000000000049E60702469DB05F01";

    let mut group = c.benchmark_group("xtrace::valid");

    group.bench_function("valid_id", |b| {
        b.iter(|| black_box(legacy::valid(black_box(XTRACE))))
    });

    group.bench_function("invalid_length", |b| {
        b.iter(|| black_box(legacy::valid(black_box(invalid_length))))
    });

    group.bench_function("invalid_chars", |b| {
        b.iter(|| black_box(legacy::valid(black_box(invalid_chars))))
    });

    group.bench_function("zero_task_id", |b| {
        b.iter(|| black_box(legacy::valid(black_box(zero_task))))
    });

    group.finish();
}

/// 基准测试：W3C 头部解析与两种格式的转换
fn bench_w3c(c: &mut Criterion) {
    let tracestate = "aa=1234,sw=cb3468da6f06eefc01,bb=5678,cc=abcd";
    let xtrace = XTrace::parse(XTRACE).unwrap_or_else(|| XTrace::generate(true));
    let state = TraceState::parse(tracestate);

    let mut group = c.benchmark_group("w3c");

    group.bench_function("TraceParent::parse", |b| {
        b.iter(|| black_box(TraceParent::parse(black_box(TRACEPARENT))))
    });

    group.bench_function("TraceState::parse", |b| {
        b.iter(|| black_box(TraceState::parse(black_box(tracestate))))
    });

    group.bench_function("legacy_to_w3c", |b| {
        b.iter(|| {
            let w3c = convert::legacy_to_w3c(black_box(&xtrace), Some(&state));
            black_box(w3c.and_then(|w3c| w3c.serialize()))
        })
    });

    group.bench_function("parse_incoming", |b| {
        let headers: HashMap<String, String> = [
            ("traceparent".to_owned(), TRACEPARENT.to_owned()),
            ("tracestate".to_owned(), tracestate.to_owned()),
        ]
        .into_iter()
        .collect();
        b.iter(|| black_box(parse_incoming(black_box(&headers))))
    });

    group.finish();
}

/// 基准测试：URL 过滤与完整的采样决策
fn bench_sampling(c: &mut Criterion) {
    let settings = TracingSettings::compile(TracingConfig {
        tracing_mode: TracingMode::Disabled,
        transaction_settings: vec![
            UrlRule::regexp("^/api/.*").with_tracing(TracingMode::Enabled),
            UrlRule::regexp("^/api/internal/.*"),
            UrlRule::extensions([".json", ".xml"]),
        ],
        ..TracingConfig::default()
    });
    let engine = SamplingEngine::new(|_: &OracleArgs| OracleResponse {
        sample: 1,
        metrics: 1,
        ..OracleResponse::default()
    });
    let headers: HashMap<String, String> =
        [("x-trace".to_owned(), XTRACE.to_owned())].into_iter().collect();

    let mut group = c.benchmark_group("sampling");

    group.bench_function("url_filters", |b| {
        b.iter(|| {
            let path = black_box("/api/users/42");
            let filters = &settings.url_filters;
            black_box(filters.is_enabled(path) && !filters.is_disabled(path))
        })
    });

    group.bench_function("evaluate", |b| {
        b.iter(|| {
            let url = Some(black_box("/api/users/42"));
            black_box(engine.evaluate(&settings, url, &headers, None))
        })
    });

    group.bench_function("evaluate_asset", |b| {
        b.iter(|| {
            let url = Some(black_box("/assets/app.css"));
            black_box(engine.evaluate(&settings, url, &headers, None))
        })
    });

    group.finish();
}

// 注册基准测试组
criterion_group!(benches, bench_generation, bench_validation, bench_w3c, bench_sampling);

// 运行基准测试
criterion_main!(benches);
