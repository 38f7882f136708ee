//! Example: propagating the trace context across a service call
//!
//! Parses incoming headers, decides, scopes the context, injects outbound headers and
//! accepts the context returned by the downstream service.

use std::collections::HashMap;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xtrace::{
    continue_service_context, current_context, entry_context, inject_outgoing, parse_incoming,
    with_context, xtrace as legacy, OracleArgs, OracleResponse, SamplingEngine, SettingsStore,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let engine = SamplingEngine::new(|_: &OracleArgs| OracleResponse {
        sample: 1,
        metrics: 1,
        ..OracleResponse::default()
    });
    let store = SettingsStore::default();

    let inbound: HashMap<String, String> = [
        ("traceparent", "00-a462ade6cfe479081764cc476aa98335-cb3468da6f06eefc-01"),
        ("tracestate", "congo=t61rcWkgMzE,sw=cb3468da6f06eefc01"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();

    let incoming = parse_incoming(&inbound);
    let decision = engine.evaluate(&store.snapshot(), Some("/orders"), &inbound, None);
    tracing::info!(%decision, "entry decision");

    let Some(entry) = entry_context(incoming.xtrace, &decision) else {
        tracing::info!("not propagating");
        return;
    };

    with_context(entry, async {
        let mut outbound: HashMap<String, String> = HashMap::new();
        inject_outgoing(current_context(), &incoming, &mut outbound);
        for (name, value) in &outbound {
            tracing::info!(%name, %value, "outbound header");
        }

        // The downstream service answers with the same task and its own edge
        let sent = outbound.get("x-trace").cloned().unwrap_or_default();
        let returned = legacy::replace_edge_id(&sent, "0123456789abcdef");
        match continue_service_context(&sent, &returned) {
            Some(next) => tracing::info!(x_trace = %next, "continued with downstream context"),
            None => tracing::info!("kept local context"),
        }
    })
    .await;
}
