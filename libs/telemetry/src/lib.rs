//! Lightweight telemetry helpers for Peregrine services: a shared tracing
//! subscriber configured from `RUST_LOG`, plus thin metric recorders used at
//! the dispatch and search boundaries.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Installs the global tracing subscriber. Safe to call more than once; only
/// the first call wins.
pub fn install(service_name: &str) -> Result<()> {
    INSTALLED.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to install subscriber: {err}"))?;
        tracing::info!(service = service_name, "telemetry installed");
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}

/// Records a counter with workspace and channel labels.
pub fn record_send_outcome(kind: &'static str, channel: &'static str) {
    metrics::counter!("peregrine_send_outcome", "kind" => kind, "channel" => channel).increment(1);
}

/// Records one delivery-search invocation and its page size.
pub fn record_search(page_len: usize) {
    metrics::counter!("peregrine_delivery_search").increment(1);
    metrics::histogram!("peregrine_delivery_search_page").record(page_len as f64);
}
