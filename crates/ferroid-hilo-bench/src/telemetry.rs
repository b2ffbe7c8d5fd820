//! Console logging for the benchmark binary.
//!
//! Spans and events from `ferroid-hilo` (built with its `tracing` feature)
//! are printed through `tracing_subscriber::fmt`. The filter is read from
//! `RUST_LOG` and defaults to `info`; use `RUST_LOG=ferroid_hilo=debug` to see
//! every renewal.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
