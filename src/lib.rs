//! Tolk: live conversation translation.
//! Library root: module tree and logging setup. The translation service lives in
//! `translate`; `pipeline` wires it between speech recognition and synthesis.

pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod translate;

pub use config::TranslatorConfig;
pub use pipeline::TranslationPipeline;
pub use translate::{TranslateError, TranslateOptions, TranslationClient};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
/// Calling it twice is harmless; the second call is ignored.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tolk=debug"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_ok() {
        tracing::info!(json, "tolk logging initialized");
    }
}
