//! JSON `tracing` subscriber driven by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Install the JSON subscriber, filtered by `RUST_LOG` (default [`DEFAULT_FILTER`]).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Like [`init`], but with explicit directives. `RUST_LOG` is ignored.
pub fn init_with_filter(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

fn install(filter: EnvFilter) {
    // Events carry their span context (`order_id`, `key`, ...) as fields.
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_thread_names(true)
        .with_target(true)
        .try_init();

    if installed.is_ok() {
        ::tracing::debug!("tracing subscriber installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_a_no_op() {
        init_with_filter("debug");
        init();
        init_with_filter("not a [valid filter");
        ::tracing::info!(answer = 42, "still logging");
    }
}
