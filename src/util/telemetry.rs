//! Telemetry helpers for structured logging and tracing.

/// Install a default env-filtered fmt subscriber unless one is already set.
///
/// Applications that configure their own subscriber can skip this entirely.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Same as [`init_tracing`] but emits newline-delimited JSON, for log shippers.
pub fn init_json_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .with_current_span(true)
        .try_init();
}
