//! Structured logging initialization.
use eyre::{Result, WrapErr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initialize JSON logging (production default).
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true),
        )
        .try_init()
        .map_err(|e| eyre::eyre!("failed to initialize tracing: {e}"))?;
    Ok(())
}

/// Initialize human-readable console logging (debug mode).
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true),
        )
        .try_init()
        .map_err(|e| eyre::eyre!("failed to initialize tracing: {e}"))?;
    Ok(())
}

/// Initialize with an explicit filter directive, e.g. `"myelin=debug"`.
pub fn init_tracing_with_filter(directive: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .wrap_err_with(|| format!("invalid log filter: {directive}"))?;
    if json {
        Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| eyre::eyre!("failed to initialize tracing: {e}"))?;
    } else {
        Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| eyre::eyre!("failed to initialize tracing: {e}"))?;
    }
    Ok(())
}

/// Create a request-scoped span. Status and duration are recorded on
/// completion.
pub fn create_request_span(
    method: &str,
    path: &str,
    request_id: &str,
    client_ip: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        client.ip = client_ip,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create a span for one forwarded backend call.
pub fn create_backend_span(backend: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "backend_request",
        backend.url = backend,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_span_has_expected_name() {
        let span = create_request_span("GET", "/api", "req-1", Some("10.0.0.1"));
        assert_eq!(span.metadata().map(|m| m.name()), Some("request"));
    }

    #[test]
    fn backend_span_has_expected_name() {
        let span = create_backend_span("http://b:1", "POST", "/api");
        assert_eq!(span.metadata().map(|m| m.name()), Some("backend_request"));
    }
}
