use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;
use crate::SubjectId;

/// Initialize structured logging. RUST_LOG wins over the configured level.
pub fn init_telemetry(observability: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&observability.log_level))?;

    // Logs go to stderr; stdout carries the outbound transport.
    let registry = tracing_subscriber::registry().with(filter);
    if observability.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::info!(json = observability.json, "Relay telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping the handling of one inbound interaction
pub fn create_interaction_span(
    subject_id: SubjectId,
    interaction: &str,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "interaction",
        subject.id = subject_id,
        interaction = interaction,
        correlation.id = correlation_id,
    )
}
