//! # Structured Logging
//!
//! Span macros shared by the harness. Every wait and every backend call runs
//! inside one of these spans so that interleaved log lines from the SMTP
//! accept loop and the polling task can be told apart.

/// Create a tracing span around one poll invocation.
///
/// ```rust,ignore
/// let span = poll_span!("inventory update", Duration::from_secs(300));
/// ```
#[macro_export]
macro_rules! poll_span {
    ($awaited:expr, $timeout:expr) => {
        tracing::info_span!(
            "poll",
            awaited = %$awaited,
            timeout_secs = $timeout.as_secs(),
            poll_id = %uuid::Uuid::new_v4()
        )
    };
    ($awaited:expr, $timeout:expr, $($field:tt)*) => {
        tracing::info_span!(
            "poll",
            awaited = %$awaited,
            timeout_secs = $timeout.as_secs(),
            poll_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a backend API call
#[macro_export]
macro_rules! api_span {
    ($method:expr, $url:expr) => {
        tracing::debug_span!(
            "api_call",
            method = %$method,
            url = %$url,
            status = tracing::field::Empty
        )
    };
}

/// Log configuration at harness startup
pub fn log_config_info(config: &crate::config::HarnessConfig) {
    tracing::info!(
        gateway = %config.backend.gateway_url,
        smtp_mock = %config.smtp.bind_address,
        devices = config.devices.hosts.len(),
        migration_prefix = %config.migration.command_prefix.join(" "),
        "e2e harness configuration"
    );
}
