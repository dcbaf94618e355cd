//! Logging initialization
//!
//! Provisioner binaries call [`init_tracing`] once at startup. The filter
//! comes from `RUST_LOG` when set; output is JSON when `LOG_FORMAT=json`
//! so log shippers in the cluster can parse it.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log output format
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_DIRECTIVE: &str = "info,provisioner_common=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded at startup (e.g., "aws-provisioner")
    pub service_name: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Filter directive used when `RUST_LOG` is not set
    pub default_directive: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "provisioner".to_string(),
            json: json_from_env(std::env::var(LOG_FORMAT_ENV).ok().as_deref()),
            default_directive: DEFAULT_DIRECTIVE.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Default configuration for the named service
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }
}

fn json_from_env(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

/// Install the global tracing subscriber.
///
/// # Errors
/// `TelemetryError::SubscriberInit` if a subscriber is already installed.
pub fn init_tracing(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directive));

    // Option<Layer> implements Layer, so exactly one of these formats output
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
    });
    let plain_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    tracing::info!(service = %config.service_name, json = config.json, "Telemetry initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_json_is_case_insensitive() {
        assert!(json_from_env(Some("json")));
        assert!(json_from_env(Some(" JSON ")));
        assert!(!json_from_env(Some("text")));
        assert!(!json_from_env(Some("")));
        assert!(!json_from_env(None));
    }

    #[test]
    fn for_service_keeps_defaults() {
        let config = TelemetryConfig::for_service("aws-provisioner");
        assert_eq!(config.service_name, "aws-provisioner");
        assert_eq!(config.default_directive, DEFAULT_DIRECTIVE);
    }

    #[test]
    fn second_init_fails() {
        let config = TelemetryConfig {
            service_name: "test".to_string(),
            json: false,
            default_directive: "warn".to_string(),
        };
        // Another test in this binary may have installed one first
        let _ = init_tracing(config.clone());
        assert!(matches!(
            init_tracing(config),
            Err(TelemetryError::SubscriberInit(_))
        ));
    }
}
