//! Error taxonomy for bridgekit
//!
//! Registration-time errors fail fast at the call site, startup-hook errors abort
//! the run, and everything raised by user handlers at runtime is converted into a
//! published error event instead of propagating.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Error type returned by user handlers (devices, telemetry, commands, hooks).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by user handlers.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors raised synchronously while registering devices, hooks, or adapters
#[derive(Debug, Error, PartialEq)]
pub enum RegistrationError {
    #[error("Registration '{0}' already exists")]
    DuplicateName(String),

    #[error("A root registration already exists ('{existing}'); cannot add '{attempted}'")]
    DuplicateRoot { existing: String, attempted: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid interval for '{name}': interval must be greater than zero")]
    InvalidInterval { name: String },

    #[error("Adapter for port '{0}' is already registered")]
    DuplicateAdapter(String),

    #[error("Adapter catalog entry '{0}' is already registered")]
    DuplicateCatalogEntry(String),

    #[error("Registration '{0}' has the app's name, which the root registration already uses")]
    RootNameCollision(String),

    #[error("Parameter '{parameter}' of handler '{handler}' has no type")]
    UntypedParameter { handler: String, parameter: String },

    #[error("Parameter '{parameter}' of handler '{handler}' has unsupported kind {kind}")]
    UnsupportedParameterKind {
        handler: String,
        parameter: String,
        kind: String,
    },
}

/// Errors raised while resolving a handler's injection plan against live providers
#[derive(Debug, Error, PartialEq)]
pub enum InjectionError {
    #[error("Cannot resolve parameter '{parameter}' of type {type_name}; available providers: [{}]", available.join(", "))]
    UnresolvedType {
        parameter: String,
        type_name: String,
        available: Vec<String>,
    },

    #[error("Argument {index} has type {found}, handler expected {expected}")]
    TypeMismatch {
        index: usize,
        expected: String,
        found: String,
    },
}

/// Top-level error returned from `App::run`
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Injection error: {0}")]
    Injection(#[from] InjectionError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Adapter resolution failed for '{port}': {message}")]
    Adapter { port: String, message: String },

    #[error("Startup hook failed: {0}")]
    StartupHook(#[source] HandlerError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create adapter resolution error
    pub fn adapter<P: Into<String>, S: Into<String>>(port: P, message: S) -> Self {
        Self::Adapter {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for bridgekit operations
pub type BridgeResult<T> = Result<T, BridgeError>;

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Redact credentials and sensitive paths from an error message before it leaves
/// the process, and cap its length.
pub fn sanitize_error_message(message: &str) -> String {
    let redacted = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&redacted, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_error_display() {
        let error = RegistrationError::DuplicateName("sensor".to_string());
        assert_eq!(error.to_string(), "Registration 'sensor' already exists");

        let error = RegistrationError::InvalidInterval {
            name: "temp".to_string(),
        };
        assert!(error.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_unresolved_type_lists_available_providers() {
        let error = InjectionError::UnresolvedType {
            parameter: "gpio".to_string(),
            type_name: "Arc<dyn GpioPort>".to_string(),
            available: vec!["DeviceContext".to_string(), "Settings".to_string()],
        };

        let text = error.to_string();
        assert!(text.contains("gpio"));
        assert!(text.contains("Arc<dyn GpioPort>"));
        assert!(text.contains("DeviceContext, Settings"));
    }

    #[test]
    fn test_bridge_error_from_registration() {
        let error: BridgeError = RegistrationError::DuplicateAdapter("Gpio".to_string()).into();
        assert!(matches!(error, BridgeError::Registration(_)));
    }

    #[test]
    fn test_sanitize_secrets() {
        let sanitized = sanitize_error_message("auth failed: password=hunter2 token: abc123");

        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_sanitize_sensitive_paths() {
        let sanitized = sanitize_error_message("cannot open /home/pi/.ssh/id_rsa");

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("id_rsa"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let sanitized = sanitize_error_message(&"ä".repeat(400));

        assert!(sanitized.len() <= MAX_MESSAGE_LEN);
        assert!(sanitized.ends_with(TRUNCATE_SUFFIX));
    }

    #[test]
    fn test_sanitize_leaves_plain_messages() {
        assert_eq!(sanitize_error_message("sensor timeout"), "sensor timeout");
        assert_eq!(sanitize_error_message(""), "");
    }
}
