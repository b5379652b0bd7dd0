//! Structured error events
//!
//! Handler failures are turned into JSON documents and published to
//! `{prefix}/error`, plus `{prefix}/{device}/error` for named registrations.
//! Nothing in here returns an error to the caller.

use crate::error::{sanitize_error_message, InjectionError};
use crate::topics::{Address, TopicLayout};
use crate::transport::{MqttPort, QoS};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, warn};

/// `error_type` used when no mapping matches
pub const DEFAULT_ERROR_TYPE: &str = "handler_error";

/// Source of the wall-clock timestamp stamped on each event
pub type TimestampFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// One published error event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error_type: String,
    pub message: String,
    pub device: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ErrorPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

type Matcher = fn(&(dyn Error + 'static)) -> bool;

/// Maps concrete error types to `error_type` strings.
///
/// Mappings are tried in registration order against the error and then each
/// error in its `source()` chain.
#[derive(Clone)]
pub struct ErrorTypeMap {
    entries: Vec<(Matcher, String)>,
    fallback: String,
}

impl Default for ErrorTypeMap {
    fn default() -> Self {
        Self::new().with::<InjectionError>("injection_error")
    }
}

impl ErrorTypeMap {
    /// Empty map with the default fallback
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            fallback: DEFAULT_ERROR_TYPE.to_string(),
        }
    }

    pub fn with<E: Error + 'static>(mut self, error_type: impl Into<String>) -> Self {
        self.insert::<E>(error_type);
        self
    }

    pub fn insert<E: Error + 'static>(&mut self, error_type: impl Into<String>) {
        fn matches<E: Error + 'static>(error: &(dyn Error + 'static)) -> bool {
            error.is::<E>()
        }
        let matcher: Matcher = matches::<E>;
        self.entries.push((matcher, error_type.into()));
    }

    pub fn with_fallback(mut self, error_type: impl Into<String>) -> Self {
        self.fallback = error_type.into();
        self
    }

    pub fn classify(&self, error: &(dyn Error + 'static)) -> &str {
        let mut current = Some(error);
        while let Some(candidate) = current {
            for (matches, error_type) in &self.entries {
                if matches(candidate) {
                    return error_type;
                }
            }
            current = candidate.source();
        }
        &self.fallback
    }
}

/// Publishes handler failures as [`ErrorPayload`]s
pub struct ErrorPublisher {
    mqtt: Arc<dyn MqttPort>,
    layout: TopicLayout,
    types: ErrorTypeMap,
    timestamp: TimestampFn,
}

impl ErrorPublisher {
    pub fn new(mqtt: Arc<dyn MqttPort>, layout: TopicLayout) -> Self {
        Self {
            mqtt,
            layout,
            types: ErrorTypeMap::default(),
            timestamp: Arc::new(Utc::now),
        }
    }

    pub fn with_type_map(mut self, types: ErrorTypeMap) -> Self {
        self.types = types;
        self
    }

    pub fn with_timestamp(mut self, timestamp: TimestampFn) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the event for `error` without publishing it
    pub fn build_payload(
        &self,
        error: &(dyn Error + 'static),
        device: Option<&str>,
        details: Map<String, Value>,
    ) -> ErrorPayload {
        ErrorPayload {
            error_type: self.types.classify(error).to_string(),
            message: sanitize_error_message(&error.to_string()),
            device: device.map(str::to_string),
            timestamp: (self.timestamp)().to_rfc3339_opts(SecondsFormat::Millis, true),
            details,
        }
    }

    pub async fn publish(
        &self,
        error: &(dyn Error + Send + Sync + 'static),
        device: Option<&str>,
        is_root: bool,
    ) {
        self.publish_with_details(error, device, is_root, Map::new())
            .await;
    }

    /// Publish to the global error topic, and to the device's own error topic
    /// when a named device is given
    pub async fn publish_with_details(
        &self,
        error: &(dyn Error + Send + Sync + 'static),
        device: Option<&str>,
        is_root: bool,
        details: Map<String, Value>,
    ) {
        let payload = self.build_payload(error, device, details);
        let json = match payload.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize error payload: {}", e);
                return;
            }
        };

        let mut topics = vec![self.layout.global_error()];
        if let Some(name) = device {
            if let Some(topic) = self.layout.device_error(Address::new(name, is_root)) {
                topics.push(topic);
            }
        }

        for topic in topics {
            match self
                .mqtt
                .publish(&topic, &json, false, QoS::AtLeastOnce)
                .await
            {
                Ok(()) => debug!(topic = %topic, error_type = %payload.error_type, "Error published"),
                Err(e) => warn!(topic = %topic, "Failed to publish error event: {}", e),
            }
        }
    }
}
