//! Pure connection configuration for the rumqttc client
//!
//! Broker URL parsing, credentials, Last-Will wiring and reconnect backoff live
//! here so they can be tested without a broker.

use crate::config::MqttSection;
use crate::transport::{QoS, TransportError, WillMessage};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS as WireQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Connection state of the rumqttc client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Not yet started
    Idle,
    /// Waiting for the first ConnAck
    Connecting,
    /// ConnAck received, publishing allowed
    Connected,
    /// Connection lost with reason
    Disconnected(String),
    /// Waiting before the given reconnection attempt
    Reconnecting(u32),
    /// Stopped by the owner
    Stopped,
}

/// Reconnection backoff; delays in milliseconds, the last one is sustained forever
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub backoff_pattern: Vec<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![500, 1000, 2000, 5000, 10000],
        }
    }
}

impl ReconnectConfig {
    pub fn from_section(config: &MqttSection) -> Self {
        if config.reconnect_backoff_ms.is_empty() {
            Self::default()
        } else {
            Self {
                backoff_pattern: config.reconnect_backoff_ms.clone(),
            }
        }
    }

    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.backoff_pattern.len().checked_sub(1) else {
            return Duration::from_secs(1);
        };
        let index = (attempt.saturating_sub(1) as usize).min(last);
        Duration::from_millis(self.backoff_pattern[index])
    }
}

impl From<QoS> for WireQoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => WireQoS::AtMostOnce,
            QoS::AtLeastOnce => WireQoS::AtLeastOnce,
            QoS::ExactlyOnce => WireQoS::ExactlyOnce,
        }
    }
}

/// Broker host and port parsed from the configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, TransportError> {
    let url =
        Url::parse(broker_url).map_err(|_| TransportError::InvalidBrokerUrl(broker_url.into()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(TransportError::InvalidBrokerUrl(broker_url.into())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.into()))?
        .to_string();
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress { host, port, tls })
}

/// Unique client id so restarts never collide with a lingering session
pub fn build_client_id(base: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{base}-{}", &suffix[..8])
}

/// Build rumqttc options from settings and the framework's Last-Will
pub fn configure_mqtt_options(
    config: &MqttSection,
    client_id_base: &str,
    will: Option<&WillMessage>,
) -> Result<MqttOptions, TransportError> {
    let address = parse_broker_url(&config.broker_url)?;
    let base = config.client_id.as_deref().unwrap_or(client_id_base);
    let mut options = MqttOptions::new(build_client_id(base), address.host, address.port);

    if address.tls {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config
        .username_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
    {
        let password = config
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        options.set_credentials(&username, &password);
    }

    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let Some(will) = will {
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            will.qos.into(),
            will.retain,
            None,
        ));
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(url: &str) -> MqttSection {
        MqttSection {
            broker_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_plain_url() {
        let address = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(address.host, "broker.local");
        assert_eq!(address.port, 1883);
        assert!(!address.tls);
    }

    #[test]
    fn test_parse_tls_url_with_port() {
        let address = parse_broker_url("mqtts://broker.local:9883").unwrap();
        assert_eq!(address.port, 9883);
        assert!(address.tls);
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(matches!(
            parse_broker_url("http://broker.local"),
            Err(TransportError::InvalidBrokerUrl(_))
        ));
        assert!(parse_broker_url("not a url").is_err());
    }

    #[test]
    fn test_client_id_is_unique() {
        let a = build_client_id("bridge");
        let b = build_client_id("bridge");
        assert!(a.starts_with("bridge-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_backoff_sustains_last_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![10, 20, 40],
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(10));
        assert_eq!(config.delay_for(3), Duration::from_millis(40));
        assert_eq!(config.delay_for(50), Duration::from_millis(40));
        assert_eq!(config.delay_for(0), Duration::from_millis(10));
    }

    #[test]
    fn test_empty_backoff_falls_back_to_default() {
        let mut config = section("mqtt://localhost");
        config.reconnect_backoff_ms.clear();
        assert_eq!(
            ReconnectConfig::from_section(&config),
            ReconnectConfig::default()
        );
    }

    #[test]
    fn test_configure_options_with_will() {
        let will = WillMessage {
            topic: "home/status".to_string(),
            payload: "offline".to_string(),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        let options = configure_mqtt_options(&section("mqtt://localhost:1883"), "home", Some(&will))
            .unwrap();

        let last_will = options.last_will().expect("will should be set");
        assert!(last_will.retain);
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_configure_options_invalid_url() {
        let result = configure_mqtt_options(&section("invalid-url"), "home", None);
        assert!(matches!(result, Err(TransportError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(WireQoS::from(QoS::AtMostOnce), WireQoS::AtMostOnce);
        assert_eq!(WireQoS::from(QoS::AtLeastOnce), WireQoS::AtLeastOnce);
        assert_eq!(WireQoS::from(QoS::ExactlyOnce), WireQoS::ExactlyOnce);
    }
}
