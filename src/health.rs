//! Availability and heartbeat reporting
//!
//! Every publish here is fire-and-forget: port failures are logged and never
//! returned, so reporting can't stall or crash the lifecycle.

use crate::clock::Clock;
use crate::topics::{Address, TopicLayout};
use crate::transport::{MqttPort, QoS, WillMessage};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Status of one tracked device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub name: String,
    pub is_root: bool,
    pub status: String,
}

impl DeviceStatus {
    fn is_at(&self, name: &str, is_root: bool) -> bool {
        self.name == name && self.is_root == is_root
    }
}

/// Publishes device availability and app heartbeats
pub struct HealthReporter {
    mqtt: Arc<dyn MqttPort>,
    layout: TopicLayout,
    version: String,
    clock: Arc<dyn Clock>,
    start_time: f64,
    devices: Mutex<Vec<DeviceStatus>>,
}

impl HealthReporter {
    pub fn new(
        mqtt: Arc<dyn MqttPort>,
        layout: TopicLayout,
        version: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let start_time = clock.now();
        Self {
            mqtt,
            layout,
            version: version.into(),
            clock,
            start_time,
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Last-Will the port must register so the broker marks the app offline
    /// after an unclean disconnect
    pub fn will(layout: &TopicLayout) -> WillMessage {
        WillMessage {
            topic: layout.status(),
            payload: OFFLINE.to_string(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    async fn publish_retained(&self, topic: &str, payload: &str) -> bool {
        match self
            .mqtt
            .publish(topic, payload, true, QoS::AtLeastOnce)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %topic, "Health publish failed: {}", e);
                false
            }
        }
    }

    /// Publish "online" for a device and start tracking it.
    ///
    /// Devices are tracked by address, so a failed publish still gets an
    /// "offline" at shutdown.
    pub async fn publish_device_available(&self, name: &str, is_root: bool) {
        let topic = self.layout.availability(Address::new(name, is_root));
        self.publish_retained(&topic, ONLINE).await;

        let mut devices = self.devices.lock().await;
        match devices.iter_mut().find(|device| device.is_at(name, is_root)) {
            Some(device) => device.status = "ok".to_string(),
            None => devices.push(DeviceStatus {
                name: name.to_string(),
                is_root,
                status: "ok".to_string(),
            }),
        }
        debug!(device = %name, "Device available");
    }

    /// Publish "offline" for a device and stop tracking it
    pub async fn publish_device_unavailable(&self, name: &str, is_root: bool) {
        let topic = self.layout.availability(Address::new(name, is_root));
        self.publish_retained(&topic, OFFLINE).await;
        self.devices
            .lock()
            .await
            .retain(|device| !device.is_at(name, is_root));
        debug!(device = %name, "Device unavailable");
    }

    /// Heartbeat document, devices in registration order
    pub async fn heartbeat_payload(&self) -> Value {
        let devices: Map<String, Value> = self
            .devices
            .lock()
            .await
            .iter()
            .map(|device| (device.name.clone(), json!({ "status": device.status })))
            .collect();

        json!({
            "status": ONLINE,
            "uptime_s": self.clock.now() - self.start_time,
            "version": self.version,
            "devices": devices,
        })
    }

    pub async fn publish_heartbeat(&self) {
        let payload = self.heartbeat_payload().await.to_string();
        if self.publish_retained(&self.layout.status(), &payload).await {
            debug!("Heartbeat published");
        }
    }

    /// Mark every tracked device offline, then the app itself
    pub async fn shutdown(&self) {
        let devices: Vec<DeviceStatus> = self.devices.lock().await.clone();
        for device in &devices {
            let topic = self
                .layout
                .availability(Address::new(&device.name, device.is_root));
            self.publish_retained(&topic, OFFLINE).await;
        }
        self.publish_retained(&self.layout.status(), OFFLINE).await;
        self.devices.lock().await.clear();
    }

    pub async fn tracked_devices(&self) -> Vec<DeviceStatus> {
        self.devices.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MockMqtt};

    fn reporter(mqtt: Arc<MockMqtt>, clock: Arc<ManualClock>) -> HealthReporter {
        HealthReporter::new(mqtt, TopicLayout::new("home"), "1.0.0", clock)
    }

    #[tokio::test]
    async fn test_device_available_is_retained_online() {
        let mqtt = Arc::new(MockMqtt::new());
        let health = reporter(mqtt.clone(), Arc::new(ManualClock::new(0.0)));

        health.publish_device_available("sensor", false).await;
        health.publish_device_available("home", true).await;

        let published = mqtt.get_published_messages().await;
        assert_eq!(published[0].topic, "home/sensor/availability");
        assert_eq!(published[0].payload, ONLINE);
        assert!(published[0].retain);
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert_eq!(published[1].topic, "home/availability");
        assert_eq!(health.tracked_devices().await.len(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_document() {
        let mqtt = Arc::new(MockMqtt::new());
        let clock = Arc::new(ManualClock::new(100.0));
        let health = reporter(mqtt.clone(), clock.clone());

        health.publish_device_available("sensor", false).await;
        health.publish_device_available("blind", false).await;
        clock.advance(12.5);
        health.publish_heartbeat().await;

        let payload = mqtt.get_retained("home/status").await.unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["status"], "online");
        assert_eq!(value["uptime_s"], 12.5);
        assert_eq!(value["version"], "1.0.0");
        assert_eq!(value["devices"]["sensor"]["status"], "ok");

        let names: Vec<&String> = value["devices"].as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["sensor", "blind"]);
    }

    #[tokio::test]
    async fn test_unavailable_stops_tracking() {
        let mqtt = Arc::new(MockMqtt::new());
        let health = reporter(mqtt.clone(), Arc::new(ManualClock::new(0.0)));

        health.publish_device_available("sensor", false).await;
        health.publish_device_unavailable("sensor", false).await;

        assert!(health.tracked_devices().await.is_empty());
        assert_eq!(
            mqtt.get_retained("home/sensor/availability").await.as_deref(),
            Some(OFFLINE)
        );
    }

    #[tokio::test]
    async fn test_shutdown_orders_devices_before_status() {
        let mqtt = Arc::new(MockMqtt::new());
        let health = reporter(mqtt.clone(), Arc::new(ManualClock::new(0.0)));

        health.publish_device_available("a", false).await;
        health.publish_device_available("b", false).await;
        mqtt.clear_history().await;

        health.shutdown().await;

        let topics: Vec<String> = mqtt
            .get_published_messages()
            .await
            .into_iter()
            .map(|message| message.topic)
            .collect();
        assert_eq!(
            topics,
            vec![
                "home/a/availability".to_string(),
                "home/b/availability".to_string(),
                "home/status".to_string(),
            ]
        );
        assert!(health.tracked_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failures_are_swallowed() {
        let mqtt = Arc::new(MockMqtt::with_failure());
        let health = reporter(mqtt.clone(), Arc::new(ManualClock::new(0.0)));

        health.publish_device_available("sensor", false).await;
        health.publish_heartbeat().await;
        // Still running, so still tracked
        assert_eq!(health.tracked_devices().await.len(), 1);

        health.shutdown().await;
        assert!(health.tracked_devices().await.is_empty());
        assert!(mqtt.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_root_and_named_with_same_name_tracked_apart() {
        let mqtt = Arc::new(MockMqtt::new());
        let health = reporter(mqtt.clone(), Arc::new(ManualClock::new(0.0)));

        health.publish_device_available("home", true).await;
        health.publish_device_available("home", false).await;
        assert_eq!(health.tracked_devices().await.len(), 2);

        health.publish_device_unavailable("home", false).await;
        let remaining = health.tracked_devices().await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_root);

        health.shutdown().await;
        assert_eq!(mqtt.get_retained("home/availability").await.as_deref(), Some(OFFLINE));
        assert_eq!(
            mqtt.get_retained("home/home/availability").await.as_deref(),
            Some(OFFLINE)
        );
    }

    #[test]
    fn test_will_targets_status() {
        let will = HealthReporter::will(&TopicLayout::new("home"));
        assert_eq!(will.topic, "home/status");
        assert_eq!(will.payload, OFFLINE);
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
    }
}
