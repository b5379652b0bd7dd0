//! Mock implementations for testing
//!
//! Provides a recording MQTT port, a no-op port and a hand-driven clock so the
//! whole lifecycle can run in-process without a broker.

use crate::clock::Clock;
use crate::transport::{
    InboundSource, MessageCallback, MqttPort, PortLifecycle, QoS, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

/// One publish seen by [`MockMqtt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub qos: QoS,
}

/// Entry in the ordered call log of [`MockMqtt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Started,
    Published(String),
    Subscribed(String),
    Stopped,
}

/// Recording MQTT port.
///
/// Retained publishes are kept per topic like a broker would (an empty retained
/// payload clears the topic). Lifecycle support is opt-in through
/// [`MockMqtt::with_lifecycle`] so both port shapes can be exercised.
#[derive(Default)]
pub struct MockMqtt {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub retained: Arc<Mutex<HashMap<String, String>>>,
    pub events: Arc<Mutex<Vec<MockEvent>>>,
    pub should_fail: AtomicBool,
    failing_topics: Mutex<HashSet<String>>,
    has_lifecycle: bool,
    callback: StdMutex<Option<MessageCallback>>,
}

impl MockMqtt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port that also exposes start/stop
    pub fn with_lifecycle() -> Self {
        Self {
            has_lifecycle: true,
            ..Default::default()
        }
    }

    /// Port whose publishes always fail
    pub fn with_failure() -> Self {
        let mock = Self::default();
        mock.should_fail.store(true, Ordering::SeqCst);
        mock
    }

    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    /// Make publishes to one topic fail
    pub async fn fail_topic(&self, topic: impl Into<String>) {
        self.failing_topics.lock().await.insert(topic.into());
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Payloads published to `topic`, oldest first
    pub async fn get_published_to(&self, topic: &str) -> Vec<String> {
        self.published_messages
            .lock()
            .await
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| message.payload.clone())
            .collect()
    }

    pub async fn get_retained(&self, topic: &str) -> Option<String> {
        self.retained.lock().await.get(topic).cloned()
    }

    pub async fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn get_events(&self) -> Vec<MockEvent> {
        self.events.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.events.lock().await.clear();
    }

    pub fn has_callback(&self) -> bool {
        self.callback_slot().is_some()
    }

    fn callback_slot(&self) -> Option<MessageCallback> {
        self.callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Feed an inbound message to the registered callback, as the broker would
    pub async fn deliver(&self, topic: &str, payload: &str) -> bool {
        match self.callback_slot() {
            Some(callback) => {
                callback(topic.to_string(), payload.to_string()).await;
                true
            }
            None => false,
        }
    }

    /// Poll until at least `count` messages were published to `topic`
    pub async fn wait_for_publishes(&self, topic: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.get_published_to(topic).await.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until an inbound callback has been registered
    pub async fn wait_for_callback(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.has_callback() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl MqttPort for MockMqtt {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError> {
        if self.should_fail.load(Ordering::SeqCst)
            || self.failing_topics.lock().await.contains(topic)
        {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                source: "mock publish failure".into(),
            });
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
            qos,
        });
        self.events
            .lock()
            .await
            .push(MockEvent::Published(topic.to_string()));

        if retain {
            let mut retained = self.retained.lock().await;
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), payload.to_string());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().await.push(topic.to_string());
        self.events
            .lock()
            .await
            .push(MockEvent::Subscribed(topic.to_string()));
        Ok(())
    }

    fn lifecycle(&self) -> Option<&dyn PortLifecycle> {
        if self.has_lifecycle {
            Some(self)
        } else {
            None
        }
    }

    fn inbound(&self) -> Option<&dyn InboundSource> {
        Some(self)
    }
}

#[async_trait]
impl PortLifecycle for MockMqtt {
    async fn start(&self) -> Result<(), TransportError> {
        self.events.lock().await.push(MockEvent::Started);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.events.lock().await.push(MockEvent::Stopped);
        Ok(())
    }
}

impl InboundSource for MockMqtt {
    fn on_message(&self, callback: MessageCallback) {
        *self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(callback);
    }
}

/// Port that accepts and discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMqtt;

#[async_trait]
impl MqttPort for NullMqtt {
    async fn publish(&self, _: &str, _: &str, _: bool, _: QoS) -> Result<(), TransportError> {
        Ok(())
    }

    async fn subscribe(&self, _: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxFuture;

    #[tokio::test]
    async fn test_mock_records_and_retains() {
        let mock = MockMqtt::new();
        mock.publish("a/state", "1", true, QoS::AtLeastOnce)
            .await
            .unwrap();
        mock.publish("a/state", "2", true, QoS::AtLeastOnce)
            .await
            .unwrap();
        mock.publish("a/error", "boom", false, QoS::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(mock.get_published_to("a/state").await, vec!["1", "2"]);
        assert_eq!(mock.get_retained("a/state").await.as_deref(), Some("2"));
        assert_eq!(mock.get_retained("a/error").await, None);

        mock.publish("a/state", "", true, QoS::AtLeastOnce)
            .await
            .unwrap();
        assert_eq!(mock.get_retained("a/state").await, None);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let mock = MockMqtt::with_failure();
        assert!(mock
            .publish("a/state", "1", true, QoS::AtLeastOnce)
            .await
            .is_err());

        mock.set_failing(false);
        mock.fail_topic("a/error").await;
        assert!(mock
            .publish("a/state", "1", true, QoS::AtLeastOnce)
            .await
            .is_ok());
        assert!(mock
            .publish("a/error", "x", false, QoS::AtLeastOnce)
            .await
            .is_err());
        assert_eq!(mock.get_published_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_lifecycle_is_opt_in() {
        assert!(MockMqtt::new().lifecycle().is_none());
        let mock = MockMqtt::with_lifecycle();
        let lifecycle = mock.lifecycle().expect("lifecycle");
        lifecycle.start().await.unwrap();
        lifecycle.stop().await.unwrap();
        assert_eq!(
            mock.get_events().await,
            vec![MockEvent::Started, MockEvent::Stopped]
        );
    }

    #[tokio::test]
    async fn test_deliver_requires_callback() {
        let mock = MockMqtt::new();
        assert!(!mock.deliver("a/set", "ON").await);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: MessageCallback =
            Arc::new(move |topic: String, payload: String| -> BoxFuture<'static, ()> {
                let sink = sink.clone();
                Box::pin(async move { sink.lock().await.push((topic, payload)) })
            });
        mock.inbound().expect("inbound").on_message(callback);

        assert!(mock.deliver("a/set", "ON").await);
        assert_eq!(
            seen.lock().await.clone(),
            vec![("a/set".to_string(), "ON".to_string())]
        );
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10.0);
        assert_eq!(clock.now(), 10.0);
        clock.advance(2.5);
        assert_eq!(clock.now(), 12.5);
        clock.set(1.0);
        assert_eq!(clock.now(), 1.0);
    }
}
