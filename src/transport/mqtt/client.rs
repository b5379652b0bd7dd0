//! Impure I/O operations for the MQTT client
//!
//! Owns the rumqttc event loop in a supervisor task. rumqttc reconnects on the
//! next poll after a network error; the supervisor only paces those retries,
//! tracks connection state and restores subscriptions on every ConnAck.

use super::connection::{configure_mqtt_options, ConnectionState, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor};
use super::message_handler::{Dispatcher, EventRoute, InboundForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::transport::{
    InboundSource, MessageCallback, MqttPort, PortLifecycle, QoS, TransportError, WillMessage,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS as WireQoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const INBOUND_QUEUE_CAPACITY: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// rumqttc-backed [`MqttPort`] with start/stop and inbound dispatch
pub struct MqttClient {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    reconnect_config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    dispatcher: Dispatcher,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Build a client; nothing touches the network until [`PortLifecycle::start`]
    pub fn new(
        config: &MqttSection,
        client_id_base: &str,
        will: Option<WillMessage>,
    ) -> Result<Self, TransportError> {
        let options = configure_mqtt_options(config, client_id_base, will.as_ref())?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            reconnect_config: ReconnectConfig::from_section(config),
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            dispatcher: Dispatcher::new(INBOUND_QUEUE_CAPACITY),
            supervisor: Mutex::new(None),
            dispatch_task: Mutex::new(None),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Topics re-subscribed after every reconnect
    pub async fn tracked_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        let state = self.state_rx.borrow();
        if HealthMonitor::can_publish(&state) {
            Ok(())
        } else {
            Err(TransportError::NotConnected(format!("{:?}", *state)))
        }
    }

    fn transition(
        state_tx: &watch::Sender<ConnectionState>,
        event: ConnectionEvent,
        attempts: u32,
    ) {
        let current = state_tx.borrow().clone();
        let next = HealthMonitor::next_state(&current, event, attempts);
        HealthMonitor::log_transition(&current, &next);
        state_tx.send_replace(next);
    }

    async fn wait_for_connection(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if matches!(*state_rx.borrow_and_update(), ConnectionState::Connected) {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectionFailed(
                        "state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionFailed(
                "no ConnAck received before timeout".to_string(),
            )),
        }
    }

    /// Queue a subscribe for every tracked topic; returns how many were queued
    async fn resubscribe(client: &AsyncClient, subscriptions: &Mutex<Vec<String>>) -> usize {
        let topics = subscriptions.lock().await.clone();
        let mut queued = 0;
        for topic in topics {
            // try_subscribe never waits on the request channel, which this
            // same task drains
            match client.try_subscribe(topic.as_str(), WireQoS::AtLeastOnce) {
                Ok(()) => {
                    queued += 1;
                    debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
                }
                Err(e) => error!("Failed to re-subscribe to {}: {}", topic, e),
            }
        }
        queued
    }

    async fn supervise(
        mut event_loop: EventLoop,
        client: AsyncClient,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        mut shutdown_rx: watch::Receiver<bool>,
        subscriptions: Arc<Mutex<Vec<String>>>,
        inbound: InboundForwarder,
        reconnect_config: ReconnectConfig,
    ) {
        let mut attempts = 0u32;

        loop {
            let event = if *shutdown_rx.borrow() {
                // Keep polling briefly so the queued Disconnect reaches the broker
                match tokio::time::timeout(DRAIN_TIMEOUT, event_loop.poll()).await {
                    Ok(Ok(event)) => event,
                    _ => break,
                }
            } else {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    polled = event_loop.poll() => match polled {
                        Ok(event) => event,
                        Err(e) => {
                            attempts = attempts.saturating_add(1);
                            warn!("MQTT event loop error: {}", e);
                            Self::transition(
                                &state_tx,
                                ConnectionEvent::NetworkError(e.to_string()),
                                attempts,
                            );
                            let delay = HealthMonitor::retry_delay(&reconnect_config, attempts);
                            tokio::select! {
                                _ = shutdown_rx.wait_for(|stop| *stop) => {}
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                    }
                }
            };

            match MessageHandler::route_event(&event) {
                EventRoute::ConnectionAcknowledged { session_present } => {
                    attempts = 0;
                    Self::transition(&state_tx, ConnectionEvent::ConnAckReceived, 0);
                    debug!(target: "mqtt_transport", session_present, "ConnAck received");
                    let queued = Self::resubscribe(&client, &subscriptions).await;
                    debug!(target: "mqtt_transport", queued, "Subscriptions restored");
                }
                EventRoute::MessageReceived { topic, payload } => {
                    debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                    inbound.forward(topic, payload);
                }
                EventRoute::Disconnected => {
                    Self::transition(&state_tx, ConnectionEvent::DisconnectedByBroker, attempts);
                }
                EventRoute::SubscriptionConfirmed { failed } => {
                    if failed > 0 {
                        warn!("Broker rejected {} subscription(s)", failed);
                    } else {
                        debug!(target: "mqtt_transport", "Subscription confirmed");
                    }
                }
                EventRoute::InfrastructureEvent(description) => {
                    debug!(target: "mqtt_transport", "MQTT event: {}", description);
                }
                EventRoute::OutgoingEvent => {}
            }
        }

        Self::transition(&state_tx, ConnectionEvent::StopRequested, attempts);
    }
}

#[async_trait]
impl MqttPort for MqttClient {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.client
            .publish(topic, qos.into(), retain, payload.to_string())
            .await
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    /// Tracked first; sent now when connected, otherwise on the next ConnAck
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        {
            let mut subscriptions = self.subscriptions.lock().await;
            if !subscriptions.iter().any(|existing| existing == topic) {
                subscriptions.push(topic.to_string());
            }
        }

        if self.ensure_connected().is_err() {
            debug!(target: "mqtt_transport", "Subscription to {} deferred until connected", topic);
            return Ok(());
        }
        self.client
            .subscribe(topic, WireQoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    fn lifecycle(&self) -> Option<&dyn PortLifecycle> {
        Some(self)
    }

    fn inbound(&self) -> Option<&dyn InboundSource> {
        Some(self)
    }
}

#[async_trait]
impl PortLifecycle for MqttClient {
    async fn start(&self) -> Result<(), TransportError> {
        let event_loop = self
            .event_loop
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("already started".to_string()))?;

        Self::transition(&self.state_tx, ConnectionEvent::Started, 0);

        *self.dispatch_task.lock().await = self.dispatcher.spawn();
        *self.supervisor.lock().await = Some(tokio::spawn(Self::supervise(
            event_loop,
            self.client.clone(),
            self.state_tx.clone(),
            self.shutdown_tx.subscribe(),
            self.subscriptions.clone(),
            self.dispatcher.forwarder(),
            self.reconnect_config.clone(),
        )));

        info!("Waiting for MQTT ConnAck");
        let timeout = HealthMonitor::connect_timeout(&self.reconnect_config);
        if let Err(e) = Self::wait_for_connection(self.state_rx.clone(), timeout).await {
            // The supervisor keeps retrying; publishes fail fast until it connects
            warn!("MQTT broker not reachable yet, continuing: {}", e);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.shutdown_tx.send_replace(true);

        let connected = HealthMonitor::can_publish(&self.state_rx.borrow());
        if connected {
            if let Err(e) = self.client.disconnect().await {
                debug!(target: "mqtt_transport", "Disconnect request failed: {}", e);
            }
        }

        if let Some(mut handle) = self.supervisor.lock().await.take() {
            match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => info!("MQTT event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("MQTT event loop didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
            }
        }

        // The dispatch queue never closes on its own; in-flight handlers are cut off
        if let Some(handle) = self.dispatch_task.lock().await.take() {
            handle.abort();
        }

        self.state_tx.send_replace(ConnectionState::Stopped);
        info!("MQTT client stopped");
        Ok(())
    }
}

impl InboundSource for MqttClient {
    fn on_message(&self, callback: MessageCallback) {
        self.dispatcher.set_callback(callback);
    }
}
