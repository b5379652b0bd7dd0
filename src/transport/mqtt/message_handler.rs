//! Event routing and inbound message dispatch
//!
//! [`MessageHandler::route_event`] turns raw rumqttc events into routing
//! decisions. Inbound publishes are handed to a [`Dispatcher`] task so the
//! network event loop is never blocked by user command handlers.

use crate::transport::MessageCallback;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Routing decision for a single rumqttc event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    ConnectionAcknowledged { session_present: bool },
    MessageReceived { topic: String, payload: String },
    Disconnected,
    SubscriptionConfirmed { failed: usize },
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Stateless event classification
pub struct MessageHandler;

impl MessageHandler {
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    failed: Self::count_failed_subscriptions(&suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn count_failed_subscriptions(codes: &[SubscribeReasonCode]) -> usize {
        codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .count()
    }
}

/// Sequential inbound dispatcher.
///
/// Messages are delivered to the registered callback one at a time, in arrival
/// order; messages arriving before a callback is registered are dropped.
pub struct Dispatcher {
    callback: Arc<StdMutex<Option<MessageCallback>>>,
    sender: mpsc::Sender<(String, String)>,
    receiver: StdMutex<Option<mpsc::Receiver<(String, String)>>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            callback: Arc::new(StdMutex::new(None)),
            sender,
            receiver: StdMutex::new(Some(receiver)),
        }
    }

    pub fn set_callback(&self, callback: MessageCallback) {
        *lock(&self.callback) = Some(callback);
    }

    pub fn has_callback(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// Start the dispatch task; returns `None` if it was already started
    pub fn spawn(&self) -> Option<JoinHandle<()>> {
        let mut receiver = lock(&self.receiver).take()?;
        let slot = self.callback.clone();

        Some(tokio::spawn(async move {
            while let Some((topic, payload)) = receiver.recv().await {
                let current = lock(&slot).clone();
                match current {
                    Some(callback) => callback(topic, payload).await,
                    None => debug!("Dropping inbound message on {}: no callback set", topic),
                }
            }
        }))
    }

    /// Handle the network loop uses to queue inbound messages
    pub fn forwarder(&self) -> InboundForwarder {
        InboundForwarder {
            sender: self.sender.clone(),
        }
    }

    pub fn forward(&self, topic: String, payload: String) {
        self.forwarder().forward(topic, payload);
    }
}

/// Sending half of the [`Dispatcher`] queue
#[derive(Clone)]
pub struct InboundForwarder {
    sender: mpsc::Sender<(String, String)>,
}

impl InboundForwarder {
    /// Queue an inbound message without blocking the network loop
    pub fn forward(&self, topic: String, payload: String) {
        match self.sender.try_send((topic, payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full((topic, _))) => {
                warn!("Inbound queue full, dropping message on {}", topic);
            }
            Err(mpsc::error::TrySendError::Closed((topic, _))) => {
                warn!("Inbound dispatcher closed, dropping message on {}", topic);
            }
        }
    }
}
