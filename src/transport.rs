// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! The [`Transport`] owns the single connection and channel of a publisher or subscriber.
//! It connects lazily: every broker operation goes through [`Transport::invoke`], which
//! opens the connection when the transport is disconnected and, on a transient broker
//! error, reconnects and tries again up to [`MAX_TRIES`] attempts in total.
//!
//! Acknowledgments are the exception. A delivery can only be settled on the channel that
//! delivered it, so `ack` and `reject` never reconnect and never fail: whatever goes wrong
//! is logged and dropped.

use crate::{
    channel::{AmqpChannel, Connector, LapinConnector, RawMessage},
    codec::{self, DeliveryTag, Envelope},
    configs::RabbitMQConfigs,
    errors::AmqpError,
    queue::{QueueBinding, QueueDefinition, NOTIFICATIONS_EXCHANGE},
};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Attempts made by [`Transport::invoke`] before giving up.
pub const MAX_TRIES: usize = 3;

enum ConnectionState {
    Disconnected,
    Connected(Box<dyn AmqpChannel>),
}

/// Connection state of one publisher or subscriber.
pub struct Transport {
    configs: RabbitMQConfigs,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    subscription: Option<String>,
    default_queue_name: Option<String>,
}

impl Transport {
    /// Creates a disconnected transport talking to the broker through lapin.
    pub fn new(configs: RabbitMQConfigs) -> Self {
        Self::with_connector(configs, Arc::new(LapinConnector))
    }

    pub fn with_connector(configs: RabbitMQConfigs, connector: Arc<dyn Connector>) -> Self {
        Transport {
            default_queue_name: configs.queue_name.clone(),
            configs,
            connector,
            state: ConnectionState::Disconnected,
            subscription: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_))
    }

    /// Routing key of the active subscription.
    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    /// Queue used when an operation names none. Replaced by the generated subscription
    /// queue on every connect once `subscribe` was called.
    pub fn default_queue_name(&self) -> Option<&str> {
        self.default_queue_name.as_deref()
    }

    /// Exchange used when a message names none.
    pub fn default_exchange(&self) -> &str {
        self.configs.exchange.as_deref().unwrap_or_default()
    }

    /// Opens a fresh connection and channel, closing the current ones first.
    ///
    /// With an active subscription a new private queue is declared and bound; the queue
    /// of the previous connection goes away with it, together with anything still on it.
    pub async fn connect(&mut self) -> Result<(), AmqpError> {
        self.close().await;

        let channel = self.connector.connect(&self.configs).await?;

        if let Some(routing_key) = self.subscription.clone() {
            match declare_subscription(channel.as_ref(), &routing_key).await {
                Ok(queue_name) => self.default_queue_name = Some(queue_name),
                Err(err) => {
                    if let Err(close_err) = channel.close().await {
                        warn!(error = close_err.to_string(), "failure to close the connection");
                    }
                    return Err(err);
                }
            }
        }

        self.state = ConnectionState::Connected(channel);
        Ok(())
    }

    /// Closes the connection. Closing a closed transport does nothing; close failures
    /// are only logged.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Disconnected);

        if let ConnectionState::Connected(channel) = state {
            if let Err(err) = channel.close().await {
                warn!(error = err.to_string(), "failure to close the connection");
            }
        }
    }

    /// Subscribes to `routing_key` on the notifications exchange and reconnects, which
    /// declares the subscription queue.
    pub async fn subscribe(&mut self, routing_key: &str) -> Result<(), AmqpError> {
        self.subscription = Some(routing_key.to_owned());
        self.connect().await
    }

    /// Runs `op` on the channel, connecting first when disconnected.
    ///
    /// Transient errors trigger a reconnect and a new attempt; after [`MAX_TRIES`] failed
    /// attempts the last error is returned wrapped in [`AmqpError::ConnectionFailure`].
    /// Any other error is returned as is on the first occurrence.
    ///
    /// # Parameters
    /// * `operation` - Name of the operation, for the logs
    /// * `op` - The broker call; it may run several times, once per attempt
    ///
    /// # Returns
    /// The value of the first successful attempt.
    pub async fn invoke<T, F>(&mut self, operation: &str, op: F) -> Result<T, AmqpError>
    where
        T: Send,
        F: for<'c> Fn(&'c dyn AmqpChannel) -> BoxFuture<'c, Result<T, AmqpError>> + Send,
    {
        let mut attempt = 1;

        loop {
            let result = match self.channel().await {
                Ok(channel) => op(channel).await,
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            if attempt >= MAX_TRIES {
                error!(
                    error = err.to_string(),
                    operation, attempt, "giving up on broker operation"
                );
                return Err(AmqpError::ConnectionFailure {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                error = err.to_string(),
                operation, attempt, "broker operation failed, reconnecting"
            );
            attempt += 1;
            self.close().await;
        }
    }

    /// Acknowledges a delivery. Never fails.
    pub async fn ack(&self, delivery_tag: DeliveryTag) {
        let Some(channel) = self.connected_channel() else {
            warn!(delivery_tag = delivery_tag.value(), "no channel to ack message on");
            return;
        };

        settled(channel.basic_ack(delivery_tag).await, "ack", delivery_tag);
    }

    /// Rejects a delivery, putting it back at the head of its queue. Never fails.
    pub async fn reject(&self, delivery_tag: DeliveryTag) {
        let Some(channel) = self.connected_channel() else {
            warn!(delivery_tag = delivery_tag.value(), "no channel to reject message on");
            return;
        };

        settled(
            channel.basic_reject(delivery_tag, true).await,
            "reject",
            delivery_tag,
        );
    }

    /// Decodes an inbound message. Poison messages are acked and `None` is returned.
    pub(crate) async fn parse_message(&self, message: &RawMessage) -> Option<Envelope> {
        match codec::decode(&message.body) {
            Ok(envelope) => Some(envelope),
            Err(poison) => {
                warn!(
                    error = poison.to_string(),
                    delivery_tag = message.delivery_tag.value(),
                    "removing malformed message from queue"
                );
                self.ack(message.delivery_tag).await;
                None
            }
        }
    }

    /// The channel, connecting first when disconnected.
    pub(crate) async fn channel(&mut self) -> Result<&dyn AmqpChannel, AmqpError> {
        if let ConnectionState::Disconnected = self.state {
            self.connect().await?;
        }

        self.connected_channel().ok_or(AmqpError::InternalError)
    }

    /// The channel if connected, without trying to connect.
    pub(crate) fn connected_channel(&self) -> Option<&dyn AmqpChannel> {
        match &self.state {
            ConnectionState::Connected(channel) => Some(channel.as_ref()),
            ConnectionState::Disconnected => None,
        }
    }
}

/// Fire-and-forget result of an ack or reject: logged, then dropped.
fn settled(result: Result<(), AmqpError>, operation: &str, delivery_tag: DeliveryTag) {
    if let Err(err) = result {
        warn!(
            error = err.to_string(),
            operation,
            delivery_tag = delivery_tag.value(),
            "message cannot be settled on another channel, dropping"
        );
    }
}

async fn declare_subscription(
    channel: &dyn AmqpChannel,
    routing_key: &str,
) -> Result<String, AmqpError> {
    let def = QueueDefinition::subscription(routing_key);
    let queue_name = def.name().to_owned();

    channel.queue_declare(def).await?;
    channel
        .queue_bind(
            QueueBinding::new(&queue_name)
                .exchange(NOTIFICATIONS_EXCHANGE)
                .routing_key(routing_key),
        )
        .await?;

    debug!(queue = queue_name.as_str(), routing_key, "subscription queue bound");
    Ok(queue_name)
}
