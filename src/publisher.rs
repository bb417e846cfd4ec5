// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module publishes JSON messages through a [`Transport`], so publishing connects on
//! first use and survives broker hiccups within the transport's retry bound. Messages are
//! persistent, prioritized, and carry the current OpenTelemetry context in their headers.
//!
//! ```ignore
//! let mut publisher = Publisher::new(configs);
//! let result = async {
//!     for order in orders {
//!         publisher.put_json(&order, "orders").await?;
//!     }
//!     Ok::<_, AmqpError>(())
//! }
//! .await;
//! publisher.close().await;
//! ```

use crate::{
    channel::Connector,
    codec,
    configs::RabbitMQConfigs,
    errors::AmqpError,
    otel,
    transport::Transport,
};
use lapin::{types::ShortString, BasicProperties};
use opentelemetry::Context;
use serde::Serialize;
use std::{fmt::Debug, sync::Arc};
use tracing::debug;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode of messages that survive a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;
/// Routing key nobody consumes from, used by [`Publisher::flush`]
pub const NULL_ROUTING_KEY: &str = "/dev/null";
/// Body published by [`Publisher::flush`]
pub const FLUSH_MESSAGE: &str = "flush";

/// A message ready to be published.
///
/// The body is either a serialized value ([`PublishMessage::json`]) or bytes the caller
/// already encoded ([`PublishMessage::raw`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    body: Vec<u8>,
    routing_key: String,
    exchange: Option<String>,
    priority: u8,
}

impl PublishMessage {
    /// Serializes `value` as the message body.
    pub fn json<T>(value: &T) -> Result<Self, AmqpError>
    where
        T: Serialize + Debug + ?Sized,
    {
        Ok(Self::raw(codec::encode(value)?))
    }

    /// Uses `body` as is.
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        PublishMessage {
            body: body.into(),
            routing_key: String::new(),
            exchange: None,
            priority: 0,
        }
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    /// Overrides the configured default exchange.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = Some(exchange.to_owned());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Publishes messages over its own connection.
pub struct Publisher {
    transport: Transport,
}

impl Publisher {
    /// Creates a publisher; the connection opens on the first `put`.
    pub fn new(configs: RabbitMQConfigs) -> Self {
        Publisher {
            transport: Transport::new(configs),
        }
    }

    pub fn with_connector(configs: RabbitMQConfigs, connector: Arc<dyn Connector>) -> Self {
        Publisher {
            transport: Transport::with_connector(configs, connector),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Publishes `message` to its exchange, or to the default one.
    ///
    /// The message is sent as persistent JSON with a fresh message id and the current
    /// trace context in its headers. Transient failures are retried as described in
    /// [`Transport::invoke`].
    ///
    /// # Parameters
    /// * `message` - Body, routing key and optional exchange and priority
    ///
    /// # Returns
    /// `Ok(())` once the message is handed to the broker, or
    /// [`AmqpError::ConnectionFailure`] when every attempt failed.
    pub async fn put(&mut self, message: PublishMessage) -> Result<(), AmqpError> {
        let exchange = message
            .exchange
            .unwrap_or_else(|| self.transport.default_exchange().to_owned());

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_priority(message.priority)
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(otel::inject_headers(&Context::current()));

        debug!(
            exchange = exchange.as_str(),
            routing_key = message.routing_key.as_str(),
            "publishing message"
        );

        let (routing_key, body) = (message.routing_key, message.body);
        self.transport
            .invoke("basic_publish", |channel| {
                channel.basic_publish(
                    exchange.clone(),
                    routing_key.clone(),
                    body.clone(),
                    properties.clone(),
                )
            })
            .await
    }

    /// Serializes `value` and publishes it with `routing_key` on the default exchange.
    pub async fn put_json<T>(&mut self, value: &T, routing_key: &str) -> Result<(), AmqpError>
    where
        T: Serialize + Debug + ?Sized,
    {
        self.put(PublishMessage::json(value)?.routing_key(routing_key))
            .await
    }

    /// Publishes a throwaway message to a route without consumers.
    pub async fn flush(&mut self) -> Result<(), AmqpError> {
        self.put_json(FLUSH_MESSAGE, NULL_ROUTING_KEY).await
    }

    pub async fn close(&mut self) {
        self.transport.close().await
    }
}
