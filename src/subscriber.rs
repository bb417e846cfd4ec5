// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Subscriber
//!
//! Two ways to read messages, both holding at most one unacknowledged message at a time:
//!
//! - polling with [`Subscriber::get`], optionally waiting until a message shows up;
//! - callbacks with [`Subscriber::setup_consumer`], driven one delivery at a time by
//!   [`Subscriber::consume`].
//!
//! Every message returned or handed to a callback must be settled exactly once with
//! [`Subscriber::ack`] or [`Subscriber::reject`].

use crate::{
    channel::Connector,
    codec::{DeliveryTag, Envelope},
    configs::RabbitMQConfigs,
    consumer::{dispatch, ConsumerHandler},
    errors::AmqpError,
    transport::Transport,
};
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Pause between two polls of an empty queue in blocking `get`.
pub const GET_BACKOFF: Duration = Duration::from_millis(500);

/// Deliveries allowed in flight per channel.
const PREFETCH_COUNT: u16 = 1;

/// Reads messages over its own connection.
pub struct Subscriber {
    transport: Transport,
    handler: Option<Arc<dyn ConsumerHandler>>,
}

impl Subscriber {
    /// Creates a subscriber; the connection opens on first use.
    pub fn new(configs: RabbitMQConfigs) -> Self {
        Subscriber {
            transport: Transport::new(configs),
            handler: None,
        }
    }

    pub fn with_connector(configs: RabbitMQConfigs, connector: Arc<dyn Connector>) -> Self {
        Subscriber {
            transport: Transport::with_connector(configs, connector),
            handler: None,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Binds a private queue to `routing_key` on the notifications exchange and makes it
    /// the default queue.
    pub async fn subscribe(&mut self, routing_key: &str) -> Result<(), AmqpError> {
        self.transport.subscribe(routing_key).await
    }

    /// Takes one message from `queue_name`, or from the default queue.
    ///
    /// Malformed messages are acked and skipped. On an empty queue, `block` waits
    /// [`GET_BACKOFF`] and polls again until a message arrives; otherwise `None` is
    /// returned right away.
    ///
    /// The queue name is resolved once per poll. If a transient failure reconnects a
    /// subscribed transport in the middle of a poll, the retries still target the
    /// subscription queue of the dropped connection and usually end in
    /// [`AmqpError::ConnectionFailure`]; the next call picks up the new queue.
    ///
    /// # Parameters
    /// * `queue_name` - Queue to read from; `None` or an empty name means the default queue
    /// * `block` - Whether to wait for a message when the queue is empty
    ///
    /// # Returns
    /// The decoded message and the tag to settle it with, or `None` when the queue is
    /// empty and `block` is false.
    pub async fn get(
        &mut self,
        queue_name: Option<&str>,
        block: bool,
    ) -> Result<Option<(Envelope, DeliveryTag)>, AmqpError> {
        loop {
            let queue = queue_name
                .filter(|name| !name.is_empty())
                .or(self.transport.default_queue_name())
                .ok_or(AmqpError::MissingQueueName)?
                .to_owned();

            let message = self
                .transport
                .invoke("basic_get", |channel| channel.basic_get(queue.clone()))
                .await?;

            if let Some(message) = message {
                if let Some(envelope) = self.transport.parse_message(&message).await {
                    return Ok(Some((envelope, message.delivery_tag)));
                }
                continue;
            }

            if !block {
                return Ok(None);
            }

            debug!(queue = queue.as_str(), "queue is empty, waiting");
            tokio::time::sleep(GET_BACKOFF).await;
        }
    }

    /// Registers `handler` on `queue_names`, or on the default queue when none is given,
    /// with a prefetch of one unacknowledged message for the whole channel.
    ///
    /// The default queue is resolved after the connection is up, so a subscription that
    /// failed to declare its queue earlier gets it declared here.
    ///
    /// # Parameters
    /// * `handler` - Callback run by [`Subscriber::consume`] for every delivery
    /// * `queue_names` - Queues to consume from; `None` or an empty slice means the default queue
    pub async fn setup_consumer(
        &mut self,
        handler: Arc<dyn ConsumerHandler>,
        queue_names: Option<&[&str]>,
    ) -> Result<(), AmqpError> {
        self.transport
            .invoke("basic_qos", |channel| channel.basic_qos(PREFETCH_COUNT, true))
            .await?;

        let queues: Vec<String> = match queue_names {
            Some(names) if !names.is_empty() => names.iter().map(|n| n.to_string()).collect(),
            _ => vec![self
                .transport
                .default_queue_name()
                .ok_or(AmqpError::MissingQueueName)?
                .to_owned()],
        };

        let channel = self.transport.channel().await?;
        for queue in queues {
            debug!(queue = queue.as_str(), "registering consumer");
            channel.basic_consume(queue).await?;
        }

        self.handler = Some(handler);
        Ok(())
    }

    /// Waits for one delivery of the registered consumers and runs the handler on it.
    ///
    /// Call it in a loop to keep consuming.
    pub async fn consume(&self) -> Result<(), AmqpError> {
        let handler = self
            .handler
            .clone()
            .ok_or(AmqpError::ConsumerNotConfigured)?;
        let channel = self
            .transport
            .connected_channel()
            .ok_or(AmqpError::ConsumerNotConfigured)?;

        let message = channel.next_delivery().await?;
        dispatch(self, handler.as_ref(), message).await;
        Ok(())
    }

    /// Acknowledges a message. Never fails.
    pub async fn ack(&self, delivery_tag: DeliveryTag) {
        self.transport.ack(delivery_tag).await
    }

    /// Returns a message to the head of its queue. Never fails.
    pub async fn reject(&self, delivery_tag: DeliveryTag) {
        self.transport.reject(delivery_tag).await
    }

    pub async fn close(&mut self) {
        self.transport.close().await
    }
}
