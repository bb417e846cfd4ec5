// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module is the seam between the queue client and the broker client library.
//! [`AmqpChannel`] is the set of broker operations the client issues on its single
//! channel, and [`Connector`] opens a fresh connection plus channel. The lapin-backed
//! implementations live here too; everything above this module only sees the traits.

use crate::{codec::DeliveryTag, configs::RabbitMQConfigs, errors::AmqpError, queue::*};
use async_trait::async_trait;
use futures_util::{stream::SelectAll, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

/// A message as handed over by the broker, before decoding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub delivery_tag: DeliveryTag,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: BasicProperties,
}

impl RawMessage {
    pub fn new(delivery_tag: u64, body: &[u8]) -> Self {
        RawMessage {
            delivery_tag: DeliveryTag::new(delivery_tag),
            routing_key: String::new(),
            body: body.to_vec(),
            properties: BasicProperties::default(),
        }
    }
}

impl From<Delivery> for RawMessage {
    fn from(delivery: Delivery) -> Self {
        RawMessage {
            delivery_tag: DeliveryTag::new(delivery.delivery_tag),
            routing_key: delivery.routing_key.to_string(),
            body: delivery.data,
            properties: delivery.properties,
        }
    }
}

/// Broker operations issued on one channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn queue_declare(&self, def: QueueDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(&self, binding: QueueBinding) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Fetches one message, `None` when the queue is empty.
    async fn basic_get(&self, queue: String) -> Result<Option<RawMessage>, AmqpError>;

    /// Limits unacknowledged deliveries to `prefetch_count`, whatever their size.
    async fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), AmqpError>;

    /// Registers a consumer on `queue`; its deliveries come out of `next_delivery`.
    async fn basic_consume(&self, queue: String) -> Result<(), AmqpError>;

    /// Waits for the next delivery of any registered consumer.
    async fn next_delivery(&self) -> Result<RawMessage, AmqpError>;

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), AmqpError>;

    async fn basic_reject(&self, delivery_tag: DeliveryTag, requeue: bool)
        -> Result<(), AmqpError>;

    /// Closes the channel together with its connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens connections to the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, cfg: &RabbitMQConfigs) -> Result<Box<dyn AmqpChannel>, AmqpError>;
}

/// [`Connector`] backed by lapin.
#[derive(Debug, Default, Clone, Copy)]
pub struct LapinConnector;

#[async_trait]
impl Connector for LapinConnector {
    async fn connect(&self, cfg: &RabbitMQConfigs) -> Result<Box<dyn AmqpChannel>, AmqpError> {
        let (conn, channel) = new_amqp_channel(cfg).await?;
        Ok(Box::new(LapinChannel::new(conn, channel)))
    }
}

/// Creates a new AMQP connection and a channel on it.
///
/// # Parameters
/// * `cfg` - Connection details: host, port, credentials, vhost and heartbeat
///
/// # Returns
/// * `Result<(Connection, Channel), AmqpError>` - the connection and its channel on
///   success, or an error on failure.
pub async fn new_amqp_channel(cfg: &RabbitMQConfigs) -> Result<(Connection, Channel), AmqpError> {
    debug!(host = cfg.host.as_str(), vhost = cfg.vhost.as_str(), "creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((conn, c))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }
}

/// [`AmqpChannel`] over a lapin connection and channel.
///
/// Consumers registered with `basic_consume` are merged into a single stream, so that
/// `next_delivery` drains exactly one delivery whichever queue it came from.
pub struct LapinChannel {
    connection: Connection,
    channel: Channel,
    consumers: Mutex<SelectAll<Consumer>>,
}

impl LapinChannel {
    pub fn new(connection: Connection, channel: Channel) -> Self {
        LapinChannel {
            connection,
            channel,
            consumers: Mutex::new(SelectAll::new()),
        }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn queue_declare(&self, def: QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    queue = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name, err.to_string()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_bind(&self, binding: QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name,
                    binding.queue_name,
                    err.to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn basic_publish(
        &self,
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                &exchange,
                &routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_get(&self, queue: String) -> Result<Option<RawMessage>, AmqpError> {
        match self
            .channel
            .basic_get(&queue, BasicGetOptions { no_ack: false })
            .await
        {
            Ok(message) => Ok(message.map(|m| RawMessage::from(m.delivery))),
            Err(err) => {
                error!(error = err.to_string(), queue = queue.as_str(), "error getting message");
                Err(AmqpError::GetMessageError(queue, err.to_string()))
            }
        }
    }

    async fn basic_qos(&self, prefetch_count: u16, global: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn basic_consume(&self, queue: String) -> Result<(), AmqpError> {
        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());

        let consumer = match self
            .channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue, err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        self.consumers.lock().await.push(consumer);
        Ok(())
    }

    async fn next_delivery(&self) -> Result<RawMessage, AmqpError> {
        let mut consumers = self.consumers.lock().await;
        if consumers.is_empty() {
            return Err(AmqpError::ConsumerError(
                "no consumer registered on the channel".to_owned(),
            ));
        }

        match consumers.next().await {
            Some(Ok(delivery)) => Ok(RawMessage::from(delivery)),
            Some(Err(err)) => {
                error!(error = err.to_string(), "errors consume msg");
                Err(AmqpError::ConsumerError(err.to_string()))
            }
            None => Err(AmqpError::ConsumerError("consumer stream closed".to_owned())),
        }
    }

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag.value(), BasicAckOptions { multiple: false })
            .await
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }

    async fn basic_reject(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_reject(delivery_tag.value(), BasicRejectOptions { requeue })
            .await
            .map_err(|err| AmqpError::RejectMessageError(err.to_string()))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        debug!("closing amqp connection");
        self.connection
            .close(200, "closing")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}
