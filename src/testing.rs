// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker for end-to-end tests of the publisher and subscriber.

use crate::{
    channel::{AmqpChannel, Connector, RawMessage},
    codec::DeliveryTag,
    configs::RabbitMQConfigs,
    errors::AmqpError,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::BasicProperties;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<RawMessage>>,
    bindings: Vec<QueueBinding>,
    unacked: HashMap<DeliveryTag, (String, RawMessage)>,
    next_tag: u64,
}

impl BrokerState {
    fn deliver(&mut self, queue: &str) -> Option<RawMessage> {
        let mut message = self.queues.get_mut(queue)?.pop_front()?;
        self.next_tag += 1;
        message.delivery_tag = DeliveryTag::new(self.next_tag);
        self.unacked
            .insert(message.delivery_tag, (queue.to_owned(), message.clone()));
        Some(message)
    }
}

/// Shared broker state; every `connect` opens a new channel on it.
#[derive(Clone, Default)]
pub(crate) struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub(crate) fn declare(&self, queue: &str) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_owned())
            .or_default();
    }

    pub(crate) fn ready(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub(crate) fn unacked(&self) -> usize {
        self.state.lock().unwrap().unacked.len()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, _cfg: &RabbitMQConfigs) -> Result<Box<dyn AmqpChannel>, AmqpError> {
        Ok(Box::new(InMemoryChannel {
            broker: self.clone(),
            consumers: Mutex::new(vec![]),
        }))
    }
}

struct InMemoryChannel {
    broker: InMemoryBroker,
    consumers: Mutex<Vec<String>>,
}

#[async_trait]
impl AmqpChannel for InMemoryChannel {
    async fn queue_declare(&self, def: QueueDefinition) -> Result<(), AmqpError> {
        self.broker.declare(def.name());
        Ok(())
    }

    async fn queue_bind(&self, binding: QueueBinding) -> Result<(), AmqpError> {
        self.broker.state.lock().unwrap().bindings.push(binding);
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().unwrap();

        let targets: Vec<String> = if exchange.is_empty() {
            vec![routing_key.clone()]
        } else {
            state
                .bindings
                .iter()
                .filter(|b| b.exchange_name() == exchange && b.key() == routing_key)
                .map(|b| b.queue_name().to_owned())
                .collect()
        };

        for target in targets {
            if let Some(queue) = state.queues.get_mut(&target) {
                queue.push_back(RawMessage {
                    delivery_tag: DeliveryTag::new(0),
                    routing_key: routing_key.clone(),
                    body: payload.clone(),
                    properties: properties.clone(),
                });
            }
        }

        Ok(())
    }

    async fn basic_get(&self, queue: String) -> Result<Option<RawMessage>, AmqpError> {
        let mut state = self.broker.state.lock().unwrap();
        if !state.queues.contains_key(&queue) {
            return Err(AmqpError::GetMessageError(queue, "NOT_FOUND".to_owned()));
        }
        Ok(state.deliver(&queue))
    }

    async fn basic_qos(&self, _prefetch_count: u16, _global: bool) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn basic_consume(&self, queue: String) -> Result<(), AmqpError> {
        self.consumers.lock().unwrap().push(queue);
        Ok(())
    }

    async fn next_delivery(&self) -> Result<RawMessage, AmqpError> {
        let consumers = self.consumers.lock().unwrap().clone();
        let mut state = self.broker.state.lock().unwrap();

        consumers
            .iter()
            .find_map(|queue| state.deliver(queue))
            .ok_or_else(|| AmqpError::ConsumerError("nothing to deliver".to_owned()))
    }

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), AmqpError> {
        match self.broker.state.lock().unwrap().unacked.remove(&delivery_tag) {
            Some(_) => Ok(()),
            None => Err(AmqpError::AckMessageError(format!(
                "unknown delivery tag {}",
                delivery_tag
            ))),
        }
    }

    async fn basic_reject(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().unwrap();
        let Some((queue, message)) = state.unacked.remove(&delivery_tag) else {
            return Err(AmqpError::RejectMessageError(format!(
                "unknown delivery tag {}",
                delivery_tag
            )));
        };

        if requeue {
            if let Some(queue) = state.queues.get_mut(&queue) {
                queue.push_front(message);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::Envelope,
        consumer::ConsumerHandler,
        publisher::{PublishMessage, Publisher},
        queue::NOTIFICATIONS_EXCHANGE,
        subscriber::Subscriber,
    };
    use serde_json::json;

    fn publisher(broker: &InMemoryBroker) -> Publisher {
        Publisher::with_connector(RabbitMQConfigs::default(), Arc::new(broker.clone()))
    }

    fn subscriber(broker: &InMemoryBroker) -> Subscriber {
        Subscriber::with_connector(RabbitMQConfigs::default(), Arc::new(broker.clone()))
    }

    #[tokio::test]
    async fn published_message_is_received_and_acked_for_good() {
        let broker = InMemoryBroker::default();
        broker.declare("r");
        let mut publisher = publisher(&broker);
        let mut subscriber = subscriber(&broker);

        publisher.put_json(&json!({"id": 1}), "r").await.unwrap();

        let (envelope, tag) = subscriber.get(Some("r"), false).await.unwrap().unwrap();
        assert_eq!(envelope.to_value(), json!({"id": 1, "_meta": {}}));

        subscriber.ack(tag).await;
        assert!(subscriber.get(Some("r"), false).await.unwrap().is_none());
        assert_eq!(broker.unacked(), 0);

        publisher.close().await;
        subscriber.close().await;
    }

    #[tokio::test]
    async fn rejected_message_comes_back() {
        let broker = InMemoryBroker::default();
        broker.declare("r");
        let mut publisher = publisher(&broker);
        let mut subscriber = subscriber(&broker);

        publisher.put_json(&json!({"id": 2}), "r").await.unwrap();

        let (_, tag) = subscriber.get(Some("r"), false).await.unwrap().unwrap();
        subscriber.reject(tag).await;

        let (envelope, again) = subscriber.get(Some("r"), false).await.unwrap().unwrap();
        assert_eq!(envelope.payload(), &json!({"id": 2}));
        assert_ne!(again, tag);
    }

    #[tokio::test]
    async fn acking_twice_is_harmless() {
        let broker = InMemoryBroker::default();
        broker.declare("r");
        let mut publisher = publisher(&broker);
        let mut subscriber = subscriber(&broker);

        publisher.put_json(&json!({"id": 3}), "r").await.unwrap();
        let (_, tag) = subscriber.get(Some("r"), false).await.unwrap().unwrap();

        subscriber.ack(tag).await;
        subscriber.ack(tag).await;
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn subscription_receives_notifications() {
        let broker = InMemoryBroker::default();
        let mut publisher = publisher(&broker);
        let mut subscriber = subscriber(&broker);

        subscriber.subscribe("orders").await.unwrap();
        publisher
            .put(
                PublishMessage::json(&json!({"order": 7}))
                    .unwrap()
                    .exchange(NOTIFICATIONS_EXCHANGE)
                    .routing_key("orders"),
            )
            .await
            .unwrap();

        let (envelope, tag) = subscriber.get(None, false).await.unwrap().unwrap();
        assert_eq!(envelope.payload(), &json!({"order": 7}));
        subscriber.ack(tag).await;
    }

    #[tokio::test]
    async fn malformed_messages_never_reach_the_caller() {
        let broker = InMemoryBroker::default();
        broker.declare("r");
        let mut publisher = publisher(&broker);
        let mut subscriber = subscriber(&broker);

        publisher
            .put(PublishMessage::raw("{'foo': True}").routing_key("r"))
            .await
            .unwrap();

        assert!(subscriber.get(Some("r"), false).await.unwrap().is_none());
        assert_eq!(broker.ready("r"), 0);
        assert_eq!(broker.unacked(), 0);
    }

    struct Acker {
        seen: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl ConsumerHandler for Acker {
        async fn handle(
            &self,
            subscriber: &Subscriber,
            envelope: Envelope,
            delivery_tag: DeliveryTag,
        ) {
            self.seen.lock().unwrap().push(envelope);
            subscriber.ack(delivery_tag).await;
        }
    }

    #[tokio::test]
    async fn consume_loop_handles_one_message_per_call() {
        let broker = InMemoryBroker::default();
        broker.declare("jobs");
        broker.declare("alerts");
        let mut publisher = publisher(&broker);
        let mut subscriber = subscriber(&broker);

        publisher.put_json(&json!({"job": 1}), "jobs").await.unwrap();
        publisher.put_json(&json!({"alert": 1}), "alerts").await.unwrap();

        let acker = Arc::new(Acker {
            seen: Mutex::new(vec![]),
        });
        subscriber
            .setup_consumer(acker.clone(), Some(&["jobs", "alerts"][..]))
            .await
            .unwrap();

        subscriber.consume().await.unwrap();
        assert_eq!(acker.seen.lock().unwrap().len(), 1);

        subscriber.consume().await.unwrap();
        assert_eq!(
            *acker.seen.lock().unwrap(),
            vec![
                Envelope::new(json!({"job": 1})),
                Envelope::new(json!({"alert": 1}))
            ]
        );
        assert_eq!(broker.unacked(), 0);
    }
}
