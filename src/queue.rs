// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions for RabbitMQ
//!
//! This module provides the queue and binding descriptions sent to the broker, and the
//! naming of the private queues created for subscriptions.

use uuid::Uuid;

/// Exchange every subscription queue is bound to.
pub const NOTIFICATIONS_EXCHANGE: &str = "notifications";

/// Definition of a RabbitMQ queue with its declare options.
///
/// Builder style, same as the binding below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// The queue is never durable; by default it is non-exclusive and kept when unused.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// The private queue backing a subscription: non-durable, exclusive to the declaring
    /// connection and deleted together with it.
    pub fn subscription(routing_key: &str) -> QueueDefinition {
        QueueDefinition::new(&subscription_queue_name(routing_key))
            .exclusive()
            .delete()
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// The exchange name and routing key start empty.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..Default::default()
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

/// `{routing_key}_{uuid}`, unique per call.
pub fn subscription_queue_name(routing_key: &str) -> String {
    format!("{}_{}", routing_key, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_queue_is_private_and_transient() {
        let def = QueueDefinition::subscription("orders");

        assert!(def.name().starts_with("orders_"));
        assert!(def.is_exclusive());
        assert!(def.is_auto_delete());
    }

    #[test]
    fn subscription_names_are_unique() {
        assert_ne!(
            subscription_queue_name("orders"),
            subscription_queue_name("orders")
        );
    }

    #[test]
    fn binding_builder() {
        let binding = QueueBinding::new("q")
            .exchange(NOTIFICATIONS_EXCHANGE)
            .routing_key("orders");

        assert_eq!(binding.queue_name(), "q");
        assert_eq!(binding.exchange_name(), "notifications");
        assert_eq!(binding.key(), "orders");
    }
}
