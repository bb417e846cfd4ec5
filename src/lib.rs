// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;
#[cfg(test)]
mod testing;

pub mod channel;
pub mod codec;
pub mod configs;
pub mod consumer;
pub mod errors;
pub mod publisher;
pub mod queue;
pub mod subscriber;
pub mod transport;

pub use codec::{DeliveryTag, Envelope};
pub use configs::RabbitMQConfigs;
pub use consumer::ConsumerHandler;
pub use errors::AmqpError;
pub use publisher::{PublishMessage, Publisher};
pub use subscriber::Subscriber;
pub use transport::Transport;
