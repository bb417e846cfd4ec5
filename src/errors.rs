// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Queue Client
//!
//! This module provides the error taxonomy shared by the transport, the publisher and the
//! subscriber. Errors coming from the broker client are mapped at the channel seam into
//! operation-specific variants; those are the *transient* errors the transport retries.
//! Everything else is raised to the caller untouched.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// The broker-side variants carry the text of the underlying client error, so the value
/// stays cheap to clone and compare in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`: {2}")]
    BindingExchangeToQueueError(String, String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer on `{0}`: {1}")]
    BindingConsumerError(String, String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error fetching a message with basic.get
    #[error("failure to get a message from `{0}`: {1}")]
    GetMessageError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos: {0}")]
    QoSDeclarationError(String),

    /// Error receiving a delivery from the registered consumers
    #[error("failure to consume message: {0}")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message: {0}")]
    AckMessageError(String),

    /// Error rejecting a message
    #[error("failure to reject message: {0}")]
    RejectMessageError(String),

    /// Error closing the connection
    #[error("failure to close the connection: {0}")]
    CloseError(String),

    /// The retry bound was exhausted; wraps the error of the last attempt
    #[error("connection failure after {attempts} attempts: {source}")]
    ConnectionFailure {
        attempts: usize,
        #[source]
        source: Box<AmqpError>,
    },

    /// The payload could not be encoded as JSON
    #[error("failure to serialize payload: {reason}")]
    SerializationError { reason: String, payload: String },

    /// No queue name was given and no default queue is configured
    #[error("no queue name given and no default queue configured")]
    MissingQueueName,

    /// `consume` was called before `setup_consumer`
    #[error("no consumer was configured on this subscriber")]
    ConsumerNotConfigured,

    /// Configuration value could not be parsed
    #[error("invalid configuration `{0}`: {1}")]
    InvalidConfig(String, String),
}

impl AmqpError {
    /// Whether the error came from the broker or the link to it, so that reconnecting and
    /// trying again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AmqpError::ConnectionError(_)
                | AmqpError::ChannelError(_)
                | AmqpError::DeclareQueueError(..)
                | AmqpError::BindingExchangeToQueueError(..)
                | AmqpError::BindingConsumerError(..)
                | AmqpError::PublishingError(_)
                | AmqpError::GetMessageError(..)
                | AmqpError::QoSDeclarationError(_)
                | AmqpError::ConsumerError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn broker_errors_are_transient() {
        assert!(AmqpError::ConnectionError("refused".to_owned()).is_transient());
        assert!(AmqpError::PublishingError("broken pipe".to_owned()).is_transient());
        assert!(AmqpError::GetMessageError("q".to_owned(), "404".to_owned()).is_transient());
    }

    #[test]
    fn caller_errors_are_not_transient() {
        let serialization = AmqpError::SerializationError {
            reason: "key must be a string".to_owned(),
            payload: "{[1]: 2}".to_owned(),
        };
        assert!(!serialization.is_transient());
        assert!(!AmqpError::MissingQueueName.is_transient());
        assert!(!AmqpError::ConsumerNotConfigured.is_transient());
    }

    #[test]
    fn connection_failure_is_final_and_keeps_its_cause() {
        let err = AmqpError::ConnectionFailure {
            attempts: 3,
            source: Box::new(AmqpError::PublishingError("broken pipe".to_owned())),
        };

        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "connection failure after 3 attempts: failure to publish: broken pipe"
        );
        assert_eq!(
            err.source().map(|e| e.to_string()),
            Some("failure to publish: broken pipe".to_owned())
        );
    }

    #[test]
    fn serialization_error_displays_the_cause() {
        let err = AmqpError::SerializationError {
            reason: "Some random error".to_owned(),
            payload: "value".to_owned(),
        };
        assert_eq!(err.to_string(), "failure to serialize payload: Some random error");
    }
}
