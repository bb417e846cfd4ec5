// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # JSON Message Codec
//!
//! Outbound values are written as JSON text. Inbound bodies are parsed back into an
//! [`Envelope`]; an object `_meta` field of object payloads is lifted into the envelope
//! metadata, any other `_meta` value stays in the payload. A body that cannot be parsed
//! is a [`PoisonMessage`]: callers acknowledge it and drop it, it never reaches business
//! code.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Debug};
use thiserror::Error;

/// Field of object payloads that carries the message metadata.
pub const META_FIELD: &str = "_meta";

/// Broker-assigned handle of one unacknowledged delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    pub fn new(tag: u64) -> Self {
        DeliveryTag(tag)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    payload: Value,
    metadata: Map<String, Value>,
}

impl Envelope {
    pub fn new(payload: Value) -> Self {
        Envelope {
            payload,
            metadata: Map::new(),
        }
    }

    /// The message body, without the metadata field.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Deserializes the payload into a concrete type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// The message as it travels on the wire: object payloads get the metadata back under
    /// `_meta` unless they carry their own, other values are returned as is.
    pub fn to_value(&self) -> Value {
        match &self.payload {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                fields
                    .entry(META_FIELD)
                    .or_insert_with(|| Value::Object(self.metadata.clone()));
                Value::Object(fields)
            }
            other => other.clone(),
        }
    }
}

/// An inbound body that could not be turned into an [`Envelope`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("poison message: {reason}")]
pub struct PoisonMessage {
    pub reason: String,
}

/// Serializes `value` as JSON text.
pub fn encode<T>(value: &T) -> Result<Vec<u8>, AmqpError>
where
    T: Serialize + Debug + ?Sized,
{
    serde_json::to_vec(value).map_err(|err| AmqpError::SerializationError {
        reason: err.to_string(),
        payload: format!("{:?}", value),
    })
}

/// Parses an inbound body.
pub fn decode(body: &[u8]) -> Result<Envelope, PoisonMessage> {
    let value: Value = serde_json::from_slice(body).map_err(|err| PoisonMessage {
        reason: err.to_string(),
    })?;

    let Value::Object(mut fields) = value else {
        return Ok(Envelope::new(value));
    };

    let metadata = match fields.remove(META_FIELD) {
        None => Map::new(),
        Some(Value::Object(metadata)) => metadata,
        // not metadata, just a field with the same name
        Some(other) => {
            fields.insert(META_FIELD.to_owned(), other);
            Map::new()
        }
    };

    Ok(Envelope {
        payload: Value::Object(fields),
        metadata,
    })
}
