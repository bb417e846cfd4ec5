// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Handlers registered with [`Subscriber::setup_consumer`] implement [`ConsumerHandler`].
//! Every delivery is decoded before the handler sees it; malformed deliveries are acked
//! and dropped here. The handler owns the outcome of everything else: it receives the
//! subscriber so it can `ack` or `reject` the delivery tag itself.

use crate::{
    channel::RawMessage,
    codec::{DeliveryTag, Envelope},
    otel,
    subscriber::Subscriber,
};
use async_trait::async_trait;
use opentelemetry::{
    context::FutureExt,
    global::{self, BoxedTracer},
    trace::{Status, TraceContextExt},
};
use std::borrow::Cow;
use tracing::debug;

/// Business callback for consumed messages.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Handles one decoded delivery.
    ///
    /// Runs under the trace context of the publisher, with the consumer span active.
    ///
    /// # Parameters
    /// * `subscriber` - The subscriber that received the delivery, to `ack` or `reject` it
    /// * `envelope` - The decoded message
    /// * `delivery_tag` - Tag to settle the delivery with
    async fn handle(
        &self,
        subscriber: &Subscriber,
        envelope: Envelope,
        delivery_tag: DeliveryTag,
    );
}

/// Decodes `message` and hands it to `handler`, inside a consumer span carrying the
/// publisher's trace context.
pub(crate) async fn dispatch(
    subscriber: &Subscriber,
    handler: &dyn ConsumerHandler,
    message: RawMessage,
) {
    let tracer: BoxedTracer = global::tracer("amqp consumer");
    let (parent, span) = otel::new_span(&message.properties, &tracer, &message.routing_key);
    let ctx = parent.with_span(span);

    debug!(
        delivery_tag = message.delivery_tag.value(),
        routing_key = message.routing_key.as_str(),
        "received message"
    );

    let Some(envelope) = subscriber.transport().parse_message(&message).await else {
        ctx.span().set_status(Status::Error {
            description: Cow::from("malformed message removed from queue"),
        });
        return;
    };

    handler
        .handle(subscriber, envelope, message.delivery_tag)
        .with_context(ctx.clone())
        .await;
    ctx.span().set_status(Status::Ok);
}
