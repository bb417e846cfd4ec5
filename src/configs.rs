// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Connection parameters for the broker. They are supplied once, at construction of a
//! publisher or subscriber, and never change afterwards.

use crate::errors::AmqpError;
use serde::Deserialize;
use std::{env, str::FromStr};

pub const ENV_HOST: &str = "RABBITMQ_HOST";
pub const ENV_PORT: &str = "RABBITMQ_PORT";
pub const ENV_USER: &str = "RABBITMQ_USER";
pub const ENV_PASSWORD: &str = "RABBITMQ_PASSWORD";
pub const ENV_VHOST: &str = "RABBITMQ_VHOST";
pub const ENV_HEARTBEAT: &str = "RABBITMQ_HEARTBEAT";
pub const ENV_EXCHANGE: &str = "RABBITMQ_EXCHANGE";
pub const ENV_QUEUE: &str = "RABBITMQ_QUEUE";
pub const ENV_APP_NAME: &str = "APP_NAME";

/// Broker connection parameters plus the default exchange and queue used when an
/// operation does not name one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Heartbeat interval in seconds, broker default when unset
    pub heartbeat: Option<u16>,
    pub exchange: Option<String>,
    pub queue_name: Option<String>,
    /// Name reported to the broker for the connection
    pub app_name: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            heartbeat: None,
            exchange: None,
            queue_name: None,
            app_name: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    pub fn new(host: &str, user: &str, password: &str) -> Self {
        RabbitMQConfigs {
            host: host.to_owned(),
            user: user.to_owned(),
            password: password.to_owned(),
            ..Default::default()
        }
    }

    /// Reads the configuration from `RABBITMQ_*` environment variables, keeping the
    /// defaults for the unset ones.
    pub fn from_env() -> Result<Self, AmqpError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = RabbitMQConfigs::default();

        if let Some(host) = lookup(ENV_HOST) {
            cfg.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            cfg.port = parse(ENV_PORT, &port)?;
        }
        if let Some(user) = lookup(ENV_USER) {
            cfg.user = user;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            cfg.password = password;
        }
        if let Some(vhost) = lookup(ENV_VHOST) {
            cfg.vhost = vhost;
        }
        if let Some(heartbeat) = lookup(ENV_HEARTBEAT) {
            cfg.heartbeat = Some(parse(ENV_HEARTBEAT, &heartbeat)?);
        }
        cfg.exchange = lookup(ENV_EXCHANGE).or(cfg.exchange);
        cfg.queue_name = lookup(ENV_QUEUE).or(cfg.queue_name);
        if let Some(name) = lookup(ENV_APP_NAME) {
            cfg.app_name = name;
        }

        Ok(cfg)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn vhost(mut self, vhost: &str) -> Self {
        self.vhost = vhost.to_owned();
        self
    }

    pub fn heartbeat(mut self, seconds: u16) -> Self {
        self.heartbeat = Some(seconds);
        self
    }

    /// Exchange used by `put` when the message names none.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = Some(exchange.to_owned());
        self
    }

    /// Queue used by `get` and `setup_consumer` when the caller names none.
    pub fn queue_name(mut self, queue: &str) -> Self {
        self.queue_name = Some(queue.to_owned());
        self
    }

    pub fn app_name(mut self, name: &str) -> Self {
        self.app_name = name.to_owned();
        self
    }

    /// Builds the AMQP URI for these parameters.
    pub fn uri(&self) -> String {
        let vhost = if self.vhost == "/" {
            "%2f".to_owned()
        } else {
            self.vhost.trim_start_matches('/').replace('/', "%2f")
        };

        let uri = format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        );

        match self.heartbeat {
            Some(heartbeat) => format!("{}?heartbeat={}", uri, heartbeat),
            None => uri,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, AmqpError> {
    value
        .trim()
        .parse()
        .map_err(|_| AmqpError::InvalidConfig(key.to_owned(), value.to_owned()))
}
