use anyhow::Context;
use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::users::repo_types::User;

pub const EXCHANGE_NAME: &str = "user.events";
pub const QUEUE_NAME: &str = "user";
pub const BINDING_KEY: &str = "user.*";
pub const USER_CREATED_ROUTING_KEY: &str = "user.created";
pub const USER_UPDATED_ROUTING_KEY: &str = "user.updated";
pub const USER_DELETED_ROUTING_KEY: &str = "user.deleted";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("broker rejected message for {0}")]
    Rejected(&'static str),
    #[error("deadline elapsed before broker confirmation")]
    DeadlineElapsed,
    #[error("encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
}

/// Publishes user lifecycle events. Each call resolves only once the broker
/// has confirmed (or refused) the message, or `deadline` passes.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn user_created(&self, user: &User, deadline: Instant) -> Result<(), NotifyError>;
    async fn user_updated(&self, user: &User, deadline: Instant) -> Result<(), NotifyError>;
    async fn user_deleted(&self, id: Uuid, deadline: Instant) -> Result<(), NotifyError>;
}

pub struct RabbitNotifier {
    // Held so the connection outlives the channel.
    _conn: Connection,
    channel: Mutex<Channel>,
}

impl RabbitNotifier {
    /// Connects, declares the topic exchange and the wildcard-bound queue, and
    /// puts the channel in publisher-confirm mode.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .context("connect to broker")?;
        let channel = conn.create_channel().await.context("open channel")?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("declare exchange")?;

        let queue = channel
            .queue_declare(
                QUEUE_NAME,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("declare queue")?;

        channel
            .queue_bind(
                queue.name().as_str(),
                EXCHANGE_NAME,
                BINDING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("bind queue")?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("channel could not be put into confirm mode")?;

        info!(exchange = EXCHANGE_NAME, queue = QUEUE_NAME, "broker setup complete");

        Ok(Self {
            _conn: conn,
            channel: Mutex::new(channel),
        })
    }

    /// Publishes and waits for the matching confirmation. The channel lock is
    /// held across both steps so confirmations pair with their publish.
    async fn publish_and_confirm(
        &self,
        routing_key: &'static str,
        body: Vec<u8>,
        deadline: Instant,
    ) -> Result<(), NotifyError> {
        let attempt = async {
            let channel = self.channel.lock().await;
            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_timestamp(OffsetDateTime::now_utc().unix_timestamp() as u64);
            let confirm = channel
                .basic_publish(
                    EXCHANGE_NAME,
                    routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await?
                .await?;
            Ok::<_, NotifyError>(confirm)
        };

        match tokio::time::timeout_at(deadline, attempt).await {
            Err(_) => Err(NotifyError::DeadlineElapsed),
            Ok(Err(e)) => Err(e),
            Ok(Ok(Confirmation::Nack(_))) => Err(NotifyError::Rejected(routing_key)),
            Ok(Ok(_)) => {
                debug!(routing_key, "message acked");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl UserNotifier for RabbitNotifier {
    async fn user_created(&self, user: &User, deadline: Instant) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(user)?;
        self.publish_and_confirm(USER_CREATED_ROUTING_KEY, body, deadline)
            .await
    }

    async fn user_updated(&self, user: &User, deadline: Instant) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(user)?;
        self.publish_and_confirm(USER_UPDATED_ROUTING_KEY, body, deadline)
            .await
    }

    async fn user_deleted(&self, id: Uuid, deadline: Instant) -> Result<(), NotifyError> {
        // a bare JSON string
        let body = serde_json::to_vec(&id)?;
        self.publish_and_confirm(USER_DELETED_ROUTING_KEY, body, deadline)
            .await
    }
}
