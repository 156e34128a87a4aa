//! Per-request queue consumer

use std::sync::Arc;

use async_trait::async_trait;
use eventgate::{
    CloseListener, Connection, ConnectionSupply, Consumer, ConsumerFactory, Delivery,
    DeliveryStream, Error, Metric, Result,
};
use futures::{future, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    Channel,
};

/// Queue argument for the idle lifetime, in milliseconds
const X_EXPIRES: &str = "x-expires";

/// Builds the declare arguments for a queue that expires after `secs` idle seconds
fn queue_arguments(secs: u32) -> FieldTable {
    let millis = secs.saturating_mul(1000).min(i32::MAX as u32) as i32;
    let mut args = FieldTable::default();
    args.insert(X_EXPIRES.into(), AMQPValue::LongInt(millis));
    args
}

/// One message taken from a queue, acknowledged individually
pub struct AmqpDelivery {
    inner: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.inner
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }
}

/// Declares and consumes a single queue over its own channel
pub struct AmqpConsumer {
    connection: Arc<crate::AmqpConnection>,
    expires: u32,
    metric: Arc<dyn Metric>,
    channel: Option<Channel>,
    counted: bool,
}

impl AmqpConsumer {
    pub fn new(
        connection: Arc<crate::AmqpConnection>,
        expires: u32,
        metric: Arc<dyn Metric>,
    ) -> Self {
        Self {
            connection,
            expires,
            metric,
            channel: None,
            counted: false,
        }
    }

    async fn open(&mut self, queue: &str) -> Result<lapin::Consumer> {
        let channel = self.connection.channel().await.map_err(|e| match e {
            Error::Transport(reason) => Error::Channel(reason),
            other => other,
        })?;
        self.channel = Some(channel.clone());

        let declared = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                queue_arguments(self.expires),
            )
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        if declared.consumer_count() != 0 {
            return Err(Error::QueueBusy);
        }

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn consume(&mut self, queue: &str) -> Result<DeliveryStream> {
        let consumer = self.open(queue).await?;

        self.metric.inc_consumer_count();
        self.counted = true;

        let queue = queue.to_owned();
        let deliveries = consumer
            .take_while(move |item| {
                if let Err(err) = item {
                    tracing::warn!(queue = %queue, error = %err, "consumer: delivery failed");
                }
                future::ready(item.is_ok())
            })
            .filter_map(|item| {
                future::ready(
                    item.ok()
                        .map(|inner| Box::new(AmqpDelivery { inner }) as Box<dyn Delivery>),
                )
            });

        Ok(deliveries.boxed())
    }

    fn notify(&self) -> CloseListener {
        self.connection.notify()
    }

    fn ignore(&self, listener: &CloseListener) {
        self.connection.ignore(listener)
    }

    async fn close(&mut self) -> Result<()> {
        if self.counted {
            self.counted = false;
            self.metric.dec_consumer_count();
        }

        let Some(channel) = self.channel.take() else {
            return Ok(());
        };
        if !channel.status().connected() {
            return Ok(());
        }
        channel
            .close(200, "OK")
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }
}

/// Hands out consumers bound to whichever broker node is currently healthy
pub struct AmqpConsumers {
    supply: ConnectionSupply<crate::AmqpConnection>,
    expires: u32,
    metric: Arc<dyn Metric>,
}

impl AmqpConsumers {
    pub fn new(
        supply: ConnectionSupply<crate::AmqpConnection>,
        expires: u32,
        metric: Arc<dyn Metric>,
    ) -> Self {
        Self {
            supply,
            expires,
            metric,
        }
    }
}

#[async_trait]
impl ConsumerFactory for AmqpConsumers {
    async fn consumer(&self) -> Box<dyn Consumer> {
        let connection = self.supply.acquire().await;
        Box::new(AmqpConsumer::new(connection, self.expires, self.metric.clone()))
    }
}
