//! Message-broker listener.
//!
//! Concrete broker clients stay outside the core: a [`BrokerTransport`]
//! yields deliveries over a channel, and the [`BrokerListener`] dispatches
//! each delivery in the background. [`LocalBroker`] is the in-process
//! transport used by tests and single-process deployments.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Listener, Message};
use crate::config::BrokerConfig;
use crate::di::ServiceKey;
use crate::dispatcher::Dispatcher;
use crate::error::EdgeError;

/// One delivery from a broker queue.
#[derive(Debug, Clone)]
pub struct BrokerDelivery {
    pub host: String,
    pub queue: String,
    pub routing_key: Option<String>,
    pub body: Bytes,
}

/// Transport half of a broker integration. Implementations wrap a concrete
/// client library and forward deliveries into the returned channel.
pub trait BrokerTransport: Send + Sync + 'static {
    fn subscribe<'a>(
        &'a self,
        config: &'a BrokerConfig,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<BrokerDelivery>, EdgeError>> + Send + 'a>>;

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

pub struct BrokerListener {
    config: BrokerConfig,
    transport: Arc<dyn BrokerTransport>,
    dispatcher: Arc<Dispatcher>,
    token: CancellationToken,
}

impl ServiceKey for BrokerListener {}

impl BrokerListener {
    pub fn new(
        config: BrokerConfig,
        transport: Arc<dyn BrokerTransport>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            transport,
            dispatcher,
            token: CancellationToken::new(),
        }
    }
}

impl Listener for BrokerListener {
    fn name(&self) -> &'static str {
        "broker"
    }

    fn initialize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + 'a>> {
        Box::pin(async move {
            let mut deliveries = self.transport.subscribe(&self.config).await?;
            tracing::info!(url = %self.config.url, queue = ?self.config.queue, "broker listener up");

            let dispatcher = self.dispatcher.clone();
            let token = self.token.clone();
            tokio::spawn(async move {
                loop {
                    let delivery = tokio::select! {
                        _ = token.cancelled() => break,
                        delivery = deliveries.recv() => delivery,
                    };
                    let Some(delivery) = delivery else { break };
                    // Deliveries are independent; each dispatches in the
                    // background so a slow handler does not stall the queue.
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher.on_message_receive(Message::broker(delivery)).await;
                    });
                }
            });
            Ok(())
        })
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.token.cancel();
            self.transport.shutdown().await;
        })
    }
}

/// In-process broker transport: publishes land directly in subscriber
/// channels, keyed by queue name.
pub struct LocalBroker {
    host: String,
    queues: DashMap<String, mpsc::Sender<BrokerDelivery>>,
}

impl ServiceKey for LocalBroker {}

impl LocalBroker {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            queues: DashMap::new(),
        }
    }

    /// Publish a payload to a queue. Returns false when nothing is
    /// subscribed or the subscriber is gone.
    pub async fn publish(&self, queue: &str, body: impl Into<Bytes>) -> bool {
        self.publish_routed(queue, None, body).await
    }

    pub async fn publish_routed(
        &self,
        queue: &str,
        routing_key: Option<&str>,
        body: impl Into<Bytes>,
    ) -> bool {
        let Some(sender) = self.queues.get(queue).map(|entry| entry.value().clone()) else {
            return false;
        };
        sender
            .send(BrokerDelivery {
                host: self.host.clone(),
                queue: queue.to_string(),
                routing_key: routing_key.map(str::to_string),
                body: body.into(),
            })
            .await
            .is_ok()
    }
}

impl BrokerTransport for LocalBroker {
    fn subscribe<'a>(
        &'a self,
        config: &'a BrokerConfig,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<BrokerDelivery>, EdgeError>> + Send + 'a>> {
        Box::pin(async move {
            let queue = config
                .queue
                .clone()
                .or_else(|| config.exchange.clone())
                .ok_or_else(|| {
                    EdgeError::Config("broker config needs a queue or exchange".to_string())
                })?;
            let (tx, rx) = mpsc::channel(64);
            self.queues.insert(queue, tx);
            Ok(rx)
        })
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.queues.clear();
        })
    }
}
